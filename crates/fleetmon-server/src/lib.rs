pub mod api;
pub mod app;
pub mod config;
pub mod governor;
pub mod logging;
pub mod middleware;
pub mod normalize;
pub mod state;
pub mod token;
