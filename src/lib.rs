pub mod app;
pub mod config;
pub mod membership;
pub mod state;
