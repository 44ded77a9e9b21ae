pub mod app;
pub mod cli;
pub mod config;
pub mod estimate;
pub mod input;
pub mod overhead;
pub mod platform;
pub mod session;
pub mod transcript;
pub mod ui;
pub mod util;
