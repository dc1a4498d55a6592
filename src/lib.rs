pub mod browser;
pub mod calendar;
pub mod checker;
pub mod cli;
pub mod config;
pub mod error;
pub mod fmt;
pub mod logging;
pub mod notify;
pub mod utils;
