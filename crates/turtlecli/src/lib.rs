#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod errors;
pub mod models;
pub mod query;
pub mod render;
pub mod report;
pub mod scanlog;
pub mod store;
pub mod utils;

pub use cli::app::{Cli, Command};
