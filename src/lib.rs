pub mod api;
pub mod bootstrap;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod processor;
pub mod producer;
pub mod telemetry;
pub mod utils;
