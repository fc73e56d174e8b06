pub mod config;
pub mod error;
pub mod ranking;
pub mod store;
pub mod telemetry;
