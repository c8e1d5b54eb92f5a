pub mod config;
pub mod errors;
pub mod metrics;
pub mod secret;
pub mod telemetry;
