pub mod api;
pub mod automation_config;
pub mod client;
pub mod controllers;
pub mod scram;
pub mod util;
pub mod workload;
