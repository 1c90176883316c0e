pub mod config;
pub mod domain;
pub mod executor;
pub mod scheduler;
pub mod sim;
pub mod telemetry;
