pub mod bridge;
pub mod config;
pub mod devices;
pub mod domain;
pub mod engine;
pub mod events;
pub mod persist;
pub mod solar;
pub mod telemetry;
pub mod weather;
