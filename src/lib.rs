pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod probe;
pub mod profile;
pub mod recorder;
pub mod sender;
pub mod sim;
pub mod target;
pub mod telemetry;
pub mod utils;
pub mod wire;
