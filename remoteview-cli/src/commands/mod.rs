//! CLI command implementations

mod config;
mod devices;
mod run;

pub use config::{config, ConfigArgs};
pub use devices::devices;
pub use run::{run, RunArgs};
