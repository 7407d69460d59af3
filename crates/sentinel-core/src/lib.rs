pub mod assist;
pub mod config;
pub mod grooming;
pub mod listeners;
pub mod log_store;

pub const DEFAULT_ENGINE_HOST: &str = "127.0.0.1";
pub const DEFAULT_ENGINE_PORT: u16 = 3000;

pub use assist::*;
pub use config::*;
pub use grooming::*;
pub use listeners::*;
pub use log_store::*;
