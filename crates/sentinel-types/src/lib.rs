pub mod assist;
pub mod log;
pub mod provider;

pub use assist::*;
pub use log::*;
pub use provider::*;
