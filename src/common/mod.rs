pub mod config;
pub mod dropout;
pub mod error;
pub(crate) mod kind;
pub mod lstm;
pub mod resources;

pub use config::Config;
