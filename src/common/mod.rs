pub mod config;
pub mod error;
pub(crate) mod kind;
pub mod random;

pub use config::Config;
