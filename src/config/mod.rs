//! Configuration loading and types.

pub mod env;
pub mod types;
pub mod validate;

pub use env::load_from_env;