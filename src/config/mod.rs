//! Application configuration
//!
//! Defaults live in [`schema`]; [`AppConfig::from_env`] applies the `PI_*`
//! environment overrides on top.

mod env;
pub mod schema;

pub use schema::*;
