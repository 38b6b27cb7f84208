pub mod components;
pub mod config;
pub mod error;
pub mod reconcilers;

pub use self::error::{Error, Result};
