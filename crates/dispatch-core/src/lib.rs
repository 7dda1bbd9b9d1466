pub mod config;
pub mod error;
pub mod subscription;
pub mod types;

pub use error::{DispatchError, Result};
