pub mod config;
pub mod error;

pub use config::TaleforgeConfig;
pub use error::{Result, TaleforgeError};
