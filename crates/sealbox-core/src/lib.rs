pub mod config;
pub mod error;
pub mod process;
pub mod types;

pub use error::{SealError, SealResult};
