pub mod config;
pub mod cost;
pub mod error;
pub mod types;

pub use config::Config;
pub use cost::*;
pub use error::OpenAidError;
pub use types::*;
