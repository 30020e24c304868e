pub mod config;
pub mod types;

pub use config::SummitConfig;
pub use types::*;
