pub mod config;
pub mod token;
pub mod types;

pub use config::Config;
pub use token::RunToken;
pub use types::*;
