pub mod alert;
pub mod config;
pub mod connector;
pub mod error;

pub use alert::*;
pub use config::Config;
pub use connector::*;
pub use error::*;
