pub mod commands;
pub mod config;
pub mod speech;

pub use self::commands::*;
pub use self::config::*;
pub use self::speech::*;
