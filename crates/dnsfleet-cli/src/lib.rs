mod cli;
pub mod error;
mod init;

pub use cli::{exec, Cli};
