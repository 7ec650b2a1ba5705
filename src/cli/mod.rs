pub mod commands;
pub mod options;
pub mod output;

pub use commands::execute;
pub use options::{BuildArgs, CacheAction, Commands, ContractForgeCli, ProjectArgs};
