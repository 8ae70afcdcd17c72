mod commands;

pub use commands::{Cli, Commands, LogFormat, MediaCommands, TokenArgs, TokenCommands};
