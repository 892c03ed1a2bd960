use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Interpreter for the PROG scripting language")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Source file to run; starts the REPL when omitted
    pub file: Option<PathBuf>,
}

impl Args {
    /// Resolves the bare `prog [FILE]` form into an explicit command.
    pub fn into_command(self) -> Commands {
        match (self.command, self.file) {
            (Some(command), _) => command,
            (None, Some(file)) => Commands::Run { file },
            (None, None) => Commands::Repl,
        }
    }
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Run a source file
    Run {
        /// Path to the source file
        file: PathBuf,
    },

    /// Check a source file for syntax errors without running it
    Check {
        /// Path to the source file to check
        file: PathBuf,

        /// Print the parsed syntax tree
        #[arg(long)]
        ast: bool,
    },

    /// Start an interactive REPL session
    Repl,
}
