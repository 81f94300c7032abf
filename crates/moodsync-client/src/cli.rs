use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "moodsync-sync")]
#[command(about = "Keeps the local mood journal in sync with the server")]
pub struct Cli {
    /// Defaults to `run`.
    #[command(subcommand)]
    pub cmd: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Keep the local store in sync until Ctrl+C
    Run,
    /// Turn sync on, then run
    Enable,
    /// Turn sync off
    Disable,
    /// Store an entry, then run
    Record {
        /// Day in YYYY-MM-DD form
        date: String,
        emojis: Vec<String>,
    },
    /// Print sync state as JSON
    Status,
    /// Erase all local data
    Wipe,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.cmd.unwrap_or(Command::Run)
    }
}
