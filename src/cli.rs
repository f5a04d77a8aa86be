//! Clap definitions shared by the daemon and the client binary

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Options for `foldershared`. Anything left unset falls back to the config file.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Serve a folder to foldershare clients")]
pub struct DaemonOpts {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Interface to bind
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory to share (created if missing)
    #[arg(short, long)]
    pub folder: Option<PathBuf>,

    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Append server events to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Per-session socket timeout in milliseconds (0 = none)
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    /// More diagnostics on stderr (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Browse and transfer files in a shared folder")]
pub struct ClientOpts {
    /// Server host
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,

    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// List files in the shared folder
    #[command(alias = "list")]
    Ls,
    /// Download a file
    Get {
        name: String,
        /// Destination path (defaults to the name inside the download dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload a local file
    Put { path: PathBuf },
    /// Delete a file from the shared folder
    #[command(alias = "delete")]
    Rm { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_flags_parse() {
        let opts = DaemonOpts::parse_from(["foldershared", "-p", "7000", "--folder", "/srv/share", "-vv"]);
        assert_eq!(opts.port, Some(7000));
        assert_eq!(opts.folder, Some(PathBuf::from("/srv/share")));
        assert_eq!(opts.verbose, 2);
        assert!(opts.config.is_none());
    }

    #[test]
    fn client_subcommands_parse() {
        let opts = ClientOpts::parse_from(["foldershare", "--host", "nas", "get", "a.txt", "-o", "/tmp/a"]);
        assert_eq!(opts.host.as_deref(), Some("nas"));
        match opts.command {
            ClientCommand::Get { name, output } => {
                assert_eq!(name, "a.txt");
                assert_eq!(output, Some(PathBuf::from("/tmp/a")));
            }
            other => panic!("unexpected {other:?}"),
        }
        let opts = ClientOpts::parse_from(["foldershare", "delete", "b.txt"]);
        assert!(matches!(opts.command, ClientCommand::Rm { .. }));
    }
}
