//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for the storage tool
#[derive(Debug, Parser)]
#[command(name = "torrent-storage")]
#[command(about = "Create and verify piece-addressed torrent content", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// JSON storage configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Hash a file or directory into a content descriptor
    Create {
        /// File or directory to describe
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Piece length in bytes
        #[arg(short = 'l', long)]
        piece_length: Option<u64>,

        /// Torrent name (defaults to the file or directory name)
        #[arg(short, long)]
        name: Option<String>,

        /// Write the descriptor here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Verify content on disk against a descriptor.
    ///
    /// Every content file must already exist. Verification extends short files
    /// to their layout length and records piece completion under the data
    /// directory.
    Verify {
        /// Descriptor produced by `create`
        #[arg(value_name = "INFO")]
        info: PathBuf,

        /// Directory holding the torrent content
        #[arg(short, long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create() {
        let args = CliArgs::try_parse_from([
            "torrent-storage",
            "create",
            "data",
            "-l",
            "65536",
            "-o",
            "out.json",
        ])
        .unwrap();
        match &args.command {
            Command::Create {
                path,
                piece_length,
                output,
                name,
            } => {
                assert_eq!(*path, PathBuf::from("data"));
                assert_eq!(*piece_length, Some(65536));
                assert_eq!(*output, Some(PathBuf::from("out.json")));
                assert_eq!(*name, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(args.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_parse_verify_with_global_flags() {
        let args =
            CliArgs::try_parse_from(["torrent-storage", "verify", "info.json", "-d", "/srv", "-v"])
                .unwrap();
        assert!(args.is_verbose());
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
        assert!(matches!(args.command, Command::Verify { dir: Some(_), .. }));
    }

    #[test]
    fn test_quiet_level() {
        let args = CliArgs::try_parse_from(["torrent-storage", "-q", "verify", "i.json"]).unwrap();
        assert!(args.is_quiet());
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
