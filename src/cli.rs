use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Subtitle job queue for a home media library", long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker loop until interrupted
    Serve,

    /// List directories and videos below the media root
    Scan {
        /// Subdirectory relative to the media root
        #[arg(default_value = "")]
        subdirectory: String,

        /// Only show videos without any subtitle
        #[arg(long)]
        missing: bool,
    },

    /// List videos recorded by earlier scans
    Library {
        /// Only videos below this subdirectory of the media root
        directory: Option<String>,

        /// Only videos without any subtitle
        #[arg(long, conflicts_with = "subtitled")]
        missing: bool,

        /// Only videos that already have a subtitle
        #[arg(long)]
        subtitled: bool,

        /// Only videos lacking a subtitle in the target language
        #[arg(long)]
        untranslated: bool,
    },

    /// List subdirectories of the media root
    Subdirs {
        /// Maximum depth to descend
        #[arg(short, long, default_value = "3")]
        depth: usize,
    },

    /// Queue videos for subtitle generation
    Enqueue {
        /// Video files to queue
        paths: Vec<PathBuf>,

        /// Queue every video lacking subtitles under this subdirectory of the media root
        #[arg(long)]
        missing_in: Option<String>,
    },

    /// List jobs
    List {
        /// Only jobs with this status
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show one job and its error history
    Show {
        id: i64,
    },

    /// Send a failed job back to the queue
    Retry {
        id: i64,
    },

    /// Pause one job, or the whole queue when no id is given
    Pause {
        id: Option<i64>,
    },

    /// Resume one job, or the whole queue when no id is given
    Resume {
        id: Option<i64>,
    },

    /// Delete a job that is not being processed
    Delete {
        id: i64,
    },

    /// Remove done and failed jobs
    Clear,

    /// Inspect or write configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the active configuration as TOML (the stored one when no file is given)
    Show,

    /// Write the default configuration to a file
    Init {
        /// Destination file
        #[arg(default_value = "config.toml")]
        output: PathBuf,
    },

    /// Check that the translation provider is reachable
    CheckProvider,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_pause_with_and_without_id() {
        let args = Args::try_parse_from(["subforge", "pause"]).unwrap();
        assert!(matches!(args.command, Commands::Pause { id: None }));

        let args = Args::try_parse_from(["subforge", "-v", "pause", "7"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Commands::Pause { id: Some(7) }));
    }

    #[test]
    fn test_parses_enqueue() {
        let args = Args::try_parse_from(["subforge", "enqueue", "/m/a.mkv", "/m/b.mkv"]).unwrap();
        match args.command {
            Commands::Enqueue { paths, missing_in } => {
                assert_eq!(paths.len(), 2);
                assert!(missing_in.is_none());
            }
            _ => panic!("expected enqueue"),
        }

        let args = Args::try_parse_from(["subforge", "enqueue", "--missing-in", "Movies"]).unwrap();
        assert!(matches!(args.command, Commands::Enqueue { missing_in: Some(_), .. }));
    }

    #[test]
    fn test_library_filters_conflict() {
        let args = Args::try_parse_from(["subforge", "library", "TV", "--untranslated"]).unwrap();
        assert!(matches!(
            args.command,
            Commands::Library { directory: Some(_), untranslated: true, missing: false, .. }
        ));

        assert!(Args::try_parse_from(["subforge", "library", "--missing", "--subtitled"]).is_err());
    }
}
