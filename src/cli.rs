//! Command-line interface definition using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Local-first chat-log analytics: import LINE, QQ and WeChat exports
/// into a queryable corpus and compute activity statistics.
#[derive(Parser, Debug)]
#[command(name = "chatlens")]
#[command(version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    chatlens import line_chat.txt
    chatlens import qq_dump.txt --tz-offset 28800
    chatlens list
    chatlens stats activity line-1a2b3c4d
    chatlens stats streaks line-1a2b3c4d --from 2025-01-01 --to 2025-02-01
    chatlens sql line-1a2b3c4d \"SELECT COUNT(*) FROM message\"")]
pub struct Args {
    /// Path to the corpus database
    #[arg(long, global = true, default_value = "chatlens.db")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a chat export file
    Import {
        /// Path to the export file
        input: PathBuf,

        /// Timezone offset in seconds for wall-clock timestamps
        /// (default: host local zone)
        #[arg(long, value_name = "SECS")]
        tz_offset: Option<i32>,

        /// Messages per write batch
        #[arg(long, default_value_t = 500)]
        batch_size: usize,
    },

    /// List imported corpora
    List,

    /// Run an analysis over a corpus
    Stats {
        /// Which analysis to run
        #[arg(value_enum)]
        analysis: Analysis,

        /// Corpus id (see `chatlens list`)
        corpus: String,

        /// Only messages on or after this date (YYYY-MM-DD, UTC)
        #[arg(long, value_name = "DATE")]
        from: Option<String>,

        /// Only messages before this date (YYYY-MM-DD, UTC)
        #[arg(long, value_name = "DATE")]
        to: Option<String>,
    },

    /// Run a read-only SQL query against the corpus store
    Sql {
        /// Corpus id (see `chatlens list`)
        corpus: String,

        /// A single SELECT statement
        query: String,
    },
}

/// Available analyses
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Analysis {
    /// Per-member message counts and shares
    Activity,
    /// Per-day top talker
    #[value(alias = "dragon")]
    DragonKing,
    /// Monologue streaks
    Streaks,
    /// Repeat chains
    #[value(alias = "repeat")]
    Chains,
    /// Per-member catchphrases
    Catchphrases,
    /// Conversation sessions
    Sessions,
}

impl std::fmt::Display for Analysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Analysis::Activity => write!(f, "activity"),
            Analysis::DragonKing => write!(f, "dragon-king"),
            Analysis::Streaks => write!(f, "streaks"),
            Analysis::Chains => write!(f, "chains"),
            Analysis::Catchphrases => write!(f, "catchphrases"),
            Analysis::Sessions => write!(f, "sessions"),
        }
    }
}
