use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "taxa")]
#[command(
    author,
    version,
    about = "Build and query local SQLite datasets of iNaturalist taxa"
)]
#[command(after_help = "Examples:
  taxa sync taxa.toml
  taxa breakdown Asteraceae --levels subfamily,tribe --region bay_area
  taxa query \"SELECT scientific_name FROM taxa WHERE genus = 'Aster'\"
  taxa info")]
pub struct Config {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rebuild the dataset described by a config file
    #[command(after_help = "Examples:
  taxa sync                       # Use ./taxa.toml
  taxa sync flora.toml --dry-run  # Show what would be fetched
  taxa sync --timeout 3600        # Give up after an hour")]
    Sync {
        /// Path to the TOML configuration file
        #[arg(value_name = "CONFIG", default_value = "taxa.toml")]
        config: PathBuf,

        /// Abort the sync after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Print the plan without fetching or writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Run SQL against the dataset, or open the sqlite3 shell
    #[command(after_help = "Examples:
  taxa query \"SELECT COUNT(*) FROM taxa\"
  taxa query                      # Interactive sqlite3 session")]
    Query {
        /// SQL statement to execute
        sql: Option<String>,

        #[command(flatten)]
        db: DatabaseArgs,

        /// Output format (defaults to table on a terminal, CSV otherwise)
        #[arg(short, long)]
        format: Option<OutputFormat>,
    },
    /// Observation and species counts below a taxon, by rank
    #[command(after_help = "Examples:
  taxa breakdown Asteraceae                     # Next populated rank
  taxa breakdown Asteraceae --levels subfamily,tribe
  taxa breakdown Rosa --rank genus --levels species")]
    Breakdown {
        /// Taxon name, as stored in one of the rank columns
        taxon: String,

        /// Rank of the taxon, when its name appears at more than one
        #[arg(short, long)]
        rank: Option<String>,

        /// Comma-separated ranks to break down by
        #[arg(short, long, value_delimiter = ',')]
        levels: Vec<String>,

        /// Count only observations from this region key
        #[arg(long)]
        region: Option<String>,

        #[command(flatten)]
        db: DatabaseArgs,

        #[arg(short, long)]
        format: Option<OutputFormat>,
    },
    /// Stream every taxon below a root taxon from the API
    Descendants {
        /// iNaturalist taxon ID
        taxon_id: i64,

        /// Stop after this many taxa
        #[arg(short, long)]
        limit: Option<usize>,

        /// Page size (1-200)
        #[arg(long, default_value = "200")]
        per_page: u32,

        #[arg(short, long)]
        format: Option<OutputFormat>,
    },
    /// Show dataset statistics
    Info {
        #[command(flatten)]
        db: DatabaseArgs,
    },
    /// Manage shell completions
    Completion {
        #[command(subcommand)]
        action: CompletionAction,
    },
}

/// Shell completion subcommands
#[derive(Subcommand, Debug)]
pub enum CompletionAction {
    /// Rebuild the completion cache from a dataset
    GenerateCache {
        #[command(flatten)]
        db: DatabaseArgs,
    },
    /// Install shell completion for zsh and build an initial cache
    #[command(after_help = "Add the printed directory to fpath in ~/.zshrc:
  fpath=(~/.config/taxa/completions $fpath)
  autoload -Uz compinit && compinit")]
    Install {
        #[command(flatten)]
        db: DatabaseArgs,
    },
}

/// Location of a published dataset.
#[derive(clap::Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// SQLite dataset to read
    #[arg(short, long, env = "TAXA_DATABASE", default_value = "flora.db")]
    pub database: PathBuf,
}

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned table
    Table,
    /// CSV (comma-separated values)
    Csv,
}
