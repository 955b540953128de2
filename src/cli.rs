use clap::{Parser, Subcommand};
use reelscrape_common::MediaKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reelscrape")]
#[command(author, version, about = "Metadata scrape orchestration for media libraries")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON catalogue of static providers to register
    #[arg(long, global = true)]
    pub fixtures: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered providers and what they can supply
    Providers,

    /// Search one provider for candidates
    Search {
        /// Provider to query
        #[arg(short, long)]
        provider: String,

        /// Media kind to search for (movie, tv_show, artist, ...)
        #[arg(short, long, default_value = "movie")]
        kind: MediaKind,

        /// Release year hint
        #[arg(short, long)]
        year: Option<u16>,

        /// Locale to query in (defaults to the engine locale)
        #[arg(long)]
        locale: Option<String>,

        /// Title or id to look up
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Scrape every item of a JSON manifest
    Scrape {
        /// Manifest file: a JSON array of media items
        #[arg(short, long)]
        items: PathBuf,

        /// Directory to write one JSON record per item into
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Take every supported field from this provider instead of the
        /// configured custom scraper
        #[arg(short, long)]
        provider: Option<String>,

        /// Print item results as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
