//! CLI interface using clap.
//!
//! Provides command-line arguments and subcommands for the tool.

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

use crate::application::OutputFormat;

/// Prompt Gallery - ordered store of generated images.
///
/// Commands talk to a running server unless --local is given.
#[derive(Parser, Debug)]
#[command(name = "prompt-gallery")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.prompt-gallery/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Open the SQLite database directly instead of calling the server.
    #[arg(long, global = true)]
    pub local: bool,

    /// Output format: table or json.
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server over the local database.
    Serve,

    /// List images in display order.
    List {
        /// Only images marked for the gallery.
        #[arg(short, long)]
        gallery: bool,
    },

    /// Save an image reference with its prompt.
    Add {
        /// Image URL or data URL.
        image_url: String,

        /// Prompt that produced the image.
        prompt: String,

        /// Mark the image for the gallery.
        #[arg(short, long)]
        gallery: bool,
    },

    /// Move an image from one position to another (1-based, as listed).
    Move {
        /// Current position.
        from: usize,

        /// Target position.
        to: usize,

        /// Positions refer to the gallery listing.
        #[arg(short, long)]
        gallery: bool,
    },

    /// Set the full display order by id.
    Reorder {
        /// Every listed id, in the desired order (8-char prefixes work).
        #[arg(required = true)]
        ids: Vec<String>,

        /// Ids refer to the gallery listing.
        #[arg(short, long)]
        gallery: bool,
    },

    /// Delete an image by id.
    Delete {
        /// Image ID (full or 8-char prefix).
        id: String,
    },

    /// Add an image to or remove it from the gallery.
    #[command(group(ArgGroup::new("flag").required(true).args(["on", "off"])))]
    Gallery {
        /// Image ID (full or 8-char prefix).
        id: String,

        /// Mark for the gallery.
        #[arg(long)]
        on: bool,

        /// Remove from the gallery.
        #[arg(long)]
        off: bool,
    },

    /// Generate an image for a prompt.
    Generate {
        /// Text prompt.
        prompt: String,

        /// Model as owner/name or owner/name:version.
        #[arg(short, long)]
        model: Option<String>,

        /// Save the result to the store.
        #[arg(short, long)]
        save: bool,

        /// Mark the saved image for the gallery (implies --save).
        #[arg(short, long)]
        gallery: bool,
    },

    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show data, config and database locations.
    Paths,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write the default config file if missing.
    Init,

    /// Print the effective configuration.
    Show,
}

impl Cli {
    /// Parse the output format from string.
    pub fn output_format(&self) -> Result<OutputFormat, String> {
        self.format.parse()
    }
}
