//! Output formatting for image records.
//!
//! Supports a table view for people and JSON for scripts.

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};

use crate::domain::ordering::is_contiguous;
use crate::domain::{AppConfig, ImageRecord, Scope};

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Compact table listing.
    #[default]
    Table,
    /// JSON format for programmatic use.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {s}. Use: table, json")),
        }
    }
}

/// Formats records as a numbered table, positions starting at 1.
pub fn format_images_table(images: &[ImageRecord]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "ID", "Order", "Gallery", "Created", "Prompt", "Image"]);

    for (position, image) in images.iter().enumerate() {
        table.add_row(vec![
            (position + 1).to_string(),
            short_id(&image.id).to_string(),
            image.order_index.to_string(),
            if image.is_gallery { "★" } else { "" }.to_string(),
            image.created_at.format("%Y-%m-%d %H:%M").to_string(),
            truncate(&image.prompt, 40),
            describe_url(&image.image_url),
        ]);
    }

    table.to_string()
}

/// Formats records as JSON.
///
/// # Errors
/// Returns error if serialization fails.
pub fn format_images_json(images: &[ImageRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(images)
}

/// One-line summary printed under a listing.
pub fn format_summary(images: &[ImageRecord], scope: Scope) -> String {
    let starred = images.iter().filter(|i| i.is_gallery).count();
    let mut out = format!(
        "{} {} image(s), {} in gallery ({})",
        "🖼".bold(),
        images.len().to_string().cyan(),
        starred.to_string().yellow(),
        scope
    );
    // Gallery views always skip indexes held by unstarred images.
    if scope == Scope::All && !is_contiguous(images) {
        out.push_str(&format!(", {}", "order has gaps".dimmed()));
    }
    out
}

/// Formats the resolved file locations.
pub fn format_paths(config: &AppConfig) -> String {
    let db_source = if std::env::var_os(crate::domain::config::DB_PATH_ENV).is_some() {
        "env".yellow()
    } else {
        "config".green()
    };

    format!(
        "{}\n\n  Data dir: {}\n  Config:   {}\n  Database: {} [{}]\n  Server:   {}",
        "📂 Prompt Gallery Paths".bold(),
        config.data_dir().display(),
        config.config_file_path().display(),
        config.db_path().display(),
        db_source,
        config.client.base_url
    )
}

/// First eight characters of an id, enough to tell records apart.
fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(end, _)| &id[..end])
}

/// Inline data URLs are replaced by their media type and size.
fn describe_url(url: &str) -> String {
    match url.strip_prefix("data:") {
        Some(rest) => {
            let media = rest.split([';', ',']).next().unwrap_or_default();
            format!("inline {media} ({} KiB)", url.len() / 1024)
        }
        None => truncate(url, 48),
    }
}

/// Truncates a string to max length with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    let s = s.lines().next().unwrap_or(s);
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
