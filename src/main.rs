//! Prompt Gallery - an ordered store of prompt-generated images.
//!
//! Serves a small JSON API over a `SQLite` database and drives it from the
//! command line with optimistic, store-confirmed edits.
//!
//! QUICK START:
//!   prompt-gallery serve                       # Run the API on 127.0.0.1:3080
//!   prompt-gallery list                        # Images in display order
//!   prompt-gallery move 3 1                    # Drag the third image to the top
//!   prompt-gallery gallery <id> --on           # Feature an image
//!   prompt-gallery --local list --gallery      # Read the database directly

mod application;
mod cli;
mod domain;
mod infrastructure;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use application::{
    format_images_json, format_images_table, format_paths, format_summary, OutputFormat,
    Reconciler,
};
use cli::{Cli, Commands, ConfigAction};
use domain::{AppConfig, AppError, ImageRecord, ImageStore, NewImage, Scope};
use infrastructure::{
    config_file_path, ensure_config_exists, load_config, render_config, AppState,
    HttpImageStore, ImageGenerator, ReplicateGenerator, SqliteImageStore,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main application logic.
async fn run(cli: Cli) -> domain::Result<()> {
    let format = cli
        .output_format()
        .map_err(|e| AppError::Config { message: e })?;
    let config = load_config(cli.config.as_deref())?;
    let ctx = Context {
        config,
        local: cli.local,
        format,
    };

    match cli.command {
        Commands::Serve => cmd_serve(&ctx.config).await?,
        Commands::List { gallery } => cmd_list(&ctx, gallery).await?,
        Commands::Add {
            image_url,
            prompt,
            gallery,
        } => cmd_add(&ctx, NewImage::new(image_url, prompt).in_gallery(gallery)).await?,
        Commands::Move { from, to, gallery } => cmd_move(&ctx, from, to, gallery).await?,
        Commands::Reorder { ids, gallery } => cmd_reorder(&ctx, &ids, gallery).await?,
        Commands::Delete { id } => cmd_delete(&ctx, &id).await?,
        Commands::Gallery { id, on, .. } => cmd_gallery(&ctx, &id, on).await?,
        Commands::Generate {
            prompt,
            model,
            save,
            gallery,
        } => cmd_generate(&ctx, &prompt, model.as_deref(), save || gallery, gallery).await?,
        Commands::Config { action } => cmd_config(&action, cli.config.as_deref(), &ctx.config)?,
        Commands::Paths => println!("{}", format_paths(&ctx.config)),
    }

    Ok(())
}

/// Settings shared by every store-backed command.
struct Context {
    config: AppConfig,
    local: bool,
    format: OutputFormat,
}

impl Context {
    /// Store selected by `--local`: the database itself, or the server.
    fn store(&self) -> domain::Result<Arc<dyn ImageStore>> {
        if self.local {
            let path = self.config.db_path();
            tracing::debug!(path = %path.display(), "Opening local store");
            Ok(Arc::new(SqliteImageStore::open(&path, &self.config.store)?))
        } else {
            Ok(Arc::new(HttpImageStore::new(&self.config.client)?))
        }
    }

    /// Reconciler over `scope`, loaded and ready for edits.
    async fn reconciler(&self, scope: Scope) -> domain::Result<Reconciler> {
        let mut reconciler = Reconciler::new(self.store()?, scope, self.config.client.timeout());
        reconciler.load(scope).await?;
        Ok(reconciler)
    }

    fn print_images(&self, images: &[ImageRecord], scope: Scope) -> domain::Result<()> {
        match self.format {
            OutputFormat::Table => {
                println!("{}", format_images_table(images));
                println!("{}", format_summary(images, scope));
            }
            OutputFormat::Json => {
                println!("{}", format_images_json(images).map_err(AppError::json_parse)?);
            }
        }
        Ok(())
    }
}

/// Run the HTTP server over the local database.
async fn cmd_serve(config: &AppConfig) -> domain::Result<()> {
    let store = SqliteImageStore::open(&config.db_path(), &config.store)?;
    let mut state = AppState::new(Arc::new(store), &config.server);

    match ReplicateGenerator::from_config(&config.generator) {
        Ok(generator) => state = state.with_generator(Arc::new(generator)),
        Err(e) => tracing::warn!("Image generation disabled: {}", e),
    }

    println!(
        "{} Serving {} on http://{}",
        "▶".green().bold(),
        config.db_path().display(),
        config.server.bind_addr()
    );
    infrastructure::serve(state, &config.server).await
}

/// List images command.
async fn cmd_list(ctx: &Context, gallery: bool) -> domain::Result<()> {
    let scope = Scope::from_gallery_flag(gallery);
    let reconciler = ctx.reconciler(scope).await?;
    ctx.print_images(reconciler.images(), scope)
}

/// Save an image reference.
async fn cmd_add(ctx: &Context, image: NewImage) -> domain::Result<()> {
    let scope = Scope::from_gallery_flag(image.is_gallery);
    let mut reconciler = Reconciler::new(ctx.store()?, scope, ctx.config.client.timeout());
    let record = reconciler.save(image).await?;

    match ctx.format {
        OutputFormat::Table => println!(
            "{} Saved {} at order {}",
            "✓".green().bold(),
            record.id.cyan(),
            record.order_index
        ),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&record).map_err(AppError::json_parse)?
        ),
    }
    Ok(())
}

/// Move an image between 1-based positions.
async fn cmd_move(ctx: &Context, from: usize, to: usize, gallery: bool) -> domain::Result<()> {
    let (from, to) = match (from.checked_sub(1), to.checked_sub(1)) {
        (Some(from), Some(to)) => (from, to),
        _ => return Err(AppError::validation("Positions start at 1")),
    };

    let scope = Scope::from_gallery_flag(gallery);
    let mut reconciler = ctx.reconciler(scope).await?;
    let result = reconciler.move_image(from, to).await;
    settle(ctx, &reconciler, result)?;

    println!("{} Moved {} → {}", "✓".green().bold(), from + 1, to + 1);
    ctx.print_images(reconciler.images(), scope)
}

/// Replace the display order with the given ids.
async fn cmd_reorder(ctx: &Context, ids: &[String], gallery: bool) -> domain::Result<()> {
    let scope = Scope::from_gallery_flag(gallery);
    let mut reconciler = ctx.reconciler(scope).await?;

    let new_order = ids
        .iter()
        .map(|prefix| reconciler.state().find(prefix).cloned())
        .collect::<domain::Result<Vec<_>>>()?;
    let result = reconciler.apply_reorder(new_order).await;
    settle(ctx, &reconciler, result)?;

    println!("{} Reordered {} image(s)", "✓".green().bold(), ids.len());
    ctx.print_images(reconciler.images(), scope)
}

/// After a failed reorder, show the order the store actually holds.
fn settle(ctx: &Context, reconciler: &Reconciler, result: domain::Result<()>) -> domain::Result<()> {
    if result.is_err() {
        if let Some(detail) = reconciler.state().last_error() {
            eprintln!("{} {}", "Order restored after:".yellow().bold(), detail);
        }
        ctx.print_images(reconciler.images(), reconciler.state().scope())?;
    }
    result
}

/// Delete an image.
async fn cmd_delete(ctx: &Context, prefix: &str) -> domain::Result<()> {
    let mut reconciler = ctx.reconciler(Scope::All).await?;
    let id = reconciler.state().find(prefix)?.id.clone();
    reconciler.apply_delete(&id).await?;

    println!("{} Deleted {}", "✓".green().bold(), id.cyan());
    Ok(())
}

/// Set or clear the gallery flag.
async fn cmd_gallery(ctx: &Context, prefix: &str, flag: bool) -> domain::Result<()> {
    let mut reconciler = ctx.reconciler(Scope::All).await?;
    let id = reconciler.state().find(prefix)?.id.clone();
    reconciler.apply_gallery_toggle(&id, flag).await?;

    let label = if flag {
        "added to".green()
    } else {
        "removed from".yellow()
    };
    println!("{} {} {} gallery", "✓".green().bold(), id.cyan(), label);
    Ok(())
}

/// Generate an image, optionally saving it.
async fn cmd_generate(
    ctx: &Context,
    prompt: &str,
    model: Option<&str>,
    save: bool,
    gallery: bool,
) -> domain::Result<()> {
    let generator: Box<dyn ImageGenerator> = if ctx.local {
        Box::new(ReplicateGenerator::from_config(&ctx.config.generator)?)
    } else {
        Box::new(HttpImageStore::new(&ctx.config.client)?)
    };

    eprintln!("{} Generating image...", "⏳".bold());
    let image_url = generator.generate(prompt, model).await?;

    if save {
        cmd_add(ctx, NewImage::new(image_url, prompt).in_gallery(gallery)).await
    } else {
        match ctx.format {
            OutputFormat::Table => println!("{image_url}"),
            OutputFormat::Json => println!("{}", serde_json::json!({ "image": image_url })),
        }
        Ok(())
    }
}

/// Config file management.
fn cmd_config(
    action: &ConfigAction,
    explicit: Option<&Path>,
    config: &AppConfig,
) -> domain::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = explicit.map_or_else(config_file_path, Path::to_path_buf);
            if ensure_config_exists(&path)? {
                println!("{} Created {}", "✓".green().bold(), path.display());
            } else {
                println!("{} {} already exists", "•".yellow(), path.display());
            }
        }
        ConfigAction::Show => print!("{}", render_config(config)?),
    }
    Ok(())
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
