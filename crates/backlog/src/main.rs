//! Backlog: command-line front end for the backlog services
//!
//! Main binary with subcommands:
//! - `list`: show the items of a page, optionally with their children
//! - `show`: print a single item from the read model
//! - `add`: create an item under an optional parent
//! - `promote` / `complete`: send task commands

use std::io::Write;
use std::sync::Arc;

use backlog_client::{BacklogClient, ItemCache};
use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod presenter;

use config::{ConnectionArgs, Page};
use presenter::{ItemsPage, TerminalRenderer, UiContext};

#[derive(Parser)]
#[command(name = "backlog")]
#[command(about = "Manage Epics, Features, Stories and Tasks", long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Page to work on
    #[arg(long, value_enum, default_value_t = Page::Tasks)]
    page: Page,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the items under a parent (top level by default)
    List {
        /// Parent item ID
        #[arg(long)]
        parent: Option<String>,

        /// Also load and show the children of each listed item
        #[arg(long)]
        expand: bool,
    },

    /// Show a single item
    Show {
        /// Item ID
        id: String,
    },

    /// Add an item of the page's type
    Add {
        /// Item title
        title: String,

        /// Parent item ID
        #[arg(long)]
        parent: Option<String>,
    },

    /// Promote a Task to a Story
    Promote {
        /// Task ID
        id: String,
    },

    /// Mark a Task as completed
    Complete {
        /// Task ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "backlog=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let client = BacklogClient::new(cli.connection.gateway_config(), cli.connection.user.as_str());
    let cache = ItemCache::new(Arc::new(client));
    let ui = UiContext::new(Arc::new(TerminalRenderer::new(std::io::stderr())));
    let page = ItemsPage::new(
        cache,
        ui,
        cli.page.new_item_type(),
        cli.page.secondary_item_type(),
    );

    match cli.command {
        Commands::List { parent, expand } => list(&page, parent.as_deref(), expand).await,
        Commands::Show { id } => show(&page, &id).await,
        Commands::Add { title, parent } => {
            let added = page
                .add_item(parent.as_deref(), &title)
                .await
                .map_err(|e| miette::miette!("failed to add item: {}", e))?;
            match added {
                Some(item) => println!("{}", presenter::describe(&item)),
                None => tracing::warn!("title is empty, nothing added"),
            }
            Ok(())
        }
        Commands::Promote { id } => {
            page.promote_task(&id)
                .await
                .map_err(|e| miette::miette!("failed to promote {}: {}", id, e))?;
            tracing::info!(id = %id, "promoted to story");
            Ok(())
        }
        Commands::Complete { id } => {
            page.complete_task(&id)
                .await
                .map_err(|e| miette::miette!("failed to complete {}: {}", id, e))?;
            tracing::info!(id = %id, "completed");
            Ok(())
        }
    }
}

async fn list(page: &ItemsPage, parent: Option<&str>, expand: bool) -> Result<()> {
    let items = page
        .update_items(parent)
        .await
        .map_err(|e| miette::miette!("failed to load items: {}", e))?;

    if expand {
        for item in &items {
            page.toggle_disclosed(&item.id)
                .await
                .map_err(|e| miette::miette!("failed to load children of {}: {}", item.id, e))?;
        }
    }

    let mut out = std::io::stdout().lock();
    page.render_tree(&mut out, parent)
        .and_then(|()| out.flush())
        .map_err(|e| miette::miette!("failed to write items: {}", e))?;
    Ok(())
}

async fn show(page: &ItemsPage, id: &str) -> Result<()> {
    let item = page
        .cache()
        .fetch_item(id)
        .await
        .map_err(|e| miette::miette!("failed to fetch {}: {}", id, e))?
        .ok_or_else(|| miette::miette!("no item with id {}", id))?;

    println!("{}", presenter::describe(&item));
    if let Some(parent_id) = &item.parent_id {
        println!("  parent: {}", parent_id);
    }
    Ok(())
}
