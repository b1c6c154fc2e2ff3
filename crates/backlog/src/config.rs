//! Connection and page settings, from flags or environment.

use backlog_client::{GatewayConfig, ItemType};
use clap::{Args, ValueEnum};

/// Where the read and write models live, and who is asking.
#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    /// Read model base URL
    #[arg(long, env = "READ_MODEL_URL")]
    pub read_model_url: String,

    /// Write model base URL
    #[arg(long, env = "WRITE_MODEL_URL")]
    pub write_model_url: String,

    /// Value of the Authorization header; empty to send none
    #[arg(long, env = "BACKLOG_USER", default_value = "frontend")]
    pub user: String,
}

impl ConnectionArgs {
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::new(&self.read_model_url, &self.write_model_url)
    }
}

/// Which level of the hierarchy a page works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Page {
    /// Epics and the Features under them
    Features,
    /// Stories and the Tasks under them
    #[default]
    Tasks,
}

impl Page {
    /// Type of items created on this page.
    pub fn new_item_type(self) -> ItemType {
        match self {
            Page::Features => ItemType::Feature,
            Page::Tasks => ItemType::Task,
        }
    }

    /// The other type shown alongside new items.
    pub fn secondary_item_type(self) -> ItemType {
        match self {
            Page::Features => ItemType::Epic,
            Page::Tasks => ItemType::Story,
        }
    }
}
