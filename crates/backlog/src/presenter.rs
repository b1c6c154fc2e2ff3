//! Presentation layer: turns cache events into UI events and drives the
//! item cache from user actions.

use std::io::Write;
use std::sync::{Arc, Mutex};

use backlog_client::{
    CacheEvent, CacheEventKind, GatewayError, Item, ItemCache, ItemType, Progress,
};
use dashmap::DashSet;
use tracing::{debug, info};

/// Everything a rendered view can be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// New items appeared under `parent_id`.
    ItemsAdded {
        parent_id: Option<String>,
        items: Vec<Item>,
    },
    ItemChanged(Item),
    ItemRemoved(Item),
    /// A placeholder id was replaced by the id the server assigned.
    IdChanged { old_id: String, new_id: String },
    /// Children of the given parent (top level when `None`) are loading.
    Loading(Option<String>),
    LoadingDone(Option<String>),
    Disclose(String),
    Collapse(String),
}

/// Receives UI events and updates whatever is on screen.
pub trait Renderer: Send + Sync {
    fn handle(&self, event: &UiEvent);
}

/// Handle passed to everything that needs to talk to the UI.
#[derive(Clone)]
pub struct UiContext {
    renderer: Arc<dyn Renderer>,
}

impl UiContext {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self { renderer }
    }

    pub fn emit(&self, event: UiEvent) {
        self.renderer.handle(&event);
    }

    /// Forward the cache's notifications to the renderer.
    pub fn attach(&self, cache: &ItemCache) {
        let ui = self.clone();
        cache.on(CacheEventKind::ItemsAdded, move |event| {
            if let CacheEvent::ItemsAdded(items) = event {
                ui.emit(UiEvent::ItemsAdded {
                    parent_id: items.first().and_then(|item| item.parent_id.clone()),
                    items: items.clone(),
                });
            }
        });

        let ui = self.clone();
        cache.on(CacheEventKind::ItemsChanged, move |event| {
            if let CacheEvent::ItemsChanged(items) = event {
                for item in items {
                    ui.emit(UiEvent::ItemChanged(item.clone()));
                }
            }
        });

        let ui = self.clone();
        cache.on(CacheEventKind::ItemsRemoved, move |event| {
            if let CacheEvent::ItemsRemoved(items) = event {
                for item in items {
                    ui.emit(UiEvent::ItemRemoved(item.clone()));
                }
            }
        });

        let ui = self.clone();
        cache.on(CacheEventKind::IdChanged, move |event| {
            if let CacheEvent::IdChanged(changes) = event {
                for change in changes {
                    ui.emit(UiEvent::IdChanged {
                        old_id: change.item.id.clone(),
                        new_id: change.new_id.clone(),
                    });
                }
            }
        });
    }
}

/// Emits `LoadingDone` when dropped, so the loading state is cleared even
/// when a fetch fails or is cancelled.
struct LoadingGuard<'a> {
    ui: &'a UiContext,
    parent_id: Option<String>,
}

impl<'a> LoadingGuard<'a> {
    fn start(ui: &'a UiContext, parent_id: Option<&str>) -> Self {
        let parent_id = parent_id.map(str::to_string);
        ui.emit(UiEvent::Loading(parent_id.clone()));
        Self { ui, parent_id }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.ui.emit(UiEvent::LoadingDone(self.parent_id.take()));
    }
}

/// A page listing one level of the hierarchy, e.g. Features under Epics.
pub struct ItemsPage {
    cache: Arc<ItemCache>,
    ui: UiContext,
    new_item_type: ItemType,
    secondary_item_type: ItemType,
    disclosed: DashSet<String>,
}

impl ItemsPage {
    pub fn new(
        cache: Arc<ItemCache>,
        ui: UiContext,
        new_item_type: ItemType,
        secondary_item_type: ItemType,
    ) -> Self {
        ui.attach(&cache);
        Self {
            cache,
            ui,
            new_item_type,
            secondary_item_type,
            disclosed: DashSet::new(),
        }
    }

    pub fn cache(&self) -> &ItemCache {
        &self.cache
    }

    fn types(&self) -> [ItemType; 2] {
        [self.new_item_type, self.secondary_item_type]
    }

    /// Refresh the children of `parent_id`, bracketed by loading events.
    pub async fn update_items(&self, parent_id: Option<&str>) -> Result<Vec<Item>, GatewayError> {
        let _loading = LoadingGuard::start(&self.ui, parent_id);
        self.cache.fetch_items(parent_id, &self.types()).await
    }

    /// Add an item of this page's type and refresh its parent.
    ///
    /// Blank titles are ignored.
    pub async fn add_item(
        &self,
        parent_id: Option<&str>,
        title: &str,
    ) -> Result<Option<Item>, GatewayError> {
        let title = title.trim();
        if title.is_empty() {
            debug!("ignoring item without title");
            return Ok(None);
        }

        let item = self.cache.add_item(self.new_item_type, title, parent_id).await?;
        info!(id = %item.id, item_type = %item.item_type, "added item");

        self.update_items(parent_id).await?;
        Ok(Some(item))
    }

    pub async fn complete_task(&self, id: &str) -> Result<(), GatewayError> {
        self.cache.complete_task(id).await
    }

    /// Promote a Task to a Story and refresh the top level.
    pub async fn promote_task(&self, id: &str) -> Result<(), GatewayError> {
        self.cache.promote_task(id).await?;
        self.update_items(None).await?;
        Ok(())
    }

    pub fn is_disclosed(&self, id: &str) -> bool {
        self.disclosed.contains(id)
    }

    /// Collapse a disclosed item, or disclose it and load its children.
    pub async fn toggle_disclosed(&self, id: &str) -> Result<(), GatewayError> {
        if self.disclosed.remove(id).is_some() {
            self.ui.emit(UiEvent::Collapse(id.to_string()));
            return Ok(());
        }

        self.disclosed.insert(id.to_string());
        self.ui.emit(UiEvent::Disclose(id.to_string()));
        self.update_items(Some(id)).await?;
        Ok(())
    }

    /// Write the cached tree below `parent_id`, descending into disclosed
    /// items.
    pub fn render_tree<W: Write>(&self, out: &mut W, parent_id: Option<&str>) -> std::io::Result<()> {
        self.render_level(out, parent_id, 0)
    }

    fn render_level<W: Write>(
        &self,
        out: &mut W,
        parent_id: Option<&str>,
        depth: usize,
    ) -> std::io::Result<()> {
        for cached in self.cache.items(parent_id) {
            let marker = if cached.verified { "" } else { " (pending)" };
            writeln!(
                out,
                "{:indent$}{}{}",
                "",
                describe(&cached.item),
                marker,
                indent = depth * 2
            )?;
            if self.is_disclosed(&cached.item.id) {
                self.render_level(out, Some(&cached.item.id), depth + 1)?;
            }
        }
        Ok(())
    }
}

/// One-line description of an item.
pub fn describe(item: &Item) -> String {
    let check = match item.progress {
        Progress::Completed => "[x]",
        Progress::NotStarted => "[ ]",
    };
    format!("{} {} {} ({})", check, item.item_type, item.title, item.id)
}

/// Renderer that prints change notifications as lines of text.
pub struct TerminalRenderer<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn line(event: &UiEvent) -> Option<String> {
        match event {
            UiEvent::ItemsAdded { items, .. } => Some(
                items
                    .iter()
                    .map(|item| format!("+ {}", describe(item)))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            UiEvent::ItemChanged(item) => Some(format!("~ {}", describe(item))),
            UiEvent::ItemRemoved(item) => Some(format!("- {}", describe(item))),
            UiEvent::IdChanged { old_id, new_id } => Some(format!("= {} is now {}", old_id, new_id)),
            UiEvent::Loading(parent_id) => {
                debug!(parent_id = ?parent_id, "loading");
                None
            }
            UiEvent::LoadingDone(parent_id) => {
                debug!(parent_id = ?parent_id, "loading done");
                None
            }
            UiEvent::Disclose(id) => Some(format!("> {}", id)),
            UiEvent::Collapse(id) => Some(format!("< {}", id)),
        }
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn handle(&self, event: &UiEvent) {
        let Some(line) = Self::line(event) else {
            return;
        };
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(e) = writeln!(out, "{}", line) {
            debug!(error = %e, "failed to write UI event");
        }
    }
}
