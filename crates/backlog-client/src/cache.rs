//! In-memory item cache with optimistic updates.
//!
//! The cache keeps one ordered bucket of items per parent and turns every
//! command or fetch into the smallest set of change notifications. Commands
//! apply their local effect and notify before the remote call is made, so a
//! UI driven by the notifications reacts instantly; fetches reconcile the
//! optimistic state against what the read model reports.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::{
    Backend, CachedItem, GatewayError, IdGenerator, Item, ItemType, Progress,
    SequentialIdGenerator,
};

/// Broadcast channel capacity for cache events.
const BROADCAST_CHANNEL_CAPACITY: usize = 1024;

/// The kinds of event a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventKind {
    ItemsAdded,
    ItemsRemoved,
    ItemsChanged,
    IdChanged,
}

/// A placeholder id that the write model has replaced with a real one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdChange {
    /// The item as known under its placeholder id.
    pub item: Item,
    /// The id assigned by the write model.
    pub new_id: String,
}

/// Change notification emitted by the cache. Never carries an empty list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    ItemsAdded(Vec<Item>),
    ItemsRemoved(Vec<Item>),
    ItemsChanged(Vec<Item>),
    IdChanged(Vec<IdChange>),
}

impl CacheEvent {
    pub fn kind(&self) -> CacheEventKind {
        match self {
            CacheEvent::ItemsAdded(_) => CacheEventKind::ItemsAdded,
            CacheEvent::ItemsRemoved(_) => CacheEventKind::ItemsRemoved,
            CacheEvent::ItemsChanged(_) => CacheEventKind::ItemsChanged,
            CacheEvent::IdChanged(_) => CacheEventKind::IdChanged,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CacheEvent::ItemsAdded(items)
            | CacheEvent::ItemsRemoved(items)
            | CacheEvent::ItemsChanged(items) => items.len(),
            CacheEvent::IdChanged(changes) => changes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Callback registered with [`ItemCache::on`].
pub type Handler = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Bucket key; top-level items live under `Root`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ParentKey {
    Root,
    Item(String),
}

impl From<Option<&str>> for ParentKey {
    fn from(parent_id: Option<&str>) -> Self {
        match parent_id {
            Some(id) => ParentKey::Item(id.to_string()),
            None => ParentKey::Root,
        }
    }
}

/// Net difference between a cached bucket and a fresh fetch of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Fetched items that were not cached.
    pub added: Vec<Item>,
    /// Verified cached items the fetch no longer contains.
    pub removed: Vec<Item>,
    /// Fetched items whose title differs from the cached copy.
    pub changed: Vec<Item>,
}

impl Reconciliation {
    /// Compare the previously cached bucket with the fetched items.
    ///
    /// Unverified items missing from the fetch are not reported: the read
    /// model may simply not have caught up with the write yet.
    pub fn diff(known: &[CachedItem], fetched: &[Item]) -> Self {
        let find_known = |id: &str| known.iter().find(|cached| cached.item.id == id);

        let added = fetched
            .iter()
            .filter(|item| find_known(&item.id).is_none())
            .cloned()
            .collect();

        let removed = known
            .iter()
            .filter(|cached| cached.verified)
            .filter(|cached| !fetched.iter().any(|item| item.id == cached.item.id))
            .map(|cached| cached.item.clone())
            .collect();

        let changed = fetched
            .iter()
            .filter(|item| find_known(&item.id).is_some_and(|cached| cached.item.title != item.title))
            .cloned()
            .collect();

        Self {
            added,
            removed,
            changed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Client-side view of the backlog, grouped by parent.
///
/// Mutating operations are split in two: the local, optimistic part runs when
/// the method is called, and the returned future performs the remote call.
/// Dropping that future without polling it leaves the optimistic state in
/// place, exactly as a call that never completes would.
///
/// Failed remote calls are not rolled back. The next [`fetch_items`] for the
/// affected parent brings the cache back in line with the read model.
///
/// [`fetch_items`]: ItemCache::fetch_items
pub struct ItemCache {
    backend: Arc<dyn Backend>,
    ids: Arc<dyn IdGenerator>,
    /// Cached items by parent, in insertion/fetch order.
    items_by_parent: DashMap<ParentKey, Vec<CachedItem>>,
    /// Handlers by event kind, in subscription order.
    handlers: DashMap<CacheEventKind, Vec<Handler>>,
    /// Broadcast channel mirroring every emitted event.
    updates_tx: broadcast::Sender<CacheEvent>,
}

impl ItemCache {
    /// Create an empty cache generating `new_N` placeholder ids.
    pub fn new(backend: Arc<dyn Backend>) -> Arc<Self> {
        Self::with_id_generator(backend, Arc::new(SequentialIdGenerator::new()))
    }

    /// Create an empty cache with a custom placeholder id source.
    pub fn with_id_generator(backend: Arc<dyn Backend>, ids: Arc<dyn IdGenerator>) -> Arc<Self> {
        let (updates_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Arc::new(Self {
            backend,
            ids,
            items_by_parent: DashMap::new(),
            handlers: DashMap::new(),
            updates_tx,
        })
    }

    /// Register a handler for one kind of event.
    ///
    /// Handlers run synchronously, in registration order, on the task that
    /// caused the event. They may call back into the cache.
    pub fn on<F>(&self, kind: CacheEventKind, handler: F)
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Arc::new(handler));
    }

    /// Subscribe to every event through a broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.updates_tx.subscribe()
    }

    /// Fetch the items under `parent_id` and reconcile them with the cache.
    ///
    /// Emits `ItemsAdded`, `ItemsRemoved` and `ItemsChanged`, in that order,
    /// for whichever of them is non-empty. Returns the fetched items.
    pub async fn fetch_items(
        &self,
        parent_id: Option<&str>,
        types: &[ItemType],
    ) -> Result<Vec<Item>, GatewayError> {
        let items = self.backend.fetch_items(parent_id, types).await?;
        self.reconcile(parent_id, &items);
        Ok(items)
    }

    /// Fetch a single item from the read model. The cache is not touched.
    pub async fn fetch_item(&self, id: &str) -> Result<Option<Item>, GatewayError> {
        self.backend.fetch_item(id).await
    }

    /// Replace the bucket for `parent_id` with `items` and notify the
    /// difference.
    fn reconcile(&self, parent_id: Option<&str>, items: &[Item]) {
        let fresh = items.iter().cloned().map(CachedItem::verified).collect();
        let known = self
            .items_by_parent
            .insert(ParentKey::from(parent_id), fresh)
            .unwrap_or_default();

        let diff = Reconciliation::diff(&known, items);
        if diff.is_empty() {
            trace!(parent_id = ?parent_id, "fetched items match the cache");
            return;
        }

        debug!(
            parent_id = ?parent_id,
            added = diff.added.len(),
            removed = diff.removed.len(),
            changed = diff.changed.len(),
            "reconciled items"
        );

        self.notify(CacheEvent::ItemsAdded(diff.added));
        self.notify(CacheEvent::ItemsRemoved(diff.removed));
        self.notify(CacheEvent::ItemsChanged(diff.changed));
    }

    /// Add an item optimistically.
    ///
    /// Before this returns, the item is cached unverified under a placeholder
    /// id, `ItemsAdded` is emitted, and a cached parent is turned into an Epic
    /// (emitting `ItemsChanged`). The returned future creates the item through
    /// the write model, renames the cached entry to the real id and emits
    /// `IdChanged`. It resolves to the item under its real id.
    pub fn add_item<'a>(
        &'a self,
        item_type: ItemType,
        title: &str,
        parent_id: Option<&str>,
    ) -> impl Future<Output = Result<Item, GatewayError>> + Send + use<'a> {
        let provisional = Item {
            id: self.ids.next_id(),
            item_type,
            title: title.to_string(),
            progress: Progress::NotStarted,
            parent_id: parent_id.map(str::to_string),
        };

        self.cache_item(CachedItem::unverified(provisional.clone()));
        self.notify(CacheEvent::ItemsAdded(vec![provisional.clone()]));

        if let Some(parent_id) = parent_id {
            self.update_item(parent_id, |parent| parent.item_type = ItemType::Epic);
        }

        async move {
            let created = self
                .backend
                .add_item(
                    &provisional.title,
                    provisional.item_type,
                    provisional.parent_id.as_deref(),
                )
                .await
                .inspect_err(|e| {
                    warn!(
                        placeholder_id = %provisional.id,
                        error = %e,
                        "add_item failed, keeping optimistic item"
                    );
                })?;

            let original = self.replace_id(&provisional.id, &created.id).unwrap_or(provisional);
            debug!(placeholder_id = %original.id, id = %created.id, "item confirmed by write model");

            let confirmed = Item {
                id: created.id.clone(),
                ..original.clone()
            };
            self.notify(CacheEvent::IdChanged(vec![IdChange {
                item: original,
                new_id: created.id,
            }]));

            Ok(confirmed)
        }
    }

    /// Promote a Task to a Story.
    ///
    /// A cached item is updated and `ItemsChanged` emitted before this
    /// returns; the returned future forwards the command whether or not the
    /// item was cached.
    pub fn promote_task<'a>(
        &'a self,
        id: &str,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send + use<'a> {
        self.update_item(id, |item| item.item_type = ItemType::Story);

        let id = id.to_string();
        async move {
            self.backend.promote_task(&id).await.inspect_err(|e| {
                warn!(id = %id, error = %e, "promote_task failed, keeping optimistic change");
            })
        }
    }

    /// Mark an item as completed.
    ///
    /// Same optimistic shape as [`promote_task`](ItemCache::promote_task).
    pub fn complete_task<'a>(
        &'a self,
        id: &str,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send + use<'a> {
        self.update_item(id, |item| item.progress = Progress::Completed);

        let id = id.to_string();
        async move {
            self.backend.complete_task(&id).await.inspect_err(|e| {
                warn!(id = %id, error = %e, "complete_task failed, keeping optimistic change");
            })
        }
    }

    /// Append an item to its parent's bucket without emitting anything.
    pub fn cache_item(&self, cached: CachedItem) {
        let key = ParentKey::from(cached.item.parent_id.as_deref());
        self.items_by_parent.entry(key).or_default().push(cached);
    }

    /// Look up an item by id across all buckets.
    pub fn get_cached_item(&self, id: &str) -> Option<CachedItem> {
        self.items_by_parent
            .iter()
            .find_map(|bucket| bucket.value().iter().find(|cached| cached.id() == id).cloned())
    }

    /// Cached items under `parent_id`, in order.
    pub fn items(&self, parent_id: Option<&str>) -> Vec<CachedItem> {
        self.items_by_parent
            .get(&ParentKey::from(parent_id))
            .map(|bucket| bucket.value().clone())
            .unwrap_or_default()
    }

    /// Total number of cached items.
    pub fn item_count(&self) -> usize {
        self.items_by_parent.iter().map(|bucket| bucket.value().len()).sum()
    }

    /// Apply `apply` to the cached item `id` and emit `ItemsChanged` with the
    /// result. Does nothing when the item is not cached.
    fn update_item(&self, id: &str, apply: impl Fn(&mut Item)) -> Option<Item> {
        let changed = self.items_by_parent.iter_mut().find_map(|mut bucket| {
            let cached = bucket.value_mut().iter_mut().find(|cached| cached.item.id == id)?;
            apply(&mut cached.item);
            Some(cached.item.clone())
        })?;

        self.notify(CacheEvent::ItemsChanged(vec![changed.clone()]));
        Some(changed)
    }

    /// Rename the cached entry `old_id` to `new_id`, returning the entry as it
    /// was under the old id.
    ///
    /// If the read model already delivered `new_id` the placeholder entry is
    /// dropped instead, so the item is never cached twice.
    fn replace_id(&self, old_id: &str, new_id: &str) -> Option<Item> {
        if old_id == new_id {
            return self.get_cached_item(old_id).map(|cached| cached.item);
        }

        let already_cached = self.get_cached_item(new_id).is_some();

        self.items_by_parent.iter_mut().find_map(|mut bucket| {
            let bucket = bucket.value_mut();
            let index = bucket.iter().position(|cached| cached.item.id == old_id)?;
            let original = bucket[index].item.clone();
            if already_cached {
                bucket.remove(index);
            } else {
                bucket[index].item.id = new_id.to_string();
            }
            Some(original)
        })
    }

    /// Deliver an event to its handlers and broadcast subscribers.
    fn notify(&self, event: CacheEvent) {
        if event.is_empty() {
            return;
        }

        // Snapshot so no map guard is held while handlers run.
        let handlers: Vec<Handler> = self
            .handlers
            .get(&event.kind())
            .map(|handlers| handlers.value().clone())
            .unwrap_or_default();

        for handler in &handlers {
            handler(&event);
        }

        if self.updates_tx.send(event).is_err() {
            trace!("no subscribers for cache event");
        }
    }
}
