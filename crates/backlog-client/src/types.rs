//! Core types for backlog items.

use serde::{Deserialize, Serialize};

/// Kind of a backlog item.
///
/// Items nest Epic ⊇ Feature ⊇ Story ⊇ Task, but the nesting is a matter of
/// behavior (an item with children becomes an Epic, a promoted Task becomes a
/// Story) rather than of variant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    Epic,
    Feature,
    Story,
    Task,
}

impl ItemType {
    /// Wire name, as used in request bodies and the `type` query filter.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Epic => "Epic",
            ItemType::Feature => "Feature",
            ItemType::Story => "Story",
            ItemType::Task => "Task",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Epic" | "epic" => Ok(ItemType::Epic),
            "Feature" | "feature" => Ok(ItemType::Feature),
            "Story" | "story" => Ok(ItemType::Story),
            "Task" | "task" => Ok(ItemType::Task),
            other => Err(format!("unknown item type '{}'", other)),
        }
    }
}

/// Progress of a backlog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Progress {
    #[default]
    NotStarted,
    Completed,
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Progress::NotStarted => f.write_str("notStarted"),
            Progress::Completed => f.write_str("completed"),
        }
    }
}

/// An item as served by the read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub title: String,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// A cached item together with whether the read model has confirmed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedItem {
    pub item: Item,
    /// False while the item exists only because of a local optimistic write.
    pub verified: bool,
}

impl CachedItem {
    /// Wrap an item confirmed by an authoritative fetch.
    pub fn verified(item: Item) -> Self {
        Self {
            item,
            verified: true,
        }
    }

    /// Wrap an item that only exists locally so far.
    pub fn unverified(item: Item) -> Self {
        Self {
            item,
            verified: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.item.id
    }
}

/// Request body for creating an item.
#[derive(Debug, Clone, Serialize)]
pub struct NewItem<'a> {
    pub title: &'a str,
    #[serde(rename = "type")]
    pub item_type: ItemType,
}

/// Response from creating an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedItem {
    pub id: String,
}
