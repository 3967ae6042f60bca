use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::StoreError;

/// The data-entity families an execution may read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Memory,
    Task,
    Goal,
    Vault,
}

impl EntityKind {
    pub fn all() -> [EntityKind; 4] {
        [
            EntityKind::Memory,
            EntityKind::Task,
            EntityKind::Goal,
            EntityKind::Vault,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Memory => "memory",
            EntityKind::Task => "task",
            EntityKind::Goal => "goal",
            EntityKind::Vault => "vault",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "memories" => Ok(EntityKind::Memory),
            "task" | "tasks" => Ok(EntityKind::Task),
            "goal" | "goals" => Ok(EntityKind::Goal),
            "vault" => Ok(EntityKind::Vault),
            other => Err(StoreError::UnknownKind(other.to_string())),
        }
    }
}

/// A stored entity: an identifier, free-form fields and bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            fields: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Set a field and bump `updated_at`.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
        self.updated_at = Utc::now();
    }

    /// Same identity and content, ignoring timestamps.
    pub fn same_content(&self, other: &EntityRecord) -> bool {
        self.id == other.id && self.fields == other.fields
    }
}
