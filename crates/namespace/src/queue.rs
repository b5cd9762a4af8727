//! Queue port for database lifecycle notifications.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Failure reported by a [`Queue`] implementation.
pub type QueueError = Box<dyn std::error::Error + Send + Sync>;

/// Kind of lifecycle change announced on the updates topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbUpdateKind {
	/// A database was created.
	Created,
	/// A database was deleted.
	Deleted,
}

impl fmt::Display for DbUpdateKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Created => "created",
			Self::Deleted => "deleted",
		})
	}
}

/// Body of a lifecycle event: `{"dbname": "<app>/<name>", "type": "created"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbUpdate {
	/// Physical (namespaced) database name.
	pub dbname: String,
	/// What happened to the database.
	#[serde(rename = "type")]
	pub kind: DbUpdateKind,
}

/// External event queue that receives lifecycle notifications.
///
/// Implementations must be safe for concurrent publishes from several
/// [`crate::Databases`] handles. A publish that never resolves stalls the
/// triggering operation; it is not treated as success.
#[async_trait]
pub trait Queue: Send + Sync {
	/// Publish `update` on `topic`.
	async fn publish(&self, topic: &str, update: &DbUpdate) -> Result<(), QueueError>;
}
