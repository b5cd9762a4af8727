//! Backend adapters and scheme-based dispatch.
//!
//! Every storage backend implements the four-operation [`Backend`]
//! capability over physical (already namespaced) database names. A
//! [`BackendRegistry`] maps the scheme of a connection descriptor to a
//! constructor; resolution happens once, when a [`crate::Databases`] handle
//! is opened.
//!
//! Built-in schemes:
//!
//! | Scheme | Adapter |
//! |---|---|
//! | `http`, `https` | [`CouchBackend`] |
//! | `leveldb` | [`LogStoreBackend`] |
//!
//! [`MemoryBackend`] is not registered by default; register it under a
//! scheme of your choice with [`MemoryBackend::factory`].

mod couch;
mod log_store;
mod memory;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
pub use couch::CouchBackend;
pub use log_store::LogStoreBackend;
pub use memory::MemoryBackend;
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, ConfigError, Error};
use crate::name::SEPARATOR;

/// Metadata a backend reports for one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
	/// Physical database name.
	pub db_name: String,
	/// Number of stored documents, when the backend reports it.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub doc_count: Option<u64>,
	/// Backend-specific update sequence marker.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub update_seq: Option<serde_json::Value>,
	/// Size on disk in bytes, when the backend reports it.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub disk_size: Option<u64>,
}

impl DatabaseInfo {
	/// Info carrying only the physical name.
	pub fn named(db_name: impl Into<String>) -> Self {
		Self {
			db_name: db_name.into(),
			doc_count: None,
			update_seq: None,
			disk_size: None,
		}
	}

	/// The unqualified name, i.e. everything after the first separator.
	pub fn logical_name(&self) -> &str {
		self.db_name
			.split_once(SEPARATOR)
			.map_or(self.db_name.as_str(), |(_, logical)| logical)
	}
}

/// Uniform capability set every storage backend provides.
///
/// Names passed in and returned are physical names. Implementations report a
/// missing database as [`AdapterError::NotFound`] so callers can distinguish
/// it from transport failures.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
	/// Create the database.
	async fn create(&self, name: &str) -> Result<(), AdapterError>;

	/// Delete the database.
	async fn delete(&self, name: &str) -> Result<(), AdapterError>;

	/// List every database the backend holds, across all namespaces.
	async fn list(&self) -> Result<Vec<String>, AdapterError>;

	/// Fetch metadata for the database.
	async fn info(&self, name: &str) -> Result<DatabaseInfo, AdapterError>;
}

/// A parsed connection descriptor.
#[derive(Clone, PartialEq, Eq)]
pub struct Descriptor {
	raw: String,
	scheme_end: usize,
}

impl Descriptor {
	/// Split `raw` at the first `://`. Returns `None` when there is no scheme.
	pub fn parse(raw: &str) -> Option<Self> {
		let scheme_end = raw.find("://")?;
		Some(Self {
			raw: raw.to_string(),
			scheme_end,
		})
	}

	/// The scheme token, e.g. `http`.
	pub fn scheme(&self) -> &str {
		&self.raw[..self.scheme_end]
	}

	/// Everything after `://`.
	pub fn rest(&self) -> &str {
		&self.raw[self.scheme_end + 3..]
	}

	/// The full descriptor, credentials included.
	pub fn as_str(&self) -> &str {
		&self.raw
	}
}

impl fmt::Debug for Descriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Descriptor").field(&crate::config::redact(&self.raw)).finish()
	}
}

/// Constructor registered for a scheme. Receives the descriptor and the admins role name.
pub type BackendFactory = Arc<dyn Fn(&Descriptor, &str) -> Result<Arc<dyn Backend>, ConfigError> + Send + Sync>;

/// Scheme to adapter-constructor map.
#[derive(Clone, Default)]
pub struct BackendRegistry {
	factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
	/// An empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// A registry holding the built-in adapters.
	pub fn with_builtins() -> Self {
		let mut registry = Self::new();
		registry.register("http", couch_factory());
		registry.register("https", couch_factory());
		registry.register(
			"leveldb",
			Arc::new(|descriptor: &Descriptor, _admins: &str| -> Result<Arc<dyn Backend>, ConfigError> {
				Ok(Arc::new(LogStoreBackend::from_descriptor(descriptor)?))
			}),
		);
		registry
	}

	/// The process-wide registry of built-in adapters, initialized on first use.
	pub fn builtin() -> &'static Self {
		static BUILTIN: OnceLock<BackendRegistry> = OnceLock::new();
		BUILTIN.get_or_init(Self::with_builtins)
	}

	/// Register `factory` for `scheme`, replacing any previous entry.
	pub fn register(&mut self, scheme: impl Into<String>, factory: BackendFactory) -> &mut Self {
		self.factories.insert(scheme.into(), factory);
		self
	}

	/// Registered schemes, sorted.
	pub fn schemes(&self) -> Vec<&str> {
		let mut schemes: Vec<_> = self.factories.keys().map(String::as_str).collect();
		schemes.sort_unstable();
		schemes
	}

	/// Construct the adapter for `descriptor`.
	pub fn resolve(&self, descriptor: &str, admins: &str) -> Result<(Descriptor, Arc<dyn Backend>), Error> {
		let parsed = Descriptor::parse(descriptor).ok_or_else(|| Error::UnsupportedBackend {
			scheme: String::new(),
		})?;
		let factory = self
			.factories
			.get(parsed.scheme())
			.ok_or_else(|| Error::UnsupportedBackend {
				scheme: parsed.scheme().to_string(),
			})?;
		let backend = factory(&parsed, admins)?;
		Ok((parsed, backend))
	}
}

impl fmt::Debug for BackendRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BackendRegistry").field("schemes", &self.schemes()).finish()
	}
}

fn couch_factory() -> BackendFactory {
	Arc::new(|descriptor: &Descriptor, admins: &str| -> Result<Arc<dyn Backend>, ConfigError> {
		Ok(Arc::new(CouchBackend::new(descriptor, admins)?))
	})
}

#[cfg(test)]
mod tests;
