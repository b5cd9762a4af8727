//! Namespace manager: per-application database lifecycle over one backend.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{Backend, BackendRegistry, DatabaseInfo};
use crate::config::{Config, Options};
use crate::error::{AdapterError, BackendError, BackendOp, Error, Result};
use crate::name::{Namespace, NamespacedDatabase};
use crate::queue::{DbUpdate, DbUpdateKind};

/// Handle for creating, deleting, listing and inspecting one application's databases.
///
/// Cloning is cheap; clones share the resolved backend and queue.
#[derive(Clone)]
pub struct Databases {
	config: Config,
	scheme: String,
	backend: Arc<dyn Backend>,
}

impl Databases {
	/// Validate `options` and resolve the backend from the built-in registry.
	pub fn open(options: Options) -> Result<Self> {
		Self::open_with(options, BackendRegistry::builtin())
	}

	/// Validate `options` and resolve the backend from `registry`.
	pub fn open_with(options: Options, registry: &BackendRegistry) -> Result<Self> {
		let config = options.validate()?;
		let (descriptor, backend) = registry.resolve(config.db(), config.admins())?;
		debug!(
			app_id = %config.namespace().app_id(),
			scheme = descriptor.scheme(),
			"resolved database backend"
		);
		Ok(Self {
			scheme: descriptor.scheme().to_string(),
			config,
			backend,
		})
	}

	/// Application id this handle is scoped to.
	pub fn app_id(&self) -> &str {
		self.namespace().app_id()
	}

	/// Topic lifecycle events are published on.
	pub fn topic(&self) -> String {
		self.namespace().topic()
	}

	/// Scheme of the resolved backend, e.g. `http` or `leveldb`.
	pub fn backend_kind(&self) -> &str {
		&self.scheme
	}

	/// Physical name `logical` maps to.
	pub fn physical_name(&self, logical: &str) -> Result<String> {
		Ok(self.namespace().database(logical)?.physical().to_string())
	}

	fn namespace(&self) -> &Namespace {
		self.config.namespace()
	}

	/// Create `name` and announce it on the updates topic.
	pub async fn add(&self, name: &str) -> Result<()> {
		let db = self.namespace().database(name)?;
		debug!(dbname = db.physical(), "creating database");
		self.backend
			.create(db.physical())
			.await
			.map_err(|e| lift(BackendOp::Create, &db, e))?;
		info!(dbname = db.physical(), "database created");
		self.publish(&db, DbUpdateKind::Created).await
	}

	/// Delete `name` and announce it on the updates topic.
	pub async fn remove(&self, name: &str) -> Result<()> {
		let db = self.namespace().database(name)?;
		debug!(dbname = db.physical(), "deleting database");
		self.backend
			.delete(db.physical())
			.await
			.map_err(|e| lift(BackendOp::Delete, &db, e))?;
		info!(dbname = db.physical(), "database deleted");
		self.publish(&db, DbUpdateKind::Deleted).await
	}

	/// Logical names of this application's databases, in backend order.
	pub async fn list(&self) -> Result<Vec<String>> {
		let all = self.backend.list().await.map_err(|source| BackendError {
			op: BackendOp::List,
			dbname: None,
			source,
		})?;
		let namespace = self.namespace();
		Ok(all
			.iter()
			.filter_map(|physical| namespace.strip(physical))
			.map(str::to_string)
			.collect())
	}

	/// Backend metadata for `name`.
	pub async fn info(&self, name: &str) -> Result<DatabaseInfo> {
		let db = self.namespace().database(name)?;
		self.backend
			.info(db.physical())
			.await
			.map_err(|e| lift(BackendOp::Info, &db, e))
	}

	/// Whether `name` exists.
	pub async fn exists(&self, name: &str) -> Result<bool> {
		match self.info(name).await {
			Ok(_) => Ok(true),
			Err(Error::NotFound { .. }) => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn publish(&self, db: &NamespacedDatabase, kind: DbUpdateKind) -> Result<()> {
		let update = DbUpdate {
			dbname: db.physical().to_string(),
			kind,
		};
		let topic = self.topic();
		self.config
			.queue()
			.publish(&topic, &update)
			.await
			.map_err(|source| Error::Publish {
				dbname: update.dbname.clone(),
				kind,
				source,
			})?;
		debug!(%topic, dbname = %update.dbname, %kind, "published database update");
		Ok(())
	}
}

impl fmt::Debug for Databases {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Databases")
			.field("config", &self.config)
			.field("scheme", &self.scheme)
			.finish_non_exhaustive()
	}
}

/// Adapter failures become [`Error::NotFound`] (delete and info only) or [`Error::Backend`].
fn lift(op: BackendOp, db: &NamespacedDatabase, error: AdapterError) -> Error {
	match error {
		AdapterError::NotFound(_) if op != BackendOp::Create => Error::NotFound {
			name: db.logical().to_string(),
		},
		source => Error::Backend(BackendError {
			op,
			dbname: Some(db.physical().to_string()),
			source,
		}),
	}
}

#[cfg(test)]
mod tests;
