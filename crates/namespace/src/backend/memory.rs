//! In-process backend for embedding and tests.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Backend, BackendFactory, DatabaseInfo, Descriptor};
use crate::error::{AdapterError, BackendOp, ConfigError};

#[derive(Debug, Default)]
struct MemoryState {
	databases: BTreeSet<String>,
	failures: VecDeque<(BackendOp, String)>,
}

/// A backend holding database names in memory.
///
/// Clones share state, so a test can keep one handle for inspection and
/// register another with a [`super::BackendRegistry`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
	state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
	/// An empty backend.
	pub fn new() -> Self {
		Self::default()
	}

	/// A backend that already holds `names`, e.g. system databases or other tenants.
	pub fn with_databases<I, S>(names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let backend = Self::new();
		backend.state.lock().databases.extend(names.into_iter().map(Into::into));
		backend
	}

	/// Make the next `op` call fail with `message`.
	///
	/// Failures are consumed in order, and only by the operation they name.
	pub fn fail_next(&self, op: BackendOp, message: impl Into<String>) {
		self.state.lock().failures.push_back((op, message.into()));
	}

	/// Physical names currently held, sorted.
	pub fn databases(&self) -> Vec<String> {
		self.state.lock().databases.iter().cloned().collect()
	}

	/// A registry constructor that hands out this backend regardless of descriptor.
	pub fn factory(&self) -> BackendFactory {
		let backend = self.clone();
		Arc::new(move |_: &Descriptor, _: &str| -> Result<Arc<dyn Backend>, ConfigError> { Ok(Arc::new(backend.clone())) })
	}

	fn take_failure(state: &mut MemoryState, op: BackendOp) -> Result<(), AdapterError> {
		match state.failures.iter().position(|(failing, _)| *failing == op) {
			Some(index) => {
				let (_, message) = state.failures.remove(index).unwrap_or((op, String::new()));
				Err(AdapterError::Other(message))
			}
			None => Ok(()),
		}
	}
}

#[async_trait]
impl Backend for MemoryBackend {
	async fn create(&self, name: &str) -> Result<(), AdapterError> {
		let mut state = self.state.lock();
		Self::take_failure(&mut state, BackendOp::Create)?;
		if !state.databases.insert(name.to_string()) {
			return Err(AdapterError::AlreadyExists(name.to_string()));
		}
		Ok(())
	}

	async fn delete(&self, name: &str) -> Result<(), AdapterError> {
		let mut state = self.state.lock();
		Self::take_failure(&mut state, BackendOp::Delete)?;
		if !state.databases.remove(name) {
			return Err(AdapterError::NotFound(name.to_string()));
		}
		Ok(())
	}

	async fn list(&self) -> Result<Vec<String>, AdapterError> {
		let mut state = self.state.lock();
		Self::take_failure(&mut state, BackendOp::List)?;
		Ok(state.databases.iter().cloned().collect())
	}

	async fn info(&self, name: &str) -> Result<DatabaseInfo, AdapterError> {
		let mut state = self.state.lock();
		Self::take_failure(&mut state, BackendOp::Info)?;
		if !state.databases.contains(name) {
			return Err(AdapterError::NotFound(name.to_string()));
		}
		Ok(DatabaseInfo {
			doc_count: Some(0),
			..DatabaseInfo::named(name)
		})
	}
}
