//! Startup failure type shared by every caller waiting on one startup.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Failure during the shared server's startup sequence.
///
/// `Clone` so a single failure can be handed to every wait-listed caller;
/// I/O causes are shared behind [`Arc`].
#[derive(Debug, Clone, Error)]
pub enum StartupError {
	/// Removing or recreating the data directory failed.
	#[error("failed to prepare data directory {path}: {source}")]
	DataDir {
		/// The data directory.
		path: PathBuf,
		/// Underlying I/O error.
		#[source]
		source: Arc<io::Error>,
	},

	/// The server process could not be spawned.
	#[error("failed to spawn {program}: {source}")]
	Spawn {
		/// Program that failed to start.
		program: String,
		/// Underlying I/O error.
		#[source]
		source: Arc<io::Error>,
	},

	/// The server process exited before it became ready.
	#[error("server process exited during startup ({status})")]
	Exited {
		/// Exit status as reported by the OS.
		status: String,
	},

	/// A startup stage did not complete before the deadline.
	#[error("timed out after {waited:?} waiting for server {stage}")]
	Timeout {
		/// Stage that timed out, e.g. `bind` or `readiness`.
		stage: &'static str,
		/// How long the coordinator waited.
		waited: Duration,
	},

	/// An HTTP request to the server failed.
	#[error("request to {url} failed: {reason}")]
	Http {
		/// Request URL, without credentials.
		url: String,
		/// Transport or status description.
		reason: String,
	},

	/// The server refused the admin credential.
	#[error("provisioning admin {name:?} was rejected with HTTP {status}")]
	AdminRejected {
		/// Admin user name.
		name: String,
		/// Response status.
		status: u16,
	},

	/// The startup task ended without reporting a result.
	#[error("startup task ended without reporting a result")]
	Abandoned,

	/// Launcher-specific failure.
	#[error("{0}")]
	Launcher(String),
}

impl StartupError {
	pub(crate) fn data_dir(path: impl Into<PathBuf>, source: io::Error) -> Self {
		Self::DataDir {
			path: path.into(),
			source: Arc::new(source),
		}
	}
}
