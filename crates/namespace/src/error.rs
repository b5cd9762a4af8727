//! Error types for namespace configuration and database operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::queue::{DbUpdateKind, QueueError};

/// Errors that can occur while validating or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// A required field is missing or empty.
	#[error("missing required field: {0}")]
	MissingField(&'static str),

	/// A field is present but its value cannot be used.
	#[error("invalid {field}: {reason}")]
	Invalid {
		/// Name of the offending field.
		field: &'static str,
		/// Why the value was rejected.
		reason: String,
	},

	/// Error parsing a TOML options file.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// Error reading an options file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},
}

/// Backend operation that produced an [`AdapterError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOp {
	/// Database creation.
	Create,
	/// Database deletion.
	Delete,
	/// Database enumeration.
	List,
	/// Database metadata lookup.
	Info,
}

impl BackendOp {
	/// Returns the lowercase operation name used in logs and messages.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Create => "create",
			Self::Delete => "delete",
			Self::List => "list",
			Self::Info => "info",
		}
	}
}

impl fmt::Display for BackendOp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Failure reported by a backend adapter in its own terms.
///
/// Adapters return this from every capability; the namespace layer lifts
/// [`AdapterError::NotFound`] into [`Error::NotFound`] and wraps the rest in
/// [`BackendError`].
#[derive(Debug, Error)]
pub enum AdapterError {
	/// The physical database does not exist.
	#[error("database does not exist: {0}")]
	NotFound(String),

	/// The physical database already exists.
	#[error("database already exists: {0}")]
	AlreadyExists(String),

	/// The HTTP request could not be completed.
	#[error("HTTP transport error: {0}")]
	Http(#[from] reqwest::Error),

	/// The server answered with a non-success status.
	#[error("server responded {status}: {error} ({reason})")]
	Status {
		/// HTTP status code.
		status: u16,
		/// Server error token, e.g. `file_exists`.
		error: String,
		/// Human readable reason supplied by the server.
		reason: String,
	},

	/// Local storage I/O failed.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// A response or stored record could not be decoded.
	#[error("malformed payload: {0}")]
	Decode(#[from] serde_json::Error),

	/// Failure injected by or specific to a custom adapter.
	#[error("{0}")]
	Other(String),
}

/// An adapter-level failure, tagged with the operation and database it hit.
#[derive(Debug, Error)]
#[error("backend {op} of {} failed: {source}", .dbname.as_deref().unwrap_or("all databases"))]
pub struct BackendError {
	/// Operation that failed.
	pub op: BackendOp,
	/// Physical database name, absent for [`BackendOp::List`].
	pub dbname: Option<String>,
	/// Underlying adapter failure.
	#[source]
	pub source: AdapterError,
}

/// Errors returned by [`crate::Databases`].
#[derive(Debug, Error)]
pub enum Error {
	/// Configuration was incomplete or malformed.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// No adapter is registered for the connection descriptor's scheme.
	#[error("unsupported backend scheme {scheme:?}")]
	UnsupportedBackend {
		/// The scheme token that failed to resolve.
		scheme: String,
	},

	/// The backend failed to perform an operation.
	#[error(transparent)]
	Backend(#[from] BackendError),

	/// The requested logical database does not exist.
	#[error("database not found: {name}")]
	NotFound {
		/// Logical database name.
		name: String,
	},

	/// The logical database name cannot be namespaced.
	#[error("invalid database name {name:?}: {reason}")]
	InvalidName {
		/// Rejected logical name.
		name: String,
		/// Why it was rejected.
		reason: &'static str,
	},

	/// The backend mutation succeeded but the lifecycle event was not published.
	#[error("failed to publish {kind} event for {dbname}: {source}")]
	Publish {
		/// Physical database name carried by the event.
		dbname: String,
		/// Event type.
		kind: DbUpdateKind,
		/// Failure reported by the queue.
		#[source]
		source: QueueError,
	},
}

/// Result type for namespace operations.
pub type Result<T> = std::result::Result<T, Error>;
