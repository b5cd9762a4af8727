//! Mapping between logical database names and namespaced physical names.

use crate::error::{ConfigError, Error, Result};

/// Separator placed between the application id and the logical name.
pub const SEPARATOR: char = '/';

/// Suffix of the per-application lifecycle topic.
pub const UPDATES_TOPIC: &str = "_db_updates";

/// One application's slice of a shared backend.
///
/// The application id never contains [`SEPARATOR`], so `app_id + "/" + name`
/// is injective across applications as well as within one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
	app_id: String,
	prefix: String,
}

impl Namespace {
	/// Creates a namespace for `app_id`.
	pub fn new(app_id: impl Into<String>) -> std::result::Result<Self, ConfigError> {
		let app_id = app_id.into();
		if app_id.trim().is_empty() {
			return Err(ConfigError::MissingField("app_id"));
		}
		if app_id.contains(SEPARATOR) {
			return Err(ConfigError::Invalid {
				field: "app_id",
				reason: format!("must not contain {SEPARATOR:?}"),
			});
		}
		let prefix = format!("{app_id}{SEPARATOR}");
		Ok(Self { app_id, prefix })
	}

	/// Returns the application id.
	pub fn app_id(&self) -> &str {
		&self.app_id
	}

	/// Returns the lifecycle topic, `<app_id>/_db_updates`.
	pub fn topic(&self) -> String {
		format!("{}{UPDATES_TOPIC}", self.prefix)
	}

	/// Qualifies `logical` under this namespace.
	pub fn database(&self, logical: &str) -> Result<NamespacedDatabase> {
		if logical.is_empty() {
			return Err(Error::InvalidName {
				name: logical.to_string(),
				reason: "name is empty",
			});
		}
		Ok(NamespacedDatabase {
			logical: logical.to_string(),
			physical: format!("{}{logical}", self.prefix),
		})
	}

	/// Returns the logical name for `physical` when it belongs to this namespace.
	pub fn strip<'a>(&self, physical: &'a str) -> Option<&'a str> {
		physical.strip_prefix(self.prefix.as_str()).filter(|rest| !rest.is_empty())
	}
}

/// A logical database name paired with its physical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacedDatabase {
	logical: String,
	physical: String,
}

impl NamespacedDatabase {
	/// Caller-visible, unqualified name.
	pub fn logical(&self) -> &str {
		&self.logical
	}

	/// Backend-visible, namespace-qualified name.
	pub fn physical(&self) -> &str {
		&self.physical
	}
}
