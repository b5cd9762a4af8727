//! HTTP adapter for CouchDB-compatible servers.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use url::Url;

use super::{Backend, DatabaseInfo, Descriptor};
use crate::error::{AdapterError, ConfigError};

/// Error body CouchDB returns alongside non-success statuses.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CouchError {
	error: String,
	reason: String,
}

/// Adapter speaking the CouchDB HTTP API.
///
/// Credentials embedded in the descriptor are stripped from the base URL
/// and sent as basic auth on every request. Physical names are
/// percent-encoded into a single path segment, so `id1234/foo` travels as
/// `id1234%2Ffoo`.
#[derive(Debug, Clone)]
pub struct CouchBackend {
	client: Client,
	base: Url,
	credentials: Option<(String, Option<String>)>,
	admins: String,
}

impl CouchBackend {
	/// Build an adapter from an `http://` or `https://` descriptor.
	pub fn new(descriptor: &Descriptor, admins: &str) -> Result<Self, ConfigError> {
		let mut base = Url::parse(descriptor.as_str()).map_err(|e| ConfigError::Invalid {
			field: "db",
			reason: e.to_string(),
		})?;
		if base.cannot_be_a_base() || base.host_str().is_none() {
			return Err(ConfigError::Invalid {
				field: "db",
				reason: "expected an absolute server URL".into(),
			});
		}

		let credentials = if base.username().is_empty() {
			None
		} else {
			let user = decode(base.username());
			let pass = base.password().map(decode);
			Some((user, pass))
		};
		let _ = base.set_username("");
		let _ = base.set_password(None);
		if !base.path().ends_with('/') {
			let path = format!("{}/", base.path());
			base.set_path(&path);
		}

		Ok(Self {
			client: Client::new(),
			base,
			credentials,
			admins: admins.to_string(),
		})
	}

	/// Server base URL without credentials.
	pub fn base_url(&self) -> &Url {
		&self.base
	}

	fn url(&self, path: &str) -> Result<Url, AdapterError> {
		self.base.join(path).map_err(|e| AdapterError::Other(format!("invalid request path {path:?}: {e}")))
	}

	fn db_url(&self, name: &str, suffix: &str) -> Result<Url, AdapterError> {
		self.url(&format!("{}{suffix}", urlencoding::encode(name)))
	}

	fn request(&self, method: Method, url: Url) -> RequestBuilder {
		let builder = self.client.request(method, url);
		match &self.credentials {
			Some((user, pass)) => builder.basic_auth(user, pass.as_ref()),
			None => builder,
		}
	}

	/// Grant the admins role administrative rights on a freshly created database.
	async fn secure(&self, name: &str) -> Result<(), AdapterError> {
		let security = json!({
			"admins": { "names": [], "roles": [self.admins] },
			"members": { "names": [], "roles": [] },
		});
		let response = self
			.request(Method::PUT, self.db_url(name, "/_security")?)
			.json(&security)
			.send()
			.await?;
		check(response, name).await?;
		Ok(())
	}
}

fn decode(raw: &str) -> String {
	urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |s| s.into_owned())
}

/// Map a CouchDB response status onto [`AdapterError`].
async fn check(response: Response, name: &str) -> Result<Response, AdapterError> {
	let status = response.status();
	if status.is_success() {
		return Ok(response);
	}
	if status == StatusCode::NOT_FOUND {
		return Err(AdapterError::NotFound(name.to_string()));
	}
	let body: CouchError = response.json().await.unwrap_or_default();
	if status == StatusCode::PRECONDITION_FAILED && body.error == "file_exists" {
		return Err(AdapterError::AlreadyExists(name.to_string()));
	}
	Err(AdapterError::Status {
		status: status.as_u16(),
		error: body.error,
		reason: body.reason,
	})
}

#[async_trait]
impl Backend for CouchBackend {
	async fn create(&self, name: &str) -> Result<(), AdapterError> {
		let response = self.request(Method::PUT, self.db_url(name, "")?).send().await?;
		check(response, name).await?;
		if let Err(error) = self.secure(name).await {
			// An unsecured database must not outlive a failed create.
			if let Err(rollback) = self.delete(name).await {
				warn!(dbname = name, error = %rollback, "failed to roll back unsecured database");
			}
			return Err(error);
		}
		Ok(())
	}

	async fn delete(&self, name: &str) -> Result<(), AdapterError> {
		let response = self.request(Method::DELETE, self.db_url(name, "")?).send().await?;
		check(response, name).await?;
		Ok(())
	}

	async fn list(&self) -> Result<Vec<String>, AdapterError> {
		let response = self.request(Method::GET, self.url("_all_dbs")?).send().await?;
		let response = check(response, "_all_dbs").await?;
		Ok(response.json().await?)
	}

	async fn info(&self, name: &str) -> Result<DatabaseInfo, AdapterError> {
		let response = self.request(Method::GET, self.db_url(name, "")?).send().await?;
		let response = check(response, name).await?;
		Ok(response.json().await?)
	}
}
