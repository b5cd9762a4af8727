//! Embedded log-structured store rooted in a local directory.
//!
//! Layout: `<root>/<percent-encoded physical name>/db.log`. Each database
//! log is append-only JSON lines; the first record is the header written at
//! creation.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{Backend, DatabaseInfo, Descriptor};
use crate::error::{AdapterError, ConfigError};

const LOG_FILE: &str = "db.log";

/// One line of a database log.
#[derive(Debug, Serialize, Deserialize)]
struct LogRecord {
	seq: u64,
	op: LogOp,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	db_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LogOp {
	Header,
	/// Document records appended by the storage engine.
	#[serde(other)]
	Document,
}

/// Adapter storing each database as a directory with an append-only log.
#[derive(Debug, Clone)]
pub struct LogStoreBackend {
	root: PathBuf,
}

impl LogStoreBackend {
	/// Open a store rooted at `root`. The directory is created lazily.
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	/// Build from a `leveldb://<path>` descriptor.
	pub fn from_descriptor(descriptor: &Descriptor) -> Result<Self, ConfigError> {
		let path = descriptor.rest();
		if path.is_empty() {
			return Err(ConfigError::Invalid {
				field: "db",
				reason: "log store descriptor has no path".into(),
			});
		}
		Ok(Self::new(path))
	}

	fn db_dir(&self, name: &str) -> PathBuf {
		self.root.join(urlencoding::encode(name).as_ref())
	}

	async fn read_log(&self, name: &str) -> Result<(Vec<LogRecord>, u64), AdapterError> {
		let path = self.db_dir(name).join(LOG_FILE);
		let raw = match fs::read_to_string(&path).await {
			Ok(raw) => raw,
			Err(e) if e.kind() == ErrorKind::NotFound => return Err(AdapterError::NotFound(name.to_string())),
			Err(e) => return Err(e.into()),
		};
		let records = raw
			.lines()
			.filter(|line| !line.trim().is_empty())
			.map(serde_json::from_str)
			.collect::<Result<Vec<LogRecord>, _>>()?;
		Ok((records, raw.len() as u64))
	}
}

#[async_trait]
impl Backend for LogStoreBackend {
	async fn create(&self, name: &str) -> Result<(), AdapterError> {
		fs::create_dir_all(&self.root).await?;
		let dir = self.db_dir(name);
		match fs::create_dir(&dir).await {
			Ok(()) => {}
			Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(AdapterError::AlreadyExists(name.to_string())),
			Err(e) => return Err(e.into()),
		}

		// Without its header the directory is not a database; leave nothing behind.
		if let Err(error) = write_header(&dir, name).await {
			let _ = fs::remove_dir_all(&dir).await;
			return Err(error);
		}
		Ok(())
	}

	async fn delete(&self, name: &str) -> Result<(), AdapterError> {
		match fs::remove_dir_all(self.db_dir(name)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Err(AdapterError::NotFound(name.to_string())),
			Err(e) => Err(e.into()),
		}
	}

	async fn list(&self) -> Result<Vec<String>, AdapterError> {
		let mut entries = match fs::read_dir(&self.root).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};

		let mut names = Vec::new();
		while let Some(entry) = entries.next_entry().await? {
			if !fs::try_exists(entry.path().join(LOG_FILE)).await? {
				continue;
			}
			let file_name = entry.file_name();
			let Some(encoded) = file_name.to_str() else {
				continue;
			};
			if let Ok(name) = urlencoding::decode(encoded) {
				names.push(name.into_owned());
			}
		}
		Ok(names)
	}

	async fn info(&self, name: &str) -> Result<DatabaseInfo, AdapterError> {
		let (records, disk_size) = self.read_log(name).await?;
		let doc_count = records.iter().filter(|r| r.op == LogOp::Document).count() as u64;
		let update_seq = records.last().map_or(0, |r| r.seq);
		Ok(DatabaseInfo {
			db_name: name.to_string(),
			doc_count: Some(doc_count),
			update_seq: Some(update_seq.into()),
			disk_size: Some(disk_size),
		})
	}
}

async fn write_header(dir: &Path, name: &str) -> Result<(), AdapterError> {
	let header = LogRecord {
		seq: 0,
		op: LogOp::Header,
		db_name: Some(name.to_string()),
	};
	let mut line = serde_json::to_vec(&header)?;
	line.push(b'\n');

	let mut file = fs::OpenOptions::new()
		.create_new(true)
		.append(true)
		.open(dir.join(LOG_FILE))
		.await?;
	file.write_all(&line).await?;
	file.sync_all().await?;
	Ok(())
}
