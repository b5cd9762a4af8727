//! CouchDB launcher and the process-wide shared CouchDB instance.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use url::Url;

use crate::coordinator::{CoordinatorConfig, SharedServer};
use crate::error::StartupError;
use crate::exit_hook;
use crate::launcher::ServerLauncher;

const DEFAULT_PORT: u16 = 8985;

const FALLBACK_BINARY: &str = "/usr/bin/couchdb";
const DEFAULT_INI: &str = "/etc/couchdb/default.ini";
const URI_FILE: &str = "couch.uri";
const ABORT_GRACE: Duration = Duration::from_secs(2);

/// How to run CouchDB.
#[derive(Debug, Clone)]
pub struct CouchConfig {
	binary: PathBuf,
	default_ini: PathBuf,
	host: String,
	port: u16,
	admin_name: String,
	admin_password: String,
	system_databases: usize,
}

impl Default for CouchConfig {
	fn default() -> Self {
		Self {
			binary: which::which("couchdb").unwrap_or_else(|_| PathBuf::from(FALLBACK_BINARY)),
			default_ini: PathBuf::from(DEFAULT_INI),
			host: "127.0.0.1".to_string(),
			port: DEFAULT_PORT,
			admin_name: "admin".to_string(),
			admin_password: "password".to_string(),
			system_databases: 2,
		}
	}
}

impl CouchConfig {
	/// Set the `couchdb` executable.
	#[must_use]
	pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
		self.binary = binary.into();
		self
	}

	/// Set the system `default.ini` layered beneath the generated config.
	#[must_use]
	pub fn default_ini(mut self, path: impl Into<PathBuf>) -> Self {
		self.default_ini = path.into();
		self
	}

	/// Set the listen address.
	#[must_use]
	pub fn host(mut self, host: impl Into<String>) -> Self {
		self.host = host.into();
		self
	}

	/// Set the listen port.
	#[must_use]
	pub fn port(mut self, port: u16) -> Self {
		self.port = port;
		self
	}

	/// Set the admin credential provisioned after startup.
	#[must_use]
	pub fn admin(mut self, name: impl Into<String>, password: impl Into<String>) -> Self {
		self.admin_name = name.into();
		self.admin_password = password.into();
		self
	}

	/// Set how many databases a fresh server lists once initialised.
	#[must_use]
	pub fn system_databases(mut self, count: usize) -> Self {
		self.system_databases = count;
		self
	}

	fn base_url(&self) -> Result<Url, StartupError> {
		Url::parse(&format!("http://{}:{}/", self.host, self.port))
			.map_err(|e| StartupError::Launcher(format!("invalid CouchDB address {}:{}: {e}", self.host, self.port)))
	}

	/// Config layered over `default.ini`, keeping all state inside `data_dir`.
	fn local_ini(&self, data_dir: &Path) -> String {
		let dir = data_dir.display();
		format!(
			"[couchdb]\n\
			 database_dir = {dir}\n\
			 view_index_dir = {dir}\n\
			 uri_file = {dir}/{URI_FILE}\n\
			 \n\
			 [httpd]\n\
			 port = {port}\n\
			 bind_address = {host}\n\
			 \n\
			 [log]\n\
			 file = {dir}/couch.log\n",
			port = self.port,
			host = self.host,
		)
	}
}

/// Handle to a running CouchDB process.
#[derive(Clone)]
pub struct CouchServer {
	inner: Arc<CouchProcess>,
}

struct CouchProcess {
	base_url: Url,
	admin_name: String,
	admin_password: String,
	pid: Option<u32>,
	uri_file: PathBuf,
	child: tokio::sync::Mutex<Child>,
}

impl CouchServer {
	/// Server root URL, without credentials.
	pub fn base_url(&self) -> &Url {
		&self.inner.base_url
	}

	/// Server root URL carrying the admin credential.
	///
	/// Suitable as the `db` option of a namespace manager.
	pub fn admin_url(&self) -> Url {
		let mut url = self.inner.base_url.clone();
		// Both setters only fail for URLs without a host.
		let _ = url.set_username(&self.inner.admin_name);
		let _ = url.set_password(Some(&self.inner.admin_password));
		url
	}

	/// OS process id, if the process is still known to the runtime.
	pub fn pid(&self) -> Option<u32> {
		self.inner.pid
	}
}

impl std::fmt::Debug for CouchServer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CouchServer")
			.field("base_url", &self.inner.base_url.as_str())
			.field("pid", &self.inner.pid)
			.finish_non_exhaustive()
	}
}

/// Launcher that runs a private CouchDB instance.
#[derive(Debug, Clone)]
pub struct CouchLauncher {
	config: CouchConfig,
	client: reqwest::Client,
}

impl CouchLauncher {
	/// Create a launcher for `config`.
	pub fn new(config: CouchConfig) -> Self {
		Self {
			config,
			client: reqwest::Client::new(),
		}
	}

	/// `GET /_all_dbs` answers 200 with exactly the built-in system databases.
	async fn all_dbs_ready(&self, base: &Url) -> Result<bool, StartupError> {
		let url = endpoint(base, "_all_dbs")?;
		let response = match self.client.get(url).send().await {
			Ok(response) => response,
			Err(e) => {
				debug!(error = %e, "CouchDB not answering yet");
				return Ok(false);
			}
		};
		if response.status() != reqwest::StatusCode::OK {
			return Ok(false);
		}
		match response.json::<Vec<String>>().await {
			Ok(databases) => Ok(databases.len() == self.config.system_databases),
			Err(e) => {
				debug!(error = %e, "unreadable _all_dbs response");
				Ok(false)
			}
		}
	}

	/// `PUT /_config/admins/{name}` with the JSON-encoded password.
	async fn put_admin(&self, base: &Url) -> Result<(), StartupError> {
		let name = &self.config.admin_name;
		let url = endpoint(base, &format!("_config/admins/{}", urlencoding::encode(name)))?;
		let body = serde_json::to_string(&self.config.admin_password)
			.map_err(|e| StartupError::Launcher(format!("failed to encode admin password: {e}")))?;

		let response = self.client.put(url.clone()).body(body).send().await.map_err(|e| StartupError::Http {
			url: url.to_string(),
			reason: e.to_string(),
		})?;
		let status = response.status();
		if !status.is_success() {
			return Err(StartupError::AdminRejected {
				name: name.clone(),
				status: status.as_u16(),
			});
		}
		info!(admin = %name, "provisioned CouchDB admin");
		Ok(())
	}
}

#[async_trait]
impl ServerLauncher for CouchLauncher {
	type Handle = CouchServer;

	async fn terminate_stale(&self, data_dir: &Path) -> Result<usize, StartupError> {
		let needle = data_dir.as_os_str().to_owned();
		tokio::task::spawn_blocking(move || terminate_matching(&needle))
			.await
			.map_err(|e| StartupError::Launcher(format!("stale process scan failed: {e}")))?
	}

	async fn launch(&self, data_dir: &Path) -> Result<CouchServer, StartupError> {
		let base_url = self.config.base_url()?;
		let local_ini = data_dir.join("local.ini");
		tokio::fs::write(&local_ini, self.config.local_ini(data_dir))
			.await
			.map_err(|e| StartupError::data_dir(&local_ini, e))?;
		let stdout = log_file(data_dir, "stdout.log").await?;
		let stderr = log_file(data_dir, "stderr.log").await?;

		let program = self.config.binary.display().to_string();
		let child = Command::new(&self.config.binary)
			.arg("-n")
			.arg("-a")
			.arg(&self.config.default_ini)
			.arg("-a")
			.arg(&local_ini)
			.current_dir(data_dir)
			.stdin(Stdio::null())
			.stdout(stdout)
			.stderr(stderr)
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| StartupError::Spawn {
				program: program.clone(),
				source: Arc::new(e),
			})?;

		let pid = child.id();
		info!(%program, ?pid, port = self.config.port, "spawned CouchDB");

		Ok(CouchServer {
			inner: Arc::new(CouchProcess {
				base_url,
				admin_name: self.config.admin_name.clone(),
				admin_password: self.config.admin_password.clone(),
				pid,
				uri_file: data_dir.join(URI_FILE),
				child: tokio::sync::Mutex::new(child),
			}),
		})
	}

	async fn is_bound(&self, handle: &CouchServer) -> Result<bool, StartupError> {
		{
			let mut child = handle.inner.child.lock().await;
			match child.try_wait() {
				Ok(None) => {}
				Ok(Some(status)) => return Err(StartupError::Exited { status: status.to_string() }),
				Err(e) => return Err(StartupError::Launcher(format!("failed to poll CouchDB process: {e}"))),
			}
		}
		Ok(tokio::fs::try_exists(&handle.inner.uri_file).await.unwrap_or(false))
	}

	async fn is_ready(&self, handle: &CouchServer) -> Result<bool, StartupError> {
		self.all_dbs_ready(&handle.inner.base_url).await
	}

	async fn provision_admin(&self, handle: &CouchServer) -> Result<(), StartupError> {
		self.put_admin(&handle.inner.base_url).await
	}

	fn stop_on_exit(&self, handle: &CouchServer) {
		if let Some(pid) = handle.inner.pid {
			exit_hook::stop_on_exit(pid);
		}
	}

	async fn abort(&self, handle: &CouchServer) {
		let mut child = handle.inner.child.lock().await;
		if let Err(e) = child.start_kill() {
			warn!(error = %e, "failed to kill CouchDB after failed startup");
			return;
		}
		if tokio::time::timeout(ABORT_GRACE, child.wait()).await.is_err() {
			warn!(pid = ?handle.inner.pid, "CouchDB did not exit after kill");
		}
	}
}

impl SharedServer<CouchLauncher> {
	/// The process-wide shared CouchDB instance.
	///
	/// Runs on a dedicated runtime so the server outlives whichever runtime
	/// first acquires it. Its data lives under the user cache directory.
	pub fn couch() -> Arc<Self> {
		static COUCH: OnceLock<Arc<SharedServer<CouchLauncher>>> = OnceLock::new();
		COUCH
			.get_or_init(|| {
				let config = CoordinatorConfig::new(default_data_dir()).runtime(global_runtime());
				SharedServer::new(CouchLauncher::new(CouchConfig::default()), config)
			})
			.clone()
	}
}

/// Data directory of the shared CouchDB instance.
pub fn default_data_dir() -> PathBuf {
	dirs::cache_dir()
		.unwrap_or_else(std::env::temp_dir)
		.join("tenantdb")
		.join("couch")
}

fn global_runtime() -> Handle {
	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(1)
			.thread_name("tenantdb-couch")
			.build()
			.expect("failed to build tenantdb-server global tokio runtime")
	});
	runtime.handle().clone()
}

fn endpoint(base: &Url, path: &str) -> Result<Url, StartupError> {
	base.join(path).map_err(|e| StartupError::Http {
		url: format!("{base}{path}"),
		reason: e.to_string(),
	})
}

async fn log_file(data_dir: &Path, name: &str) -> Result<Stdio, StartupError> {
	let path = data_dir.join(name);
	let file = tokio::fs::File::create(&path)
		.await
		.map_err(|e| StartupError::data_dir(&path, e))?;
	Ok(Stdio::from(file.into_std().await))
}

/// Send SIGTERM to the current user's processes whose command line mentions the `needle` directory.
fn terminate_matching(needle: &std::ffi::OsStr) -> Result<usize, StartupError> {
	let mut system = System::new();
	system.refresh_processes_specifics(
		ProcessesToUpdate::All,
		true,
		ProcessRefreshKind::nothing()
			.with_cmd(UpdateKind::Always)
			.with_user(UpdateKind::Always),
	);

	let own_pid = sysinfo::get_current_pid().map_err(|e| StartupError::Launcher(e.to_string()))?;
	let own_user = system.process(own_pid).and_then(|p| p.user_id()).cloned();
	let needle = needle.to_string_lossy();

	let mut signalled = 0;
	for (pid, process) in system.processes() {
		if *pid == own_pid || process.user_id().cloned() != own_user {
			continue;
		}
		let matches = process
			.cmd()
			.iter()
			.any(|arg| mentions_dir(&arg.to_string_lossy(), &needle));
		if matches && process.kill_with(Signal::Term).unwrap_or(false) {
			debug!(pid = pid.as_u32(), "signalled stale process");
			signalled += 1;
		}
	}
	Ok(signalled)
}

/// Whether `arg` names `dir` itself or a path beneath it, not a sibling sharing its prefix.
fn mentions_dir(arg: &str, dir: &str) -> bool {
	let dir = dir.trim_end_matches('/');
	!dir.is_empty()
		&& arg
			.match_indices(dir)
			.any(|(at, _)| matches!(arg[at + dir.len()..].chars().next(), None | Some('/')))
}
