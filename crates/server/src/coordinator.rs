//! Single-flight startup of one shared server process.
//!
//! # Purpose
//!
//! - Guarantee at most one server process per coordinator, however many callers race to use it.
//! - Queue callers that arrive while startup is in flight and resolve them in arrival order.
//! - Own the readiness polling so launchers stay single-shot.
//!
//! # Mental model
//!
//! `Stopped -> Starting -> Started`, with `Starting -> Stopped` on failure so a later
//! [`SharedServer::acquire`] retries. The state lock is never held across an await;
//! the startup sequence itself runs in a detached task, so a caller that gives up
//! waiting does not stall the others.

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::StartupError;
use crate::launcher::ServerLauncher;
use crate::state::{ProcessState, WaitList};

/// Default delay between readiness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default upper bound on bind plus readiness polling.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for a [`SharedServer`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
	data_dir: PathBuf,
	poll_interval: Duration,
	ready_timeout: Duration,
	runtime: Option<Handle>,
}

impl CoordinatorConfig {
	/// Create a config whose server keeps its state under `data_dir`.
	///
	/// The directory is wiped and recreated on every startup.
	pub fn new(data_dir: impl Into<PathBuf>) -> Self {
		Self {
			data_dir: data_dir.into(),
			poll_interval: DEFAULT_POLL_INTERVAL,
			ready_timeout: DEFAULT_READY_TIMEOUT,
			runtime: None,
		}
	}

	/// Set the delay between readiness checks.
	#[must_use]
	pub fn poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = interval;
		self
	}

	/// Set the deadline for the server to bind and report ready.
	#[must_use]
	pub fn ready_timeout(mut self, timeout: Duration) -> Self {
		self.ready_timeout = timeout;
		self
	}

	/// Run startup on `runtime` instead of the caller's runtime.
	///
	/// Use this when the server must outlive the runtime of whoever first
	/// acquires it.
	#[must_use]
	pub fn runtime(mut self, runtime: Handle) -> Self {
		self.runtime = Some(runtime);
		self
	}

	/// The server's data directory.
	pub fn data_dir(&self) -> &Path {
		&self.data_dir
	}
}

enum Inner<H> {
	Stopped,
	Starting(WaitList<Result<H, StartupError>>),
	Started(H),
}

/// Coordinator that starts a server on first use and shares it afterwards.
pub struct SharedServer<L: ServerLauncher> {
	launcher: L,
	config: CoordinatorConfig,
	inner: Mutex<Inner<L::Handle>>,
}

impl<L: ServerLauncher> SharedServer<L> {
	/// Create a stopped coordinator.
	pub fn new(launcher: L, config: CoordinatorConfig) -> Arc<Self> {
		Arc::new(Self {
			launcher,
			config,
			inner: Mutex::new(Inner::Stopped),
		})
	}

	/// Current lifecycle state.
	pub fn state(&self) -> ProcessState {
		match &*self.inner.lock() {
			Inner::Stopped => ProcessState::Stopped,
			Inner::Starting(_) => ProcessState::Starting,
			Inner::Started(_) => ProcessState::Started,
		}
	}

	/// The coordinator settings.
	pub fn config(&self) -> &CoordinatorConfig {
		&self.config
	}

	/// Return a handle to the running server, starting it if necessary.
	///
	/// Concurrent callers share a single startup and all receive its outcome,
	/// success or failure. Once started, returns immediately.
	pub async fn acquire(self: &Arc<Self>) -> Result<L::Handle, StartupError> {
		let (rx, start) = {
			let mut inner = self.inner.lock();
			match &mut *inner {
				Inner::Started(handle) => return Ok(handle.clone()),
				Inner::Starting(waiters) => {
					let rx = waiters.push();
					debug!(waiting = waiters.len(), "server startup in flight; queued");
					(rx, false)
				}
				Inner::Stopped => {
					let mut waiters = WaitList::new();
					let rx = waiters.push();
					*inner = Inner::Starting(waiters);
					(rx, true)
				}
			}
		};

		if start {
			self.spawn_startup();
		}

		rx.await.map_err(|_| StartupError::Abandoned)?
	}

	fn spawn_startup(self: &Arc<Self>) {
		let this = Arc::clone(self);
		let task = async move { this.start().await };
		match &self.config.runtime {
			Some(runtime) => drop(runtime.spawn(task)),
			None => drop(tokio::spawn(task)),
		}
	}

	async fn start(self: Arc<Self>) {
		let mut guard = AbandonGuard {
			server: &self,
			armed: true,
		};
		info!(data_dir = %self.config.data_dir.display(), "starting shared server");
		let result = self.run_startup().await;
		guard.armed = false;
		self.finish(result);
	}

	/// Publish the startup outcome: transition state, then wake waiters outside the lock.
	fn finish(&self, result: Result<L::Handle, StartupError>) {
		let waiters = {
			let mut inner = self.inner.lock();
			let next = match &result {
				Ok(handle) => Inner::Started(handle.clone()),
				Err(_) => Inner::Stopped,
			};
			match mem::replace(&mut *inner, next) {
				Inner::Starting(waiters) => waiters,
				_ => WaitList::new(),
			}
		};

		let woken = waiters.resolve(|| result.clone());
		match &result {
			Ok(_) => info!(woken, "shared server ready"),
			Err(error) => warn!(%error, woken, "shared server startup failed"),
		}
	}

	async fn run_startup(&self) -> Result<L::Handle, StartupError> {
		let data_dir = &self.config.data_dir;

		match self.launcher.terminate_stale(data_dir).await {
			Ok(0) => {}
			Ok(count) => info!(count, "terminated stale server processes"),
			Err(error) => warn!(%error, "stale server cleanup failed"),
		}

		reset_data_dir(data_dir).await?;
		let handle = self.launcher.launch(data_dir).await?;

		match self.await_ready(&handle).await {
			Ok(()) => {
				self.launcher.stop_on_exit(&handle);
				Ok(handle)
			}
			Err(error) => {
				self.launcher.abort(&handle).await;
				Err(error)
			}
		}
	}

	async fn await_ready(&self, handle: &L::Handle) -> Result<(), StartupError> {
		let started = Instant::now();
		self.poll_until(Stage::Bind, handle, started).await?;
		debug!(elapsed = ?started.elapsed(), "server bound");
		self.poll_until(Stage::Readiness, handle, started).await?;
		debug!(elapsed = ?started.elapsed(), "server ready");
		self.launcher.provision_admin(handle).await
	}

	async fn poll_until(&self, stage: Stage, handle: &L::Handle, started: Instant) -> Result<(), StartupError> {
		let deadline = started + self.config.ready_timeout;
		loop {
			let done = match stage {
				Stage::Bind => self.launcher.is_bound(handle).await?,
				Stage::Readiness => self.launcher.is_ready(handle).await?,
			};
			if done {
				return Ok(());
			}
			if Instant::now() >= deadline {
				return Err(StartupError::Timeout {
					stage: stage.as_str(),
					waited: started.elapsed(),
				});
			}
			tokio::time::sleep(self.config.poll_interval).await;
		}
	}
}

#[derive(Debug, Clone, Copy)]
enum Stage {
	Bind,
	Readiness,
}

impl Stage {
	fn as_str(self) -> &'static str {
		match self {
			Self::Bind => "bind",
			Self::Readiness => "readiness",
		}
	}
}

/// Fails the wait list if the startup task is dropped or panics before finishing.
struct AbandonGuard<'a, L: ServerLauncher> {
	server: &'a SharedServer<L>,
	armed: bool,
}

impl<L: ServerLauncher> Drop for AbandonGuard<'_, L> {
	fn drop(&mut self) {
		if self.armed {
			self.server.finish(Err(StartupError::Abandoned));
		}
	}
}

async fn reset_data_dir(path: &Path) -> Result<(), StartupError> {
	match tokio::fs::remove_dir_all(path).await {
		Ok(()) => {}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
		Err(e) => return Err(StartupError::data_dir(path, e)),
	}
	tokio::fs::create_dir_all(path)
		.await
		.map_err(|e| StartupError::data_dir(path, e))
}
