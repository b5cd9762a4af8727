//! Server launcher abstraction for production and testing.

use std::path::Path;

use async_trait::async_trait;

use crate::error::StartupError;

/// Trait for starting and probing one kind of backend server.
///
/// The coordinator drives the startup sequence and owns all polling; a
/// launcher only answers single-shot questions. This lets the shared
/// coordinator run real server processes in production and in-process fakes
/// in tests.
#[async_trait]
pub trait ServerLauncher: Send + Sync + 'static {
	/// Handle to a running server, handed to every caller of `acquire`.
	type Handle: Clone + Send + Sync + 'static;

	/// Best-effort termination of instances left over from a previous run.
	///
	/// Returns how many processes were signalled. Errors are logged by the
	/// coordinator and never abort startup.
	async fn terminate_stale(&self, data_dir: &Path) -> Result<usize, StartupError>;

	/// Spawn the server with `data_dir` as its private state directory.
	async fn launch(&self, data_dir: &Path) -> Result<Self::Handle, StartupError>;

	/// Whether the server has bound its listening socket.
	async fn is_bound(&self, handle: &Self::Handle) -> Result<bool, StartupError>;

	/// Whether the server reports its baseline ready state.
	///
	/// Transport failures mean "not yet" and should return `Ok(false)`; an
	/// `Err` aborts startup.
	async fn is_ready(&self, handle: &Self::Handle) -> Result<bool, StartupError>;

	/// Create the administrative credential on the ready server.
	async fn provision_admin(&self, handle: &Self::Handle) -> Result<(), StartupError>;

	/// Arrange for the server to be stopped when the host process exits.
	fn stop_on_exit(&self, handle: &Self::Handle);

	/// Stop a server whose startup failed part way.
	async fn abort(&self, handle: &Self::Handle);
}
