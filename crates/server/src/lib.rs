//! Shared backend server lifecycle: start once, wait until ready, stop at exit.
//!
//! # Purpose
//!
//! - Start at most one backend server process per coordinator, on first use.
//! - Hand every concurrent caller the same handle, or the same startup failure.
//! - Stop the process when the host process exits.
//!
//! # Mental model
//!
//! A [`SharedServer`] owns the lifecycle state and the wait list; a
//! [`ServerLauncher`] knows how to spawn and check one kind of server. Startup
//! is: clean up stale instances, recreate the data directory, launch, poll until
//! bound, poll until ready, provision the admin credential, register the exit
//! hook. Any failure resets the coordinator to [`ProcessState::Stopped`].
//!
//! # Key types
//!
//! | Type | Meaning | Constraints |
//! |---|---|---|
//! | [`SharedServer`] | Single-flight lifecycle coordinator | One process per instance; lock never held across await |
//! | [`ServerLauncher`] | Spawn and health-check capability | Checks are single-shot; the coordinator polls |
//! | [`CouchLauncher`] | Private CouchDB instance | State confined to the data directory |
//! | [`StartupError`] | Failure shared by all waiters | `Clone` |
//!
//! # Example
//!
//! ```no_run
//! # use tenantdb_server::{CouchServer, SharedServer, StartupError};
//! # async fn run() -> Result<(), StartupError> {
//! let couch: CouchServer = SharedServer::couch().acquire().await?;
//! println!("CouchDB ready at {}", couch.base_url());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod coordinator;
pub mod couch;
pub mod error;
mod exit_hook;
pub mod launcher;
pub mod state;

pub use coordinator::{CoordinatorConfig, SharedServer};
pub use couch::{CouchConfig, CouchLauncher, CouchServer};
pub use error::StartupError;
pub use launcher::ServerLauncher;
pub use state::ProcessState;
