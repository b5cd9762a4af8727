//! Stop registered server processes when the host process exits.
//!
//! Hooks run from `atexit`, so they fire on normal exit (including the end of a
//! test binary) but not on signals or aborts. Each registered pid gets SIGTERM,
//! a grace period, then SIGKILL.

use std::sync::Once;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tracing::{debug, warn};

const EXIT_GRACE: Duration = Duration::from_secs(10);
const EXIT_POLL: Duration = Duration::from_millis(50);

static PIDS: Mutex<Vec<i32>> = parking_lot::const_mutex(Vec::new());
static REGISTER: Once = Once::new();

/// Stop `pid` when this process exits normally.
pub(crate) fn stop_on_exit(pid: u32) {
	let Ok(pid) = i32::try_from(pid) else {
		warn!(pid, "pid out of range; not registering exit hook");
		return;
	};
	PIDS.lock().push(pid);
	debug!(pid, "registered exit hook");

	REGISTER.call_once(|| {
		// SAFETY: `stop_registered` captures nothing and never unwinds.
		let rc = unsafe { libc::atexit(stop_registered) };
		if rc != 0 {
			warn!("atexit registration failed; server will outlive this process");
		}
	});
}

extern "C" fn stop_registered() {
	let pids = std::mem::take(&mut *PIDS.lock());
	for pid in pids {
		stop(Pid::from_raw(pid));
	}
}

fn stop(pid: Pid) {
	if kill(pid, Signal::SIGTERM).is_err() {
		return;
	}
	let deadline = Instant::now() + EXIT_GRACE;
	while Instant::now() < deadline {
		if exited(pid) {
			return;
		}
		std::thread::sleep(EXIT_POLL);
	}
	let _ = kill(pid, Signal::SIGKILL);
	let _ = waitpid(pid, None);
}

fn exited(pid: Pid) -> bool {
	match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
		Ok(WaitStatus::StillAlive) => false,
		Ok(_) => true,
		// Not our child: fall back to probing for existence.
		Err(Errno::ECHILD) => kill(pid, None).is_err(),
		Err(_) => true,
	}
}
