//! Coordinator state and the startup wait list.

use tokio::sync::oneshot;

/// Lifecycle state of the shared server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
	/// No process is running and none is starting.
	#[default]
	Stopped,
	/// A startup sequence is in flight.
	Starting,
	/// The process is ready and its handle is available.
	Started,
}

/// Callers blocked on an in-flight startup, in arrival order.
#[derive(Debug)]
pub(crate) struct WaitList<T> {
	waiters: Vec<oneshot::Sender<T>>,
}

impl<T> WaitList<T> {
	pub(crate) fn new() -> Self {
		Self { waiters: Vec::new() }
	}

	/// Register a waiter and return the receiving end.
	pub(crate) fn push(&mut self) -> oneshot::Receiver<T> {
		let (tx, rx) = oneshot::channel();
		self.waiters.push(tx);
		rx
	}

	pub(crate) fn len(&self) -> usize {
		self.waiters.len()
	}

	/// Wake every waiter front to back, each with a fresh value from `value`.
	///
	/// Waiters whose receiver was dropped are skipped. Returns how many were woken.
	pub(crate) fn resolve(self, mut value: impl FnMut() -> T) -> usize {
		self.waiters
			.into_iter()
			.filter_map(|tx| tx.send(value()).ok())
			.count()
	}
}
