use std::collections::VecDeque;
use std::sync::Mutex;

pub const DEFAULT_ALERT_CAPACITY: usize = 200;

/// Bounded queue of operator notifications.
///
/// The monitor pushes, the console drains everything right before it prompts.
/// The lock is held only for the push or the drain itself.
#[derive(Debug)]
pub struct AlertQueue {
	entries: Mutex<VecDeque<String>>,
	capacity: usize,
}

impl AlertQueue {
	pub fn new(capacity: usize) -> Self {
		Self {
			entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
			capacity,
		}
	}

	/// Oldest alert is dropped when the queue is full.
	pub fn push(&self, alert: impl Into<String>) {
		if self.capacity == 0 {
			return;
		}
		let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
		if entries.len() >= self.capacity {
			entries.pop_front();
		}
		entries.push_back(alert.into());
	}

	pub fn drain(&self) -> Vec<String> {
		let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
		entries.drain(..).collect()
	}

	pub fn len(&self) -> usize {
		self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Default for AlertQueue {
	fn default() -> Self {
		Self::new(DEFAULT_ALERT_CAPACITY)
	}
}
