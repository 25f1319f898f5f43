use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Time source for the monitor's throttle clocks.
pub trait Clock: Send + Sync {
	fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> Instant {
		Instant::now()
	}
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
	origin: Instant,
	offset: Mutex<Duration>,
}

impl ManualClock {
	pub fn new() -> Self {
		Self {
			origin: Instant::now(),
			offset: Mutex::new(Duration::ZERO),
		}
	}

	pub fn advance(&self, by: Duration) {
		let mut offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
		*offset += by;
	}

	pub fn elapsed(&self) -> Duration {
		*self.offset.lock().unwrap_or_else(|p| p.into_inner())
	}
}

impl Default for ManualClock {
	fn default() -> Self {
		Self::new()
	}
}

impl Clock for ManualClock {
	fn now(&self) -> Instant {
		self.origin + self.elapsed()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn manual_clock_moves_only_on_advance() {
		let clock = ManualClock::new();
		let t0 = clock.now();
		assert_eq!(clock.now(), t0);
		clock.advance(Duration::from_secs(5));
		assert_eq!(clock.now() - t0, Duration::from_secs(5));
	}
}
