//! Crash detection loop.
//!
//! Each tick walks every module once:
//!
//! 1. skip it if it is alive or was never started
//! 2. record a newly observed exit (`last_exit` + `=== EXIT ... ===`)
//! 3. queue an alert if the alert clock allows, then reset the clock
//! 4. with auto-restart on, restart if the restart clock allows
//!
//! Alerts and restarts share one throttle interval. Every exit counts,
//! including one caused by an operator stop or kill.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::alerts::AlertQueue;
use crate::clock::Clock;
use crate::error::Result;
use crate::logs;
use crate::process::SupervisedProcess;

#[derive(Debug, Clone, Copy)]
pub struct MonitorPolicy {
	pub poll_interval: Duration,
	pub throttle: Duration,
	pub auto_restart: bool,
	pub stop_timeout: Duration,
	pub settle_delay: Duration,
}

#[derive(Clone)]
pub struct Monitor {
	processes: Vec<Arc<SupervisedProcess>>,
	alerts: Arc<AlertQueue>,
	clock: Arc<dyn Clock>,
	policy: MonitorPolicy,
}

/// What one inspection did, mostly for tests and debug logs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Inspection {
	pub recorded_exit: bool,
	pub alerted: bool,
	pub restarted: bool,
}

impl Monitor {
	pub fn new(
		processes: Vec<Arc<SupervisedProcess>>,
		alerts: Arc<AlertQueue>,
		clock: Arc<dyn Clock>,
		policy: MonitorPolicy,
	) -> Self {
		Self {
			processes,
			alerts,
			clock,
			policy,
		}
	}

	/// Poll until `shutdown` flips to true or its sender goes away.
	pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
		let mut ticker = tokio::time::interval(self.policy.poll_interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		tracing::debug!(interval = ?self.policy.poll_interval, "monitor running");
		loop {
			tokio::select! {
				_ = ticker.tick() => self.poll_once().await,
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						break;
					}
				}
			}
		}
		tracing::debug!("monitor stopped");
	}

	/// One pass over every module. A failure on one module is logged and the
	/// rest are still examined.
	pub async fn poll_once(&self) {
		for process in &self.processes {
			if let Err(e) = self.inspect(process).await {
				tracing::error!(module = %process.name(), kind = e.as_label(), "monitor check failed: {}", e);
			}
		}
	}

	pub async fn inspect(&self, process: &SupervisedProcess) -> Result<Inspection> {
		let mut outcome = Inspection::default();
		let mut run = process.lock().await;

		let Some(code) = process.poll_exit(&mut run)? else {
			return Ok(outcome);
		};
		outcome.recorded_exit = process.record_exit(&mut run, code).is_some();

		let now = self.clock.now();
		let exited_at = run
			.last_exit
			.as_ref()
			.map(|e| logs::format_timestamp(e.at))
			.unwrap_or_else(logs::timestamp);

		if due(run.last_alert, now, self.policy.throttle) {
			self.alerts.push(format!(
				"[ALERT] Module exited: {} returncode={} at {}",
				process.name(),
				code,
				exited_at
			));
			outcome.alerted = true;
		}
		run.last_alert = Some(now);

		if self.policy.auto_restart && due(run.last_restart, now, self.policy.throttle) {
			run.last_restart = Some(now);
			outcome.restarted = true;
			match process
				.restart_locked(&mut run, self.policy.stop_timeout, self.policy.settle_delay)
				.await
			{
				Ok(pid) => {
					tracing::info!(module = %process.name(), pid, "auto-restarted");
					self.alerts.push(format!("[INFO] Restarted {} at {}", process.name(), logs::timestamp()));
				}
				Err(e) => {
					tracing::error!(module = %process.name(), "auto-restart failed: {}", e);
					self.alerts.push(format!("[ERROR] Restart failed for {}: {}", process.name(), e));
				}
			}
		}

		Ok(outcome)
	}
}

fn due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
	match last {
		None => true,
		Some(last) => now.saturating_duration_since(last) >= interval,
	}
}
