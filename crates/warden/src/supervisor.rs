use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::alerts::{AlertQueue, DEFAULT_ALERT_CAPACITY};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::monitor::{Monitor, MonitorPolicy};
use crate::process::SupervisedProcess;
use crate::types::*;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
	pub log_dir: PathBuf,
	pub auto_restart: bool,
	/// Minimum gap between alerts, and between restart attempts, per module.
	pub alert_interval: Duration,
	pub poll_interval: Duration,
	pub stop_timeout: Duration,
	pub settle_delay: Duration,
	pub alert_capacity: usize,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			log_dir: PathBuf::from("run_logs"),
			auto_restart: false,
			alert_interval: Duration::from_secs(10),
			poll_interval: Duration::from_secs(1),
			stop_timeout: Duration::from_secs(5),
			settle_delay: Duration::from_millis(300),
			alert_capacity: DEFAULT_ALERT_CAPACITY,
		}
	}
}

/// Registry of supervised modules in registration order.
pub struct Supervisor {
	processes: Vec<Arc<SupervisedProcess>>,
	config: SupervisorConfig,
	alerts: Arc<AlertQueue>,
	clock: Arc<dyn Clock>,
	monitor: Mutex<Option<MonitorHandle>>,
}

struct MonitorHandle {
	shutdown: watch::Sender<bool>,
	task: JoinHandle<()>,
}

impl Supervisor {
	pub fn new(config: SupervisorConfig, defs: Vec<ProcessDef>) -> Arc<Self> {
		Self::with_clock(config, defs, Arc::new(SystemClock))
	}

	/// Duplicate identities are dropped; the first registration wins.
	pub fn with_clock(config: SupervisorConfig, defs: Vec<ProcessDef>, clock: Arc<dyn Clock>) -> Arc<Self> {
		let mut processes: Vec<Arc<SupervisedProcess>> = Vec::with_capacity(defs.len());
		for def in defs {
			if processes.iter().any(|p| p.identity() == def.identity()) {
				tracing::warn!(module = %def.identity(), "duplicate module ignored");
				continue;
			}
			processes.push(Arc::new(SupervisedProcess::new(def, &config.log_dir)));
		}
		Arc::new(Self {
			processes,
			alerts: Arc::new(AlertQueue::new(config.alert_capacity)),
			config,
			clock,
			monitor: Mutex::new(None),
		})
	}

	pub fn config(&self) -> &SupervisorConfig {
		&self.config
	}

	pub fn processes(&self) -> &[Arc<SupervisedProcess>] {
		&self.processes
	}

	pub fn identities(&self) -> Vec<String> {
		self.processes.iter().map(|p| p.identity().to_string()).collect()
	}

	pub fn get(&self, identity: &str) -> Result<&Arc<SupervisedProcess>> {
		self.processes
			.iter()
			.find(|p| p.identity() == identity)
			.ok_or_else(|| Error::NotFound(identity.to_string()))
	}

	pub fn monitor(&self) -> Monitor {
		Monitor::new(
			self.processes.clone(),
			Arc::clone(&self.alerts),
			Arc::clone(&self.clock),
			MonitorPolicy {
				poll_interval: self.config.poll_interval,
				throttle: self.config.alert_interval,
				auto_restart: self.config.auto_restart,
				stop_timeout: self.config.stop_timeout,
				settle_delay: self.config.settle_delay,
			},
		)
	}

	/// Spawn the monitor loop. Returns false if it is already running.
	pub fn spawn_monitor(&self) -> bool {
		let mut slot = self.monitor.lock().unwrap_or_else(|p| p.into_inner());
		if slot.is_some() {
			return false;
		}
		let (shutdown, rx) = watch::channel(false);
		let task = tokio::spawn(self.monitor().run(rx));
		*slot = Some(MonitorHandle { shutdown, task });
		true
	}

	/// Start every module, best effort, then make sure the monitor runs.
	/// Returns one human-readable line per module.
	pub async fn start_all(&self) -> Vec<String> {
		let mut messages = Vec::with_capacity(self.processes.len());
		for process in &self.processes {
			let msg = match process.start().await {
				Ok(pid) => format!("started {} (pid {})", process.identity(), pid),
				Err(Error::NotFound(_)) => {
					tracing::warn!(module = %process.identity(), "module not found, skipped");
					format!("[WARN] module not found: {} (skipped)", process.identity())
				}
				Err(Error::AlreadyRunning(_)) => format!("{}: already running", process.identity()),
				Err(e) => {
					tracing::error!(module = %process.identity(), "failed to start: {}", e);
					format!("[ERROR] failed to start {}: {}", process.identity(), e)
				}
			};
			messages.push(msg);
		}
		self.spawn_monitor();
		messages
	}

	/// Stop the monitor, then stop every running module gracefully.
	pub async fn stop_all(&self) -> Vec<String> {
		let handle = self.monitor.lock().unwrap_or_else(|p| p.into_inner()).take();
		if let Some(handle) = handle {
			let _ = handle.shutdown.send(true);
			if let Err(e) = handle.task.await {
				tracing::warn!("monitor task ended abnormally: {}", e);
			}
		}

		let mut messages = Vec::new();
		for process in &self.processes {
			match process.stop(self.config.stop_timeout).await {
				Ok(Some(exit)) => messages.push(format!("stopped {} ({})", process.identity(), exit)),
				Ok(None) => {}
				Err(e) => {
					tracing::error!(module = %process.identity(), "stop failed: {}", e);
					messages.push(format!("[ERROR] failed to stop {}: {}", process.identity(), e));
				}
			}
		}
		messages
	}

	pub async fn start(&self, identity: &str) -> Result<u32> {
		self.get(identity)?.start().await
	}

	pub async fn stop(&self, identity: &str) -> Result<Option<LastExit>> {
		self.get(identity)?.stop(self.config.stop_timeout).await
	}

	pub async fn kill(&self, identity: &str) -> Result<Option<LastExit>> {
		self.get(identity)?.kill().await
	}

	pub async fn restart(&self, identity: &str) -> Result<u32> {
		self.get(identity)?
			.restart(self.config.stop_timeout, self.config.settle_delay)
			.await
	}

	pub async fn status(&self, identity: &str) -> Result<ProcessStatus> {
		Ok(self.get(identity)?.status().await)
	}

	pub async fn statuses(&self) -> Vec<ProcessStatus> {
		let mut result = Vec::with_capacity(self.processes.len());
		for process in &self.processes {
			result.push(process.status().await);
		}
		result
	}

	pub fn tail(&self, identity: &str, n: usize) -> Result<Vec<String>> {
		Ok(self.get(identity)?.tail(n))
	}

	pub fn last_stderr(&self, identity: &str, n: usize) -> Result<Vec<String>> {
		Ok(self.get(identity)?.last_stderr(n))
	}

	pub fn log_path(&self, identity: &str) -> Result<PathBuf> {
		Ok(self.get(identity)?.log_path())
	}

	pub fn alerts(&self) -> &Arc<AlertQueue> {
		&self.alerts
	}

	pub fn drain_alerts(&self) -> Vec<String> {
		self.alerts.drain()
	}
}
