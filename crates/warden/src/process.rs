use chrono::Utc;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::logs::{self, Marker, Stream};
use crate::output::LogSink;
use crate::types::*;

/// One module under supervision.
///
/// Every lifecycle transition runs under `run`, so start/stop/kill from the
/// console and the monitor's exit bookkeeping never interleave.
pub struct SupervisedProcess {
	def: ProcessDef,
	identity: String,
	name: String,
	sink: LogSink,
	run: Mutex<RunState>,
}

#[derive(Default)]
pub(crate) struct RunState {
	child: Option<Child>,
	pid: Option<u32>,
	started_at: Option<Instant>,
	/// The current child's exit is already in `last_exit`.
	exit_recorded: bool,
	pub(crate) last_exit: Option<LastExit>,
	pub(crate) last_alert: Option<Instant>,
	pub(crate) last_restart: Option<Instant>,
}

impl SupervisedProcess {
	pub fn new(def: ProcessDef, log_dir: &Path) -> Self {
		let sink = LogSink::open(&logs::log_path(log_dir, &def));
		Self {
			identity: def.identity(),
			name: def.short_name(),
			def,
			sink,
			run: Mutex::new(RunState::default()),
		}
	}

	pub fn identity(&self) -> &str {
		&self.identity
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn log_path(&self) -> PathBuf {
		self.sink.path().to_path_buf()
	}

	pub fn sink(&self) -> &LogSink {
		&self.sink
	}

	pub(crate) async fn lock(&self) -> MutexGuard<'_, RunState> {
		self.run.lock().await
	}

	pub async fn start(&self) -> Result<u32> {
		let mut run = self.run.lock().await;
		self.start_locked(&mut run)
	}

	/// Graceful stop. `Ok(None)` when there was nothing running.
	pub async fn stop(&self, timeout: Duration) -> Result<Option<LastExit>> {
		let mut run = self.run.lock().await;
		self.stop_locked(&mut run, timeout).await
	}

	/// Immediate SIGKILL. `Ok(None)` when there was nothing running.
	pub async fn kill(&self) -> Result<Option<LastExit>> {
		let mut run = self.run.lock().await;
		self.kill_locked(&mut run).await
	}

	/// Stop (if running), settle, start. Holds the lock throughout, so no
	/// other transition can slip in between.
	pub async fn restart(&self, timeout: Duration, settle: Duration) -> Result<u32> {
		let mut run = self.run.lock().await;
		self.restart_locked(&mut run, timeout, settle).await
	}

	pub async fn status(&self) -> ProcessStatus {
		let mut run = self.run.lock().await;
		let state = current_state(&mut run);
		let running = state.is_running();
		ProcessStatus {
			identity: self.identity.clone(),
			name: self.name.clone(),
			state,
			pid: if running { run.pid } else { None },
			uptime: if running { run.started_at.map(|t| t.elapsed()) } else { None },
			last_exit: run.last_exit.clone(),
			log_path: self.log_path(),
		}
	}

	pub async fn state(&self) -> ProcessState {
		let mut run = self.run.lock().await;
		current_state(&mut run)
	}

	pub fn tail(&self, n: usize) -> Vec<String> {
		self.sink.tail(n)
	}

	pub fn last_stderr(&self, n: usize) -> Vec<String> {
		self.sink.last_stderr(n)
	}

	pub(crate) fn start_locked(&self, run: &mut RunState) -> Result<u32> {
		if let Some(child) = run.child.as_mut() {
			match child.try_wait()? {
				None => return Err(Error::AlreadyRunning(self.identity.clone())),
				Some(status) => {
					self.record_exit(run, exit_code(status));
				}
			}
		}

		if !self.def.path.exists() {
			return Err(Error::NotFound(self.identity.clone()));
		}

		let mut cmd = match &self.def.interpreter {
			Some(interp) => {
				let mut cmd = Command::new(interp);
				cmd.arg(&self.def.path);
				cmd
			}
			None => Command::new(self.def.executable()),
		};
		cmd.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.process_group(0)
			.kill_on_drop(true);

		let mut child = cmd.spawn().map_err(|source| Error::Spawn {
			name: self.identity.clone(),
			source,
		})?;
		let pid = child.id().unwrap_or_default();

		self.sink.marker(Marker::Start {
			command: &self.def.command_line(),
		});

		if let Some(stdout) = child.stdout.take() {
			tokio::spawn(pump_lines(stdout, self.sink.clone(), Stream::Out));
		}
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(pump_lines(stderr, self.sink.clone(), Stream::Err));
		}

		run.child = Some(child);
		run.pid = Some(pid);
		run.started_at = Some(Instant::now());
		run.exit_recorded = false;

		tracing::info!(module = %self.name, pid, "started");
		Ok(pid)
	}

	pub(crate) async fn stop_locked(&self, run: &mut RunState, timeout: Duration) -> Result<Option<LastExit>> {
		let pid = run.pid;
		let Some(child) = run.child.as_mut() else {
			return Ok(None);
		};
		if child.try_wait()?.is_some() {
			return Ok(None);
		}

		signal_group(pid, nix::sys::signal::Signal::SIGTERM);
		let waited = tokio::time::timeout(timeout, child.wait()).await;
		let status = match waited {
			Ok(status) => status?,
			Err(_) => {
				tracing::warn!(module = %self.name, ?timeout, "termination timed out, killing");
				force_kill(child, pid).await?
			}
		};

		let record = self.finish_run(run, status);
		self.sink.marker_at(Marker::Stopped { code: record.code }, record.at);
		tracing::info!(module = %self.name, code = record.code, "stopped");
		Ok(Some(record))
	}

	pub(crate) async fn kill_locked(&self, run: &mut RunState) -> Result<Option<LastExit>> {
		let pid = run.pid;
		let Some(child) = run.child.as_mut() else {
			return Ok(None);
		};
		if child.try_wait()?.is_some() {
			return Ok(None);
		}

		let status = force_kill(child, pid).await?;
		let record = self.finish_run(run, status);
		self.sink.marker_at(Marker::Killed { code: record.code }, record.at);
		tracing::info!(module = %self.name, code = record.code, "killed");
		Ok(Some(record))
	}

	pub(crate) async fn restart_locked(&self, run: &mut RunState, timeout: Duration, settle: Duration) -> Result<u32> {
		self.stop_locked(run, timeout).await?;
		tokio::time::sleep(settle).await;
		self.start_locked(run)
	}

	/// Exit code of the current child if it has exited. Never blocks.
	pub(crate) fn poll_exit(&self, run: &mut RunState) -> Result<Option<i32>> {
		let Some(child) = run.child.as_mut() else {
			return Ok(None);
		};
		Ok(child.try_wait()?.map(exit_code))
	}

	/// Record an exit found by polling. Returns `None` when this
	/// run's exit is already on record.
	pub(crate) fn record_exit(&self, run: &mut RunState, code: i32) -> Option<LastExit> {
		if run.exit_recorded || run.child.is_none() {
			return None;
		}
		let record = LastExit::now(code);
		run.last_exit = Some(record.clone());
		run.exit_recorded = true;
		self.sink.marker_at(Marker::Exit { code }, record.at);
		tracing::warn!(module = %self.name, code, "exited");
		Some(record)
	}

	fn finish_run(&self, run: &mut RunState, status: ExitStatus) -> LastExit {
		let record = LastExit {
			at: Utc::now(),
			code: exit_code(status),
		};
		run.last_exit = Some(record.clone());
		run.exit_recorded = true;
		record
	}
}

fn current_state(run: &mut RunState) -> ProcessState {
	let Some(child) = run.child.as_mut() else {
		return ProcessState::NotStarted;
	};
	match child.try_wait() {
		Ok(Some(status)) => ProcessState::Exited {
			code: exit_code(status),
		},
		Ok(None) => ProcessState::Running,
		Err(e) => {
			tracing::warn!(pid = ?run.pid, "liveness check failed: {}", e);
			ProcessState::Running
		}
	}
}

/// Exit code, or the negated signal number for signal deaths.
pub fn exit_code(status: ExitStatus) -> i32 {
	status
		.code()
		.or_else(|| status.signal().map(|sig| -sig))
		.unwrap_or(-1)
}

async fn force_kill(child: &mut Child, pid: Option<u32>) -> std::io::Result<ExitStatus> {
	signal_group(pid, nix::sys::signal::Signal::SIGKILL);
	if let Err(e) = child.start_kill() {
		tracing::debug!(?pid, "start_kill: {}", e);
	}
	child.wait().await
}

/// Signal the child's whole process group, falling back to the child alone.
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) {
	use nix::sys::signal::{kill, killpg};
	use nix::unistd::Pid;

	let Some(pid) = pid.filter(|p| *p > 0) else {
		return;
	};
	let pid = Pid::from_raw(pid as i32);
	if let Err(e) = killpg(pid, signal) {
		tracing::debug!(%pid, ?signal, "killpg failed: {}", e);
		let _ = kill(pid, signal);
	}
}

async fn pump_lines<R: AsyncRead + Unpin>(reader: R, sink: LogSink, stream: Stream) {
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::new();
	loop {
		buf.clear();
		match reader.read_until(b'\n', &mut buf).await {
			Ok(0) => break,
			Ok(_) => {
				let line = String::from_utf8_lossy(&buf);
				sink.record(stream, line.trim_end_matches(['\n', '\r']));
			}
			Err(e) => {
				tracing::warn!(path = %sink.path().display(), stream = stream.tag(), "reader stopped: {}", e);
				sink.reader_failed(stream, &e);
				break;
			}
		}
	}
}
