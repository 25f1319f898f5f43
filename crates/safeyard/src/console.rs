//! Interactive operator terminal.
//!
//! Reads one command per line, executes it against the supervisor or the
//! store and prints the result. Pending alerts are flushed before every
//! prompt. A failing command prints `error: ...` and the loop carries on.

use owo_colors::OwoColorize;
use serde_json::{json, Value};
use std::future::Future;
use std::io::{self, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncSeekExt};
use warden::{ProcessState, ProcessStatus, Supervisor};

use crate::audit::AuditLog;
use crate::store::{Store, StoreError};

pub const DEFAULT_LOG_LINES: usize = 40;
pub const DEFAULT_LASTERR_LINES: usize = 40;
pub const DEFAULT_ACTLOG_LINES: usize = 50;
pub const DEFAULT_RUNLOG_LINES: usize = 80;

const TAIL_POLL: Duration = Duration::from_millis(300);
const AUDIT_ACTOR: &str = "cli";

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
	#[error("usage: {0}")]
	Usage(&'static str),
	#[error("unbalanced quotes")]
	Quoting,
	#[error("unknown command: {0} (try help)")]
	Unknown(String),
	#[error("no module matching '{0}'")]
	NotFound(String),
	#[error("ambiguous module name '{name}'; matches: {}", .candidates.join(", "))]
	Ambiguous { name: String, candidates: Vec<String> },
	#[error(transparent)]
	Supervisor(#[from] warden::Error),
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Help,
	List,
	Status(String),
	Start(String),
	Stop(String),
	Kill(String),
	Restart(String),
	Logs(String, usize),
	Tail(String),
	LastErr(String, usize),
	RunLogs(String, usize),
	Plates,
	AddPlate { plate: String, owner: String, brand: String },
	DelPlate(String),
	Admins,
	AddAdmin(i64),
	DelAdmin(i64),
	ActLogs(usize),
	Quit,
}

/// Parse one input line. Blank lines give `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
	let parts = shlex::split(line).ok_or(CommandError::Quoting)?;
	let Some((head, args)) = parts.split_first() else {
		return Ok(None);
	};

	let arg = |usage: &'static str| args.first().cloned().ok_or(CommandError::Usage(usage));
	let count = |i: usize, default: usize| args.get(i).and_then(|s| s.parse().ok()).unwrap_or(default);
	let admin_id = |usage: &'static str| {
		args.first()
			.and_then(|s| s.parse::<i64>().ok())
			.ok_or(CommandError::Usage(usage))
	};

	let cmd = match head.to_lowercase().as_str() {
		"help" | "h" | "?" => Command::Help,
		"list" => Command::List,
		"status" => Command::Status(arg("status <idx|name>")?),
		"start" => Command::Start(arg("start <idx|name>")?),
		"stop" => Command::Stop(arg("stop <idx|name>")?),
		"kill" => Command::Kill(arg("kill <idx|name>")?),
		"restart" => Command::Restart(arg("restart <idx|name>")?),
		"logs" => Command::Logs(arg("logs <idx|name> [n]")?, count(1, DEFAULT_LOG_LINES)),
		"tail" => Command::Tail(arg("tail <idx|name>")?),
		"lasterr" => Command::LastErr(arg("lasterr <idx|name> [n]")?, count(1, DEFAULT_LASTERR_LINES)),
		"runlogs" => Command::RunLogs(arg("runlogs <module> [n]")?, count(1, DEFAULT_RUNLOG_LINES)),
		"plates" => Command::Plates,
		"addplate" => {
			if args.len() < 2 {
				return Err(CommandError::Usage("addplate <plate> <owner> [brand...]"));
			}
			Command::AddPlate {
				plate: args[0].clone(),
				owner: args[1].clone(),
				brand: args[2..].join(" "),
			}
		}
		"delplate" => Command::DelPlate(arg("delplate <idx|plate>")?),
		"admins" => Command::Admins,
		"addadmin" => Command::AddAdmin(admin_id("addadmin <numeric id>")?),
		"deladmin" => Command::DelAdmin(admin_id("deladmin <numeric id>")?),
		"actlogs" => Command::ActLogs(count(0, DEFAULT_ACTLOG_LINES)),
		"quit" | "exit" => Command::Quit,
		other => return Err(CommandError::Unknown(other.to_string())),
	};
	Ok(Some(cmd))
}

/// Resolve a module reference against `(identity, short name)` pairs in
/// registration order. A number is a 1-based index; anything else matches
/// as a substring of the short name or as the exact identity. When several
/// modules match, an exact short-name match wins.
pub fn resolve(token: &str, modules: &[(String, String)]) -> Result<String, CommandError> {
	if let Ok(idx) = token.parse::<usize>() {
		return idx
			.checked_sub(1)
			.and_then(|i| modules.get(i))
			.map(|(id, _)| id.clone())
			.ok_or_else(|| CommandError::NotFound(token.to_string()));
	}

	let matches: Vec<&(String, String)> = modules
		.iter()
		.filter(|(id, name)| name.contains(token) || id.as_str() == token)
		.collect();
	match matches.as_slice() {
		[] => Err(CommandError::NotFound(token.to_string())),
		[(id, _)] => Ok(id.clone()),
		many => many
			.iter()
			.find(|(_, name)| name.as_str() == token)
			.map(|(id, _)| id.clone())
			.ok_or_else(|| CommandError::Ambiguous {
				name: token.to_string(),
				candidates: many.iter().map(|(id, _)| id.clone()).collect(),
			}),
	}
}

pub struct Console<W: Write> {
	sup: Arc<Supervisor>,
	store: Store,
	audit: AuditLog,
	out: W,
}

impl<W: Write> Console<W> {
	pub fn new(sup: Arc<Supervisor>, store: Store, audit: AuditLog, out: W) -> Self {
		Self { sup, store, audit, out }
	}

	#[cfg(test)]
	fn into_inner(self) -> W {
		self.out
	}

	/// Prompt loop. Returns on `quit` confirmed with `y`, on end of input or
	/// on Ctrl-C at the prompt. Stopping the modules is left to the caller.
	pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> io::Result<()> {
		let mut lines = input.lines();
		writeln!(self.out, "{} admin terminal. Type 'help' for commands.", "safeyard".bold())?;
		loop {
			self.flush_alerts()?;
			write!(self.out, "> ")?;
			self.out.flush()?;

			let line = tokio::select! {
				line = lines.next_line() => line?,
				_ = tokio::signal::ctrl_c() => None,
			};
			let Some(line) = line else {
				writeln!(self.out, "\nExit.")?;
				return Ok(());
			};

			let cmd = match parse(&line) {
				Ok(Some(cmd)) => cmd,
				Ok(None) => continue,
				Err(e) => {
					self.report(&e)?;
					continue;
				}
			};

			if cmd == Command::Quit {
				write!(self.out, "Stop modules and exit? (y/N): ")?;
				self.out.flush()?;
				let answer = tokio::select! {
					line = lines.next_line() => line?,
					_ = tokio::signal::ctrl_c() => None,
				};
				match answer {
					Some(a) if !a.trim().eq_ignore_ascii_case("y") => continue,
					_ => return Ok(()),
				}
			}

			if let Err(e) = self.execute(cmd).await {
				self.report(&e)?;
			}
		}
	}

	/// Print and clear every pending alert.
	pub fn flush_alerts(&mut self) -> io::Result<()> {
		let alerts = self.sup.drain_alerts();
		if alerts.is_empty() {
			return Ok(());
		}
		writeln!(self.out, "{}", "=== Alerts (recent) ===".yellow())?;
		for alert in alerts {
			writeln!(self.out, "{}", alert)?;
		}
		writeln!(self.out, "{}", "=======================".yellow())
	}

	fn report(&mut self, err: &CommandError) -> io::Result<()> {
		tracing::debug!("command failed: {}", err);
		writeln!(self.out, "{} {}", "error:".red(), err)
	}

	fn modules(&self) -> Vec<(String, String)> {
		self.sup
			.processes()
			.iter()
			.map(|p| (p.identity().to_string(), p.name().to_string()))
			.collect()
	}

	fn resolve(&self, token: &str) -> Result<String, CommandError> {
		resolve(token, &self.modules())
	}

	pub async fn execute(&mut self, cmd: Command) -> Result<(), CommandError> {
		match cmd {
			Command::Help => self.print_help()?,
			Command::List => {
				for (i, status) in self.sup.statuses().await.iter().enumerate() {
					writeln!(
						self.out,
						"{}. {} -> {} pid={} uptime={} logfile={}",
						i + 1,
						status.name,
						paint_state(&status.state),
						status.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
						status.uptime.map(format_uptime).unwrap_or_else(|| "-".into()),
						status.log_path.display()
					)?;
				}
			}
			Command::Status(target) => {
				let id = self.resolve(&target)?;
				let status = self.sup.status(&id).await?;
				self.print_status(&status)?;
			}
			Command::Start(target) => {
				let id = self.resolve(&target)?;
				let pid = self.sup.start(&id).await?;
				writeln!(self.out, "started {} (pid {})", id, pid)?;
			}
			Command::Stop(target) => {
				let id = self.resolve(&target)?;
				match self.sup.stop(&id).await? {
					Some(exit) => writeln!(self.out, "stopped {} ({})", id, exit)?,
					None => writeln!(self.out, "{}: not running", id)?,
				}
			}
			Command::Kill(target) => {
				let id = self.resolve(&target)?;
				match self.sup.kill(&id).await? {
					Some(exit) => writeln!(self.out, "killed {} ({})", id, exit)?,
					None => writeln!(self.out, "{}: not running", id)?,
				}
			}
			Command::Restart(target) => {
				let id = self.resolve(&target)?;
				let pid = self.sup.restart(&id).await?;
				writeln!(self.out, "restarted {} (pid {})", id, pid)?;
			}
			Command::Logs(target, n) => {
				let id = self.resolve(&target)?;
				let lines = self.sup.tail(&id, n)?;
				self.print_lines(&lines, "(no output)")?;
			}
			Command::Tail(target) => {
				let id = self.resolve(&target)?;
				let path = self.sup.log_path(&id)?;
				self.follow(&path, async {
					let _ = tokio::signal::ctrl_c().await;
				})
				.await?;
			}
			Command::LastErr(target, n) => {
				let id = self.resolve(&target)?;
				let lines = self.sup.last_stderr(&id, n)?;
				self.print_lines(&lines, "(no stderr)")?;
			}
			Command::RunLogs(module, n) => {
				let path = self.sup.config().log_dir.join(format!("{}.log", module));
				let lines = match warden::logs::read_last_lines(&path, n, None) {
					Ok(lines) => lines,
					Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
					Err(e) => return Err(e.into()),
				};
				self.print_lines(&lines, "(no log)")?;
			}
			Command::Plates => {
				let cars = self.store.cars()?;
				if cars.is_empty() {
					writeln!(self.out, "White list is empty.")?;
				}
				for (i, car) in cars.iter().enumerate() {
					writeln!(
						self.out,
						"{}. {} - {} ({}) visits:{}",
						i + 1,
						car.plate,
						car.owner,
						car.brand,
						car.visits
					)?;
				}
			}
			Command::AddPlate { plate, owner, brand } => {
				let car = self.store.add_plate(&plate, &owner, &brand)?;
				self.audit.record(
					AUDIT_ACTOR,
					"add_plate_cli",
					json!({ "plate": car.plate, "owner": car.owner, "brand": car.brand }),
				);
				writeln!(self.out, "added {}", car.plate)?;
			}
			Command::DelPlate(key) => {
				let car = self.store.remove_plate(&key)?;
				self.audit.record(AUDIT_ACTOR, "remove_plate_cli", json!({ "plate": car.plate }));
				writeln!(self.out, "removed {}", car.plate)?;
			}
			Command::Admins => {
				let admins = self.store.admins()?;
				if admins.is_empty() {
					writeln!(self.out, "(no admins)")?;
				}
				for (i, id) in admins.iter().enumerate() {
					writeln!(self.out, "{}. {}", i + 1, id)?;
				}
			}
			Command::AddAdmin(id) => {
				self.store.add_admin(id)?;
				self.audit.record(AUDIT_ACTOR, "add_admin_cli", json!({ "new_admin": id }));
				writeln!(self.out, "added admin {}", id)?;
			}
			Command::DelAdmin(id) => {
				self.store.remove_admin(id)?;
				self.audit.record(AUDIT_ACTOR, "remove_admin_cli", json!({ "removed_admin": id }));
				writeln!(self.out, "removed admin {}", id)?;
			}
			Command::ActLogs(n) => {
				let records = self.audit.read_last(n);
				if records.is_empty() {
					writeln!(self.out, "(no actions)")?;
				}
				for record in records {
					match record.get("_raw").and_then(Value::as_str) {
						Some(raw) => writeln!(self.out, "{}", raw)?,
						None => writeln!(self.out, "{}", record)?,
					}
				}
			}
			Command::Quit => {}
		}
		Ok(())
	}

	fn print_lines(&mut self, lines: &[String], empty: &str) -> io::Result<()> {
		if lines.is_empty() {
			return writeln!(self.out, "{}", empty.dimmed());
		}
		for line in lines {
			writeln!(self.out, "{}", line)?;
		}
		Ok(())
	}

	fn print_status(&mut self, status: &ProcessStatus) -> io::Result<()> {
		writeln!(self.out, "Status for {}", status.identity.bold())?;
		writeln!(self.out, " path: {}", status.identity)?;
		writeln!(self.out, " status: {}", paint_state(&status.state))?;
		match status.pid {
			Some(pid) => writeln!(self.out, " pid: {}", pid)?,
			None => writeln!(self.out, " pid: -")?,
		}
		match status.uptime {
			Some(up) => writeln!(self.out, " uptime: {}", format_uptime(up))?,
			None => writeln!(self.out, " uptime: -")?,
		}
		match &status.last_exit {
			Some(exit) => writeln!(self.out, " last_exit: {}", exit)?,
			None => writeln!(self.out, " last_exit: -")?,
		}
		writeln!(self.out, " logfile: {}", status.log_path.display())
	}

	/// Follow `path` from its current end until `cancel` resolves. A file
	/// that shrinks is read again from the start.
	async fn follow<F: Future>(&mut self, path: &Path, cancel: F) -> Result<(), CommandError> {
		let mut file = tokio::fs::File::open(path).await?;
		let mut pos = file.seek(SeekFrom::End(0)).await?;
		writeln!(self.out, "--- tailing {} (Ctrl-C to stop) ---", path.display())?;
		self.out.flush()?;

		tokio::pin!(cancel);
		let mut pending = Vec::new();
		loop {
			tokio::select! {
				_ = &mut cancel => break,
				_ = tokio::time::sleep(TAIL_POLL) => {}
			}

			let len = file.metadata().await?.len();
			if len < pos {
				pos = file.seek(SeekFrom::Start(0)).await?;
				pending.clear();
			}
			let read = file.read_to_end(&mut pending).await?;
			pos += read as u64;
			for line in take_complete_lines(&mut pending) {
				writeln!(self.out, "{}", line)?;
			}
			self.out.flush()?;
		}
		writeln!(self.out, "\nStopped tail.")?;
		Ok(())
	}

	fn print_help(&mut self) -> io::Result<()> {
		let out = &mut self.out;
		writeln!(out, "{}", "modules".cyan().bold())?;
		writeln!(out, "  {}                       Show every module", "list".bold())?;
		writeln!(out, "  {} <idx|name>          Status block", "status".bold())?;
		writeln!(out, "  {} <idx|name>           Start a module", "start".bold())?;
		writeln!(out, "  {} <idx|name>            Stop gracefully", "stop".bold())?;
		writeln!(out, "  {} <idx|name>            Kill immediately", "kill".bold())?;
		writeln!(out, "  {} <idx|name>         Stop, then start", "restart".bold())?;
		writeln!(out)?;
		writeln!(out, "{}", "logs".cyan().bold())?;
		writeln!(out, "  {} <idx|name> [n]        Last n lines (default {})", "logs".bold(), DEFAULT_LOG_LINES)?;
		writeln!(out, "  {} <idx|name>            Follow the log (Ctrl-C to stop)", "tail".bold())?;
		writeln!(out, "  {} <idx|name> [n]     Last n stderr lines (default {})", "lasterr".bold(), DEFAULT_LASTERR_LINES)?;
		writeln!(out, "  {} <module> [n]       Last n lines of <module>.log (default {})", "runlogs".bold(), DEFAULT_RUNLOG_LINES)?;
		writeln!(out)?;
		writeln!(out, "{}", "white list".cyan().bold())?;
		writeln!(out, "  {}                     Show plates", "plates".bold())?;
		writeln!(out, "  {} <plate> <owner> [brand]", "addplate".bold())?;
		writeln!(out, "  {} <idx|plate>       Remove a plate", "delplate".bold())?;
		writeln!(out)?;
		writeln!(out, "{}", "admins".cyan().bold())?;
		writeln!(out, "  {}                     Show admins", "admins".bold())?;
		writeln!(out, "  {} <id>              Add admin by numeric id", "addadmin".bold())?;
		writeln!(out, "  {} <id>              Remove admin", "deladmin".bold())?;
		writeln!(out, "  {} [n]                Last n admin actions (default {})", "actlogs".bold(), DEFAULT_ACTLOG_LINES)?;
		writeln!(out)?;
		writeln!(out, "  {}                Stop modules and exit", "quit | exit".bold())
	}
}

fn paint_state(state: &ProcessState) -> String {
	match state {
		ProcessState::Running => state.to_string().green().to_string(),
		ProcessState::Exited { .. } => state.to_string().red().to_string(),
		ProcessState::NotStarted => state.to_string().dimmed().to_string(),
	}
}

/// Split off every newline-terminated line, leaving a partial tail in `buf`.
fn take_complete_lines(buf: &mut Vec<u8>) -> Vec<String> {
	let Some(last) = buf.iter().rposition(|b| *b == b'\n') else {
		return Vec::new();
	};
	let complete: Vec<u8> = buf.drain(..=last).collect();
	complete[..complete.len() - 1]
		.split(|b| *b == b'\n')
		.map(|l| String::from_utf8_lossy(l).trim_end_matches('\r').to_string())
		.collect()
}

/// Seconds under a minute, then `hh:mm:ss`, with a `Nd+` prefix past a day.
fn format_uptime(up: Duration) -> String {
	let secs = up.as_secs();
	if secs < 60 {
		return format!("{}s", secs);
	}
	let rem = secs % 86_400;
	let clock = format!("{:02}:{:02}:{:02}", rem / 3600, rem % 3600 / 60, rem % 60);
	match secs / 86_400 {
		0 => clock,
		days => format!("{}d+{}", days, clock),
	}
}
