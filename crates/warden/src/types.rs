use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logs;

/// How to launch one supervised module.
///
/// The configured path doubles as the module's identity. Scripts that need an
/// interpreter carry it here; everything else is executed directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessDef {
	pub path: PathBuf,
	#[serde(default)]
	pub interpreter: Option<String>,
}

impl ProcessDef {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			interpreter: None,
		}
	}

	pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
		self.interpreter = Some(interpreter.into());
		self
	}

	pub fn identity(&self) -> String {
		self.path.to_string_lossy().into_owned()
	}

	/// File name of the launch path, used for log names and operator lookups.
	pub fn short_name(&self) -> String {
		self.path
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_else(|| self.identity())
	}

	/// Program to exec. A bare relative file name is anchored to the working
	/// directory so it is never looked up on `PATH`.
	pub fn executable(&self) -> PathBuf {
		if self.path.is_relative() && self.path.components().count() == 1 {
			Path::new(".").join(&self.path)
		} else {
			self.path.clone()
		}
	}

	pub fn command_line(&self) -> String {
		match &self.interpreter {
			Some(interp) => format!("{} {}", interp, self.path.display()),
			None => self.path.display().to_string(),
		}
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProcessState {
	NotStarted,
	Running,
	Exited { code: i32 },
}

impl ProcessState {
	pub fn is_running(&self) -> bool {
		matches!(self, ProcessState::Running)
	}
}

impl fmt::Display for ProcessState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProcessState::NotStarted => write!(f, "NOT_STARTED"),
			ProcessState::Running => write!(f, "RUNNING"),
			ProcessState::Exited { code } => write!(f, "EXITED(code={})", code),
		}
	}
}

/// When a run ended and with which code. Signal deaths carry the negated
/// signal number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastExit {
	pub at: DateTime<Utc>,
	pub code: i32,
}

impl LastExit {
	pub fn now(code: i32) -> Self {
		Self { at: Utc::now(), code }
	}
}

impl fmt::Display for LastExit {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "code={} at {}", self.code, logs::format_timestamp(self.at))
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStatus {
	pub identity: String,
	pub name: String,
	pub state: ProcessState,
	pub pid: Option<u32>,
	pub uptime: Option<Duration>,
	pub last_exit: Option<LastExit>,
	pub log_path: PathBuf,
}
