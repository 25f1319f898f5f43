use std::io;
use thiserror::Error;

/// Errors surfaced by supervisor operations.
///
/// A graceful stop that outlives its grace period is not an error: it is
/// escalated to a forced kill inside the process and never reaches callers.
#[derive(Error, Debug)]
pub enum Error {
	/// Unknown identity, or a launch path that does not exist.
	#[error("not found: {0}")]
	NotFound(String),

	#[error("{0}: already running")]
	AlreadyRunning(String),

	#[error("{name}: spawn failed: {source}")]
	Spawn {
		name: String,
		#[source]
		source: io::Error,
	},

	#[error(transparent)]
	Io(#[from] io::Error),
}

impl Error {
	/// Short stable label for log fields.
	pub fn as_label(&self) -> &'static str {
		match self {
			Error::NotFound(_) => "not_found",
			Error::AlreadyRunning(_) => "already_running",
			Error::Spawn { .. } => "spawn_failed",
			Error::Io(_) => "io",
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;
