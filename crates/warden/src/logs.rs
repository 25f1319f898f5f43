//! Log file naming and line formats.
//!
//! Every module writes one plain-text file, `<log_dir>/<file name>.log`,
//! opened in append mode so history survives restarts:
//!
//! ```text
//! === START python3 bot.py at 2026-02-14T09:47:12Z ===
//! [2026-02-14T09:47:13Z] [OUT] polling started
//! [2026-02-14T09:47:20Z] [ERR] Traceback (most recent call last):
//! === EXIT code=1 at 2026-02-14T09:47:21Z ===
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::types::ProcessDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
	Out,
	Err,
}

impl Stream {
	pub fn tag(&self) -> &'static str {
		match self {
			Stream::Out => "OUT",
			Stream::Err => "ERR",
		}
	}
}

/// Lifecycle marker lines written around a module's output.
#[derive(Debug, Clone, Copy)]
pub enum Marker<'a> {
	Start { command: &'a str },
	Stopped { code: i32 },
	Killed { code: i32 },
	Exit { code: i32 },
}

impl Marker<'_> {
	pub fn render(&self, at: DateTime<Utc>) -> String {
		let ts = format_timestamp(at);
		match self {
			Marker::Start { command } => format!("=== START {} at {} ===", command, ts),
			Marker::Stopped { code } => format!("=== STOPPED code={} at {} ===", code, ts),
			Marker::Killed { code } => format!("=== KILLED code={} at {} ===", code, ts),
			Marker::Exit { code } => format!("=== EXIT code={} at {} ===", code, ts),
		}
	}
}

pub fn log_path(log_dir: &Path, def: &ProcessDef) -> PathBuf {
	log_dir.join(format!("{}.log", def.short_name()))
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
	at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn timestamp() -> String {
	format_timestamp(Utc::now())
}

pub fn data_line(at: DateTime<Utc>, stream: Stream, line: &str) -> String {
	format!("[{}] [{}] {}", format_timestamp(at), stream.tag(), line)
}

/// True for data lines captured from the given stream.
pub fn is_stream_line(line: &str, stream: Stream) -> bool {
	line.starts_with('[') && line.contains(&format!("] [{}] ", stream.tag()))
}

/// Last `n` lines of a file, optionally only those captured from `stream`.
/// Reads forward once, keeping at most `n` lines in memory.
pub fn read_last_lines(path: &Path, n: usize, stream: Option<Stream>) -> io::Result<Vec<String>> {
	let reader = BufReader::new(File::open(path)?);
	if n == 0 {
		return Ok(Vec::new());
	}
	let mut kept: VecDeque<String> = VecDeque::with_capacity(n.min(4096));
	for line in reader.split(b'\n') {
		let line = line?;
		let line = String::from_utf8_lossy(&line).trim_end_matches('\r').to_string();
		if let Some(s) = stream {
			if !is_stream_line(&line, s) {
				continue;
			}
		}
		if kept.len() == n {
			kept.pop_front();
		}
		kept.push_back(line);
	}
	Ok(kept.into())
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn at() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2026, 2, 14, 9, 47, 12).unwrap()
	}

	#[test]
	fn test_marker_render() {
		assert_eq!(
			Marker::Start { command: "python3 bot.py" }.render(at()),
			"=== START python3 bot.py at 2026-02-14T09:47:12Z ==="
		);
		assert_eq!(
			Marker::Stopped { code: -15 }.render(at()),
			"=== STOPPED code=-15 at 2026-02-14T09:47:12Z ==="
		);
		assert_eq!(
			Marker::Killed { code: -9 }.render(at()),
			"=== KILLED code=-9 at 2026-02-14T09:47:12Z ==="
		);
		assert_eq!(Marker::Exit { code: 1 }.render(at()), "=== EXIT code=1 at 2026-02-14T09:47:12Z ===");
	}

	#[test]
	fn test_data_line() {
		let line = data_line(at(), Stream::Err, "boom");
		assert_eq!(line, "[2026-02-14T09:47:12Z] [ERR] boom");
		assert!(is_stream_line(&line, Stream::Err));
		assert!(!is_stream_line(&line, Stream::Out));
		assert!(!is_stream_line("=== EXIT code=1 at x ===", Stream::Err));
	}

	#[test]
	fn test_log_path() {
		let def = ProcessDef::new("/srv/bot.py");
		assert_eq!(log_path(Path::new("run_logs"), &def), Path::new("run_logs/bot.py.log"));
	}

	#[test]
	fn test_read_last_lines() {
		let path = std::env::temp_dir().join(format!("warden-logs-{}.log", std::process::id()));
		let mut body = String::new();
		for i in 0..10 {
			let stream = if i % 2 == 0 { Stream::Out } else { Stream::Err };
			body.push_str(&data_line(at(), stream, &format!("line {}", i)));
			body.push('\n');
		}
		std::fs::write(&path, body).unwrap();

		let last = read_last_lines(&path, 3, None).unwrap();
		assert_eq!(last.len(), 3);
		assert!(last[2].ends_with("line 9"));

		let errs = read_last_lines(&path, 2, Some(Stream::Err)).unwrap();
		assert!(errs[0].ends_with("line 7"));
		assert!(errs[1].ends_with("line 9"));

		let _ = std::fs::remove_file(&path);
		assert!(read_last_lines(&path, 3, None).is_err());
	}
}
