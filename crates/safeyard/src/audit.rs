//! Append-only JSON-lines log of administrative actions.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_BACKUPS: u32 = 5;

pub struct AuditLog {
	path: PathBuf,
	max_bytes: u64,
	backups: u32,
	writer: Mutex<Option<Writer>>,
}

struct Writer {
	file: File,
	bytes_written: u64,
}

impl AuditLog {
	pub fn new(path: impl Into<PathBuf>, max_bytes: u64, backups: u32) -> Self {
		Self {
			path: path.into(),
			max_bytes,
			backups,
			writer: Mutex::new(None),
		}
	}

	/// Append one record. Failures are logged and swallowed.
	pub fn record(&self, actor: &str, action: &str, details: Value) {
		let entry = json!({
			"timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
			"event": "admin_action",
			"user_id": Value::Null,
			"username": actor,
			"action": action,
			"details": details,
		});
		let mut line = entry.to_string();
		line.push('\n');
		if let Err(e) = self.append(line.as_bytes()) {
			tracing::warn!(path = %self.path.display(), action, "audit write failed: {}", e);
		}
	}

	fn append(&self, data: &[u8]) -> std::io::Result<()> {
		let mut slot = self.writer.lock().unwrap_or_else(|p| p.into_inner());
		if slot.is_none() {
			*slot = Some(self.open()?);
		}
		let needs_rotation = match slot.as_ref() {
			Some(w) => w.bytes_written > 0 && w.bytes_written + data.len() as u64 > self.max_bytes,
			None => false,
		};
		if needs_rotation {
			*slot = None;
			self.rotate();
			*slot = Some(self.open()?);
		}
		if let Some(writer) = slot.as_mut() {
			if let Err(e) = writer.file.write_all(data) {
				*slot = None;
				return Err(e);
			}
			writer.bytes_written += data.len() as u64;
		}
		Ok(())
	}

	fn open(&self) -> std::io::Result<Writer> {
		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent)?;
		}
		let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
		let bytes_written = file.metadata().map(|m| m.len()).unwrap_or(0);
		Ok(Writer { file, bytes_written })
	}

	/// Shift `actions.log.N` up by one, dropping the oldest, and move the
	/// live file to `.1`.
	fn rotate(&self) {
		if self.backups == 0 {
			let _ = fs::remove_file(&self.path);
			return;
		}
		let _ = fs::remove_file(self.backup_path(self.backups));
		for n in (1..self.backups).rev() {
			let from = self.backup_path(n);
			if from.exists() {
				let _ = fs::rename(&from, self.backup_path(n + 1));
			}
		}
		if let Err(e) = fs::rename(&self.path, self.backup_path(1)) {
			tracing::warn!(path = %self.path.display(), "audit rotation failed: {}", e);
		}
	}

	fn backup_path(&self, n: u32) -> PathBuf {
		let mut name = self.path.as_os_str().to_owned();
		name.push(format!(".{}", n));
		PathBuf::from(name)
	}

	/// Last `n` records of the live file. Lines that are not JSON come back
	/// as `{"_raw": line}`.
	pub fn read_last(&self, n: usize) -> Vec<Value> {
		if n == 0 {
			return Vec::new();
		}
		let lines = match warden::logs::read_last_lines(&self.path, n, None) {
			Ok(lines) => lines,
			Err(e) => {
				if e.kind() != std::io::ErrorKind::NotFound {
					tracing::warn!(path = %self.path.display(), "audit read failed: {}", e);
				}
				return Vec::new();
			}
		};
		lines
			.into_iter()
			.map(|line| serde_json::from_str(&line).unwrap_or_else(|_| json!({ "_raw": line })))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	static COUNTER: AtomicU32 = AtomicU32::new(0);

	fn temp_dir() -> PathBuf {
		let n = COUNTER.fetch_add(1, Ordering::SeqCst);
		let dir = std::env::temp_dir().join(format!("safeyard-audit-{}-{}", std::process::id(), n));
		let _ = std::fs::remove_dir_all(&dir);
		dir
	}

	#[test]
	fn records_are_json_lines() {
		let dir = temp_dir();
		let log = AuditLog::new(dir.join("logs").join("actions.log"), DEFAULT_MAX_BYTES, DEFAULT_BACKUPS);

		log.record("cli", "add_plate_cli", json!({ "plate": "A123BC77" }));
		log.record("cli", "add_admin_cli", json!({ "new_admin": 42 }));

		let records = log.read_last(10);
		assert_eq!(records.len(), 2);
		assert_eq!(records[0]["event"], "admin_action");
		assert_eq!(records[0]["username"], "cli");
		assert!(records[0]["user_id"].is_null());
		assert_eq!(records[0]["details"]["plate"], "A123BC77");
		assert_eq!(records[1]["action"], "add_admin_cli");
		assert!(records[1]["timestamp"].as_str().unwrap().ends_with('Z'));

		assert_eq!(log.read_last(1).len(), 1);
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test]
	fn unparsable_lines_come_back_raw() {
		let dir = temp_dir();
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("actions.log");
		std::fs::write(&path, "garbage line\n").unwrap();
		let log = AuditLog::new(&path, DEFAULT_MAX_BYTES, DEFAULT_BACKUPS);

		log.record("cli", "remove_admin_cli", json!({ "removed_admin": 1 }));
		let records = log.read_last(5);
		assert_eq!(records[0]["_raw"], "garbage line");
		assert_eq!(records[1]["action"], "remove_admin_cli");
		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test]
	fn missing_log_reads_empty() {
		let dir = temp_dir();
		let log = AuditLog::new(dir.join("actions.log"), DEFAULT_MAX_BYTES, DEFAULT_BACKUPS);
		assert!(log.read_last(50).is_empty());
	}

	#[test]
	fn rotates_by_size() {
		let dir = temp_dir();
		let path = dir.join("actions.log");
		let log = AuditLog::new(&path, 300, 2);

		for i in 0..20 {
			log.record("cli", "add_admin_cli", json!({ "new_admin": i }));
		}

		assert!(path.exists());
		assert!(dir.join("actions.log.1").exists());
		assert!(dir.join("actions.log.2").exists());
		assert!(!dir.join("actions.log.3").exists());
		assert!(std::fs::metadata(&path).unwrap().len() <= 300);

		let last = log.read_last(1);
		assert_eq!(last[0]["details"]["new_admin"], 19);
		let _ = std::fs::remove_dir_all(&dir);
	}
}
