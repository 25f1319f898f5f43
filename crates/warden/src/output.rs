use chrono::Utc;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::logs::{self, Marker, Stream};

pub const STDOUT_RING_LINES: usize = 1000;
pub const STDERR_RING_LINES: usize = 300;

/// Fixed-capacity FIFO that drops its oldest entry once full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
	items: VecDeque<T>,
	capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
	pub fn new(capacity: usize) -> Self {
		Self {
			items: VecDeque::with_capacity(capacity),
			capacity,
		}
	}

	pub fn push(&mut self, item: T) {
		if self.capacity == 0 {
			return;
		}
		if self.items.len() >= self.capacity {
			self.items.pop_front();
		}
		self.items.push_back(item);
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &T> {
		self.items.iter()
	}

	/// The newest `n` entries, oldest first.
	pub fn tail(&self, n: usize) -> Vec<T> {
		let skip = self.items.len().saturating_sub(n);
		self.items.iter().skip(skip).cloned().collect()
	}
}

/// One backing store for "last n lines" reads.
pub trait LineSource {
	/// `None` when this source cannot answer and the next one should be tried.
	fn last_lines(&self, n: usize) -> Option<Vec<String>>;
}

/// Reads from the log file on disk.
pub struct FileLines<'a> {
	pub path: &'a Path,
	pub stream: Option<Stream>,
}

impl LineSource for FileLines<'_> {
	fn last_lines(&self, n: usize) -> Option<Vec<String>> {
		match logs::read_last_lines(self.path, n, self.stream) {
			Ok(lines) => Some(lines),
			Err(e) => {
				tracing::debug!(path = %self.path.display(), "log file unreadable, using memory: {}", e);
				None
			}
		}
	}
}

/// Reads from an in-memory snapshot of the ring buffers.
pub struct MemoryLines {
	lines: Vec<String>,
}

impl LineSource for MemoryLines {
	fn last_lines(&self, n: usize) -> Option<Vec<String>> {
		let skip = self.lines.len().saturating_sub(n);
		Some(self.lines[skip..].to_vec())
	}
}

/// First source that can answer wins.
pub fn read_with_fallback(sources: &[&dyn LineSource], n: usize) -> Vec<String> {
	sources
		.iter()
		.find_map(|source| source.last_lines(n))
		.unwrap_or_default()
}

#[derive(Debug, Clone)]
struct Entry {
	seq: u64,
	line: String,
}

/// Per-module output capture: append-only log file plus bounded stdout and
/// stderr rings. Cheap to clone; clones share the same file and buffers.
#[derive(Clone)]
pub struct LogSink {
	path: PathBuf,
	inner: Arc<Mutex<SinkInner>>,
}

struct SinkInner {
	file: Option<File>,
	stdout: RingBuffer<Entry>,
	stderr: RingBuffer<Entry>,
	next_seq: u64,
}

impl LogSink {
	pub fn open(path: &Path) -> Self {
		Self::with_capacity(path, STDOUT_RING_LINES, STDERR_RING_LINES)
	}

	pub fn with_capacity(path: &Path, stdout_lines: usize, stderr_lines: usize) -> Self {
		Self {
			path: path.to_path_buf(),
			inner: Arc::new(Mutex::new(SinkInner {
				file: open_append(path),
				stdout: RingBuffer::new(stdout_lines),
				stderr: RingBuffer::new(stderr_lines),
				next_seq: 0,
			})),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Timestamp, tag and store one captured output line.
	pub fn record(&self, stream: Stream, line: &str) {
		let stamped = logs::data_line(Utc::now(), stream, line);
		let mut inner = self.lock();
		inner.write_line(&self.path, &stamped);
		let entry = Entry {
			seq: inner.next_seq,
			line: stamped,
		};
		inner.next_seq += 1;
		match stream {
			Stream::Out => inner.stdout.push(entry),
			Stream::Err => inner.stderr.push(entry),
		}
	}

	pub fn marker(&self, marker: Marker<'_>) {
		self.write_raw(&marker.render(Utc::now()));
	}

	pub(crate) fn marker_at(&self, marker: Marker<'_>, at: chrono::DateTime<Utc>) {
		self.write_raw(&marker.render(at));
	}

	/// Note a reader failure in the log; the failing reader stops after this.
	pub fn reader_failed(&self, stream: Stream, err: &std::io::Error) {
		let line = logs::data_line(Utc::now(), Stream::Err, &format!("{} reader failed: {}", stream.tag(), err));
		self.write_raw(&line);
	}

	fn write_raw(&self, line: &str) {
		self.lock().write_line(&self.path, line);
	}

	/// Last `n` lines of the module's log, or of its captured output when the
	/// file cannot be read.
	pub fn tail(&self, n: usize) -> Vec<String> {
		let file = FileLines {
			path: &self.path,
			stream: None,
		};
		let memory = MemoryLines {
			lines: self.memory_lines(None),
		};
		read_with_fallback(&[&file, &memory], n)
	}

	/// Last `n` stderr lines, from the log file or the stderr ring.
	pub fn last_stderr(&self, n: usize) -> Vec<String> {
		let file = FileLines {
			path: &self.path,
			stream: Some(Stream::Err),
		};
		let memory = MemoryLines {
			lines: self.memory_lines(Some(Stream::Err)),
		};
		read_with_fallback(&[&file, &memory], n)
	}

	/// Ring buffer contents in capture order. `None` interleaves both streams.
	pub fn memory_lines(&self, stream: Option<Stream>) -> Vec<String> {
		let inner = self.lock();
		let mut entries: Vec<&Entry> = match stream {
			Some(Stream::Out) => inner.stdout.iter().collect(),
			Some(Stream::Err) => inner.stderr.iter().collect(),
			None => inner.stdout.iter().chain(inner.stderr.iter()).collect(),
		};
		entries.sort_by_key(|e| e.seq);
		entries.into_iter().map(|e| e.line.clone()).collect()
	}

	fn lock(&self) -> MutexGuard<'_, SinkInner> {
		self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

impl SinkInner {
	fn write_line(&mut self, path: &Path, line: &str) {
		if self.file.is_none() {
			self.file = open_append(path);
		}
		if let Some(ref mut file) = self.file {
			if let Err(e) = writeln!(file, "{}", line) {
				tracing::warn!(path = %path.display(), "log write failed: {}", e);
				self.file = None;
			}
		}
	}
}

fn open_append(path: &Path) -> Option<File> {
	if let Some(parent) = path.parent() {
		let _ = fs::create_dir_all(parent);
	}
	match OpenOptions::new().create(true).append(true).open(path) {
		Ok(file) => Some(file),
		Err(e) => {
			tracing::warn!(path = %path.display(), "cannot open log file: {}", e);
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn temp_log(name: &str) -> PathBuf {
		let dir = std::env::temp_dir().join(format!("warden-output-{}-{}", std::process::id(), name));
		let _ = fs::remove_dir_all(&dir);
		dir.join("module.log")
	}

	#[test]
	fn ring_keeps_last_k_in_order() {
		let mut ring = RingBuffer::new(3);
		for i in 0..10 {
			ring.push(i);
		}
		assert_eq!(ring.len(), 3);
		assert_eq!(ring.tail(10), vec![7, 8, 9]);
		assert_eq!(ring.tail(2), vec![8, 9]);
	}

	#[test]
	fn ring_with_zero_capacity_stays_empty() {
		let mut ring = RingBuffer::new(0);
		ring.push("x");
		assert!(ring.is_empty());
	}

	#[test]
	fn sink_rings_are_bounded() {
		let path = temp_log("bounded");
		let sink = LogSink::with_capacity(&path, 5, 2);
		for i in 0..12 {
			sink.record(Stream::Out, &format!("out {}", i));
			sink.record(Stream::Err, &format!("err {}", i));
		}
		let out = sink.memory_lines(Some(Stream::Out));
		let err = sink.memory_lines(Some(Stream::Err));
		assert_eq!(out.len(), 5);
		assert_eq!(err.len(), 2);
		assert!(out[0].ends_with("[OUT] out 7"));
		assert!(out[4].ends_with("[OUT] out 11"));
		assert!(err[1].ends_with("[ERR] err 11"));
		let _ = fs::remove_dir_all(path.parent().unwrap());
	}

	#[test]
	fn tail_prefers_file() {
		let path = temp_log("file");
		let sink = LogSink::open(&path);
		sink.marker(Marker::Start { command: "detector" });
		sink.record(Stream::Out, "hello");
		sink.record(Stream::Err, "oops");

		let lines = sink.tail(10);
		assert_eq!(lines.len(), 3);
		assert!(lines[0].starts_with("=== START detector at "));

		let errs = sink.last_stderr(10);
		assert_eq!(errs.len(), 1);
		assert!(errs[0].ends_with("[ERR] oops"));
		let _ = fs::remove_dir_all(path.parent().unwrap());
	}

	#[test]
	fn tail_falls_back_to_memory() {
		let path = temp_log("fallback");
		let sink = LogSink::open(&path);
		sink.record(Stream::Out, "one");
		sink.record(Stream::Err, "two");
		sink.record(Stream::Out, "three");
		fs::remove_dir_all(path.parent().unwrap()).unwrap();

		let lines = sink.tail(2);
		assert_eq!(lines.len(), 2);
		assert!(lines[0].ends_with("[ERR] two"));
		assert!(lines[1].ends_with("[OUT] three"));
		assert_eq!(sink.last_stderr(5).len(), 1);
	}
}
