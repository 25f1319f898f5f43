use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use warden::{ProcessDef, SupervisorConfig};

use crate::audit;

pub const DEFAULT_CONFIG_FILE: &str = "safeyard.toml";
pub const DEFAULT_MODULES: [&str; 2] = ["bot.py", "main.py"];

// ── safeyard.toml ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
	#[serde(default)]
	pub supervisor: SupervisorSection,
	#[serde(default)]
	pub modules: Vec<ModuleEntry>,
	#[serde(default)]
	pub store: StoreSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
	#[serde(default = "default_log_dir")]
	pub log_dir: PathBuf,
	#[serde(default)]
	pub auto_restart: bool,
	#[serde(default = "default_alert_interval_secs")]
	pub alert_interval_secs: u64,
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	#[serde(default = "default_stop_timeout_secs")]
	pub stop_timeout_secs: u64,
	#[serde(default = "default_settle_delay_ms")]
	pub settle_delay_ms: u64,
	#[serde(default = "default_alert_capacity")]
	pub alert_capacity: usize,
}

impl Default for SupervisorSection {
	fn default() -> Self {
		Self {
			log_dir: default_log_dir(),
			auto_restart: false,
			alert_interval_secs: default_alert_interval_secs(),
			poll_interval_ms: default_poll_interval_ms(),
			stop_timeout_secs: default_stop_timeout_secs(),
			settle_delay_ms: default_settle_delay_ms(),
			alert_capacity: default_alert_capacity(),
		}
	}
}

fn default_log_dir() -> PathBuf { PathBuf::from("run_logs") }
fn default_alert_interval_secs() -> u64 { 10 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_stop_timeout_secs() -> u64 { 5 }
fn default_settle_delay_ms() -> u64 { 300 }
fn default_alert_capacity() -> usize { warden::alerts::DEFAULT_ALERT_CAPACITY }

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleEntry {
	pub path: PathBuf,
	pub interpreter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
	#[serde(default = "default_whitelist")]
	pub whitelist: PathBuf,
	#[serde(default = "default_admins")]
	pub admins: PathBuf,
	#[serde(default = "default_actions_log")]
	pub actions_log: PathBuf,
	#[serde(default = "default_actions_max_bytes")]
	pub actions_max_bytes: u64,
	#[serde(default = "default_actions_backups")]
	pub actions_backups: u32,
}

impl Default for StoreSection {
	fn default() -> Self {
		Self {
			whitelist: default_whitelist(),
			admins: default_admins(),
			actions_log: default_actions_log(),
			actions_max_bytes: default_actions_max_bytes(),
			actions_backups: default_actions_backups(),
		}
	}
}

fn default_whitelist() -> PathBuf { PathBuf::from("white_list.json") }
fn default_admins() -> PathBuf { PathBuf::from("admins.json") }
fn default_actions_log() -> PathBuf { Path::new("logs").join("actions.log") }
fn default_actions_max_bytes() -> u64 { audit::DEFAULT_MAX_BYTES }
fn default_actions_backups() -> u32 { audit::DEFAULT_BACKUPS }

/// Load `path`, or `safeyard.toml` in the working directory. A missing
/// default file is silently skipped; anything unreadable falls back to
/// defaults with a warning.
pub fn load_config(path: Option<&Path>) -> Config {
	let (path, explicit) = match path {
		Some(p) => (p.to_path_buf(), true),
		None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
	};
	if !path.exists() {
		if explicit {
			eprintln!("warning: config file {} not found, using defaults", path.display());
		}
		return Config::default();
	}
	match std::fs::read_to_string(&path) {
		Ok(content) => match parse_config(&content) {
			Ok(config) => return config,
			Err(e) => eprintln!("warning: failed to parse {}: {}", path.display(), e),
		},
		Err(e) => eprintln!("warning: failed to read {}: {}", path.display(), e),
	}
	Config::default()
}

pub fn parse_config(content: &str) -> Result<Config, toml::de::Error> {
	toml::from_str(content)
}

impl Config {
	pub fn supervisor_config(&self, auto_restart: bool) -> SupervisorConfig {
		let s = &self.supervisor;
		SupervisorConfig {
			log_dir: s.log_dir.clone(),
			auto_restart: auto_restart || s.auto_restart,
			alert_interval: Duration::from_secs(s.alert_interval_secs),
			poll_interval: Duration::from_millis(s.poll_interval_ms.max(10)),
			stop_timeout: Duration::from_secs(s.stop_timeout_secs),
			settle_delay: Duration::from_millis(s.settle_delay_ms),
			alert_capacity: s.alert_capacity.max(1),
		}
	}

	/// Module list: `--modules` wins, then `[[modules]]`, then the defaults.
	pub fn process_defs(&self, cli_modules: &[PathBuf], interpreter: &str) -> Vec<ProcessDef> {
		if !cli_modules.is_empty() {
			return cli_modules.iter().map(|p| module_def(p, None, interpreter)).collect();
		}
		if !self.modules.is_empty() {
			return self
				.modules
				.iter()
				.map(|m| module_def(&m.path, m.interpreter.as_deref(), interpreter))
				.collect();
		}
		DEFAULT_MODULES
			.iter()
			.map(|p| module_def(Path::new(p), None, interpreter))
			.collect()
	}
}

/// `.py` scripts run through the interpreter, everything else directly.
/// An explicit per-module interpreter always applies.
fn module_def(path: &Path, explicit: Option<&str>, interpreter: &str) -> ProcessDef {
	let def = ProcessDef::new(path);
	match explicit {
		Some(interp) => def.with_interpreter(interp),
		None if path.extension().is_some_and(|ext| ext == "py") => def.with_interpreter(interpreter),
		None => def,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_file_gives_defaults() {
		let config = parse_config("").unwrap();
		assert_eq!(config.supervisor.log_dir, PathBuf::from("run_logs"));
		assert_eq!(config.supervisor.alert_interval_secs, 10);
		assert_eq!(config.supervisor.poll_interval_ms, 1000);
		assert_eq!(config.supervisor.stop_timeout_secs, 5);
		assert_eq!(config.supervisor.settle_delay_ms, 300);
		assert_eq!(config.supervisor.alert_capacity, 200);
		assert_eq!(config.store.actions_log, Path::new("logs").join("actions.log"));
		assert_eq!(config.store.actions_max_bytes, 5 * 1024 * 1024);
		assert_eq!(config.store.actions_backups, 5);
	}

	#[test]
	fn partial_sections_keep_other_defaults() {
		let config = parse_config(
			r#"
[supervisor]
auto_restart = true
alert_interval_secs = 30

[[modules]]
path = "detector/run.sh"

[[modules]]
path = "bot.py"
interpreter = "/opt/venv/bin/python"
"#,
		)
		.unwrap();
		assert!(config.supervisor.auto_restart);
		assert_eq!(config.supervisor.alert_interval_secs, 30);
		assert_eq!(config.supervisor.stop_timeout_secs, 5);
		assert_eq!(config.modules.len(), 2);

		let defs = config.process_defs(&[], "python3");
		assert_eq!(defs[0].interpreter, None);
		assert_eq!(defs[1].interpreter.as_deref(), Some("/opt/venv/bin/python"));

		let sup = config.supervisor_config(false);
		assert!(sup.auto_restart);
		assert_eq!(sup.alert_interval, Duration::from_secs(30));
	}

	#[test]
	fn cli_modules_win() {
		let config = parse_config("[[modules]]\npath = \"x.py\"\n").unwrap();
		let defs = config.process_defs(&[PathBuf::from("bot.py"), PathBuf::from("detector")], "python3.11");
		assert_eq!(defs.len(), 2);
		assert_eq!(defs[0].interpreter.as_deref(), Some("python3.11"));
		assert_eq!(defs[1].interpreter, None);
	}

	#[test]
	fn default_modules() {
		let defs = Config::default().process_defs(&[], "python3");
		let names: Vec<String> = defs.iter().map(|d| d.short_name()).collect();
		assert_eq!(names, vec!["bot.py", "main.py"]);
		assert!(defs.iter().all(|d| d.interpreter.as_deref() == Some("python3")));
	}

	#[test]
	fn restart_flag_overrides_file() {
		let config = Config::default();
		assert!(!config.supervisor_config(false).auto_restart);
		assert!(config.supervisor_config(true).auto_restart);
	}

	#[test]
	fn bad_toml_is_an_error() {
		assert!(parse_config("[supervisor\nlog_dir = ").is_err());
	}
}
