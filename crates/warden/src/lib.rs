//! # warden
//!
//! Process supervisor toolkit for operator terminals.
//!
//! Start, stop, kill and restart long-running modules. Each module's output
//! is captured line by line into its own log file and bounded in-memory
//! buffers. A monitor loop catches crashes, throttles alerts and can restart
//! crashed modules.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use warden::{ProcessDef, Supervisor, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sup = Supervisor::new(
//! 	SupervisorConfig {
//! 		log_dir: "/tmp/safeyard/run_logs".into(),
//! 		auto_restart: true,
//! 		..Default::default()
//! 	},
//! 	vec![
//! 		ProcessDef::new("bot.py").with_interpreter("python3"),
//! 		ProcessDef::new("main.py").with_interpreter("python3"),
//! 	],
//! );
//!
//! for line in sup.start_all().await {
//! 	println!("{}", line);
//! }
//! for alert in sup.drain_alerts() {
//! 	println!("{}", alert);
//! }
//! sup.stop_all().await;
//! # }
//! ```

pub mod alerts;
pub mod clock;
pub mod error;
pub mod logs;
pub mod monitor;
pub mod output;
pub mod process;
pub mod supervisor;
pub mod types;

pub use alerts::AlertQueue;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use monitor::{Inspection, Monitor, MonitorPolicy};
pub use output::{LogSink, RingBuffer};
pub use process::SupervisedProcess;
pub use supervisor::{Supervisor, SupervisorConfig};
pub use types::*;
