mod audit;
mod config;
mod console;
mod store;

use clap::Parser;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use warden::Supervisor;

use audit::AuditLog;
use console::Console;
use store::Store;

/// Launcher and admin terminal for the safeyard modules.
#[derive(Debug, Parser)]
#[command(name = "safeyard", version, about)]
struct Args {
	/// Config file (default: ./safeyard.toml if present)
	#[arg(long)]
	config: Option<PathBuf>,

	/// Modules to run, in order
	#[arg(long, num_args = 1..)]
	modules: Vec<PathBuf>,

	/// Interpreter for .py modules
	#[arg(long, default_value = "python3")]
	interpreter: String,

	/// Restart crashed modules
	#[arg(long)]
	restart: bool,
}

#[tokio::main]
async fn main() {
	let args = Args::parse();

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
		.with_writer(std::io::stderr)
		.init();

	let config = config::load_config(args.config.as_deref());

	let store = Store::new(&config.store.whitelist, &config.store.admins);
	if let Err(e) = store.ensure_files() {
		eprintln!("{} {}", "warning:".yellow(), e);
	}
	let audit = AuditLog::new(
		&config.store.actions_log,
		config.store.actions_max_bytes,
		config.store.actions_backups,
	);

	let sup = Supervisor::new(
		config.supervisor_config(args.restart),
		config.process_defs(&args.modules, &args.interpreter),
	);
	tracing::info!(modules = ?sup.identities(), auto_restart = sup.config().auto_restart, "launching");

	for line in sup.start_all().await {
		println!("{}", line);
	}

	let mut console = Console::new(sup.clone(), store, audit, std::io::stdout());
	let stdin = tokio::io::BufReader::new(tokio::io::stdin());
	if let Err(e) = console.run(stdin).await {
		eprintln!("{} terminal failed: {}", "error:".red(), e);
	}

	for line in sup.stop_all().await {
		println!("{}", line);
	}

	// A Ctrl-C at the prompt leaves the stdin reader parked in a blocking
	// read, which would hold up runtime shutdown.
	std::process::exit(0);
}
