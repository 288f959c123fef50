use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use kubesync::{
	commands::{self, sync::SyncArgs, util::PipeWriter},
	telemetry::{self, LogFormat},
};
use tracing::info;

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

#[derive(Parser)]
#[command(name = "kubesync")]
#[command(
	about = "Sync images, replicas, RBAC and service annotations from a source cluster into manifests and apply them to a target cluster",
	long_about = None
)]
#[command(version = env!("KUBESYNC_VERSION"))]
struct Cli {
	/// Log level (error, warn, info, debug, trace); overrides RUST_LOG
	#[arg(long)]
	log_level: Option<tracing::Level>,

	/// Format of log output on stderr
	#[arg(long, value_enum, default_value_t)]
	log_format: LogFormat,

	#[command(flatten)]
	sync: SyncArgs,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;
	let _runtime_guard = runtime.enter();
	let _telemetry = telemetry::init(cli.log_level, cli.log_format)?;

	if cli.sync.selected_kind().is_none() {
		info!("no resource kind selected, nothing to sync");
		Cli::command().print_help()?;
		return Ok(());
	}

	let stdout = PipeWriter::new(std::io::stdout());
	runtime.block_on(commands::sync::run(cli.sync, stdout))?;
	Ok(())
}
