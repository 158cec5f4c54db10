use anyhow::Context;
use clap::{Parser, Subcommand};
use cloudsync::{config, observability, run_sync};
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "cloudsync", about = "cloudsync - keep repository clones in sync through a commit cloud")]
struct Cli {
	/// Extra configuration file, applied after the system and user files
	#[arg(long, global = true)]
	config: Option<PathBuf>,
	/// Repository directory
	#[arg(long, global = true, default_value = ".")]
	repo: PathBuf,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Synchronize the repository with its commit cloud workspace
	Sync,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let settings = config::load(cli.config.as_deref()).context("failed to load configuration")?;
	observability::init_logging(settings.log_level.to_level_filter())?;

	match cli.command {
		Commands::Sync => {
			let cancel = CancellationToken::new();
			let on_interrupt = cancel.clone();
			tokio::spawn(async move {
				if tokio::signal::ctrl_c().await.is_ok() {
					log::warn!("interrupted, cancelling sync");
					on_interrupt.cancel();
				}
			});

			let start = Instant::now();
			let result = run_sync(&settings, &cli.repo, &cancel).await;
			let elapsed = start.elapsed().as_secs_f64();
			if log::log_enabled!(log::Level::Debug) {
				log::debug!(
					"run metrics:\n{}",
					observability::global_sync_metrics().encode()
				);
			}

			let report = result.with_context(|| {
				format!("cloudsync failed after {:.2} sec", elapsed)
			})?;
			println!(
				"commitcloud: synchronization completed in {:.2} sec (version {})",
				elapsed, report.version
			);
		}
	}

	Ok(())
}
