use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

/// Initialize colored, timestamped logging to stderr at `level`.
pub fn init_logging(level: LevelFilter) -> anyhow::Result<()> {
	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::Blue)
		.trace(Color::Magenta);

	fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} {:<5} [{}] {}",
				chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level)
		// Dependencies are only interesting when debugging the transport.
		.level_for("hyper", LevelFilter::Warn)
		.level_for("hyper_util", LevelFilter::Warn)
		.level_for("reqwest", LevelFilter::Warn)
		.level_for("rustls", LevelFilter::Warn)
		.chain(std::io::stderr())
		.apply()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}

#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn logging_initialization() {
		// Only the first call in a process can install a logger.
		let _ = super::init_logging(log::LevelFilter::Info);
		assert!(super::init_logging(log::LevelFilter::Info).is_err());
	}
}
