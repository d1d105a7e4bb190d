use anyhow::Context;
use std::str::FromStr;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use edge_sampler::config::AppSettings;
use edge_sampler::loader::load_inputs;
use edge_sampler::pipeline::Pipeline;
use edge_sampler::report::write_snapshots;

fn main() -> anyhow::Result<()> {
    let settings = AppSettings::load("config.toml")?;

    // Logs go to stderr so stdout stays clean for piping
    let level = Level::from_str(&settings.app.log_level).ok();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level.unwrap_or(Level::INFO))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    if level.is_none() {
        warn!("Unknown log level {:?}, using info", settings.app.log_level);
    }

    info!("🚀 Edge sampler starting (input: {})", settings.app.input_dir.display());

    let snapshot = load_inputs(&settings.app.input_dir, &settings.app.symbols)
        .context("loading input snapshot")?;
    if snapshot.symbols.is_empty() {
        warn!("No symbols configured or found in feeds, nothing to do.");
        return Ok(());
    }

    let out = Pipeline::new(&settings).run(&snapshot);
    let written = write_snapshots(&settings.app.output_dir, &out).context("writing snapshots")?;
    for path in &written {
        println!("{}", path.display());
    }

    info!("🏁 Done: {} symbols", snapshot.symbols.len());
    Ok(())
}
