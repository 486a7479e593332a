use anyhow::Result;
use brisk_ledger::bin_utils::{LoadTest, load_config};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref())?;

    LoadTest::new(config).run()
}
