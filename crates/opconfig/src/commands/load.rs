//! Load command

use anyhow::{Context, Result};
use opconfig::{ConfigLoader, LoadOptions, VariableBindings};

use crate::cli::LoadArgs;

pub async fn run(args: LoadArgs) -> Result<()> {
    let options = LoadOptions::default()
        .with_override_file(args.override_file)
        .with_cache_file(args.cache_file)
        .with_descriptor(args.descriptor);

    let loader = ConfigLoader::from_env(options).context("Invalid opconfig environment")?;
    let vars: VariableBindings = args.vars.into_iter().collect();

    let config = loader
        .load_with(vars)
        .await
        .context("Failed to load configuration")?;

    // Keep the process alive until the cache is on disk
    loader.flush().await;

    if args.json {
        println!("{}", config.to_json()?);
    } else {
        print!("{}", toml::to_string_pretty(config.as_table())?);
    }

    Ok(())
}
