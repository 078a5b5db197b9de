//! Cache management commands

use anyhow::{Context, Result};
use opconfig_core::crypto;
use opconfig_secrets::remove_cache_file;

use crate::cli::ClearCacheArgs;
use crate::output;

pub fn gen_iv() -> Result<()> {
    output::info("Add this to the environment of every process sharing the cache:");
    output::kv("OP_CACHE_IV", &crypto::generate_iv_hex());
    Ok(())
}

/// Delete the cache file. Needs no settings from the environment.
pub async fn clear(args: ClearCacheArgs) -> Result<()> {
    let path = args.cache_file;
    let removed = remove_cache_file(path.as_std_path())
        .await
        .with_context(|| format!("Failed to remove cache file {}", path))?;

    if removed {
        output::success(&format!("Removed cache file {}", path));
    } else {
        output::info(&format!("No cache file at {}", path));
    }
    Ok(())
}
