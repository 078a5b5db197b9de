//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// opconfig - resolve templated configuration from 1Password
#[derive(Parser, Debug)]
#[command(name = "opconfig")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve the configuration and print it
    Load(LoadArgs),

    /// Generate a fresh value for OP_CACHE_IV
    GenIv,

    /// Delete the encrypted cache file
    ClearCache(ClearCacheArgs),
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Template variable, overriding the environment (KEY=VALUE)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Local override document
    #[arg(long, default_value = opconfig::options::DEFAULT_OVERRIDE_FILE)]
    pub override_file: Utf8PathBuf,

    /// Encrypted cache file
    #[arg(long, default_value = opconfig::options::DEFAULT_CACHE_FILE)]
    pub cache_file: Utf8PathBuf,

    /// Project descriptor supplying the integration name and version
    #[arg(long, default_value = opconfig::options::DEFAULT_DESCRIPTOR_FILE)]
    pub descriptor: Utf8PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ClearCacheArgs {
    /// Encrypted cache file
    #[arg(long, default_value = opconfig::options::DEFAULT_CACHE_FILE)]
    pub cache_file: Utf8PathBuf,
}

fn parse_var(value: &str) -> Result<(String, String), String> {
    let (key, val) = value
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", value))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", value));
    }
    Ok((key.to_string(), val.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("DB_HOST=db.internal").unwrap(),
            ("DB_HOST".to_string(), "db.internal".to_string())
        );
        assert_eq!(
            parse_var("URL=a=b").unwrap(),
            ("URL".to_string(), "a=b".to_string())
        );
        assert!(parse_var("no-equals").is_err());
        assert!(parse_var("=value").is_err());
    }

    #[test]
    fn test_load_args() {
        let cli = Cli::parse_from([
            "opconfig",
            "-v",
            "load",
            "--var",
            "ENV=prod",
            "--json",
            "--override-file",
            "local.toml",
        ]);
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Load(args) => {
                assert_eq!(args.vars, vec![("ENV".to_string(), "prod".to_string())]);
                assert!(args.json);
                assert_eq!(args.override_file, "local.toml");
                assert_eq!(args.cache_file, "./config.cache");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
