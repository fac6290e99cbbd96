use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;

use llmio_common::{GatewayConfig, GatewayConfigPatch};

#[derive(Debug, Clone, Parser)]
#[command(name = "llmio", version, about = "Multi-tenant LLM gateway")]
pub struct Cli {
    /// Path to the JSON config file.
    #[arg(long, env = "LLMIO_CONFIG", default_value = "llmio.json")]
    pub config: PathBuf,

    /// Bind host.
    #[arg(long, env = "LLMIO_SERVER_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "LLMIO_SERVER_PORT")]
    pub port: Option<u16>,

    /// Admin bearer token; when unset the gateway runs open.
    #[arg(long, env = "TOKEN")]
    pub token: Option<String>,

    /// Sqlite database file path.
    #[arg(long, env = "DB_PATH")]
    pub db_path: Option<String>,
}

/// Merge order: CLI/ENV over the config file over built-in defaults. clap
/// already applies CLI > ENV per field.
pub fn load(args: &Cli) -> anyhow::Result<GatewayConfig> {
    let mut merged = GatewayConfigPatch::default();

    match std::fs::read(&args.config) {
        Ok(bytes) => {
            let file: GatewayConfigPatch = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse {}", args.config.display()))?;
            merged.overlay(file);
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", args.config.display()));
        }
    }

    merged.overlay(GatewayConfigPatch {
        host: args.host.clone(),
        port: args.port,
        admin_token: args.token.clone(),
        db_path: args.db_path.clone(),
    });

    Ok(merged.into_config()?)
}

/// The default DB lives under `./db/`; create the parent on first boot.
pub fn ensure_db_parent(db_path: &str) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create db directory {}", parent.display()))?;
    }
    Ok(())
}
