mod config;
mod dto;
mod errors;
mod logging;
mod security;
mod server;
mod storage;


use crate::config::Config;
use anyhow::Context;
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("burrow.toml");
    let mut explicit_config = false;
    let mut root_override: Option<PathBuf> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() { eprintln!("--config requires a path"); std::process::exit(2); }
                config_path = PathBuf::from(&args[i]);
                explicit_config = true;
            }
            "--root" => {
                i += 1;
                if i >= args.len() { eprintln!("--root requires a directory"); std::process::exit(2); }
                root_override = Some(PathBuf::from(&args[i]));
            }
            other => {
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
        i += 1;
    }

    let mut cfg = if explicit_config || config_path.exists() {
        Config::load(&config_path).with_context(|| format!("loading config {}", config_path.display()))?
    } else {
        Config::default()
    };
    if let Some(root) = root_override {
        cfg.root.root_dir = root;
    }
    cfg.validate().context("validating config")?;

    logging::init(cfg.logging.format);

    let root = config::prepare_root(&cfg.root.root_dir).context("preparing storage root")?;
    let gateway = storage::StorageGateway::new(&root).context("opening storage root")?;

    info!(
        addr = %format!("{}:{}", cfg.server.bind_addr, cfg.server.port),
        base_path = %cfg.server.base_path,
        root = %root.display(),
        "burrow ready"
    );

    server::serve(cfg, gateway).await
}
