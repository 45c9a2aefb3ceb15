use anyhow::{Context, Result, bail};
use clap::Parser;
use libbrewlink::RegisterPolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
pub const DEFAULT_ALLOW_ORIGIN: &str = "http://localhost:3000";

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "brewlink appliance control plane")]
pub struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Directory holding session records.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Directory holding `<recipe>.json` files.
    #[arg(long)]
    pub recipes_dir: Option<PathBuf>,

    /// How long a request waits for a busy device before giving up.
    #[arg(long)]
    pub lock_timeout_ms: Option<u64>,

    /// What `register` does when a device already has an open session:
    /// resume, reject or restart.
    #[arg(long)]
    pub register_policy: Option<RegisterPolicy>,

    /// Dashboard origin allowed by CORS (can be repeated, `*` for any).
    #[arg(long = "allow-origin")]
    pub allow_origins: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    listen: Option<SocketAddr>,
    data_dir: Option<PathBuf>,
    recipes_dir: Option<PathBuf>,
    lock_timeout_ms: Option<u64>,
    register_policy: Option<RegisterPolicy>,
    allow_origins: Option<Vec<String>>,
    event_capacity: Option<usize>,
    #[serde(default)]
    firmware: HashMap<String, String>,
}

/// Effective server configuration: defaults, then the config file, then flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    pub recipes_dir: PathBuf,
    pub lock_timeout: Duration,
    pub register_policy: RegisterPolicy,
    pub allow_origins: Vec<String>,
    /// Family name to latest firmware version.
    pub firmware: HashMap<String, String>,
    pub event_capacity: usize,
}

impl Config {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            recipes_dir: data_dir.join("recipes"),
            data_dir,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            register_policy: RegisterPolicy::default(),
            allow_origins: vec![DEFAULT_ALLOW_ORIGIN.to_string()],
            firmware: HashMap::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn load(args: &Args) -> Result<Self> {
        let file_cfg = match &args.config {
            Some(path) => read_file_config(path)?,
            None => {
                let path = default_config_path();
                if path.exists() {
                    read_file_config(&path)?
                } else {
                    FileConfig::default()
                }
            }
        };
        Self::merge(file_cfg, args)
    }

    fn merge(file_cfg: FileConfig, args: &Args) -> Result<Self> {
        let data_dir = args
            .data_dir
            .clone()
            .or(file_cfg.data_dir)
            .unwrap_or_else(default_data_dir);
        let mut cfg = Self::with_data_dir(data_dir);

        if let Some(listen) = args.listen.or(file_cfg.listen) {
            cfg.listen = listen;
        }
        if let Some(dir) = args.recipes_dir.clone().or(file_cfg.recipes_dir) {
            cfg.recipes_dir = dir;
        }
        if let Some(policy) = args.register_policy.or(file_cfg.register_policy) {
            cfg.register_policy = policy;
        }

        let lock_timeout_ms = args
            .lock_timeout_ms
            .or(file_cfg.lock_timeout_ms)
            .unwrap_or(DEFAULT_LOCK_TIMEOUT_MS);
        if lock_timeout_ms == 0 {
            bail!("lock_timeout_ms must be greater than zero");
        }
        cfg.lock_timeout = Duration::from_millis(lock_timeout_ms);

        let event_capacity = file_cfg.event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY);
        if event_capacity == 0 {
            bail!("event_capacity must be greater than zero");
        }
        cfg.event_capacity = event_capacity;

        if !args.allow_origins.is_empty() {
            cfg.allow_origins = args.allow_origins.clone();
        } else if let Some(origins) = file_cfg.allow_origins {
            cfg.allow_origins = origins;
        }
        cfg.firmware = file_cfg.firmware;

        Ok(cfg)
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str::<FileConfig>(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))
}

pub fn default_config_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("brewlink").join("config.toml")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
            .join(".config")
            .join("brewlink")
            .join("config.toml")
    } else {
        PathBuf::from("/tmp/brewlink/config.toml")
    }
}

pub fn default_data_dir() -> PathBuf {
    if let Ok(data_dir) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(data_dir).join("brewlink")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local").join("share").join("brewlink")
    } else {
        PathBuf::from("/tmp/brewlink")
    }
}
