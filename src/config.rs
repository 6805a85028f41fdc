use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub lore: LoreConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

/// Location of the mirrored mailing-list git archive.
#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Local clone directory. Defaults to `.lore-cache/<url-hash>` next to
    /// the config file.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub shallow: bool,
}

fn default_branch() -> String {
    "master".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoreConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_list")]
    pub list: String,
}

impl Default for LoreConfig {
    fn default() -> Self {
        LoreConfig {
            host: default_host(),
            list: default_list(),
        }
    }
}

fn default_host() -> String {
    "lore.kernel.org".to_string()
}
fn default_list() -> String {
    "kvmarm".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VerifyConfig {
    /// Worker pool size for concurrent link verification. Kept small to
    /// respect the remote service.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-request throttle delay, applied before every fetch.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        VerifyConfig {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            delay_ms: default_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_concurrency() -> usize {
    3
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_delay_ms() -> u64 {
    500
}
fn default_user_agent() -> String {
    "lore-forest/0.3".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Total embedded diff size (bytes) above which a message is split.
    #[serde(default = "default_max_diff_bytes")]
    pub max_diff_bytes: usize,
    /// Reply-quote nesting depth above which a message is split.
    #[serde(default = "default_max_quote_depth")]
    pub max_quote_depth: usize,
    /// Regexes marking diff paths as critical (vs. detail).
    #[serde(default = "default_critical_patterns")]
    pub critical_patterns: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            max_tokens: default_max_tokens(),
            max_diff_bytes: default_max_diff_bytes(),
            max_quote_depth: default_max_quote_depth(),
            critical_patterns: default_critical_patterns(),
        }
    }
}

fn default_max_tokens() -> usize {
    8000
}
fn default_max_diff_bytes() -> usize {
    10240
}
fn default_max_quote_depth() -> usize {
    3
}
fn default_critical_patterns() -> Vec<String> {
    vec![
        r"arch/arm64/kvm".to_string(),
        r"virt/kvm/arm".to_string(),
        r"include/.*kvm".to_string(),
        r"Kconfig".to_string(),
        r"Makefile".to_string(),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.archive.url.is_empty() {
        anyhow::bail!("archive.url must not be empty");
    }

    if config.lore.host.is_empty() || config.lore.list.is_empty() {
        anyhow::bail!("lore.host and lore.list must not be empty");
    }

    if config.verify.concurrency == 0 {
        anyhow::bail!("verify.concurrency must be >= 1");
    }

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    for pattern in &config.chunking.critical_patterns {
        regex::Regex::new(pattern)
            .with_context(|| format!("Invalid chunking.critical_patterns entry: '{}'", pattern))?;
    }

    Ok(config)
}
