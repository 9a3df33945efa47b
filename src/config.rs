use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::translate::prompts::{default_prompt_files, DEFAULT_PROMPTS_DIR};

pub const CONFIG_FILENAME: &str = "reslide.toml";
pub const CONFIG_ENV_VAR: &str = "RESLIDE_CONFIG";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_FILE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_CHARS_PER_BATCH: usize = 4000;
pub const DEFAULT_MAX_ITEMS_PER_BATCH: usize = 32;
pub const DEFAULT_MAX_RETRIES: usize = 3;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub prompts: PromptsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct WorkerSection {
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub file_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_chars_per_batch: Option<usize>,
    #[serde(default)]
    pub max_items_per_batch: Option<usize>,
    #[serde(default)]
    pub max_retries: Option<usize>,
}

impl WorkerSection {
    pub fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
    }

    pub fn file_timeout_secs(&self) -> u64 {
        self.file_timeout_secs.unwrap_or(DEFAULT_FILE_TIMEOUT_SECS)
    }

    pub fn max_chars_per_batch(&self) -> usize {
        self.max_chars_per_batch
            .unwrap_or(DEFAULT_MAX_CHARS_PER_BATCH)
            .max(256)
    }

    pub fn max_items_per_batch(&self) -> usize {
        self.max_items_per_batch
            .unwrap_or(DEFAULT_MAX_ITEMS_PER_BATCH)
            .max(1)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct BackendSection {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Inline key; prefer `api_key_env` so keys stay out of config files.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct StorageSection {
    /// Root directory for job files (originals and results).
    #[serde(default)]
    pub root: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub translate: Option<String>,
}

/// Backend settings with every default filled in and the API key resolved.
#[derive(Clone, Debug)]
pub struct ResolvedBackend {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

pub fn resolve_backend(cfg: &AppConfig, model_override: Option<&str>) -> Result<ResolvedBackend> {
    let b = &cfg.backend;
    let key_env = b.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV);
    let api_key = match b.api_key.clone() {
        Some(k) if !k.trim().is_empty() => k,
        _ => std::env::var(key_env).map_err(|_| {
            Error::validation(format!(
                "no API key: set backend.api_key in {CONFIG_FILENAME} or export {key_env}"
            ))
        })?,
    };

    Ok(ResolvedBackend {
        base_url: b
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        api_key,
        model: model_override
            .map(|s| s.to_string())
            .or_else(|| b.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        request_timeout_secs: b
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        max_tokens: b.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: b.temperature.unwrap_or(DEFAULT_TEMPERATURE),
    })
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

/// Config path resolution order: explicit flag, `RESLIDE_CONFIG`, then an
/// upward search for `reslide.toml` from the working directory.
pub fn resolve_config_path(explicit: Option<PathBuf>, workdir: &Path) -> Option<PathBuf> {
    explicit
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
        .or_else(|| find_default_config(workdir, CONFIG_FILENAME))
}

pub fn load_config(path: &Path) -> Result<AppConfig> {
    let text = std::fs::read_to_string(path)?;
    let cfg: AppConfig = toml::from_str(&text)
        .map_err(|e| Error::validation(format!("parse {}: {e}", path.display())))?;
    Ok(cfg)
}

pub fn init_default_config(dir: &Path, force: bool) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let cfg_path = dir.join(CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)?;
    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body)?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }

    let cfg_text = r#"[worker]
poll_interval_secs = 5
file_timeout_secs = 300
max_chars_per_batch = 4000
max_items_per_batch = 32
max_retries = 3

[backend]
base_url = "https://api.openai.com/v1"
# Prefer the env var; an inline key overrides it.
# api_key = "sk-..."
api_key_env = "OPENAI_API_KEY"
model = "gpt-4o-mini"
request_timeout_secs = 120
max_tokens = 4096
temperature = 0.2

[storage]
# Job originals land under <root>/originals, results under <root>/results.
root = "jobs"

[prompts]
translate = "prompts/translate.txt"
"#;

    std::fs::write(&cfg_path, cfg_text)?;
    Ok(cfg_path)
}
