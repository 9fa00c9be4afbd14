use anyhow::Context;
use directories::BaseDirs;
use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};
use tracing::warn;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Keys accepted in `config.toml`. Everything is optional.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub stream_idle_timeout_ms: Option<u64>,
    pub parse_trailing_fragment: Option<bool>,
    pub update_interval_ms: Option<u64>,
    pub window_ms: Option<u64>,
    pub history_limit: Option<usize>,
}

impl FileConfig {
    /// Reads the user's config file. A missing file is the empty config; an
    /// unreadable one is logged and ignored.
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(&path)
            .with_context(|| format!("read config file: {}", path.display()))
            .and_then(|s| Self::from_toml_str(&s))
        {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(target: "providers::config", "ignoring config file: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("parse config toml")
    }

    pub fn path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".llamawire").join("config.toml")
        } else {
            base.config_dir().join("llamawire").join("config.toml")
        };
        Some(p)
    }
}

#[derive(Clone, Debug)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: Option<String>,
    /// Whole-request limit for non-streaming calls.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub stream_idle_timeout: Duration,
    /// Parse a final record that the server did not terminate with a newline.
    pub parse_trailing_fragment: bool,
    pub proxy: Option<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: None,
            timeout: Duration::from_millis(30_000),
            connect_timeout: Duration::from_millis(10_000),
            stream_idle_timeout: Duration::from_millis(300_000),
            parse_trailing_fragment: true,
            proxy: None,
        }
    }
}

impl OllamaConfig {
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        Self::from_parts(&FileConfig::load(), |k| env::var(k).ok())
    }

    /// Layering: defaults, then the file, then the environment.
    pub fn from_parts(
        file: &FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut cfg = Self::default();

        if let Some(u) = &file.base_url {
            cfg.base_url = u.clone();
        }
        if let Some(m) = &file.model {
            cfg.model = Some(m.clone());
        }
        if let Some(t) = file.timeout_ms {
            cfg.timeout = Duration::from_millis(t);
        }
        if let Some(t) = file.connect_timeout_ms {
            cfg.connect_timeout = Duration::from_millis(t);
        }
        if let Some(idle) = file.stream_idle_timeout_ms {
            cfg.stream_idle_timeout = Duration::from_millis(idle);
        }
        if let Some(p) = file.parse_trailing_fragment {
            cfg.parse_trailing_fragment = p;
        }

        if let Some(host) = env("OLLAMA_HOST").filter(|s| !s.trim().is_empty()) {
            cfg.base_url = host;
        }
        if let Some(m) = env("LLAMAWIRE_MODEL").filter(|s| !s.trim().is_empty()) {
            cfg.model = Some(m);
        }
        cfg.proxy = env("HTTPS_PROXY").or_else(|| env("HTTP_PROXY"));

        cfg.base_url = Self::normalize_base_url(&cfg.base_url)?;
        Ok(cfg)
    }

    /// Adds a missing `http://`, checks the URL and strips trailing slashes.
    pub fn normalize_base_url(raw: &str) -> anyhow::Result<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            anyhow::bail!("server url is empty");
        }
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{}", raw)
        };
        let parsed =
            Url::parse(&with_scheme).with_context(|| format!("invalid server url: {}", raw))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("unsupported url scheme: {}", parsed.scheme());
        }
        Ok(with_scheme.trim_end_matches('/').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_file_or_env() {
        let cfg = OllamaConfig::from_parts(&FileConfig::default(), no_env).unwrap();
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.model, None);
        assert!(cfg.parse_trailing_fragment);
        assert_eq!(cfg.stream_idle_timeout, Duration::from_secs(300));
    }

    #[test]
    fn file_values_then_env_overrides() {
        let file = FileConfig::from_toml_str(
            r#"
            base_url = "http://gpu-box:11434/"
            model = "llama3"
            stream_idle_timeout_ms = 5000
            parse_trailing_fragment = false
            "#,
        )
        .unwrap();
        let cfg = OllamaConfig::from_parts(&file, no_env).unwrap();
        assert_eq!(cfg.base_url, "http://gpu-box:11434");
        assert_eq!(cfg.model.as_deref(), Some("llama3"));
        assert_eq!(cfg.stream_idle_timeout, Duration::from_millis(5000));
        assert!(!cfg.parse_trailing_fragment);

        let cfg = OllamaConfig::from_parts(&file, |k| match k {
            "OLLAMA_HOST" => Some("127.0.0.1:11500".to_string()),
            "LLAMAWIRE_MODEL" => Some("qwen2".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.base_url, "http://127.0.0.1:11500");
        assert_eq!(cfg.model.as_deref(), Some("qwen2"));
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(OllamaConfig::normalize_base_url("").is_err());
        assert!(OllamaConfig::normalize_base_url("ftp://host").is_err());
        assert!(OllamaConfig::normalize_base_url("http://").is_err());
        assert_eq!(
            OllamaConfig::normalize_base_url("https://llm.example.com//").unwrap(),
            "https://llm.example.com"
        );
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(FileConfig::from_toml_str("base_url = [").is_err());
    }
}
