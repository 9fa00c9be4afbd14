mod app;
mod cli;
mod events;
mod logging;
mod persist;
mod strings;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use providers::ollama::{FileConfig, OllamaClient, OllamaConfig};
use tracing::{info, warn};
use wire_core::history::{DiscardHistory, HistorySink};
use wire_core::rate::RateConfig;

use app::ChatSession;
use cli::Args;
use events::TurnOutcome;
use persist::{JsonHistoryStore, DEFAULT_HISTORY_LIMIT};

fn rate_config(file: &FileConfig) -> RateConfig {
    let mut rate = RateConfig::default();
    if let Some(ms) = file.update_interval_ms.filter(|ms| *ms > 0) {
        rate.update_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = file.window_ms.filter(|ms| *ms > 0) {
        rate.window = Duration::from_millis(ms);
    }
    rate
}

fn build_config(args: &Args, file: &FileConfig) -> Result<OllamaConfig> {
    let mut cfg = OllamaConfig::from_parts(file, |k| std::env::var(k).ok())?;
    if let Some(url) = &args.url {
        cfg.base_url = OllamaConfig::normalize_base_url(url)?;
    }
    if let Some(m) = args.model.as_ref().filter(|m| !m.trim().is_empty()) {
        cfg.model = Some(m.clone());
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = match logging::init() {
        Ok(g) => g,
        Err(e) => {
            eprintln!("[warn] logging disabled: {:#}", e);
            None
        }
    };

    let file = FileConfig::load();
    let cfg = build_config(&args, &file)?;
    info!(target: "cli", "starting base_url={} model={:?}", cfg.base_url, cfg.model);

    let store = if args.no_history {
        None
    } else {
        let store =
            JsonHistoryStore::open_default(file.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
        match &store {
            Some(s) => info!(target: "cli", "history file {}", s.path().display()),
            None => warn!(target: "cli", "no data directory; history is not saved"),
        }
        store
    };
    let sink: Arc<dyn HistorySink> = match &store {
        Some(s) => Arc::new(s.clone()),
        None => Arc::new(DiscardHistory),
    };

    let client = OllamaClient::new(cfg.clone())?;
    let mut session = ChatSession::new(cfg.base_url.clone(), cfg.model.clone(), rate_config(&file), sink);

    let mut out = std::io::stdout();
    events::refresh_models(&client, &mut session, &mut out).await?;

    if args.list_models {
        events::print_models(&session, &mut out)?;
        return Ok(());
    }

    if let Some(prompt) = &args.prompt {
        let outcome = events::run_turn(&client, &mut session, prompt, &mut out).await?;
        out.flush()?;
        match outcome {
            TurnOutcome::Completed => return Ok(()),
            TurnOutcome::Failed => bail!("chat request failed"),
            TurnOutcome::Rejected => bail!("no model available to answer the prompt"),
        }
    }

    events::run_repl(client, session, store).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_config_ignores_zero_values() {
        let file = FileConfig {
            update_interval_ms: Some(0),
            window_ms: Some(2_000),
            ..FileConfig::default()
        };
        let rate = rate_config(&file);
        assert_eq!(rate.update_interval, Duration::from_millis(500));
        assert_eq!(rate.window, Duration::from_millis(2_000));
    }

    #[test]
    fn cli_url_wins_over_file() {
        let file = FileConfig::from_toml_str("base_url = \"http://file:11434\"\nmodel = \"a\"").unwrap();
        let args = Args::try_parse_from(["llamawire", "--url", "gpu:11434/", "--model", "b"]).unwrap();
        let cfg = build_config(&args, &file).unwrap();
        assert_eq!(cfg.base_url, "http://gpu:11434");
        assert_eq!(cfg.model.as_deref(), Some("b"));
    }
}
