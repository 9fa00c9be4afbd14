use std::io::Write;

use anyhow::Result;
use futures::StreamExt;
use providers::ollama::{OllamaClient, OllamaConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use wire_core::llm::{ChatError, ModelClient, StreamEvent};

use crate::app::commands::{parse_command, Command};
use crate::app::ChatSession;
use crate::persist::JsonHistoryStore;
use crate::strings;

const HISTORY_SHOWN: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub async fn refresh_models<W: Write>(
    client: &OllamaClient,
    session: &mut ChatSession,
    out: &mut W,
) -> Result<()> {
    let models = client.list_models().await;
    session.apply_models(models);
    if let Some(e) = &session.model_error {
        writeln!(out, "[info] {}", e)?;
    }
    Ok(())
}

pub fn print_models<W: Write>(session: &ChatSession, out: &mut W) -> Result<()> {
    for m in &session.models {
        let selected = session.model.as_deref() == Some(m.name.as_str());
        writeln!(out, "{}", strings::model_line(&m.name, selected))?;
    }
    Ok(())
}

/// Sends `input`, echoes the reply as it streams and folds every event into
/// the session. A stream that stops without `End` or `Error` fails the turn.
pub async fn run_turn<C: ModelClient, W: Write>(
    client: &C,
    session: &mut ChatSession,
    input: &str,
    out: &mut W,
) -> Result<TurnOutcome> {
    let Some(turn) = session.begin_turn(input) else {
        writeln!(out, "{}", strings::CANNOT_SEND)?;
        return Ok(TurnOutcome::Rejected);
    };
    let model = turn.opts.model.clone();
    let mut stream = client.stream_chat(turn.messages, turn.opts);
    let mut outcome = TurnOutcome::Failed;

    while let Some(ev) = stream.next().await {
        match &ev {
            StreamEvent::Chunk(c) => {
                write!(out, "{}", c.content)?;
                out.flush()?;
            }
            StreamEvent::End => outcome = TurnOutcome::Completed,
            StreamEvent::Error(_) => outcome = TurnOutcome::Failed,
        }
        if session.apply(ev) {
            break;
        }
    }
    if session.is_streaming() {
        session.apply(StreamEvent::Error(ChatError::Protocol(
            "stream closed without end".into(),
        )));
    }
    debug!(target: "cli", "turn finished outcome={:?} tps={:?}", outcome, session.last_tps);

    writeln!(out)?;
    match outcome {
        TurnOutcome::Completed => {
            let tps = session.last_tps.unwrap_or_default();
            writeln!(out, "{}", strings::status_line(&model, tps))?;
        }
        _ => {
            if let Some(reply) = session.last_reply() {
                writeln!(out, "{}", reply)?;
            }
        }
    }
    Ok(outcome)
}

pub async fn handle_command<W: Write>(
    cmd: Command,
    client: &mut OllamaClient,
    session: &mut ChatSession,
    store: Option<&JsonHistoryStore>,
    out: &mut W,
) -> Result<Flow> {
    match cmd {
        Command::Model(name) => {
            writeln!(out, "{}", strings::info_model_set(&name))?;
            session.select_model(name);
        }
        Command::Models => {
            refresh_models(client, session, out).await?;
            print_models(session, out)?;
        }
        Command::Url(None) => {
            writeln!(out, "{}", session.server_url)?;
        }
        Command::Url(Some(raw)) => match OllamaConfig::normalize_base_url(&raw) {
            Ok(url) => {
                *client = client.with_base_url(url.clone());
                session.set_server_url(url.clone());
                writeln!(out, "{}", strings::info_url_set(&url))?;
                refresh_models(client, session, out).await?;
                if let Some(m) = &session.model {
                    writeln!(out, "{}", strings::info_model_set(m))?;
                }
            }
            Err(e) => writeln!(out, "[info] {:#}", e)?,
        },
        Command::History => match store {
            None => writeln!(out, "{}", strings::HISTORY_DISABLED)?,
            Some(store) => {
                let history = store.get_history();
                if history.is_empty() {
                    writeln!(out, "{}", strings::HISTORY_EMPTY)?;
                }
                let skip = history.len().saturating_sub(HISTORY_SHOWN);
                for r in history.iter().skip(skip) {
                    writeln!(
                        out,
                        "{}  {:>7.1} tok/s  {}  {}",
                        r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        r.tps,
                        r.model,
                        r.query
                    )?;
                }
            }
        },
        Command::Reset => {
            session.reset_conversation();
            writeln!(out, "{}", strings::CONVERSATION_CLEARED)?;
        }
        Command::Help => {
            for line in strings::help_lines() {
                writeln!(out, "{}", line)?;
            }
        }
        Command::Quit => return Ok(Flow::Quit),
        Command::Unknown(c) => writeln!(out, "{}", strings::unknown_command(&c))?,
    }
    Ok(Flow::Continue)
}

pub async fn run_repl(
    mut client: OllamaClient,
    mut session: ChatSession,
    store: Option<JsonHistoryStore>,
) -> Result<()> {
    let mut out = std::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    writeln!(out, "{}", strings::WELCOME)?;
    if let Some(m) = &session.model {
        writeln!(out, "{}", strings::info_model_set(m))?;
    }
    loop {
        write!(out, "{}", strings::PROMPT)?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if let Some(cmd) = parse_command(&line) {
            let flow =
                handle_command(cmd, &mut client, &mut session, store.as_ref(), &mut out).await?;
            if flow == Flow::Quit {
                break;
            }
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        run_turn(&client, &mut session, &line, &mut out).await?;
    }
    info!(target: "cli", "session closed");
    Ok(())
}
