// Centralized user-facing strings. ASCII-friendly by default.

pub const WELCOME: &str = "Start chatting with Ollama...";

pub const PROMPT: &str = "> ";

pub const NO_MODELS: &str = "No models found at this URL.";
pub const CANNOT_SEND: &str = "[info] cannot send: empty input or no model selected";
pub const CONVERSATION_CLEARED: &str = "[info] conversation cleared";
pub const HISTORY_DISABLED: &str = "[info] history is disabled";
pub const HISTORY_EMPTY: &str = "[info] no history yet";

pub fn error_reply(msg: &str) -> String {
    format!("Error: {}", msg)
}

pub fn info_model_set(model: &str) -> String {
    format!("[info] model set to '{}'", model)
}

pub fn info_url_set(url: &str) -> String {
    format!("[info] server set to {}", url)
}

pub fn unknown_command(cmd: &str) -> String {
    format!("[info] unknown command '/{}', try /help", cmd)
}

// Example: "[llama3:8b | 42.7 tok/s]"
pub fn status_line(model: &str, tps: f64) -> String {
    format!("[{} | {:.1} tok/s]", model, tps)
}

pub fn model_line(name: &str, selected: bool) -> String {
    let mark = if selected { "*" } else { " " };
    format!("{} {}", mark, name)
}

pub fn help_lines() -> &'static [&'static str] {
    &[
        "Type a message and press Enter to send.",
        "  /model <name>   select a model",
        "  /models         list models on the server",
        "  /url <base>     switch server and refresh models",
        "  /history        show recorded throughput",
        "  /reset          clear the conversation",
        "  /help           this text",
        "  /quit           exit",
    ]
}
