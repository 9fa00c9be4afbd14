#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Model(String),
    Models,
    Url(Option<String>),
    History,
    Reset,
    Help,
    Quit,
    Unknown(String),
}

/// Parses `/cmd [arg]`. Returns `None` for ordinary chat input.
pub fn parse_command(text: &str) -> Option<Command> {
    let s = text.trim();
    let rest = s.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("").to_lowercase();
    let arg = parts.next().unwrap_or("").trim();
    let parsed = match cmd.as_str() {
        "model" if arg.is_empty() => Command::Models,
        "model" => Command::Model(arg.to_string()),
        "models" => Command::Models,
        "url" if arg.is_empty() => Command::Url(None),
        "url" => Command::Url(Some(arg.to_string())),
        "history" => Command::History,
        "reset" | "clear" => Command::Reset,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(cmd),
    };
    Some(parsed)
}
