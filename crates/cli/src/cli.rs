use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Chat with a local Ollama server and watch tokens per second", long_about = None)]
pub struct Args {
    /// Base URL of the server (e.g., http://localhost:11434). Overrides OLLAMA_HOST and the config file.
    #[arg(short, long)]
    pub url: Option<String>,

    /// Model to chat with. Defaults to the first model the server lists.
    #[arg(short, long, env = "LLAMAWIRE_MODEL")]
    pub model: Option<String>,

    /// Send one prompt, print the reply and exit.
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Print the server's models and exit.
    #[arg(long)]
    pub list_models: bool,

    /// Do not record finished turns in the history file.
    #[arg(long)]
    pub no_history: bool,
}
