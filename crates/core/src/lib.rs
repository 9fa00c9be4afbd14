pub mod history;
pub mod rate;

pub mod llm {
    use std::pin::Pin;

    use futures::{Stream, StreamExt};
    use serde::{Deserialize, Serialize};
    use thiserror::Error;
    use tokio::time::Instant;

    #[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        System,
        User,
        Assistant,
    }

    impl Role {
        pub fn as_str(&self) -> &'static str {
            match self {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            }
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
    pub struct Message {
        pub role: Role,
        pub content: String,
    }

    impl Message {
        pub fn system<S: Into<String>>(s: S) -> Self {
            Self {
                role: Role::System,
                content: s.into(),
            }
        }
        pub fn user<S: Into<String>>(s: S) -> Self {
            Self {
                role: Role::User,
                content: s.into(),
            }
        }
        pub fn assistant<S: Into<String>>(s: S) -> Self {
            Self {
                role: Role::Assistant,
                content: s.into(),
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct ChatOpts {
        pub model: String,
        pub temperature: Option<f32>,
        pub top_p: Option<f32>,
        pub max_tokens: Option<u32>,
    }

    impl ChatOpts {
        pub fn new<S: Into<String>>(model: S) -> Self {
            Self {
                model: model.into(),
                ..Default::default()
            }
        }
    }

    /// One increment of assistant text as it came off the wire.
    ///
    /// `token_count` is the character count of `content`, an approximation of
    /// real model tokens.
    #[derive(Clone, Debug)]
    pub struct StreamChunk {
        pub content: String,
        pub timestamp: Instant,
        pub token_count: usize,
    }

    impl StreamChunk {
        pub fn new<S: Into<String>>(content: S) -> Self {
            let content = content.into();
            let token_count = content.chars().count();
            Self {
                content,
                timestamp: Instant::now(),
                token_count,
            }
        }
    }

    /// Items of a chat stream. `End` and `Error` are terminal: nothing follows them.
    #[derive(Debug)]
    pub enum StreamEvent {
        Chunk(StreamChunk),
        End,
        Error(ChatError),
    }

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ChatError {
        #[error("HTTP error {status}: {body}")]
        Http { status: u16, body: String },
        #[error("protocol: {0}")]
        Protocol(String),
        #[error("network: {0}")]
        Network(String),
        #[error("timeout: {0}")]
        Timeout(String),
        #[error("parse: {0}")]
        Parse(String),
    }

    impl ChatError {
        /// Parse errors only cost the offending line; everything else ends the stream.
        pub fn is_fatal(&self) -> bool {
            !matches!(self, ChatError::Parse(_))
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    pub struct ModelInfo {
        pub name: String,
        #[serde(default)]
        pub digest: String,
        #[serde(default)]
        pub size: Option<u64>,
        #[serde(default)]
        pub modified_at: Option<String>,
        #[serde(default)]
        pub details: Option<serde_json::Value>,
    }

    pub type ChatStream<'a> = Pin<Box<dyn Stream<Item = StreamEvent> + Send + 'a>>;

    #[allow(async_fn_in_trait)]
    pub trait ModelClient: Send + Sync {
        /// Never fails up front; transport and protocol failures arrive as
        /// a terminal `StreamEvent::Error`.
        fn stream_chat<'a>(&'a self, msgs: Vec<Message>, opts: ChatOpts) -> ChatStream<'a>;
        /// Advisory: an unreachable or misbehaving server yields an empty list.
        async fn list_models(&self) -> Vec<ModelInfo>;
    }

    /// Callback view of a chat stream, for hosts that prefer handlers over polling.
    pub trait ChatEventHandler {
        fn on_chunk(&mut self, chunk: StreamChunk);
        fn on_stream_end(&mut self);
        fn on_error(&mut self, err: ChatError);
    }

    /// Pumps `stream` into `handler` until the first terminal event.
    pub async fn drive_stream<H: ChatEventHandler + ?Sized>(
        mut stream: ChatStream<'_>,
        handler: &mut H,
    ) {
        while let Some(ev) = stream.next().await {
            match ev {
                StreamEvent::Chunk(chunk) => handler.on_chunk(chunk),
                StreamEvent::End => {
                    handler.on_stream_end();
                    return;
                }
                StreamEvent::Error(e) => {
                    handler.on_error(e);
                    return;
                }
            }
        }
    }

}
