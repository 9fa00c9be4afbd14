use std::sync::Arc;

use tracing::{error, info, warn};
use wire_core::history::{HistoryRecord, HistorySink};
use wire_core::llm::{
    ChatError, ChatEventHandler, ChatOpts, Message, ModelInfo, Role, StreamChunk, StreamEvent,
};
use wire_core::rate::{RateConfig, RateEstimator};

use crate::strings;

pub mod commands;

/// Everything needed to start one request.
#[derive(Debug)]
pub struct Turn {
    pub messages: Vec<Message>,
    pub opts: ChatOpts,
}

/// Conversation state for one chat window. Owns the rate estimator and feeds
/// it from the chunks it receives.
pub struct ChatSession {
    pub messages: Vec<Message>,
    pub server_url: String,
    pub model: Option<String>,
    pub models: Vec<ModelInfo>,
    pub model_error: Option<String>,
    // Rate captured when the last turn ended.
    pub last_tps: Option<f64>,
    current_query: String,
    streaming: bool,
    estimator: RateEstimator,
    history: Arc<dyn HistorySink>,
}

impl ChatSession {
    pub fn new(
        server_url: String,
        model: Option<String>,
        rate: RateConfig,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        Self {
            messages: vec![Message::system(strings::WELCOME)],
            server_url,
            model,
            models: Vec::new(),
            model_error: None,
            last_tps: None,
            current_query: String::new(),
            streaming: false,
            estimator: RateEstimator::new(rate),
            history,
        }
    }

    /// Switching servers forgets the model list and the selection.
    pub fn set_server_url(&mut self, url: String) {
        self.server_url = url;
        self.models.clear();
        self.model = None;
        self.model_error = None;
    }

    pub fn apply_models(&mut self, models: Vec<ModelInfo>) {
        self.model_error = None;
        if models.is_empty() {
            self.model_error = Some(strings::NO_MODELS.to_string());
        } else if self.model.is_none() {
            self.model = Some(models[0].name.clone());
        } else if let Some(m) = &self.model {
            if !models.iter().any(|x| &x.name == m) {
                warn!(target: "cli", "model '{}' not listed by server, keeping it", m);
            }
        }
        self.models = models;
    }

    pub fn select_model<S: Into<String>>(&mut self, name: S) {
        self.model = Some(name.into());
    }

    /// Appends the user message and an empty assistant placeholder. The returned
    /// payload never contains `system` messages.
    pub fn begin_turn(&mut self, input: &str) -> Option<Turn> {
        let text = input.trim();
        let Some(model) = self.model.clone() else {
            warn!(target: "cli", "cannot send: no model selected");
            return None;
        };
        if text.is_empty() {
            warn!(target: "cli", "cannot send: empty input");
            return None;
        }
        if self.streaming {
            warn!(target: "cli", "cannot send: a reply is still streaming");
            return None;
        }

        self.current_query = text.to_string();
        self.estimator.reset_calculator();
        self.messages.push(Message::user(text));
        let payload = self
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect::<Vec<_>>();
        self.messages.push(Message::assistant(String::new()));
        self.streaming = true;
        info!(target: "cli", "submit: model={} input_len={} chars", model, text.chars().count());
        Some(Turn {
            messages: payload,
            opts: ChatOpts::new(model),
        })
    }

    /// Routes one stream event; returns true when the turn is over.
    pub fn apply(&mut self, ev: StreamEvent) -> bool {
        match ev {
            StreamEvent::Chunk(chunk) => {
                self.on_chunk(chunk);
                false
            }
            StreamEvent::End => {
                self.on_stream_end();
                true
            }
            StreamEvent::Error(e) => {
                self.on_error(e);
                true
            }
        }
    }

    #[cfg(test)]
    fn rate(&self) -> f64 {
        self.estimator.rate()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn last_reply(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    pub fn reset_conversation(&mut self) {
        self.messages = vec![Message::system(strings::WELCOME)];
        self.estimator.reset_calculator();
        self.last_tps = None;
        self.streaming = false;
    }
}

impl ChatEventHandler for ChatSession {
    fn on_chunk(&mut self, chunk: StreamChunk) {
        self.estimator.record_chunk(chunk.timestamp, chunk.token_count);
        if let Some(last) = self.messages.last_mut() {
            if last.role == Role::Assistant {
                last.content.push_str(&chunk.content);
            }
        }
    }

    fn on_stream_end(&mut self) {
        self.streaming = false;
        // A reply shorter than one tick would otherwise read 0.0.
        let tps = self.estimator.refresh();
        self.last_tps = Some(tps);
        info!(target: "cli", "stream ended tps={}", tps);
        let record = HistoryRecord::new(
            self.current_query.clone(),
            self.model.clone().unwrap_or_default(),
            tps,
            self.server_url.clone(),
        );
        self.history.save_record(record);
    }

    fn on_error(&mut self, err: ChatError) {
        error!(target: "cli", "chat failed: {}", err);
        self.streaming = false;
        let reply = Message::assistant(strings::error_reply(&err.to_string()));
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => *last = reply,
            _ => self.messages.push(reply),
        }
        self.estimator.reset_calculator();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use wire_core::llm::{drive_stream, ChatStream};

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<HistoryRecord>>,
    }

    impl HistorySink for MemorySink {
        fn save_record(&self, record: HistoryRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    fn session(model: Option<&str>) -> (ChatSession, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let s = ChatSession::new(
            "http://localhost:11434".to_string(),
            model.map(str::to_string),
            RateConfig::default(),
            sink.clone(),
        );
        (s, sink)
    }

    fn model(name: &str) -> ModelInfo {
        ModelInfo {
            name: name.to_string(),
            digest: String::new(),
            size: None,
            modified_at: None,
            details: None,
        }
    }

    fn canned(events: Vec<StreamEvent>) -> ChatStream<'static> {
        Box::pin(futures::stream::iter(events))
    }

    #[test]
    fn begin_turn_filters_system_and_adds_placeholder() {
        let (mut s, _) = session(Some("llama3"));
        let turn = s.begin_turn("  why is the sky blue?  ").unwrap();
        assert_eq!(turn.opts.model, "llama3");
        assert_eq!(turn.messages, vec![Message::user("why is the sky blue?")]);
        assert_eq!(s.messages.len(), 3);
        assert_eq!(s.messages[0].role, Role::System);
        assert_eq!(s.last_reply(), Some(""));
        assert!(s.is_streaming());
    }

    #[test]
    fn begin_turn_rejects_empty_input_and_missing_model() {
        let (mut s, _) = session(None);
        assert!(s.begin_turn("hello").is_none());
        s.select_model("llama3");
        assert!(s.begin_turn("   ").is_none());
        assert_eq!(s.messages.len(), 1);
    }

    #[test]
    fn apply_models_picks_first_or_reports_none() {
        let (mut s, _) = session(None);
        s.apply_models(vec![]);
        assert_eq!(s.model_error.as_deref(), Some(strings::NO_MODELS));
        assert!(s.model.is_none());

        s.apply_models(vec![model("llama3:8b"), model("qwen2:7b")]);
        assert_eq!(s.model.as_deref(), Some("llama3:8b"));
        assert!(s.model_error.is_none());

        s.select_model("qwen2:7b");
        s.apply_models(vec![model("llama3:8b"), model("qwen2:7b")]);
        assert_eq!(s.model.as_deref(), Some("qwen2:7b"));

        s.set_server_url("http://other:11434".into());
        assert!(s.model.is_none());
        assert!(s.models.is_empty());
    }

    #[tokio::test]
    async fn chunks_build_reply_and_end_records_history() {
        let (mut s, sink) = session(Some("llama3"));
        let turn = s.begin_turn("hi").unwrap();
        assert_eq!(turn.messages.len(), 1);

        let stream = canned(vec![
            StreamEvent::Chunk(StreamChunk::new("Hel")),
            StreamEvent::Chunk(StreamChunk::new("lo")),
            StreamEvent::End,
        ]);
        drive_stream(stream, &mut s).await;

        assert_eq!(s.last_reply(), Some("Hello"));
        assert!(!s.is_streaming());
        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].query, "hi");
        assert_eq!(records[0].model, "llama3");
        assert_eq!(records[0].server_url, "http://localhost:11434");
        assert_eq!(Some(records[0].tps), s.last_tps);
    }

    #[tokio::test]
    async fn error_replaces_placeholder_and_zeroes_rate() {
        let (mut s, sink) = session(Some("llama3"));
        s.begin_turn("hi").unwrap();
        let stream = canned(vec![
            StreamEvent::Chunk(StreamChunk::new("partial")),
            StreamEvent::Error(ChatError::Http {
                status: 404,
                body: "model not found".into(),
            }),
        ]);
        drive_stream(stream, &mut s).await;

        assert_eq!(
            s.last_reply(),
            Some("Error: HTTP error 404: model not found")
        );
        assert_eq!(s.rate(), 0.0);
        assert!(!s.is_streaming());
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_drive_the_rate() {
        let (mut s, sink) = session(Some("llama3"));
        s.begin_turn("count").unwrap();
        s.apply(StreamEvent::Chunk(StreamChunk::new("0123456789")));
        s.apply(StreamEvent::Chunk(StreamChunk::new("0123456789")));
        tokio::time::sleep(Duration::from_millis(510)).await;
        tokio::task::yield_now().await;
        assert_eq!(s.rate(), 40.0);

        // end-of-stream takes a fresh reading: 20 tokens over 510ms
        assert!(s.apply(StreamEvent::End));
        assert_eq!(s.last_tps, Some(39.2));
        assert_eq!(sink.records.lock().unwrap()[0].tps, 39.2);

        // next turn starts from zero
        s.begin_turn("again").unwrap();
        assert_eq!(s.rate(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_faster_than_one_tick_still_records_a_rate() {
        let (mut s, sink) = session(Some("llama3"));
        s.begin_turn("quick").unwrap();
        s.apply(StreamEvent::Chunk(StreamChunk::new("abcd")));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(s.rate(), 0.0);

        s.apply(StreamEvent::End);
        // 4 tokens over 100ms
        assert_eq!(s.last_tps, Some(40.0));
        assert_eq!(sink.records.lock().unwrap()[0].tps, 40.0);
    }

    #[test]
    fn reset_conversation_keeps_only_banner() {
        let (mut s, _) = session(Some("llama3"));
        s.begin_turn("hi").unwrap();
        s.reset_conversation();
        assert_eq!(s.messages, vec![Message::system(strings::WELCOME)]);
        assert!(!s.is_streaming());
        assert_eq!(s.last_reply(), None);
    }
}
