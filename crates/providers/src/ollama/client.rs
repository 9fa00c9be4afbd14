use crate::ollama::config::OllamaConfig;
use crate::ollama::ndjson::{parse_record, LineBuffer, Record};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, error, info, warn};
use wire_core::llm::{
    ChatError, ChatOpts, ChatStream, Message, ModelClient, ModelInfo, StreamChunk, StreamEvent,
};

#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    cfg: OllamaConfig,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    pub fn new(cfg: OllamaConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .connect_timeout(cfg.connect_timeout);
        // Only the configured proxy applies; reqwest would otherwise pick up
        // system proxies for a server that is usually on localhost.
        builder = match &cfg.proxy {
            Some(p) => builder.proxy(reqwest::Proxy::all(p)?.no_proxy(reqwest::NoProxy::from_env())),
            None => builder.no_proxy(),
        };
        let http = builder.build()?;
        Ok(Self { http, cfg })
    }

    pub fn base_url(&self) -> &str {
        &self.cfg.base_url
    }

    /// Same client pointed at another server. Shares the connection pool.
    pub fn with_base_url<S: Into<String>>(&self, base_url: S) -> Self {
        let mut cfg = self.cfg.clone();
        cfg.base_url = base_url.into();
        Self {
            http: self.http.clone(),
            cfg,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    fn map_messages(&self, msgs: &[Message]) -> Vec<serde_json::Value> {
        msgs.iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect()
    }

    fn chat_body(&self, msgs: &[Message], opts: &ChatOpts) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": opts.model,
            "messages": self.map_messages(msgs),
            "stream": true,
        });
        let mut options = serde_json::Map::new();
        if let Some(t) = opts.temperature {
            options.insert("temperature".into(), serde_json::json!(t));
        }
        if let Some(p) = opts.top_p {
            options.insert("top_p".into(), serde_json::json!(p));
        }
        if let Some(n) = opts.max_tokens {
            options.insert("num_predict".into(), serde_json::json!(n));
        }
        if !options.is_empty() {
            if let Some(map) = body.as_object_mut() {
                map.insert("options".to_string(), serde_json::Value::Object(options));
            }
        }
        body
    }

    async fn fetch_models(&self) -> Result<Vec<ModelInfo>, ChatError> {
        let url = self.endpoint("api/tags");
        debug!(target:"providers::ollama","list models url={}", url);
        let resp = self
            .http
            .get(url)
            .timeout(self.cfg.timeout)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(map_status_err(status, resp.text().await.ok()));
        }
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| ChatError::Parse(e.to_string()))?;
        Ok(tags.models)
    }
}

#[allow(async_fn_in_trait)]
impl ModelClient for OllamaClient {
    fn stream_chat<'a>(&'a self, msgs: Vec<Message>, opts: ChatOpts) -> ChatStream<'a> {
        let url = self.endpoint("api/chat");
        info!(target:"providers::ollama","start chat stream model={} url={} messages={}", opts.model, url, msgs.len());
        let body = self.chat_body(&msgs, &opts);
        let send = self.http.post(url).json(&body).send();
        let idle = self.cfg.stream_idle_timeout;
        let parse_tail = self.cfg.parse_trailing_fragment;

        let s = async_stream::stream! {
            let resp = match send.await {
                Ok(r) => r,
                Err(e) => {
                    error!(target:"providers::ollama","chat request failed: {}", e);
                    yield StreamEvent::Error(map_reqwest_err(e));
                    return;
                }
            };
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.ok();
                error!(target:"providers::ollama","chat stream non-200 status={} body={:?}", status, body);
                yield StreamEvent::Error(map_status_err(status, body));
                return;
            }
            if resp.content_length() == Some(0) {
                error!(target:"providers::ollama","chat stream has no body");
                yield StreamEvent::Error(ChatError::Protocol("empty body".into()));
                return;
            }

            let mut stream = resp.bytes_stream();
            let mut lines = LineBuffer::new();
            let mut last = Instant::now();
            let mut delivered = 0usize;
            loop {
                tokio::select! {
                    chunk = stream.next() => {
                        match chunk {
                            Some(Ok(b)) => {
                                lines.push(&b);
                                last = Instant::now();
                                while let Some(line) = lines.next_line() {
                                    if let Some(c) = chunk_from_line(&line) {
                                        delivered += 1;
                                        yield StreamEvent::Chunk(c);
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                error!(target:"providers::ollama","chat stream read failed: {}", e);
                                yield StreamEvent::Error(map_reqwest_err(e));
                                return;
                            }
                            None => { break; }
                        }
                    }
                    _ = sleep_until(last + idle) => {
                        warn!(target:"providers::ollama","chat stream idle for {:?}", idle);
                        yield StreamEvent::Error(ChatError::Timeout("idle".into()));
                        return;
                    }
                }
            }

            if let Some(rest) = lines.take_remainder() {
                if parse_tail {
                    if let Some(c) = chunk_from_line(&rest) {
                        delivered += 1;
                        yield StreamEvent::Chunk(c);
                    }
                } else if !rest.trim().is_empty() {
                    debug!(target:"providers::ollama","dropping unterminated tail len={}", rest.len());
                }
            }
            info!(target:"providers::ollama","chat stream ended chunks={}", delivered);
            yield StreamEvent::End;
        };
        Box::pin(s)
    }

    async fn list_models(&self) -> Vec<ModelInfo> {
        match self.fetch_models().await {
            Ok(models) => {
                debug!(target:"providers::ollama","found {} models", models.len());
                models
            }
            Err(e) => {
                warn!(target:"providers::ollama","model list unavailable: {}", e);
                Vec::new()
            }
        }
    }
}

/// Turns one framed line into a chunk. Malformed lines are logged and skipped.
fn chunk_from_line(line: &str) -> Option<StreamChunk> {
    if line.trim().is_empty() {
        return None;
    }
    match parse_record(line) {
        Ok(Record::Content(text)) => Some(StreamChunk::new(text)),
        Ok(Record::Done {
            eval_count,
            eval_duration_ns,
        }) => {
            debug!(target:"providers::ollama","server done eval_count={:?} eval_duration_ns={:?}", eval_count, eval_duration_ns);
            None
        }
        Ok(Record::ServerError(msg)) => {
            warn!(target:"providers::ollama","server reported error mid-stream: {}", msg);
            None
        }
        Ok(Record::Empty) => None,
        Err(e) => {
            warn!(target:"providers::ollama","skipping malformed record: {} line={:?}", e, line);
            None
        }
    }
}

fn map_reqwest_err(e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::Timeout(e.to_string())
    } else {
        ChatError::Network(e.to_string())
    }
}

fn map_status_err(status: StatusCode, body: Option<String>) -> ChatError {
    let body = body
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string());
    ChatError::Http {
        status: status.as_u16(),
        body,
    }
}
