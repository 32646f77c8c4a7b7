//! Server-sent-events push source over reqwest

use super::{PushMessage, PushSource, PushSubscription};
use crate::api::TokenProvider;
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Incremental `text/event-stream` parser
///
/// Feed raw chunks with [`SseDecoder::push`]; chunk boundaries may fall
/// anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: String,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<PushMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(message) = self.process_line(&line) {
                messages.push(message);
            }
        }

        messages
    }

    fn process_line(&mut self, line: &str) -> Option<PushMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = value.to_string(),
            "data" => self.data.push(value.to_string()),
            // id and retry are not used
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<PushMessage> {
        if self.event.is_empty() && self.data.is_empty() {
            return None;
        }
        let event = match std::mem::take(&mut self.event) {
            name if name.is_empty() => "message".to_string(),
            name => name,
        };
        let data = std::mem::take(&mut self.data).join("\n");
        Some(PushMessage { event, data })
    }
}

/// Opens `GET {base}/rooms/{room}/events/{client}` as an event stream
pub struct SseEventSource {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl SseEventSource {
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        // No overall timeout: the stream stays open for the whole session.
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.versioned_url(),
            tokens,
        })
    }

    fn url(&self, room_id: &str, client_id: &str) -> String {
        format!("{}/rooms/{}/events/{}", self.base_url, room_id, client_id)
    }
}

#[async_trait]
impl PushSource for SseEventSource {
    async fn open(&self, room_id: &str, client_id: &str) -> Result<PushSubscription> {
        let url = self.url(room_id, client_id);
        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(token) = self.tokens.token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                code: status.as_u16(),
                message: format!("Failed to open event stream {}", url),
            });
        }
        debug!("Event stream open: {}", url);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        for message in decoder.push(&chunk) {
                            if tx.send(Ok(message)).is_err() {
                                debug!("Push receiver dropped, stopping event stream");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Event stream error: {}", e);
                        let _ = tx.send(Err(Error::Signaling(format!("Event stream error: {}", e))));
                        return;
                    }
                }
            }

            let _ = tx.send(Err(Error::Signaling("Event stream closed by server".to_string())));
        });

        Ok(PushSubscription::new(rx, Some(task)))
    }
}
