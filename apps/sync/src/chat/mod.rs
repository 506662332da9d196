//! Streaming assistant responses.
//!
//! Flow: POST /insight and read the chunked body record by record → on any
//! transport failure, POST /insight/sync once and replay the full answer
//! word by word. Both paths push onto the same channel, and every chunk
//! carries the full text so far, so a fallback that restarts mid-answer
//! simply overwrites what the consumer is showing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api_client::{endpoints, ApiClient, ApiError};
use crate::errors::SyncError;

pub mod sse;

use sse::{SseParser, SseRecord};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct InsightRequest<'a> {
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct InsightResponse {
    response: String,
}

/// How the chunked endpoint's payloads relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    /// Each payload is the next piece; append it.
    Incremental,
    /// Each payload is the whole answer so far; replace.
    Cumulative,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Full text received so far.
    Chunk(String),
    Done,
    /// Both transports failed.
    Error(String),
}

/// Cancels a stream from anywhere. Cloneable.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Consumer side of one response stream.
pub struct ResponseStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancelHandle,
    task: JoinHandle<()>,
}

impl ResponseStream {
    /// Next event, or `None` once the stream finished or was cancelled.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.cancel.is_cancelled() {
            self.close();
            return None;
        }
        let event = self.rx.recv().await?;
        if self.cancel.is_cancelled() {
            self.close();
            return None;
        }
        Some(event)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Stops delivery immediately; the producer sees the closed channel
    /// before its next emission and exits.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.close();
    }

    fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    /// Callback-style consumption. Returns once the stream ends.
    pub async fn for_each<C, D, E>(mut self, mut on_chunk: C, on_done: D, on_error: E)
    where
        C: FnMut(&str),
        D: FnOnce(),
        E: FnOnce(&str),
    {
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Chunk(text) => on_chunk(&text),
                StreamEvent::Done => {
                    on_done();
                    return;
                }
                StreamEvent::Error(message) => {
                    on_error(&message);
                    return;
                }
            }
        }
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Producer side: emits only while the consumer is still listening.
struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancelHandle,
}

impl Emitter {
    fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }

    async fn emit(&self, event: StreamEvent) -> bool {
        if !self.is_open() {
            return false;
        }
        self.tx.send(event).await.is_ok()
    }
}

#[derive(Clone)]
pub struct StreamingResponseClient {
    client: ApiClient,
    word_delay: Duration,
    payload_mode: PayloadMode,
}

impl StreamingResponseClient {
    pub fn new(client: ApiClient, word_delay: Duration) -> Self {
        Self {
            client,
            word_delay,
            payload_mode: PayloadMode::Incremental,
        }
    }

    pub fn with_payload_mode(mut self, mode: PayloadMode) -> Self {
        self.payload_mode = mode;
        self
    }

    /// Starts streaming the assistant's answer to `conversation`.
    ///
    /// One stream per conversation: callers cancel the previous stream
    /// before starting another.
    pub fn stream(&self, conversation: Vec<ChatMessage>) -> ResponseStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancelHandle::default();
        let emitter = Emitter {
            tx,
            cancel: cancel.clone(),
        };
        let this = self.clone();
        let task = tokio::spawn(async move {
            this.produce(&conversation, &emitter).await;
        });
        ResponseStream { rx, cancel, task }
    }

    async fn produce(&self, conversation: &[ChatMessage], emitter: &Emitter) {
        let primary_err = match self.stream_chunked(conversation, emitter).await {
            Ok(()) => return,
            Err(e) => e,
        };
        if !emitter.is_open() {
            return;
        }
        warn!("Chunked stream failed, falling back to single response: {primary_err}");

        let request = InsightRequest {
            messages: conversation,
        };
        match self
            .client
            .post_json::<_, InsightResponse>(endpoints::INSIGHT_SYNC, &request)
            .await
        {
            Ok(response) => self.simulate(&response.response, emitter).await,
            Err(e) => {
                warn!("Fallback response failed: {e}");
                let err = SyncError::Stream(format!(
                    "chunked request failed ({primary_err}); fallback failed ({e})"
                ));
                emitter.emit(StreamEvent::Error(err.to_string())).await;
            }
        }
    }

    /// Primary path. `Ok` covers both normal completion and cancellation.
    async fn stream_chunked(
        &self,
        conversation: &[ChatMessage],
        emitter: &Emitter,
    ) -> Result<(), ApiError> {
        let request = InsightRequest {
            messages: conversation,
        };
        let mut response = self
            .client
            .post_streaming(endpoints::INSIGHT_STREAM, &request)
            .await?;

        let mut parser = SseParser::new();
        let mut text = String::new();
        while let Some(chunk) = response.chunk().await? {
            for record in parser.push(&chunk) {
                if !self.deliver(record, &mut text, emitter).await {
                    return Ok(());
                }
            }
        }
        if let Some(record) = parser.finish() {
            if !self.deliver(record, &mut text, emitter).await {
                return Ok(());
            }
        }
        // Body ended without the sentinel; what arrived is the answer.
        debug!("Chunked stream closed without sentinel");
        emitter.emit(StreamEvent::Done).await;
        Ok(())
    }

    /// Returns false when the stream is over (sentinel seen or consumer gone).
    async fn deliver(&self, record: SseRecord, text: &mut String, emitter: &Emitter) -> bool {
        match record {
            SseRecord::Done => {
                emitter.emit(StreamEvent::Done).await;
                false
            }
            SseRecord::Data(payload) => {
                match self.payload_mode {
                    PayloadMode::Incremental => text.push_str(&payload),
                    PayloadMode::Cumulative => *text = payload,
                }
                emitter.emit(StreamEvent::Chunk(text.clone())).await
            }
        }
    }

    /// Fallback path: progressively longer word prefixes, then Done.
    async fn simulate(&self, full_text: &str, emitter: &Emitter) {
        let words: Vec<&str> = full_text.split_whitespace().collect();
        for i in 1..=words.len() {
            if !emitter.emit(StreamEvent::Chunk(words[..i].join(" "))).await {
                return;
            }
            if i < words.len() {
                tokio::time::sleep(self.word_delay).await;
            }
        }
        emitter.emit(StreamEvent::Done).await;
    }
}
