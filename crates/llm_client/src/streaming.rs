//! Common streaming infrastructure for chat backends
//!
//! This module provides the shared read loop driving every backend: a
//! chunk source abstraction over real HTTP responses and scripted
//! playback, a frame decoder trait mapping provider frames to uniform
//! events, and the emitter that enforces the delta callback contract.

use crate::framing::{FrameAssembler, Framing};
use crate::types::TokenEstimator;
use crate::{StreamDelta, StreamingCallback};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Response;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Trait for streaming chunk sources (real HTTP response or scripted
/// playback), so both paths share identical processing logic.
#[async_trait]
pub trait ChunkStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Real HTTP response chunk stream
pub struct HttpChunkStream {
    response: Response,
}

impl HttpChunkStream {
    pub fn new(response: Response) -> Self {
        Self { response }
    }
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.response.chunk().await {
            Ok(Some(chunk)) => Ok(Some(chunk.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("HTTP chunk error: {}", e)),
        }
    }
}

/// Fixed chunk script replayed with an artificial delay; performs no I/O
pub struct ScriptedChunkStream {
    chunks: Vec<Vec<u8>>,
    current_index: usize,
    delay: Duration,
}

impl ScriptedChunkStream {
    pub fn new(chunks: Vec<Vec<u8>>, delay: Duration) -> Self {
        Self {
            chunks,
            current_index: 0,
            delay,
        }
    }
}

#[async_trait]
impl ChunkStream for ScriptedChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.current_index >= self.chunks.len() {
            return Ok(None);
        }
        tokio::time::sleep(self.delay).await;
        let chunk = self.chunks[self.current_index].clone();
        self.current_index += 1;
        Ok(Some(chunk))
    }
}

/// Uniform event decoded from one provider frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// Cumulative content snapshot, never a diff. Decoders for backends
    /// that stream diffs accumulate them before emitting.
    Delta(String),
    /// Terminal signal from the provider
    Done,
}

/// Maps raw frames to events. A decoder is created fresh per request and
/// owns whatever accumulation state its wire format needs. Frames that
/// carry no renderable payload, or fail to parse, decode to no events.
pub trait FrameDecoder: Send {
    fn framing(&self) -> Framing;
    fn decode(&mut self, frame: &str) -> Vec<FrameEvent>;
}

/// Wraps the caller's callback and enforces the emission contract:
/// ordered deltas while streaming, then exactly one `is_complete` delta
/// no matter how the stream ends (sentinel, close, cancel, or error).
pub struct DeltaEmitter<'a> {
    callback: &'a StreamingCallback,
    estimator: &'a dyn TokenEstimator,
    started: Instant,
    final_sent: bool,
}

impl<'a> DeltaEmitter<'a> {
    pub fn new(callback: &'a StreamingCallback, estimator: &'a dyn TokenEstimator) -> Self {
        Self {
            callback,
            estimator,
            started: Instant::now(),
            final_sent: false,
        }
    }

    pub fn delta(&mut self, content: &str) -> Result<()> {
        if self.final_sent {
            return Ok(());
        }
        (self.callback)(&self.snapshot(content, false))
    }

    /// At-most-once: later calls are no-ops
    pub fn finish(&mut self, content: &str) -> Result<()> {
        if self.final_sent {
            return Ok(());
        }
        self.final_sent = true;
        (self.callback)(&self.snapshot(content, true))
    }

    fn snapshot(&self, content: &str, is_complete: bool) -> StreamDelta {
        StreamDelta {
            content: content.to_string(),
            is_complete,
            response_time_ms: Some(self.started.elapsed().as_millis() as u64),
            token_count: Some(self.estimator.estimate(content)),
        }
    }
}

/// Read loop shared by all backends. Suspends only on the next chunk;
/// frame assembly and decoding are synchronous. Dropping the stream on
/// cancellation or deadline closes the underlying connection. Returns
/// the final accumulated content; cancellation is a normal terminal
/// state, not an error.
pub async fn drive_stream<S, D>(
    mut stream: S,
    decoder: &mut D,
    emitter: &mut DeltaEmitter<'_>,
    cancel: &CancellationToken,
    deadline: Option<Duration>,
) -> Result<String>
where
    S: ChunkStream,
    D: FrameDecoder + ?Sized,
{
    let mut assembler = FrameAssembler::new(decoder.framing());
    let mut content = String::new();
    let deadline_at = deadline.map(|d| tokio::time::Instant::now() + d);

    'read: loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Request cancelled, closing transport");
                break 'read;
            }
            _ = sleep_until_deadline(deadline_at) => {
                debug!("Request deadline reached, closing transport");
                break 'read;
            }
            chunk = stream.next_chunk() => match chunk {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break 'read,
                Err(e) => {
                    emitter.finish(&content)?;
                    return Err(e);
                }
            },
        };

        for frame in assembler.feed(&chunk) {
            for event in decoder.decode(&frame) {
                match event {
                    FrameEvent::Delta(snapshot) => {
                        content = snapshot;
                        emitter.delta(&content)?;
                    }
                    FrameEvent::Done => {
                        emitter.finish(&content)?;
                        break 'read;
                    }
                }
            }
        }
    }

    emitter.finish(&content)?;
    Ok(content)
}

async fn sleep_until_deadline(at: Option<tokio::time::Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
