//! Re-frames an upstream chat-completions event stream into the relay's
//! downstream events.

use crate::io_struct::{ChatCompletionChunk, ChatFrame, DONE_SENTINEL};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;

pub const GENERIC_ERROR_MESSAGE: &str =
    "Sorry, I encountered an error while processing your request. Please try again.";

const DATA_PREFIX: &[u8] = b"data:";

/// How a translation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// `[DONE]` was received.
    Sentinel,
    /// Upstream closed the body without a sentinel.
    EndOfStream,
    /// Upstream body failed mid-stream.
    Failed,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        !matches!(self, Completion::Failed)
    }
}

/// Incremental line decoder over upstream bytes.
#[derive(Debug, Default)]
pub struct StreamTranslator {
    pending: Vec<u8>,
    accumulated: String,
    completion: Option<Completion>,
}

impl StreamTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one upstream chunk, returning the frames it completes. Nothing is
    /// returned once the translation has finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ChatFrame> {
        let mut frames = Vec::new();
        if self.completion.is_some() {
            return frames;
        }
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = &self.pending[start..end];
            start = end + 1;

            if let Some(frame) = Self::decode_line(line, &mut self.accumulated) {
                let done = frame == ChatFrame::Done;
                frames.push(frame);
                if done {
                    self.completion = Some(Completion::Sentinel);
                    self.pending.clear();
                    return frames;
                }
            }
        }
        self.pending.drain(..start);
        frames
    }

    /// Upstream ended without a sentinel. A trailing partial line is discarded.
    pub fn finish(&mut self) -> Option<ChatFrame> {
        if self.completion.is_some() {
            return None;
        }
        if !self.pending.is_empty() {
            log::debug!(
                "Discarding {} bytes of incomplete upstream line",
                self.pending.len()
            );
            self.pending.clear();
        }
        self.completion = Some(Completion::EndOfStream);
        Some(ChatFrame::Done)
    }

    /// Upstream body failed. The client only ever sees the generic message.
    pub fn fail(&mut self) -> Option<ChatFrame> {
        if self.completion.is_some() {
            return None;
        }
        self.pending.clear();
        self.completion = Some(Completion::Failed);
        Some(ChatFrame::Error(GENERIC_ERROR_MESSAGE.to_string()))
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn completion(&self) -> Option<Completion> {
        self.completion
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_some()
    }

    fn decode_line(line: &[u8], accumulated: &mut String) -> Option<ChatFrame> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        let data = line.strip_prefix(DATA_PREFIX)?;
        let data = data.strip_prefix(b" ").unwrap_or(data);

        if data == DONE_SENTINEL.as_bytes() {
            return Some(ChatFrame::Done);
        }

        let chunk = match serde_json::from_slice::<ChatCompletionChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                log::debug!("Dropping malformed upstream fragment: {}", e);
                return None;
            }
        };
        let content = chunk.content()?;
        accumulated.push_str(content);
        Some(ChatFrame::Content(content.to_string()))
    }
}

/// Lazily translate an upstream byte stream. Upstream is only polled when the
/// consumer asks for the next frame. `on_complete` runs at most once, as soon
/// as the translation ends, with the accumulated text; it does not run if the
/// stream is dropped first.
pub fn translate<S, E, F>(upstream: S, on_complete: F) -> impl Stream<Item = ChatFrame>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
    F: FnOnce(Completion, String),
{
    struct State<S, F> {
        upstream: Option<S>,
        translator: StreamTranslator,
        queued: VecDeque<ChatFrame>,
        on_complete: Option<F>,
    }

    let state = State {
        upstream: Some(upstream),
        translator: StreamTranslator::new(),
        queued: VecDeque::new(),
        on_complete: Some(on_complete),
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.queued.pop_front() {
                return Some((frame, state));
            }
            if state.translator.is_finished() {
                return None;
            }
            let upstream = state.upstream.as_mut()?;
            match upstream.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.translator.push(&chunk);
                    state.queued.extend(frames);
                }
                Some(Err(e)) => {
                    log::error!("Upstream stream error: {}", e);
                    state.queued.extend(state.translator.fail());
                }
                None => {
                    log::info!("Upstream stream ended");
                    state.queued.extend(state.translator.finish());
                }
            }
            // Completion is reported before the terminal frame is yielded, so
            // it does not depend on the client reading to the end.
            if let Some(completion) = state.translator.completion() {
                state.upstream = None;
                if let Some(on_complete) = state.on_complete.take() {
                    let text = std::mem::take(&mut state.translator.accumulated);
                    on_complete(completion, text);
                }
            }
        }
    })
}
