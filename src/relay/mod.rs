//! Relays an upstream chat-completion event stream to the client.
//!
//! Two output shapes are supported. [`StreamMode::Raw`] forwards the upstream
//! bytes untouched; [`StreamMode::Delta`] re-encodes every non-empty
//! `choices[0].delta.content` as a `{"type":"text-delta","delta":..}` frame
//! and always terminates with `data: [DONE]`.

pub mod sse;

use bytes::Bytes;
use futures::StreamExt;
use log::{ debug, warn };
use serde::{ Deserialize, Serialize };
use tokio::sync::{ mpsc, oneshot };
use tokio_stream::wrappers::ReceiverStream;

use crate::error::RelayError;
use crate::llm::chat::ByteStream;
use self::sse::SseDecoder;

pub const DONE_MARKER: &str = "[DONE]";
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Raw,
    Delta,
}

/// Normalized event emitted to clients in delta mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayEvent {
    TextDelta {
        delta: String,
    },
}

impl RelayEvent {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

#[derive(Deserialize)]
struct UpstreamChunk {
    #[serde(default)]
    choices: Vec<UpstreamChoice>,
}

#[derive(Deserialize)]
struct UpstreamChoice {
    #[serde(default)]
    delta: Option<UpstreamDelta>,
}

#[derive(Deserialize)]
struct UpstreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Text carried by an upstream `chat.completion.chunk` payload, if any.
pub fn extract_delta(payload: &str) -> Result<Option<String>, serde_json::Error> {
    let chunk: UpstreamChunk = serde_json::from_str(payload)?;
    Ok(
        chunk.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
    )
}

/// Decodes one line of a relayed stream on the consuming side.
///
/// Understands both the normalized `text-delta` frames and native
/// `chat.completion.chunk` payloads, so a client works against either
/// stream mode.
pub fn parse_client_event(line: &str) -> Option<String> {
    let payload = line.trim().strip_prefix("data: ")?.trim();
    if payload == DONE_MARKER {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;

    let text = if value.get("type").and_then(|t| t.as_str()) == Some("text-delta") {
        value.get("delta").and_then(|d| d.as_str())
    } else if value.get("object").and_then(|o| o.as_str()) == Some("chat.completion.chunk") {
        value.pointer("/choices/0/delta/content").and_then(|c| c.as_str())
    } else {
        None
    };

    text.filter(|t| !t.is_empty()).map(str::to_string)
}

/// Synchronous core of the delta relay: bytes in, frames out.
#[derive(Debug, Default)]
pub struct DeltaReshaper {
    decoder: SseDecoder,
    transcript: String,
    done: bool,
}

impl DeltaReshaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let payloads = self.decoder.push(chunk);
        let mut frames = Vec::new();
        for payload in payloads {
            self.handle_payload(&payload, &mut frames);
        }
        frames
    }

    /// Upstream ended. Emits the terminal `[DONE]` if upstream never sent one.
    pub fn finish(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        if let Some(payload) = self.decoder.finish() {
            self.handle_payload(&payload, &mut frames);
        }
        if !self.done {
            self.done = true;
            frames.push(DONE_FRAME.to_string());
        }
        frames
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Concatenation of every delta seen so far.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn into_transcript(self) -> String {
        self.transcript
    }

    fn handle_payload(&mut self, payload: &str, frames: &mut Vec<String>) {
        if self.done {
            return;
        }
        if payload == DONE_MARKER {
            self.done = true;
            frames.push(DONE_FRAME.to_string());
            return;
        }

        match extract_delta(payload) {
            Ok(Some(delta)) => {
                let event = RelayEvent::TextDelta { delta: delta.clone() };
                match event.to_frame() {
                    Ok(frame) => {
                        self.transcript.push_str(&delta);
                        frames.push(frame);
                    }
                    Err(e) => warn!("Failed to encode delta frame: {}", e),
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Skipping malformed SSE payload ({}): {}", e, payload),
        }
    }
}

/// Output of [`spawn_relay`].
pub struct RelayHandle {
    /// Response body for the client.
    pub body: ReceiverStream<Result<Bytes, RelayError>>,
    /// Resolves with the assistant text once upstream completed. Dropped
    /// without a value when the relay stopped early.
    pub transcript: oneshot::Receiver<String>,
}

/// Pumps `upstream` through the relay on a dedicated task.
///
/// The task stops as soon as the client side of the channel is dropped, even
/// while waiting on a stalled upstream, which in turn drops (and cancels) the
/// upstream response.
pub fn spawn_relay(mode: StreamMode, mut upstream: ByteStream) -> RelayHandle {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (transcript_tx, transcript_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut reshaper = DeltaReshaper::new();

        loop {
            let chunk = tokio::select! {
                _ = tx.closed() => {
                    debug!("Client went away, stopping relay");
                    return;
                }
                chunk = upstream.next() => chunk,
            };
            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    warn!("Upstream stream failed: {}", e);
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                None => break,
            };

            let frames = reshaper.push(&bytes);
            let outgoing: Vec<Bytes> = match mode {
                StreamMode::Raw => vec![bytes],
                StreamMode::Delta => frames.into_iter().map(Bytes::from).collect(),
            };
            for out in outgoing {
                if tx.send(Ok(out)).await.is_err() {
                    debug!("Client went away, stopping relay");
                    return;
                }
            }

            if mode == StreamMode::Delta && reshaper.is_done() {
                break;
            }
        }

        let frames = reshaper.finish();
        if mode == StreamMode::Delta {
            for frame in frames {
                if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                    return;
                }
            }
        }

        let _ = transcript_tx.send(reshaper.into_transcript());
    });

    RelayHandle {
        body: ReceiverStream::new(rx),
        transcript: transcript_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{ AtomicBool, Ordering };
    use std::sync::Arc;
    use std::time::Duration;

    fn chunk(content: &str) -> String {
        format!(
            "data: {{\"object\":\"chat.completion.chunk\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":{}}}}}]}}\n\n",
            serde_json::to_string(content).unwrap()
        )
    }

    fn upstream(parts: Vec<String>) -> ByteStream {
        Box::pin(stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p)))))
    }

    async fn collect(handle: RelayHandle) -> (String, Option<String>) {
        let parts: Vec<Result<Bytes, RelayError>> = handle.body.collect().await;
        let mut body = String::new();
        for part in parts {
            body.push_str(std::str::from_utf8(&part.unwrap()).unwrap());
        }
        (body, handle.transcript.await.ok())
    }

    #[test]
    fn reshapes_deltas_in_order_then_done() {
        let mut reshaper = DeltaReshaper::new();
        let input = format!("{}{}{}data: [DONE]\n\n", chunk("Hel"), chunk("lo"), chunk("!"));
        let frames = reshaper.push(input.as_bytes());
        assert_eq!(
            frames,
            vec![
                "data: {\"type\":\"text-delta\",\"delta\":\"Hel\"}\n\n".to_string(),
                "data: {\"type\":\"text-delta\",\"delta\":\"lo\"}\n\n".to_string(),
                "data: {\"type\":\"text-delta\",\"delta\":\"!\"}\n\n".to_string(),
                DONE_FRAME.to_string(),
            ]
        );
        assert!(reshaper.is_done());
        assert!(reshaper.finish().is_empty());
        assert_eq!(reshaper.transcript(), "Hello!");
    }

    #[test]
    fn skips_empty_deltas_and_role_chunks() {
        let mut reshaper = DeltaReshaper::new();
        let role = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n";
        let frames = reshaper.push(format!("{}{}{}", role, chunk(""), chunk("x")).as_bytes());
        assert_eq!(frames.len(), 1);
        assert_eq!(reshaper.transcript(), "x");
    }

    #[test]
    fn malformed_json_is_dropped_without_aborting() {
        let mut reshaper = DeltaReshaper::new();
        let input = format!("{}data: {{not json\n\n{}", chunk("a"), chunk("b"));
        let frames = reshaper.push(input.as_bytes());
        assert_eq!(frames.len(), 2);
        assert_eq!(reshaper.transcript(), "ab");
    }

    #[test]
    fn payloads_after_done_are_ignored() {
        let mut reshaper = DeltaReshaper::new();
        let input = format!("data: [DONE]\n{}", chunk("late"));
        assert_eq!(reshaper.push(input.as_bytes()), vec![DONE_FRAME.to_string()]);
        assert_eq!(reshaper.transcript(), "");
    }

    #[test]
    fn finish_without_done_appends_marker() {
        let mut reshaper = DeltaReshaper::new();
        reshaper.push(chunk("only").as_bytes());
        assert_eq!(reshaper.finish(), vec![DONE_FRAME.to_string()]);
    }

    #[test]
    fn client_parser_accepts_both_shapes() {
        assert_eq!(
            parse_client_event("data: {\"type\":\"text-delta\",\"delta\":\"hi\"}"),
            Some("hi".to_string())
        );
        assert_eq!(parse_client_event(chunk("yo").trim()), Some("yo".to_string()));
        assert_eq!(parse_client_event("data: [DONE]"), None);
        assert_eq!(parse_client_event("data: {\"choices\":[]}"), None);
        assert_eq!(parse_client_event("event: ping"), None);
    }

    #[tokio::test]
    async fn delta_relay_is_independent_of_chunk_boundaries() {
        let full = format!("{}{}data: [DONE]\n\n", chunk("foo"), chunk("bar"));
        let pieces: Vec<String> = full.as_bytes()
            .chunks(7)
            .map(|c| String::from_utf8(c.to_vec()).unwrap())
            .collect();

        let (body, transcript) = collect(spawn_relay(StreamMode::Delta, upstream(pieces))).await;
        assert_eq!(
            body,
            "data: {\"type\":\"text-delta\",\"delta\":\"foo\"}\n\n\
             data: {\"type\":\"text-delta\",\"delta\":\"bar\"}\n\n\
             data: [DONE]\n\n"
        );
        assert_eq!(transcript.as_deref(), Some("foobar"));
    }

    #[tokio::test]
    async fn raw_relay_forwards_bytes_unchanged() {
        let parts = vec![chunk("a"), ": comment\n".to_string(), chunk("b"), "data: [DONE]\n\n".to_string()];
        let expected: String = parts.concat();

        let (body, transcript) = collect(spawn_relay(StreamMode::Raw, upstream(parts))).await;
        assert_eq!(body, expected);
        assert_eq!(transcript.as_deref(), Some("ab"));
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn stalled_upstream_is_dropped_when_client_leaves() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());
        let first = stream::once(async move { Ok(Bytes::from(chunk("hi"))) });
        // Never yields again; the flag lives as long as the upstream does.
        let stalled = stream::pending().map(move |item: Result<Bytes, RelayError>| {
            let _keep = &flag;
            item
        });
        let mut handle = spawn_relay(StreamMode::Delta, Box::pin(first.chain(stalled)));

        let frame = handle.body.next().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"data: {\"type\":\"text-delta\",\"delta\":\"hi\"}\n\n");
        assert!(!dropped.load(Ordering::SeqCst));

        drop(handle);
        for _ in 0..20 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn upstream_error_ends_stream_without_transcript() {
        let parts: Vec<Result<Bytes, RelayError>> = vec![
            Ok(Bytes::from(chunk("partial"))),
            Err(RelayError::Internal("connection reset".into())),
        ];
        let handle = spawn_relay(StreamMode::Delta, Box::pin(stream::iter(parts)));

        let items: Vec<Result<Bytes, RelayError>> = handle.body.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        assert!(handle.transcript.await.is_err());
    }
}
