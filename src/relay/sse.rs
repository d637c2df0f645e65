/// Incremental `text/event-stream` decoder.
///
/// Bytes are fed in arbitrary chunks; complete lines are trimmed and the
/// payload of every `data:` line is handed back. UTF-8 sequences split
/// across chunks are held until their remaining bytes arrive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the `data:` payloads of the lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk);

        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload.to_string());
            }
        }
        payloads
    }

    /// Flushes a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line).map(str::to_string)
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.buffer.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                        Some(bad) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }
}

/// Payload of a `data:` line, trimmed. `None` for every other line.
pub fn data_payload(line: &str) -> Option<&str> {
    line.trim().strip_prefix("data:").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_only_data_lines() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b": keep-alive\nevent: message\ndata: {\"a\":1}\n\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn accepts_data_prefix_without_space() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.push(b"data:[DONE]\n"), vec!["[DONE]".to_string()]);
    }

    #[test]
    fn buffers_lines_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: hel").is_empty());
        assert_eq!(decoder.push(b"lo\r\ndata: x"), vec!["hello".to_string()]);
        assert_eq!(decoder.finish(), Some("x".to_string()));
    }

    #[test]
    fn holds_split_utf8_sequences() {
        let bytes = "data: héllo\n".as_bytes();
        // Split inside the two-byte 'é'.
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec!["héllo".to_string()]);
    }

    #[test]
    fn replaces_invalid_bytes() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b"data: a\xFFb\n");
        assert_eq!(out, vec!["a\u{FFFD}b".to_string()]);
    }
}
