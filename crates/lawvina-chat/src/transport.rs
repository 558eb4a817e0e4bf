use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::ChatError;

/// A body that yields raw byte chunks until end of stream (`Ok(None)`).
#[async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ChatError>;
}

/// In-memory chunk source, mostly useful for replaying captured streams.
#[derive(Debug, Clone, Default)]
pub struct ChunkList {
    chunks: VecDeque<Vec<u8>>,
}

impl ChunkList {
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ChunkSource for ChunkList {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ChatError> {
        Ok(self.chunks.pop_front())
    }
}

/// Splits bytes into newline-terminated records, holding the unterminated tail
/// until a later chunk completes it.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every record completed by `chunk`. Blank lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // Only the new bytes can hold a newline; the pending tail has none.
        let scanned = self.pending.len();
        self.pending.extend_from_slice(chunk);
        let Some(offset) = chunk.iter().rposition(|byte| *byte == b'\n') else {
            return Vec::new();
        };
        let last_newline = scanned + offset;

        let remainder = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, remainder);
        complete
            .split(|byte| *byte == b'\n')
            .map(String::from_utf8_lossy)
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Ends the stream. An unterminated tail is never emitted; the number of
    /// non-blank bytes dropped is returned.
    pub fn finish(&mut self) -> usize {
        let tail = std::mem::take(&mut self.pending);
        if tail.iter().all(u8::is_ascii_whitespace) {
            0
        } else {
            tail.len()
        }
    }
}

pub struct RecordStream<S> {
    source: S,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    finished: bool,
}

impl<S: ChunkSource> RecordStream<S> {
    pub fn open(body: Option<S>) -> Result<Self, ChatError> {
        let source = body.ok_or_else(|| ChatError::transport("response has no body"))?;
        Ok(Self {
            source,
            buffer: LineBuffer::new(),
            ready: VecDeque::new(),
            finished: false,
        })
    }

    pub async fn next_record(&mut self) -> Result<Option<String>, ChatError> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Ok(Some(record));
            }
            if self.finished {
                return Ok(None);
            }

            match self.source.next_chunk().await {
                Ok(Some(chunk)) => {
                    let records = self.buffer.push(&chunk);
                    tracing::trace!(
                        chunk_len = chunk.len(),
                        records = records.len(),
                        pending = self.buffer.pending_len(),
                        "chat chunk received"
                    );
                    self.ready.extend(records);
                }
                Ok(None) => {
                    self.finished = true;
                    let dropped = self.buffer.finish();
                    if dropped > 0 {
                        tracing::warn!(
                            dropped_bytes = dropped,
                            "chat stream ended with an unterminated record; dropping it"
                        );
                    }
                }
                Err(error) => {
                    self.finished = true;
                    return Err(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_carries_partial_record_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(br#"{"type":"con"#).is_empty());
        assert_eq!(
            buffer.push(b"tent\",\"delta\":\"A\"}\n{\"type\""),
            vec![r#"{"type":"content","delta":"A"}"#.to_string()]
        );
        assert_eq!(buffer.pending_len(), 7);
    }

    #[test]
    fn long_record_fed_byte_by_byte_is_emitted_once() {
        let delta = "Điều khoản ".repeat(2_000);
        let record = format!("{{\"type\":\"content\",\"delta\":\"{delta}\"}}\n{{\"a\":");
        let mut buffer = LineBuffer::new();
        let mut records = Vec::new();
        for byte in record.as_bytes() {
            records.extend(buffer.push(std::slice::from_ref(byte)));
        }
        assert_eq!(
            records,
            vec![format!("{{\"type\":\"content\",\"delta\":\"{delta}\"}}")]
        );
        assert_eq!(buffer.pending_len(), 5);
    }

    #[test]
    fn line_buffer_skips_blank_and_whitespace_lines() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"").is_empty());
        assert_eq!(
            buffer.push(b"\n   \n{\"a\":1}\r\n\t\n"),
            vec!["{\"a\":1}".to_string()]
        );
    }

    #[test]
    fn line_buffer_reassembles_utf8_split_inside_a_character() {
        let record = "{\"delta\":\"Điều 5\"}\n".as_bytes();
        let split_at = record
            .iter()
            .position(|byte| *byte >= 0x80)
            .expect("multi-byte character")
            + 1;
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&record[..split_at]).is_empty());
        assert_eq!(
            buffer.push(&record[split_at..]),
            vec!["{\"delta\":\"Điều 5\"}".to_string()]
        );
    }

    #[test]
    fn finish_reports_only_non_blank_tails() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"{}\n  ");
        assert_eq!(buffer.finish(), 0);
        buffer.push(b"{\"type\":");
        assert_eq!(buffer.finish(), 8);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[tokio::test]
    async fn open_without_body_is_a_transport_error() {
        let error = match RecordStream::<ChunkList>::open(None) {
            Ok(_) => panic!("missing body must fail"),
            Err(error) => error,
        };
        assert_eq!(error.code, crate::error::ChatErrorCode::Transport);
    }
}
