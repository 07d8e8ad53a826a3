//! NDJSON frame decoder for Ollama-style providers.
//!
//! Ollama streams one JSON object per line, and TCP chunk boundaries
//! routinely split objects mid-line. The decoder buffers raw bytes, carves
//! off the complete lines, and yields each one as a provider frame.

use serde_json::Value;

/// Buffered decoder for newline-delimited JSON streams.
///
/// # Example
///
/// ```
/// use l0::source::NdjsonDecoder;
///
/// let mut decoder = NdjsonDecoder::new();
///
/// // First chunk: partial frame, nothing to yield yet.
/// assert!(decoder.decode(b"{\"response\":").is_empty());
///
/// // Second chunk completes the line.
/// let frames = decoder.decode(b"\"hello\"}\n");
/// assert_eq!(frames[0]["response"], "hello");
/// ```
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: String,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed a raw chunk and return any complete frames.
    ///
    /// The buffer is split at its last newline: everything before it is a
    /// run of finished lines, everything after stays buffered for the next
    /// chunk. Lines that do not parse as JSON are skipped.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let tail = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, tail);

        complete
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Flush trailing buffer content after the stream ends.
    ///
    /// Handles the final frame when the provider omits the closing newline.
    /// Unparseable trailing data is dropped.
    pub fn flush(&mut self) -> Option<Value> {
        let remaining = self.buffer.trim().to_string();
        self.buffer.clear();
        if remaining.is_empty() {
            return None;
        }
        serde_json::from_str::<Value>(&remaining).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_lines() {
        let mut decoder = NdjsonDecoder::new();
        let frames = decoder.decode(b"{\"response\":\"hello\"}\n{\"response\":\"world\"}\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["response"], "hello");
        assert_eq!(frames[1]["response"], "world");
    }

    #[test]
    fn test_frame_split_mid_value() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.decode(b"{\"response\":\"hel").is_empty());
        assert!(decoder.decode(b"lo wor").is_empty());
        let frames = decoder.decode(b"ld\"}\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["response"], "hello world");
    }

    #[test]
    fn test_chunk_with_line_end_and_new_start() {
        let mut decoder = NdjsonDecoder::new();
        let first = decoder.decode(b"{\"a\":1}\n{\"b\":");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0]["a"], 1);

        let second = decoder.decode(b"2}\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0]["b"], 2);
    }

    #[test]
    fn test_empty_chunks_and_blank_lines() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.decode(b"").is_empty());
        assert!(decoder.decode(b"\n\n").is_empty());
    }

    #[test]
    fn test_partial_tail_survives_across_decodes() {
        let mut decoder = NdjsonDecoder::new();
        // Two finished frames and a partial third in one chunk.
        let frames = decoder.decode(b"{\"n\":1}\n{\"n\":2}\n{\"n\":");
        assert_eq!(frames.len(), 2);
        let frames = decoder.decode(b"3}\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["n"], 3);
    }

    #[test]
    fn test_flush_final_unterminated_frame() {
        let mut decoder = NdjsonDecoder::new();
        decoder.decode(b"{\"done\":true}");
        let frame = decoder.flush().expect("trailing frame");
        assert_eq!(frame["done"], json!(true));
        assert!(decoder.flush().is_none());
    }

    #[test]
    fn test_garbage_lines_skipped() {
        let mut decoder = NdjsonDecoder::new();
        let frames = decoder.decode(b"not json\n{\"ok\":true}\ngarbage\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["ok"], json!(true));
    }

    #[test]
    fn test_flush_drops_garbage() {
        let mut decoder = NdjsonDecoder::new();
        decoder.decode(b"trailing garbage");
        assert!(decoder.flush().is_none());
    }
}
