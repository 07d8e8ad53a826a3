//! SSE (Server-Sent Events) frame decoder for OpenAI-compatible providers.
//!
//! Handles the `data: ` prefix, `[DONE]` termination, line buffering across
//! TCP chunk boundaries, and empty keep-alive lines. Each decoded value is
//! one provider frame, ready for normalization into canonical events.

use serde_json::Value;

/// What one SSE line means for the decoder.
enum SseLine<'a> {
    /// A `data:` line carrying a JSON payload.
    Frame(&'a str),
    /// The `data: [DONE]` terminator.
    Done,
    /// Keep-alive blanks and non-`data:` fields (`event:`, `id:`, `retry:`).
    Other,
}

fn classify_line(line: &str) -> SseLine<'_> {
    let line = line.trim();
    match line.strip_prefix("data:") {
        Some(payload) => {
            let payload = payload.trim();
            if payload == "[DONE]" {
                SseLine::Done
            } else {
                SseLine::Frame(payload)
            }
        }
        None => SseLine::Other,
    }
}

/// Buffered SSE decoder.
///
/// Feed raw network chunks in, get complete `data:` JSON frames out. Frames
/// split across chunk boundaries are held until the closing newline arrives.
///
/// # Example
///
/// ```
/// use l0::source::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// let data = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\ndata: [DONE]\n\n";
/// let frames = decoder.decode(data);
/// assert_eq!(frames.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed raw bytes and return any complete JSON frames.
    ///
    /// `event:` lines and empty keep-alive lines are ignored; the `[DONE]`
    /// terminator is swallowed. Everything after the last newline stays
    /// buffered for the next chunk.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let tail = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, tail);

        Self::frames_in(&complete)
    }

    /// Flush any trailing buffered line after the stream ends.
    pub fn flush(&mut self) -> Vec<Value> {
        let tail = std::mem::take(&mut self.buffer);
        Self::frames_in(&tail)
    }

    fn frames_in(text: &str) -> Vec<Value> {
        text.lines()
            .filter_map(|line| match classify_line(line) {
                SseLine::Frame(payload) => serde_json::from_str(payload).ok(),
                SseLine::Done | SseLine::Other => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_decode() {
        let mut decoder = SseDecoder::new();
        let chunk = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n";
        let frames = decoder.decode(chunk);
        assert_eq!(frames.len(), 1);
        assert!(frames[0]["choices"][0]["delta"]["content"].as_str().is_some());
    }

    #[test]
    fn test_done_terminator_swallowed() {
        let mut decoder = SseDecoder::new();
        let chunk = b"data: {\"x\":1}\n\ndata: [DONE]\n\n";
        assert_eq!(decoder.decode(chunk).len(), 1);
    }

    #[test]
    fn test_keep_alive_and_event_lines_ignored() {
        let mut decoder = SseDecoder::new();
        let chunk = b"\n\nevent: message\ndata: {\"x\":1}\n\n\n";
        let frames = decoder.decode(chunk);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["x"], 1);
    }

    #[test]
    fn test_unspaced_data_prefix_accepted() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.decode(b"data:{\"x\":2}\ndata:[DONE]\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["x"], 2);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"data: {\"cho").is_empty());
        let frames = decoder.decode(b"ices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_multiple_frames_one_chunk() {
        let mut decoder = SseDecoder::new();
        let chunk = b"data: {\"a\":1}\n\ndata: {\"a\":2}\n\ndata: {\"a\":3}\n\ndata: [DONE]\n\n";
        let frames = decoder.decode(chunk);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2]["a"], 3);
    }

    #[test]
    fn test_complete_lines_drain_while_partial_stays() {
        let mut decoder = SseDecoder::new();
        // One finished frame plus the start of the next in a single chunk.
        let frames = decoder.decode(b"data: {\"a\":1}\ndata: {\"a\":");
        assert_eq!(frames.len(), 1);
        let frames = decoder.decode(b"2}\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["a"], 2);
    }

    #[test]
    fn test_flush_handles_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"data: {\"last\":true}").is_empty());
        let frames = decoder.flush();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["last"], true);
        // Flushing again yields nothing.
        assert!(decoder.flush().is_empty());
    }
}
