//! Incremental Server-Sent Events parsing for streamed completions.
//!
//! Only `data:` fields matter to the chat-completions stream; `event:`/`id:` fields and
//! comment lines are skipped. Bytes are buffered until a full line is available, so a
//! multi-byte character split across two network chunks is decoded intact.

/// Accumulates raw bytes and yields the `data` payload of each completed event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect the payloads of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// End of body: emit an event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
            self.process_line(&line);
        }
        self.take_event()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(data)
    }
}

pub fn is_done(data: &str) -> bool {
    data.trim() == "[DONE]"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_split_on_blank_line() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: one\n\n: keep-alive\n\ndata: two\r\n\r\n");
        assert_eq!(events, vec!["one", "two"]);
    }

    #[test]
    fn test_multibyte_character_across_chunks() {
        let bytes = "data: 你好\n\n".as_bytes();
        // Split inside the three-byte encoding of 你
        let (head, tail) = bytes.split_at(7);

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec!["你好"]);
    }

    #[test]
    fn test_multi_line_data_and_trailing_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: delta\ndata: a\ndata: b").is_empty());
        assert_eq!(decoder.finish(), Some("a\nb".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_done_sentinel() {
        assert!(is_done("[DONE]"));
        assert!(is_done(" [DONE] "));
        assert!(!is_done("{\"done\": true}"));
    }
}
