//! Incremental sentence splitting of a streamed reply.
//!
//! Tokens are appended to a rolling buffer. After each token the buffer is scanned for a
//! sentence-terminal mark; the text up to and including the run of terminal marks is cut
//! off, trimmed and returned. Whatever follows stays buffered for the next token.

/// Marks that end a spoken sentence.
pub const TERMINAL_MARKS: [char; 8] = ['。', '?', '？', '!', '！', ';', '；', '…'];

fn is_terminal(c: char) -> bool {
    TERMINAL_MARKS.contains(&c)
}

#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a token and return every sentence it completed, in order.
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);

        let mut sentences = Vec::new();
        while let Some(end) = self.sentence_end() {
            let rest = self.buffer.split_off(end);
            let candidate = std::mem::replace(&mut self.buffer, rest.trim_start().to_string());
            if let Some(sentence) = clean(&candidate) {
                sentences.push(sentence);
            }
        }
        sentences
    }

    /// End of stream: the non-empty remainder becomes the last sentence.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        clean(&rest)
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Byte offset just past the first run of terminal marks, if any.
    fn sentence_end(&self) -> Option<usize> {
        let (start, _) = self.buffer.char_indices().find(|(_, c)| is_terminal(*c))?;
        let end = self.buffer[start..]
            .char_indices()
            .find(|(_, c)| !is_terminal(*c))
            .map(|(offset, _)| start + offset)
            .unwrap_or(self.buffer.len());
        Some(end)
    }
}

/// Trim and reject segments with nothing speakable in them (e.g. a lone "！" that
/// arrived in its own token).
fn clean(segment: &str) -> Option<String> {
    let trimmed = segment.trim();
    if trimmed.chars().any(|c| !is_terminal(c) && !c.is_whitespace()) {
        Some(trimmed.to_string())
    } else {
        None
    }
}
