//! Sentence assembly for streamed transcription text.
//!
//! Speech models deliver transcripts as small deltas that rarely line up with
//! sentence boundaries. [`TranscriptAccumulator`] buffers those deltas and only
//! hands back complete sentences, keeping the unfinished tail for the next
//! fragment. One accumulator is kept per direction (user and assistant).

use parking_lot::Mutex;

/// Characters that end a sentence.
const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Buffers transcript fragments and emits complete sentences.
///
/// The buffer only ever holds the incomplete trailing remainder of the text
/// seen so far.
#[derive(Debug, Default, Clone)]
pub struct TranscriptAccumulator {
    buffer: String,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return every sentence it completed, joined by a
    /// single space.
    pub fn feed(&mut self, fragment: &str) -> Option<String> {
        if fragment.is_empty() {
            return None;
        }

        self.buffer.push_str(fragment);
        self.buffer = normalize(&self.buffer);

        let split = complete_prefix_len(&self.buffer);
        if split == 0 {
            return None;
        }

        let complete = self.buffer[..split].trim().to_string();
        self.buffer = self.buffer[split..].trim_start().to_string();

        if complete.is_empty() {
            None
        } else {
            Some(complete)
        }
    }

    /// Emit whatever remains in the buffer, complete or not.
    ///
    /// The buffer is empty afterwards, so a second call returns `None`.
    pub fn flush(&mut self) -> Option<String> {
        let remainder = std::mem::take(&mut self.buffer);
        let remainder = remainder.trim();
        if remainder.is_empty() {
            None
        } else {
            Some(remainder.to_string())
        }
    }

    /// Drop buffered text without emitting it.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    /// The incomplete text currently held back.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

/// Thread-safe accumulator.
///
/// Each call holds the lock for the whole feed, so two fragments arriving
/// concurrently can never be interleaved into one emitted sentence.
#[derive(Debug, Default)]
pub struct SharedTranscriptAccumulator {
    inner: Mutex<TranscriptAccumulator>,
}

impl SharedTranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&self, fragment: &str) -> Option<String> {
        self.inner.lock().feed(fragment)
    }

    pub fn flush(&self) -> Option<String> {
        self.inner.lock().flush()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Collapse whitespace runs, strip leading whitespace and put a space between
/// a sentence terminator and a capital letter that directly follows it.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    let mut prev: Option<char> = None;

    for ch in text.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && prev != Some(' ') {
                out.push(' ');
                prev = Some(' ');
            }
            continue;
        }

        if ch.is_uppercase() && prev.is_some_and(|p| TERMINATORS.contains(&p)) {
            out.push(' ');
        }
        out.push(ch);
        prev = Some(ch);
    }

    out
}

/// Byte length of the prefix made of complete sentences.
///
/// A run of terminators closes a sentence when it is followed by whitespace or
/// by the end of the buffer. Terminators inside tokens such as `3.14` do not.
fn complete_prefix_len(text: &str) -> usize {
    let mut end = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if !TERMINATORS.contains(&ch) {
            continue;
        }

        let mut run_end = idx + ch.len_utf8();
        while let Some(&(next_idx, next)) = chars.peek() {
            if TERMINATORS.contains(&next) {
                run_end = next_idx + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        match chars.peek() {
            None => end = run_end,
            Some(&(_, next)) if next.is_whitespace() => end = run_end,
            _ => {}
        }
    }

    end
}
