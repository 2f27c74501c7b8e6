//! Streaming sentence segmentation
//!
//! Turns arbitrarily-chunked text (e.g. an LLM token stream) into complete
//! sentences as soon as their terminating boundary arrives, stripping
//! lightweight markdown decoration along the way. Feed the output to a
//! [`SpeechService`](crate::speech::SpeechService) to speak responses at
//! sentence granularity.

use std::pin::Pin;
use std::sync::OnceLock;
use std::task::{Context, Poll};

use futures::Stream;
use regex::Regex;

/// Markdown decoration stripped before boundary detection: emphasis,
/// headers, code fences, strikethrough
fn markdown_decoration() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[*_#`~]+").expect("valid regex"))
}

/// Sentence-terminating punctuation (when followed by whitespace)
const TERMINATORS: [char; 5] = ['.', '!', '?', ':', ';'];

/// Incremental sentence splitter
///
/// Chunk boundaries may fall anywhere — mid-word, mid-punctuation, or in
/// the middle of a markdown token. Emitted sentences are identical no
/// matter how the input was chunked.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text, returning any sentences completed by it
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let cleaned = markdown_decoration().replace_all(chunk, "");
        self.buffer.push_str(&cleaned);
        self.drain_complete()
    }

    /// Close the stream, emitting any buffered remainder as a final sentence
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.buffer.trim();
        let out = if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        };
        self.buffer.clear();
        out
    }

    /// True if text is buffered awaiting a boundary
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buffer.trim().is_empty()
    }

    // Re-scans from the head of the buffer after every emission so no
    // stale match position survives a drain.
    fn drain_complete(&mut self) -> Vec<String> {
        let mut out = Vec::new();

        while let Some((end, skip)) = find_boundary(&self.buffer) {
            let sentence = self.buffer[..end].trim().to_string();
            self.buffer.drain(..end + skip);
            if !sentence.is_empty() {
                out.push(sentence);
            }
        }

        out
    }
}

/// Find the earliest sentence boundary in `s`
///
/// Returns `(end, skip)` where `..end` is the sentence content (including
/// terminating punctuation) and `skip` bytes of boundary characters follow
/// it. Terminating punctuation only counts when the following character is
/// already present and is whitespace; a trailing terminator waits for more
/// input.
fn find_boundary(s: &str) -> Option<(usize, usize)> {
    let mut iter = s.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if c == '\n' || c == '\r' {
            let mut end_of_run = i + c.len_utf8();
            while let Some(&(j, next)) = iter.peek() {
                if next == '\n' || next == '\r' {
                    iter.next();
                    end_of_run = j + next.len_utf8();
                } else {
                    break;
                }
            }
            return Some((i, end_of_run - i));
        }

        if TERMINATORS.contains(&c)
            && let Some(&(_, next)) = iter.peek()
            && next.is_whitespace()
        {
            return Some((i + c.len_utf8(), 0));
        }
    }

    None
}

/// Adapts a stream of text chunks into a stream of sentences
///
/// Each sentence is yielded as soon as its boundary is seen; when the
/// inner stream ends, the buffered remainder (if any) is yielded last.
pub struct SentenceStream<S> {
    inner: S,
    segmenter: SentenceSegmenter,
    ready: std::collections::VecDeque<String>,
    done: bool,
}

impl<S> SentenceStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            segmenter: SentenceSegmenter::new(),
            ready: std::collections::VecDeque::new(),
            done: false,
        }
    }
}

impl<S> Stream for SentenceStream<S>
where
    S: Stream<Item = String> + Unpin,
{
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(sentence) = this.ready.pop_front() {
                return Poll::Ready(Some(sentence));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(chunk)) => {
                    this.ready.extend(this.segmenter.push(&chunk));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if let Some(rest) = this.segmenter.finish() {
                        this.ready.push_back(rest);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&str]) -> Vec<String> {
        let mut seg = SentenceSegmenter::new();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(seg.push(chunk));
        }
        out.extend(seg.finish());
        out
    }

    #[test]
    fn splits_on_punctuation_followed_by_whitespace() {
        let out = run(&["Hello world. How are you? Fine!"]);
        assert_eq!(out, vec!["Hello world.", "How are you?", "Fine!"]);
    }

    #[test]
    fn decimal_points_do_not_split() {
        let out = run(&["Pi is 3.14 roughly. Yes."]);
        assert_eq!(out, vec!["Pi is 3.14 roughly.", "Yes."]);
    }

    #[test]
    fn newlines_are_boundaries() {
        let out = run(&["First line\nSecond line\n\nThird"]);
        assert_eq!(out, vec!["First line", "Second line", "Third"]);
    }

    #[test]
    fn strips_markdown_decoration() {
        let out = run(&["### Heading\n**Bold text** here. ~~gone~~ done."]);
        assert_eq!(out, vec!["Heading", "Bold text here.", "gone done."]);
    }

    #[test]
    fn trailing_terminator_waits_for_flush() {
        let mut seg = SentenceSegmenter::new();
        assert!(seg.push("Fine!").is_empty());
        assert_eq!(seg.finish(), Some("Fine!".to_string()));
    }
}
