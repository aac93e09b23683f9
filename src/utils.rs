use crate::consts::SENTENCE_ENDINGS;

use futures_util::stream::{self, Stream, StreamExt};

/// True when the text, ignoring trailing whitespace, ends on sentence punctuation.
pub fn is_sentence_boundary(text: &str) -> bool {
    text.trim_end().ends_with(SENTENCE_ENDINGS)
}

/// Accumulates streamed text fragments and hands back whole sentences.
///
/// A sentence is released as soon as the accumulated text ends on a boundary, so a fragment
/// like `"one. two"` stays buffered until a later fragment closes it.
#[derive(Default, Debug)]
pub struct SentenceBuffer {
    buf: String,
}

impl SentenceBuffer {
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.buf.push_str(fragment);
        if is_sentence_boundary(&self.buf) {
            self.take()
        } else {
            None
        }
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        let sentence = self.buf.trim().to_string();
        self.buf.clear();
        if sentence.is_empty() {
            None
        } else {
            Some(sentence)
        }
    }
}

/// Regroup a stream of text fragments into whole sentences, flushing the trailing partial one
/// when the fragments run out.  An error is passed through and ends the sequence; whatever was
/// buffered at that point is dropped.
pub fn split_sentences<S, E>(fragments: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<String, E>>,
{
    stream::unfold(
        (Box::pin(fragments), SentenceBuffer::default(), false),
        |(mut fragments, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                match fragments.next().await {
                    Some(Ok(fragment)) => {
                        if let Some(sentence) = buffer.push(&fragment) {
                            return Some((Ok(sentence), (fragments, buffer, false)));
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), (fragments, buffer, true))),
                    None => {
                        return buffer
                            .finish()
                            .map(|sentence| (Ok(sentence), (fragments, buffer, true)))
                    }
                }
            }
        },
    )
}

/// Escape a value for use inside a double-quoted XML attribute.
pub fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// `+` followed by 2 to 15 digits, the first of which is not zero.
pub fn is_e164(number: &str) -> bool {
    match number.strip_prefix('+') {
        Some(digits) => {
            (2..=15).contains(&digits.len())
                && digits.chars().all(|c| c.is_ascii_digit())
                && !digits.starts_with('0')
        }
        None => false,
    }
}
