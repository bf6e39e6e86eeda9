//! Section, paragraph, sentence and token segmentation.

use std::sync::Arc;

use tagcorpus_types::{Document, Paragraph, Section, Span};

const SENTENCE_END: [char; 3] = ['.', '!', '?'];
const CLOSERS: [char; 7] = ['"', '\'', ')', ']', '}', '\u{201d}', '\u{2019}'];

/// Alphanumeric run inside a document's text.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Token {
    pub start: usize,
    pub end: usize,
}

/// Build a [`Document`] from its decoded sections.
///
/// The document text is the sections joined by `\n`. Inside a section every
/// `\n` starts a new paragraph; blank paragraphs are dropped.
pub fn segment_document<S: AsRef<str>>(
    id: Arc<str>,
    sections: impl IntoIterator<Item = S>,
) -> Document {
    let mut text = String::new();
    let mut bounds = Vec::new();
    for (idx, section) in sections.into_iter().enumerate() {
        if idx > 0 {
            text.push('\n');
        }
        let start = text.len();
        text.push_str(section.as_ref());
        bounds.push(Span::new(start, text.len()));
    }

    let sections = bounds
        .into_iter()
        .map(|span| Section {
            span,
            paragraphs: split_paragraphs(&text[span.start..span.end], span.start),
        })
        .collect();

    Document { id, text, sections }
}

fn split_paragraphs(section: &str, base: usize) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();
    let mut offset = 0usize;
    for line in section.split('\n') {
        let line_base = base + offset;
        offset += line.len() + 1;
        let Some(span) = trimmed_span(line, line_base) else {
            continue;
        };
        let inner = &line[span.start - line_base..span.end - line_base];
        let sentences = split_sentences(inner, span.start);
        if !sentences.is_empty() {
            paragraphs.push(Paragraph { span, sentences });
        }
    }
    paragraphs
}

/// Split one paragraph into sentence spans (absolute offsets from `base`).
///
/// A sentence ends at `.`, `!` or `?` plus any closing quotes or brackets,
/// when whitespace follows and the next visible character is not lowercase.
pub fn split_sentences(text: &str, base: usize) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = 0usize;
    for (idx, ch) in text.char_indices() {
        if idx < start || !SENTENCE_END.contains(&ch) {
            continue;
        }
        let mut end = idx + ch.len_utf8();
        end += text[end..]
            .chars()
            .take_while(|c| CLOSERS.contains(c))
            .map(char::len_utf8)
            .sum::<usize>();
        let after = &text[end..];
        let rest = after.trim_start();
        if rest.len() == after.len() && !rest.is_empty() {
            continue;
        }
        if rest.chars().next().is_some_and(char::is_lowercase) {
            continue;
        }
        if let Some(span) = trimmed_span(&text[start..end], base + start) {
            spans.push(span);
        }
        start = end + (after.len() - rest.len());
    }
    if start < text.len()
        && let Some(span) = trimmed_span(&text[start..], base + start)
    {
        spans.push(span);
    }
    spans
}

/// Alphanumeric runs of `text`, offset by `base`.
pub fn tokenize(text: &str, base: usize) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        match (ch.is_alphanumeric(), current) {
            (true, None) => current = Some(idx),
            (false, Some(start)) => {
                tokens.push(Token {
                    start: base + start,
                    end: base + idx,
                });
                current = None;
            }
            _ => {}
        }
    }
    if let Some(start) = current {
        tokens.push(Token {
            start: base + start,
            end: base + text.len(),
        });
    }
    tokens
}

fn trimmed_span(text: &str, base: usize) -> Option<Span> {
    let lead = text.len() - text.trim_start().len();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(Span::new(base + lead, base + lead + trimmed.len()))
}
