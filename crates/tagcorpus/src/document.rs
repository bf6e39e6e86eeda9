use std::borrow::Cow;
use std::io::{self, BufRead};
use std::sync::Arc;

use tagcorpus_match::segment_document;
use tagcorpus_types::Document;
use thiserror::Error;

/// One unparsed document record and the input line it came from.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub line: usize,
    pub bytes: Vec<u8>,
}

/// Sequential source of document records. Only ever called from one thread.
pub trait DocumentSource {
    /// Next record, `Ok(None)` at end of input.
    fn read_document(&mut self) -> io::Result<Option<RawDocument>>;
}

/// Per-document failure; the document is skipped and the batch continues.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("line {line}: document is not valid utf-8")]
    InvalidUtf8 { line: usize },
    #[error("line {line}: missing document id")]
    MissingId { line: usize },
    #[error("line {line}: document {id} has no text fields")]
    NoText { line: usize, id: String },
    #[error("document {id}: matching failed: {reason}")]
    Matching { id: String, reason: String },
}

/// Reads `id<TAB>section<TAB>section...` records, one per line.
pub struct TsvDocumentReader<R> {
    reader: R,
    line: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> TsvDocumentReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> DocumentSource for TsvDocumentReader<R> {
    fn read_document(&mut self) -> io::Result<Option<RawDocument>> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
                self.buf.pop();
            }
            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(RawDocument {
                line: self.line,
                bytes: std::mem::take(&mut self.buf),
            }));
        }
    }
}

/// Decode and segment one record.
///
/// The first field is the document id; every further field is a section with
/// `\n`, `\t` and `\\` escapes decoded.
pub fn parse_record(raw: &RawDocument) -> Result<Document, DocumentError> {
    let line = raw.line;
    let text = std::str::from_utf8(&raw.bytes).map_err(|_| DocumentError::InvalidUtf8 { line })?;
    let mut fields = text.split('\t');
    let id = fields.next().map(str::trim).unwrap_or("");
    if id.is_empty() {
        return Err(DocumentError::MissingId { line });
    }
    let sections: Vec<Cow<'_, str>> = fields.map(unescape).collect();
    if sections.is_empty() {
        return Err(DocumentError::NoText {
            line,
            id: id.to_string(),
        });
    }
    Ok(segment_document(Arc::from(id), sections))
}

fn unescape(field: &str) -> Cow<'_, str> {
    if !field.contains('\\') {
        return Cow::Borrowed(field);
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}
