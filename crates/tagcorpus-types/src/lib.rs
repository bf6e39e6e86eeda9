//! Shared types for dictionary tagging and co-occurrence scoring.
//!
//! Identifiers keep their raw numeric representation (`EntityId`,
//! `EntityType`) so they print exactly as they appear in the dictionary files.
//! Documents carry their decoded text plus the section/paragraph/sentence
//! segmentation as byte spans into that text; [`Match`] records point back
//! into the same text.
//!
//! The [`Lexicon`] trait is the read-only view a matcher needs from a loaded
//! dictionary. Keeping it here lets the matching crate stay ignorant of any
//! concrete loader.
//!
//! ```rust
//! use tagcorpus_types::{EntityId, EntityType, name_key};
//!
//! assert_eq!(name_key("IL-6 receptor"), Some("il 6 receptor".to_string()));
//! assert_eq!(name_key(" -- "), None);
//! assert!(EntityType(9606) != EntityType::CANDIDATE);
//! let id = EntityId(42);
//! assert_eq!(id.to_string(), "42");
//! ```

use std::fmt;
use std::sync::Arc;

/// Numeric identifier of one dictionary concept.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Integer classification code (gene, disease, ...), as found in the entities file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EntityType(pub i32);

impl EntityType {
    /// Reserved type carried by autodetected candidates. Dictionaries may not declare it.
    pub const CANDIDATE: EntityType = EntityType(0);

    pub fn is_candidate(self) -> bool {
        self == Self::CANDIDATE
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tightest text scope two entities share within one document.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Level {
    Sentence,
    Paragraph,
    Document,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Sentence => "sentence",
            Level::Paragraph => "paragraph",
            Level::Document => "document",
        })
    }
}

/// Half-open byte range into a document's text.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "span start after end");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A paragraph and the sentence spans found inside it.
#[derive(Clone, Debug)]
pub struct Paragraph {
    pub span: Span,
    pub sentences: Vec<Span>,
}

/// One tab-separated field of a document record.
#[derive(Clone, Debug)]
pub struct Section {
    pub span: Span,
    pub paragraphs: Vec<Paragraph>,
}

/// A segmented document. All spans index into `text`.
#[derive(Clone, Debug)]
pub struct Document {
    pub id: Arc<str>,
    pub text: String,
    pub sections: Vec<Section>,
}

/// A sentence visited by [`Document::sentences`], with document-wide indices.
#[derive(Clone, Copy, Debug)]
pub struct SentenceRef<'a> {
    pub paragraph: usize,
    pub sentence: usize,
    pub span: Span,
    pub text: &'a str,
}

/// A paragraph visited by [`Document::paragraphs`]. `first_sentence` is the
/// document-wide index of its first sentence.
#[derive(Clone, Copy, Debug)]
pub struct ParagraphRef<'a> {
    pub paragraph: usize,
    pub first_sentence: usize,
    pub span: Span,
    pub sentences: &'a [Span],
    pub text: &'a str,
}

impl Document {
    /// Iterate paragraphs in text order with document-wide indices.
    pub fn paragraphs(&self) -> impl Iterator<Item = ParagraphRef<'_>> + '_ {
        let mut first_sentence = 0;
        self.sections
            .iter()
            .flat_map(|section| section.paragraphs.iter())
            .enumerate()
            .map(move |(paragraph, p)| {
                let item = ParagraphRef {
                    paragraph,
                    first_sentence,
                    span: p.span,
                    sentences: &p.sentences,
                    text: &self.text[p.span.start..p.span.end],
                };
                first_sentence += p.sentences.len();
                item
            })
    }

    /// Iterate sentences in text order; paragraph and sentence indices count
    /// across the whole document, not per section.
    pub fn sentences(&self) -> impl Iterator<Item = SentenceRef<'_>> + '_ {
        self.sections
            .iter()
            .flat_map(|section| section.paragraphs.iter())
            .enumerate()
            .flat_map(|(paragraph, p)| p.sentences.iter().map(move |span| (paragraph, *span)))
            .enumerate()
            .map(|(sentence, (paragraph, span))| SentenceRef {
                paragraph,
                sentence,
                span,
                text: &self.text[span.start..span.end],
            })
    }

    pub fn paragraph_count(&self) -> usize {
        self.sections.iter().map(|s| s.paragraphs.len()).sum()
    }

    pub fn sentence_count(&self) -> usize {
        self.sections
            .iter()
            .flat_map(|s| s.paragraphs.iter())
            .map(|p| p.sentences.len())
            .sum()
    }
}

/// One recognized occurrence of an entity.
///
/// `entity` is the group representative, or `None` for autodetected
/// candidates (which always carry [`EntityType::CANDIDATE`]).
#[derive(Clone, Debug, PartialEq)]
pub struct Match {
    pub document: Arc<str>,
    pub entity: Option<EntityId>,
    pub entity_type: EntityType,
    pub paragraph: usize,
    pub sentence: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Read-only dictionary view used by the matching engine.
///
/// Implementations must be immutable once built so they can be shared across
/// worker threads without locking.
pub trait Lexicon: Sync {
    /// Longest name in the dictionary, counted in key tokens.
    fn max_name_tokens(&self) -> usize;

    /// Entities for a normalized name key (see [`name_key`]); empty when the
    /// key is unknown or a stopword.
    fn candidates(&self, key: &str) -> &[EntityId];

    /// Group representative; an ungrouped entity is its own representative.
    fn representative(&self, id: EntityId) -> EntityId;

    fn entity_type(&self, id: EntityId) -> Option<EntityType>;

    /// Whether a normalized key is excluded from every kind of match.
    fn is_stopword(&self, key: &str) -> bool;
}

/// Normalize a name or text span into its lookup key.
///
/// Splits on every non-alphanumeric character, lowercases the tokens and joins
/// them with single spaces. Returns `None` when nothing alphanumeric remains.
pub fn name_key(text: &str) -> Option<String> {
    let mut key = String::with_capacity(text.len());
    for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        if !key.is_empty() {
            key.push(' ');
        }
        push_lowercase(&mut key, token);
    }
    if key.is_empty() { None } else { Some(key) }
}

/// Number of tokens in a key produced by [`name_key`].
pub fn key_token_count(key: &str) -> usize {
    key.split(' ').count()
}

/// Append `token` lowercased to `buf`.
pub fn push_lowercase(buf: &mut String, token: &str) {
    for c in token.chars() {
        buf.extend(c.to_lowercase());
    }
}
