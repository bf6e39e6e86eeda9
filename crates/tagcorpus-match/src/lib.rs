//! Dictionary matching over segmented documents.
//!
//! The matcher scans each paragraph token by token and, at every position,
//! looks up the longest run of tokens whose normalized key is a dictionary
//! name. A hit consumes its whole span; scanning resumes right after it. The
//! crate only depends on the [`Lexicon`] trait, so any loader can feed it.
//!
//! # How it works
//! 1. Tokenize the paragraph into alphanumeric runs and note each token's
//!    sentence.
//! 2. At each token, try spans from `max_name_tokens` down to one token.
//! 3. Collapse the hit's entities onto their group representatives,
//!    deduplicate, and drop types outside the allow-list.
//! 4. With autodetect on, a token no name covers is offered to a
//!    [`CandidatePolicy`] and, if accepted and not a stopword, emitted with
//!    [`EntityType::CANDIDATE`] and no entity id.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use tagcorpus_dict::{DictionaryBuilder, LoadMode};
//! use tagcorpus_match::{MatchParams, Matcher, segment_document};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut builder = DictionaryBuilder::new(LoadMode::Mmap);
//! builder.load_names("entities.tsv", "names.tsv")?;
//! let dict = builder.build();
//! let matcher = Matcher::new(&dict, &MatchParams::default());
//! let doc = segment_document(Arc::from("PMID:1"), ["BRCA1 binds TP53."]);
//! for m in matcher.tag(&doc) {
//!     println!("{:?} {} {}..{}", m.entity, m.entity_type, m.start, m.end);
//! }
//! # Ok(()) }
//! ```

pub mod autodetect;
pub mod segment;

use std::collections::HashSet;

use tagcorpus_types::{Document, EntityId, EntityType, Lexicon, Match, Span, push_lowercase};

pub use autodetect::{CandidatePolicy, IdentifierShape};
pub use segment::{Token, segment_document, split_sentences, tokenize};

static DEFAULT_POLICY: IdentifierShape = IdentifierShape::DEFAULT;

/// Per-run matching options.
#[derive(Clone, Debug, Default)]
pub struct MatchParams {
    /// Only report these types; empty means every type.
    pub entity_types: Vec<EntityType>,
    /// Emit identifier-shaped tokens missing from the dictionary.
    pub autodetect: bool,
}

/// Stateless tagger over a borrowed lexicon; cheap to build per worker.
pub struct Matcher<'a, L: Lexicon + ?Sized> {
    lexicon: &'a L,
    allowed: HashSet<EntityType>,
    policy: Option<&'a dyn CandidatePolicy>,
}

impl<'a, L: Lexicon + ?Sized> Matcher<'a, L> {
    pub fn new(lexicon: &'a L, params: &MatchParams) -> Self {
        let policy: Option<&'a dyn CandidatePolicy> = if params.autodetect {
            Some(&DEFAULT_POLICY)
        } else {
            None
        };
        Self {
            lexicon,
            allowed: params.entity_types.iter().copied().collect(),
            policy,
        }
    }

    /// Replace the autodetect heuristic (and turn autodetect on).
    pub fn with_policy(mut self, policy: &'a dyn CandidatePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// All matches of `document`, in left-to-right text order.
    ///
    /// Names may run across a sentence break inside a paragraph (`St. John's
    /// wort`); such a match reports the sentence of its first token.
    pub fn tag(&self, document: &Document) -> Vec<Match> {
        let max_tokens = self.lexicon.max_name_tokens();
        let mut out = Vec::new();
        let mut key = String::new();
        let mut token_key = String::new();
        let mut key_ends: Vec<usize> = Vec::with_capacity(max_tokens);
        let mut resolved: Vec<(EntityId, EntityType)> = Vec::new();

        for paragraph in document.paragraphs() {
            let tokens = tokenize(paragraph.text, paragraph.span.start);
            let sentence_of =
                sentence_indices(&tokens, paragraph.sentences, paragraph.first_sentence);
            let mut i = 0;
            while i < tokens.len() {
                let longest = max_tokens.min(tokens.len() - i);
                key.clear();
                key_ends.clear();
                for token in &tokens[i..i + longest] {
                    if !key.is_empty() {
                        key.push(' ');
                    }
                    push_lowercase(&mut key, &document.text[token.start..token.end]);
                    key_ends.push(key.len());
                }

                let mut consumed = 0;
                for n in (1..=longest).rev() {
                    let ids = self.lexicon.candidates(&key[..key_ends[n - 1]]);
                    if ids.is_empty() {
                        continue;
                    }
                    consumed = n;
                    self.resolve(ids, &mut resolved);
                    let (start, end) = (tokens[i].start, tokens[i + n - 1].end);
                    for (entity, entity_type) in resolved.drain(..) {
                        out.push(Match {
                            document: document.id.clone(),
                            entity: Some(entity),
                            entity_type,
                            paragraph: paragraph.paragraph,
                            sentence: sentence_of[i],
                            start,
                            end,
                            text: document.text[start..end].to_string(),
                        });
                    }
                    break;
                }

                if consumed == 0 {
                    let token = tokens[i];
                    let surface = &document.text[token.start..token.end];
                    if let Some(policy) = self.policy
                        && self.allows(EntityType::CANDIDATE)
                        && policy.is_candidate(surface)
                    {
                        token_key.clear();
                        push_lowercase(&mut token_key, surface);
                        if !self.lexicon.is_stopword(&token_key) {
                            out.push(Match {
                                document: document.id.clone(),
                                entity: None,
                                entity_type: EntityType::CANDIDATE,
                                paragraph: paragraph.paragraph,
                                sentence: sentence_of[i],
                                start: token.start,
                                end: token.end,
                                text: surface.to_string(),
                            });
                        }
                    }
                    consumed = 1;
                }
                i += consumed;
            }
        }
        out
    }

    fn allows(&self, entity_type: EntityType) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&entity_type)
    }

    // Representatives sorted by id, one per group, filtered by type.
    fn resolve(&self, ids: &[EntityId], out: &mut Vec<(EntityId, EntityType)>) {
        out.clear();
        for id in ids {
            let representative = self.lexicon.representative(*id);
            let Some(entity_type) = self
                .lexicon
                .entity_type(representative)
                .or_else(|| self.lexicon.entity_type(*id))
            else {
                continue;
            };
            if self.allows(entity_type) {
                out.push((representative, entity_type));
            }
        }
        out.sort_by_key(|(id, _)| *id);
        out.dedup_by_key(|(id, _)| *id);
    }
}

// Document-wide sentence index of each token. Sentence spans are trimmed and
// only whitespace lies between them, so every token sits inside one.
fn sentence_indices(tokens: &[Token], sentences: &[Span], first: usize) -> Vec<usize> {
    let mut cursor = 0;
    tokens
        .iter()
        .map(|token| {
            while cursor + 1 < sentences.len() && token.start >= sentences[cursor].end {
                cursor += 1;
            }
            first + cursor
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeLexicon {
        names: HashMap<String, Vec<EntityId>>,
        types: HashMap<EntityId, EntityType>,
        groups: HashMap<EntityId, EntityId>,
        stopwords: HashSet<String>,
    }

    impl FakeLexicon {
        fn entity(mut self, id: u64, entity_type: i32, names: &[&str]) -> Self {
            self.types.insert(EntityId(id), EntityType(entity_type));
            for name in names {
                let key = tagcorpus_types::name_key(name).unwrap();
                self.names.entry(key).or_default().push(EntityId(id));
            }
            self
        }

        fn stopword(mut self, word: &str) -> Self {
            self.stopwords.insert(tagcorpus_types::name_key(word).unwrap());
            self
        }

        fn group(mut self, member: u64, representative: u64) -> Self {
            self.groups.insert(EntityId(member), EntityId(representative));
            self
        }
    }

    impl Lexicon for FakeLexicon {
        fn max_name_tokens(&self) -> usize {
            self.names
                .keys()
                .map(|k| tagcorpus_types::key_token_count(k))
                .max()
                .unwrap_or(0)
        }

        fn candidates(&self, key: &str) -> &[EntityId] {
            self.names.get(key).map(Vec::as_slice).unwrap_or(&[])
        }

        fn representative(&self, id: EntityId) -> EntityId {
            self.groups.get(&id).copied().unwrap_or(id)
        }

        fn entity_type(&self, id: EntityId) -> Option<EntityType> {
            self.types.get(&id).copied()
        }

        fn is_stopword(&self, key: &str) -> bool {
            self.stopwords.contains(key)
        }
    }

    fn doc(sections: &[&str]) -> Document {
        segment_document(Arc::from("doc"), sections.iter().copied())
    }

    fn hits(matches: &[Match]) -> Vec<(Option<u64>, &str)> {
        matches
            .iter()
            .map(|m| (m.entity.map(|e| e.0), m.text.as_str()))
            .collect()
    }

    #[test]
    fn prefers_longest_name_and_skips_claimed_span() {
        let lex = FakeLexicon::default()
            .entity(1, 5, &["breast cancer"])
            .entity(2, 5, &["breast"])
            .entity(3, 5, &["cancer"]);
        let matcher = Matcher::new(&lex, &MatchParams::default());
        let found = matcher.tag(&doc(&["Breast-Cancer and breast cancer cells; cancer."]));
        assert_eq!(
            hits(&found),
            vec![
                (Some(1), "Breast-Cancer"),
                (Some(1), "breast cancer"),
                (Some(3), "cancer")
            ]
        );
        assert_eq!((found[0].start, found[0].end), (0, 13));
    }

    #[test]
    fn emits_ambiguous_entities_once_per_group() {
        let lex = FakeLexicon::default()
            .entity(7, 1, &["cat"])
            .entity(4, 2, &["cat"])
            .entity(9, 2, &["cat"])
            .group(9, 4);
        let matcher = Matcher::new(&lex, &MatchParams::default());
        let found = matcher.tag(&doc(&["A cat."]));
        assert_eq!(hits(&found), vec![(Some(4), "cat"), (Some(7), "cat")]);
    }

    #[test]
    fn filters_by_type() {
        let lex = FakeLexicon::default()
            .entity(1, 9606, &["TP53"])
            .entity(2, -26, &["asthma"]);
        let params = MatchParams {
            entity_types: vec![EntityType(-26)],
            autodetect: false,
        };
        let found = Matcher::new(&lex, &params).tag(&doc(&["TP53 and asthma."]));
        assert_eq!(hits(&found), vec![(Some(2), "asthma")]);
        assert!(found.iter().all(|m| m.entity_type == EntityType(-26)));
    }

    #[test]
    fn names_run_across_abbreviation_breaks_but_not_paragraphs() {
        let lex = FakeLexicon::default()
            .entity(1, 5, &["St. John's wort"])
            .entity(2, 5, &["end start"]);
        let matcher = Matcher::new(&lex, &MatchParams::default());
        let found = matcher.tag(&doc(&["First. Then St. John's wort helped."]));
        assert_eq!(hits(&found), vec![(Some(1), "St. John's wort")]);
        assert_eq!((found[0].paragraph, found[0].sentence), (0, 1));
        assert!(matcher.tag(&doc(&["The end\nStart again."])).is_empty());
        assert!(matcher.tag(&doc(&["The end", "Start again."])).is_empty());
    }

    #[test]
    fn tokens_after_a_break_keep_their_own_sentence() {
        let lex = FakeLexicon::default().entity(1, 5, &["p53"]);
        let matcher = Matcher::new(&lex, &MatchParams::default());
        let found = matcher.tag(&doc(&["One p53. Two. Three p53!"]));
        let sentences: Vec<usize> = found.iter().map(|m| m.sentence).collect();
        assert_eq!(sentences, vec![0, 2]);
    }

    #[test]
    fn autodetect_skips_stopwords() {
        let lex = FakeLexicon::default().stopword("Cdk2");
        let params = MatchParams {
            entity_types: Vec::new(),
            autodetect: true,
        };
        let found = Matcher::new(&lex, &params).tag(&doc(&["Cdk2 binds mTOR."]));
        assert_eq!(hits(&found), vec![(None, "mTOR")]);
    }

    #[test]
    fn reports_sentence_and_paragraph_indices() {
        let lex = FakeLexicon::default().entity(1, 5, &["p53"]);
        let matcher = Matcher::new(&lex, &MatchParams::default());
        let found = matcher.tag(&doc(&["Title p53", "One. Two p53.\nThree p53."]));
        let positions: Vec<(usize, usize)> =
            found.iter().map(|m| (m.paragraph, m.sentence)).collect();
        assert_eq!(positions, vec![(0, 0), (1, 2), (2, 3)]);
    }

    #[test]
    fn autodetects_unknown_identifiers() {
        let lex = FakeLexicon::default().entity(1, 5, &["BRCA1"]);
        let params = MatchParams {
            entity_types: Vec::new(),
            autodetect: true,
        };
        let found = Matcher::new(&lex, &params).tag(&doc(&["BRCA1 and Cdk2 bind mTOR here."]));
        assert_eq!(
            hits(&found),
            vec![(Some(1), "BRCA1"), (None, "Cdk2"), (None, "mTOR")]
        );
        assert!(found[1..].iter().all(|m| m.entity_type.is_candidate()));
    }

    #[test]
    fn autodetect_respects_type_filter_and_custom_policy() {
        let lex = FakeLexicon::default();
        let filtered = MatchParams {
            entity_types: vec![EntityType(5)],
            autodetect: true,
        };
        assert!(Matcher::new(&lex, &filtered).tag(&doc(&["Cdk2."])).is_empty());

        let policy = |token: &str| token.starts_with("ENSG");
        let found = Matcher::new(&lex, &MatchParams::default())
            .with_policy(&policy)
            .tag(&doc(&["ENSG0001 and Cdk2."]));
        assert_eq!(hits(&found), vec![(None, "ENSG0001")]);
    }

    #[test]
    fn empty_lexicon_finds_nothing() {
        let lex = FakeLexicon::default();
        let matcher = Matcher::new(&lex, &MatchParams::default());
        assert!(matcher.tag(&doc(&["Nothing to see."])).is_empty());
    }
}
