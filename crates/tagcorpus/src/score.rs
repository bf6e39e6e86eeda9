//! Level-weighted co-occurrence counting and score normalization.
//!
//! For every document, each unordered pair of distinct entities gets exactly
//! one increment, weighted by the tightest scope they share: same sentence,
//! else same paragraph, else just the same document. Once the corpus is done
//! the raw sum is squashed into `[0, 1)` with `raw / (raw + factor)`.

use std::collections::{BTreeMap, HashMap};

use tagcorpus_types::{EntityId, EntityType, Level, Match};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreWeights {
    pub document: f64,
    pub paragraph: f64,
    pub sentence: f64,
    pub normalization_factor: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            document: 1.0,
            paragraph: 2.0,
            sentence: 0.2,
            normalization_factor: 0.6,
        }
    }
}

impl ScoreWeights {
    pub fn weight(&self, level: Level) -> f64 {
        match level {
            Level::Sentence => self.sentence,
            Level::Paragraph => self.paragraph,
            Level::Document => self.document,
        }
    }

    /// Map a raw weighted count into `[0, 1)`, monotonic in `raw`.
    pub fn normalize(&self, raw: f64) -> f64 {
        let denominator = raw + self.normalization_factor;
        if denominator <= 0.0 {
            return 0.0;
        }
        raw / denominator
    }
}

/// Final score of one unordered pair; `a < b`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredPair {
    pub a: EntityId,
    pub b: EntityId,
    pub raw: f64,
    pub score: f64,
}

#[derive(Debug)]
struct Occurrences {
    entity_type: EntityType,
    sentences: Vec<usize>,
    paragraphs: Vec<usize>,
}

/// Corpus-wide pair accumulator. Owned by one handler; never shared.
#[derive(Debug)]
pub struct PairScorer {
    weights: ScoreWeights,
    pairs: HashMap<(EntityId, EntityId), f64>,
}

impl PairScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self {
            weights,
            pairs: HashMap::new(),
        }
    }

    /// Count one document. `allow` sees the two entity types of each pair and
    /// can veto it before anything is accumulated.
    pub fn add_document<F>(&mut self, matches: &[Match], mut allow: F)
    where
        F: FnMut(EntityType, EntityType) -> bool,
    {
        let mut seen: BTreeMap<EntityId, Occurrences> = BTreeMap::new();
        for m in matches {
            let Some(entity) = m.entity else {
                continue;
            };
            let occurrences = seen.entry(entity).or_insert_with(|| Occurrences {
                entity_type: m.entity_type,
                sentences: Vec::new(),
                paragraphs: Vec::new(),
            });
            push_sorted(&mut occurrences.sentences, m.sentence);
            push_sorted(&mut occurrences.paragraphs, m.paragraph);
        }

        let entities: Vec<(&EntityId, &Occurrences)> = seen.iter().collect();
        for (i, (a, occ_a)) in entities.iter().enumerate() {
            for (b, occ_b) in &entities[i + 1..] {
                if !allow(occ_a.entity_type, occ_b.entity_type) {
                    continue;
                }
                let level = colocation_level(occ_a, occ_b);
                *self.pairs.entry((**a, **b)).or_insert(0.0) += self.weights.weight(level);
            }
        }
    }

    /// Raw weighted count of the unordered pair, if it ever co-occurred.
    pub fn raw(&self, a: EntityId, b: EntityId) -> Option<f64> {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.pairs.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Every accumulated pair with its normalized score, sorted by ids.
    pub fn scores(&self) -> Vec<ScoredPair> {
        let mut out: Vec<ScoredPair> = self
            .pairs
            .iter()
            .map(|(&(a, b), &raw)| ScoredPair {
                a,
                b,
                raw,
                score: self.weights.normalize(raw),
            })
            .collect();
        out.sort_by_key(|p| (p.a, p.b));
        out
    }
}

fn colocation_level(a: &Occurrences, b: &Occurrences) -> Level {
    if intersects(&a.sentences, &b.sentences) {
        Level::Sentence
    } else if intersects(&a.paragraphs, &b.paragraphs) {
        Level::Paragraph
    } else {
        Level::Document
    }
}

// Matches arrive in text order, so indices only ever grow.
fn push_sorted(indices: &mut Vec<usize>, idx: usize) {
    match indices.last() {
        Some(&last) if last == idx => {}
        Some(&last) if last > idx => {
            if let Err(pos) = indices.binary_search(&idx) {
                indices.insert(pos, idx);
            }
        }
        _ => indices.push(idx),
    }
}

fn intersects(a: &[usize], b: &[usize]) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => return true,
        }
    }
    false
}
