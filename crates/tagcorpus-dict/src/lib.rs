//! Load tagging dictionaries: entities, names, groups and stopwords.
//!
//! Loading goes through a [`DictionaryBuilder`], which mirrors the phases of a
//! tagging run: `load_names` first, then optional `load_groups` and
//! `load_global`. [`DictionaryBuilder::build`] freezes everything into an
//! immutable [`Dictionary`] that implements [`Lexicon`] and can be shared by
//! any number of matcher threads.
//!
//! Every file is tab-separated with one record per line; blank lines and lines
//! starting with `#` are skipped. Malformed records fail the whole load with
//! the offending file and line in the error.
//!
//! # Features
//! - Runtime backing choice: memory-map each file or read it into an owned
//!   buffer via [`LoadMode`]. Buffers are dropped once parsed.
//! - Group collapsing: entities sharing a group key (transitively) resolve to
//!   the lowest member id.
//! - Stopwords are removed from the matchable set when the dictionary is
//!   built, regardless of the order the files were loaded in.
//! - Side filters used by a run: the entity-type allow-list
//!   ([`load_type_filter`]) and the scoring [`TypePairFilter`].
//!
//! # Example
//! ```no_run
//! use tagcorpus_dict::{DictionaryBuilder, LoadMode};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut builder = DictionaryBuilder::new(LoadMode::Mmap);
//! builder.load_names("entities.tsv", "names.tsv")?;
//! builder.load_groups("groups.tsv")?;
//! builder.load_global("stopwords.tsv")?;
//! let dict = builder.build();
//! for id in dict.candidates_for("BRCA-1") {
//!     println!("{id} has type {:?}", dict.type_of(*id));
//! }
//! # Ok(()) }
//! ```
//!
//! For a runnable demo, see `cargo run -p tagcorpus-dict --example stats -- <entities> <names>`.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::Mmap;
use tagcorpus_types::{EntityId, EntityType, Lexicon, key_token_count, name_key};
use tracing::{info, warn};

/// Strategy for loading dictionary files.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LoadMode {
    /// Memory-map each file (fast for large name lists).
    #[default]
    Mmap,
    /// Read each file into an owned buffer (portable fallback, works on pipes).
    Owned,
}

enum Buffer {
    Mmap(Mmap),
    Owned(Vec<u8>),
}

impl Buffer {
    fn as_slice(&self) -> &[u8] {
        match self {
            Buffer::Mmap(m) => m.as_ref(),
            Buffer::Owned(v) => v.as_slice(),
        }
    }
}

/// Collects dictionary files before they are frozen into a [`Dictionary`].
#[derive(Debug)]
pub struct DictionaryBuilder {
    mode: LoadMode,
    types: HashMap<EntityId, EntityType>,
    names: HashMap<String, Vec<EntityId>>,
    group_parent: HashMap<EntityId, EntityId>,
    group_keys: HashMap<String, EntityId>,
    stopwords: HashSet<String>,
}

/// Immutable name index built by [`DictionaryBuilder::build`].
#[derive(Debug)]
pub struct Dictionary {
    types: HashMap<EntityId, EntityType>,
    names: HashMap<String, Vec<EntityId>>,
    representatives: HashMap<EntityId, EntityId>,
    stopwords: HashSet<String>,
    max_name_tokens: usize,
    group_count: usize,
}

impl DictionaryBuilder {
    pub fn new(mode: LoadMode) -> Self {
        Self {
            mode,
            types: HashMap::new(),
            names: HashMap::new(),
            group_parent: HashMap::new(),
            group_keys: HashMap::new(),
            stopwords: HashSet::new(),
        }
    }

    /// Load entity types and their alias names.
    ///
    /// Every id referenced by the names file must be declared in the entities
    /// file (or by an earlier call).
    pub fn load_names(&mut self, entities: impl AsRef<Path>, names: impl AsRef<Path>) -> Result<()> {
        let entities = entities.as_ref();
        let names = names.as_ref();
        let buffer = load_file(entities, self.mode)?;
        let declared = self.parse_entities(buffer.as_slice(), &entities.display().to_string())?;
        let buffer = load_file(names, self.mode)?;
        let added = self.parse_names(buffer.as_slice(), &names.display().to_string())?;
        info!("loaded {declared} entities and {added} names");
        Ok(())
    }

    /// Assign entities to groups; each group collapses onto its lowest id.
    pub fn load_groups(&mut self, groups: impl AsRef<Path>) -> Result<()> {
        let groups = groups.as_ref();
        let buffer = load_file(groups, self.mode)?;
        let members = self.parse_groups(buffer.as_slice(), &groups.display().to_string())?;
        info!("loaded {members} group memberships");
        Ok(())
    }

    /// Add names that must never be reported as matches.
    pub fn load_global(&mut self, stopwords: impl AsRef<Path>) -> Result<()> {
        let stopwords = stopwords.as_ref();
        let buffer = load_file(stopwords, self.mode)?;
        let added = self.parse_stopwords(buffer.as_slice());
        info!("loaded {added} stopwords");
        Ok(())
    }

    /// Number of entities declared so far.
    pub fn entity_count(&self) -> usize {
        self.types.len()
    }

    /// Freeze the loaded data. Stopword keys are dropped from the name index.
    pub fn build(mut self) -> Dictionary {
        let mut removed = 0usize;
        for stopword in &self.stopwords {
            if self.names.remove(stopword).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("removed {removed} names listed as stopwords");
        }

        let max_name_tokens = self
            .names
            .keys()
            .map(|k| key_token_count(k))
            .max()
            .unwrap_or(0);

        let members: Vec<EntityId> = self.group_parent.keys().copied().collect();
        let mut representatives = HashMap::new();
        let mut roots = HashSet::new();
        for id in members {
            let root = find_root(&mut self.group_parent, id);
            roots.insert(root);
            if root != id {
                representatives.insert(id, root);
            }
        }

        Dictionary {
            types: self.types,
            names: self.names,
            representatives,
            stopwords: self.stopwords,
            max_name_tokens,
            group_count: roots.len(),
        }
    }

    fn parse_entities(&mut self, bytes: &[u8], label: &str) -> Result<usize> {
        let mut declared = 0usize;
        for_each_record(bytes, label, |lineno, fields| {
            if fields.len() < 2 {
                anyhow::bail!("{label}:{lineno} expected entity id and type");
            }
            let id = parse_entity_id(fields[0], label, lineno)?;
            let entity_type = parse_type(fields[1], label, lineno)?;
            if entity_type.is_candidate() {
                anyhow::bail!(
                    "{label}:{lineno} type {entity_type} is reserved for autodetected candidates"
                );
            }
            match self.types.insert(id, entity_type) {
                Some(previous) if previous != entity_type => anyhow::bail!(
                    "{label}:{lineno} entity {id} redeclared with type {entity_type} (was {previous})"
                ),
                Some(_) => {}
                None => declared += 1,
            }
            Ok(())
        })?;
        Ok(declared)
    }

    fn parse_names(&mut self, bytes: &[u8], label: &str) -> Result<usize> {
        let mut added = 0usize;
        for_each_record(bytes, label, |lineno, fields| {
            if fields.len() < 2 {
                anyhow::bail!("{label}:{lineno} expected entity id and name");
            }
            let id = parse_entity_id(fields[0], label, lineno)?;
            if !self.types.contains_key(&id) {
                anyhow::bail!("{label}:{lineno} name refers to undefined entity {id}");
            }
            let Some(key) = name_key(fields[1]) else {
                warn!("{label}:{lineno} skipping name without alphanumeric characters");
                return Ok(());
            };
            let ids = self.names.entry(key).or_default();
            if !ids.contains(&id) {
                ids.push(id);
                added += 1;
            }
            Ok(())
        })?;
        Ok(added)
    }

    fn parse_groups(&mut self, bytes: &[u8], label: &str) -> Result<usize> {
        let mut members = 0usize;
        for_each_record(bytes, label, |lineno, fields| {
            if fields.len() < 2 {
                anyhow::bail!("{label}:{lineno} expected entity id and group");
            }
            let id = parse_entity_id(fields[0], label, lineno)?;
            if !self.types.contains_key(&id) {
                anyhow::bail!("{label}:{lineno} group member {id} is not a defined entity");
            }
            let group = fields[1].trim();
            if group.is_empty() {
                anyhow::bail!("{label}:{lineno} empty group identifier");
            }
            match self.group_keys.get(group) {
                Some(&first) => union(&mut self.group_parent, first, id),
                None => {
                    self.group_keys.insert(group.to_string(), id);
                    self.group_parent.entry(id).or_insert(id);
                }
            }
            members += 1;
            Ok(())
        })?;
        Ok(members)
    }

    fn parse_stopwords(&mut self, bytes: &[u8]) -> usize {
        let mut added = 0usize;
        for raw_line in bytes.split(|b| *b == b'\n') {
            let line = strip_cr(raw_line);
            let Ok(line) = std::str::from_utf8(line) else {
                continue;
            };
            let word = line.split('\t').next().unwrap_or("");
            if let Some(key) = name_key(word)
                && self.stopwords.insert(key)
            {
                added += 1;
            }
        }
        added
    }
}

impl Dictionary {
    /// Primary type of an entity, if it was declared.
    pub fn type_of(&self, id: EntityId) -> Option<EntityType> {
        self.types.get(&id).copied()
    }

    /// Entities a raw text span may refer to, before group collapsing.
    pub fn candidates_for(&self, text: &str) -> &[EntityId] {
        match name_key(text) {
            Some(key) => self.candidates(&key),
            None => &[],
        }
    }

    /// Group representative of `id` (itself when ungrouped).
    pub fn representative_of(&self, id: EntityId) -> EntityId {
        self.representatives.get(&id).copied().unwrap_or(id)
    }

    pub fn is_stopword(&self, text: &str) -> bool {
        name_key(text).is_some_and(|key| self.stopwords.contains(&key))
    }

    /// Number of declared entities.
    pub fn entity_count(&self) -> usize {
        self.types.len()
    }

    /// Number of distinct matchable name keys.
    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// Number of groups after merging.
    pub fn group_count(&self) -> usize {
        self.group_count
    }

    pub fn stopword_count(&self) -> usize {
        self.stopwords.len()
    }
}

impl Lexicon for Dictionary {
    fn max_name_tokens(&self) -> usize {
        self.max_name_tokens
    }

    fn candidates(&self, key: &str) -> &[EntityId] {
        self.names.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn representative(&self, id: EntityId) -> EntityId {
        self.representative_of(id)
    }

    fn entity_type(&self, id: EntityId) -> Option<EntityType> {
        self.type_of(id)
    }

    fn is_stopword(&self, key: &str) -> bool {
        self.stopwords.contains(key)
    }
}

/// Unordered set of entity-type pairs allowed for selective scoring.
#[derive(Clone, Debug, Default)]
pub struct TypePairFilter {
    pairs: HashSet<(EntityType, EntityType)>,
}

impl TypePairFilter {
    /// Load a type-pairs file: two type codes per line.
    pub fn load(path: impl AsRef<Path>, mode: LoadMode) -> Result<Self> {
        let path = path.as_ref();
        let label = path.display().to_string();
        let buffer = load_file(path, mode)?;
        let mut filter = Self::default();
        for_each_record(buffer.as_slice(), &label, |lineno, fields| {
            if fields.len() < 2 {
                anyhow::bail!("{label}:{lineno} expected two type codes");
            }
            let a = parse_type(fields[0], &label, lineno)?;
            let b = parse_type(fields[1], &label, lineno)?;
            filter.insert(a, b);
            Ok(())
        })?;
        info!("loaded {} allowed type pairs", filter.len());
        Ok(filter)
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (EntityType, EntityType)>) -> Self {
        let mut filter = Self::default();
        for (a, b) in pairs {
            filter.insert(a, b);
        }
        filter
    }

    pub fn insert(&mut self, a: EntityType, b: EntityType) {
        self.pairs.insert(ordered(a, b));
    }

    /// Whether the unordered pair `{a, b}` is allowed.
    pub fn contains(&self, a: EntityType, b: EntityType) -> bool {
        self.pairs.contains(&ordered(a, b))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Load the entity-type allow-list: the leading field of each line is a type code.
pub fn load_type_filter(path: impl AsRef<Path>, mode: LoadMode) -> Result<Vec<EntityType>> {
    let path = path.as_ref();
    let label = path.display().to_string();
    let buffer = load_file(path, mode)?;
    let mut types = Vec::new();
    for_each_record(buffer.as_slice(), &label, |lineno, fields| {
        let entity_type = parse_type(fields[0], &label, lineno)?;
        if !types.contains(&entity_type) {
            types.push(entity_type);
        }
        Ok(())
    })?;
    info!("tagging restricted to {} entity types", types.len());
    Ok(types)
}

fn ordered(a: EntityType, b: EntityType) -> (EntityType, EntityType) {
    if a <= b { (a, b) } else { (b, a) }
}

fn load_file(path: &Path, mode: LoadMode) -> Result<Buffer> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    match mode {
        LoadMode::Mmap => {
            // Empty files cannot be mapped on every platform.
            let len = file
                .metadata()
                .with_context(|| format!("stat {}", path.display()))?
                .len();
            if len == 0 {
                return Ok(Buffer::Owned(Vec::new()));
            }
            unsafe { Mmap::map(&file) }
                .map(Buffer::Mmap)
                .with_context(|| format!("mmap {}", path.display()))
        }
        LoadMode::Owned => {
            let mut file = file;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .with_context(|| format!("read {}", path.display()))?;
            Ok(Buffer::Owned(buf))
        }
    }
}

fn for_each_record<'a, F>(bytes: &'a [u8], label: &str, mut f: F) -> Result<()>
where
    F: FnMut(usize, &[&'a str]) -> Result<()>,
{
    let mut fields: Vec<&'a str> = Vec::new();
    for (lineno, raw_line) in bytes.split(|b| *b == b'\n').enumerate() {
        let line = strip_cr(raw_line);
        if line.is_empty() || line.first() == Some(&b'#') {
            continue;
        }
        let line = std::str::from_utf8(line)
            .with_context(|| format!("{label}:{} invalid utf-8", lineno + 1))?;
        fields.clear();
        fields.extend(line.split('\t'));
        f(lineno + 1, &fields)?;
    }
    Ok(())
}

fn parse_entity_id(token: &str, label: &str, lineno: usize) -> Result<EntityId> {
    token
        .trim()
        .parse::<u64>()
        .map(EntityId)
        .with_context(|| format!("{label}:{lineno} invalid entity id {token:?}"))
}

fn parse_type(token: &str, label: &str, lineno: usize) -> Result<EntityType> {
    token
        .trim()
        .parse::<i32>()
        .map(EntityType)
        .with_context(|| format!("{label}:{lineno} invalid type code {token:?}"))
}

fn strip_cr(line: &[u8]) -> &[u8] {
    if line.ends_with(b"\r") {
        &line[..line.len() - 1]
    } else {
        line
    }
}

fn find_root(parent: &mut HashMap<EntityId, EntityId>, id: EntityId) -> EntityId {
    let mut root = id;
    while let Some(&next) = parent.get(&root) {
        if next == root {
            break;
        }
        root = next;
    }
    let mut cur = id;
    while cur != root {
        let next = parent.get(&cur).copied().unwrap_or(root);
        parent.insert(cur, root);
        cur = next;
    }
    root
}

// Roots are always the smallest id in their set.
fn union(parent: &mut HashMap<EntityId, EntityId>, a: EntityId, b: EntityId) {
    let ra = find_root(parent, a);
    let rb = find_root(parent, b);
    parent.entry(ra).or_insert(ra);
    parent.entry(rb).or_insert(rb);
    if ra < rb {
        parent.insert(rb, ra);
    } else if rb < ra {
        parent.insert(ra, rb);
    }
}
