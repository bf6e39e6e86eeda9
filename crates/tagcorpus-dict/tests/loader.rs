use std::path::PathBuf;

use tagcorpus_dict::{DictionaryBuilder, LoadMode, TypePairFilter, load_type_filter};
use tagcorpus_types::{EntityId, EntityType, Lexicon};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("dict")
        .join(name)
}

fn load(mode: LoadMode) -> tagcorpus_dict::Dictionary {
    let mut builder = DictionaryBuilder::new(mode);
    builder
        .load_names(fixture("entities.tsv"), fixture("names.tsv"))
        .expect("load names");
    builder.load_groups(fixture("groups.tsv")).expect("load groups");
    builder.load_global(fixture("stopwords.tsv")).expect("load stopwords");
    builder.build()
}

#[test]
fn loads_fixture_dictionary() {
    let dict = load(LoadMode::Mmap);
    assert_eq!(dict.entity_count(), 4);
    assert_eq!(dict.type_of(EntityId(10)), Some(EntityType(-26)));
    assert_eq!(dict.candidates_for("Breast Cancer 1"), &[EntityId(1)]);
    assert_eq!(dict.candidates_for("breast-cancer"), &[EntityId(10)]);
    assert_eq!(dict.max_name_tokens(), 3);
}

#[test]
fn owned_and_mmap_modes_agree() {
    let mapped = load(LoadMode::Mmap);
    let owned = load(LoadMode::Owned);
    assert_eq!(mapped.name_count(), owned.name_count());
    assert_eq!(mapped.group_count(), owned.group_count());
    for name in ["BRCA1", "TP53", "p-53", "asthma", "can"] {
        assert_eq!(mapped.candidates_for(name), owned.candidates_for(name), "{name}");
    }
}

#[test]
fn applies_groups_and_stopwords() {
    let dict = load(LoadMode::Owned);
    assert_eq!(dict.representative_of(EntityId(3)), EntityId(2));
    assert_eq!(dict.representative(EntityId(1)), EntityId(1));
    assert!(dict.candidates_for("can").is_empty());
    assert!(dict.is_stopword("was"));
}

#[test]
fn loads_filters() {
    let types = load_type_filter(fixture("types.tsv"), LoadMode::Mmap).expect("types");
    assert_eq!(types, vec![EntityType(9606), EntityType(-26)]);
    let pairs = TypePairFilter::load(fixture("type_pairs.tsv"), LoadMode::Owned).expect("pairs");
    assert!(pairs.contains(EntityType(-26), EntityType(9606)));
    assert!(!pairs.contains(EntityType(9606), EntityType(9606)));
}

#[test]
fn missing_file_is_an_error() {
    let mut builder = DictionaryBuilder::new(LoadMode::Mmap);
    let err = builder
        .load_names(fixture("missing.tsv"), fixture("names.tsv"))
        .unwrap_err();
    assert!(format!("{err:#}").contains("missing.tsv"));
}

#[test]
fn names_for_undefined_entities_fail_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let entities = dir.path().join("entities.tsv");
    let names = dir.path().join("names.tsv");
    std::fs::write(&entities, "1\t5\n").unwrap();
    std::fs::write(&names, "1\tfoo\n7\tbar\n").unwrap();
    let mut builder = DictionaryBuilder::new(LoadMode::Owned);
    let err = builder.load_names(&entities, &names).unwrap_err();
    assert!(err.to_string().contains(":2 "), "{err}");
}
