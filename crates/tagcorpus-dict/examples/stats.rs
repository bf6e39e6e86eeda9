use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tagcorpus_dict::{DictionaryBuilder, LoadMode};
use tagcorpus_types::Lexicon;

fn main() -> Result<()> {
    let mut args = env::args().skip(1).map(PathBuf::from);
    let usage = "usage: cargo run -p tagcorpus-dict --example stats -- <entities> <names> [groups] [stopwords]";
    let entities = args.next().context(usage)?;
    let names = args.next().context(usage)?;

    let mut builder = DictionaryBuilder::new(LoadMode::Mmap);
    builder
        .load_names(&entities, &names)
        .with_context(|| format!("loading {} / {}", entities.display(), names.display()))?;
    if let Some(groups) = args.next() {
        builder.load_groups(&groups)?;
    }
    if let Some(stopwords) = args.next() {
        builder.load_global(&stopwords)?;
    }
    let dict = builder.build();

    println!("Entities      : {}", dict.entity_count());
    println!("Name keys     : {}", dict.name_count());
    println!("Groups        : {}", dict.group_count());
    println!("Stopwords     : {}", dict.stopword_count());
    println!("Longest name  : {} tokens", dict.max_name_tokens());

    Ok(())
}
