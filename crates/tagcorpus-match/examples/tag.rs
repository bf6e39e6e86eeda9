use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tagcorpus_dict::{DictionaryBuilder, LoadMode};
use tagcorpus_match::{MatchParams, Matcher, segment_document};

fn main() -> Result<()> {
    let usage = "usage: cargo run -p tagcorpus-match --example tag -- <entities> <names> [--autodetect] <text>";
    let mut args = env::args().skip(1);
    let entities = args.next().map(PathBuf::from).context(usage)?;
    let names = args.next().map(PathBuf::from).context(usage)?;
    let mut autodetect = false;
    let mut text = None;
    for arg in args {
        if arg == "--autodetect" {
            autodetect = true;
        } else if text.is_none() {
            text = Some(arg);
        } else {
            bail!("too many arguments");
        }
    }
    let Some(text) = text else {
        bail!(usage);
    };

    let mut builder = DictionaryBuilder::new(LoadMode::Mmap);
    builder
        .load_names(&entities, &names)
        .with_context(|| format!("loading {}", names.display()))?;
    let dict = builder.build();

    let params = MatchParams {
        entity_types: Vec::new(),
        autodetect,
    };
    let doc = segment_document(Arc::from("input"), [text.as_str()]);
    for m in Matcher::new(&dict, &params).tag(&doc) {
        let entity = m.entity.map(|e| e.to_string()).unwrap_or_else(|| "-".into());
        println!(
            "{:>4}..{:<4} p{} s{}  {:<20} {} ({})",
            m.start, m.end, m.paragraph, m.sentence, m.text, entity, m.entity_type
        );
    }

    Ok(())
}
