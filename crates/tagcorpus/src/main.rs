use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use tagcorpus::{
    BatchTagger, Handler, HandlerPipeline, Output, OutputFormat, PrintHandler, ScoreHandler,
    ScoreWeights, SelectiveScoreHandler, TsvDocumentReader,
};
use tagcorpus_dict::{LoadMode, TypePairFilter, load_type_filter};
use tagcorpus_match::MatchParams;
use tagcorpus_types::EntityType;

#[derive(Parser, Debug)]
#[command(name = "tagcorpus")]
#[command(about = "Tag documents against an entity dictionary and score co-occurring pairs")]
struct Cli {
    /// Entity types to tag, one type code per line.
    #[arg(long)]
    types: PathBuf,
    /// Entity ids and their types.
    #[arg(long)]
    entities: PathBuf,
    /// Entity ids and their names.
    #[arg(long)]
    names: PathBuf,
    /// Documents to tag; standard input when omitted.
    #[arg(long)]
    documents: Option<PathBuf>,
    /// Entity ids and the groups they belong to.
    #[arg(long)]
    groups: Option<PathBuf>,
    /// Allowed type pairs for pair scoring.
    #[arg(long)]
    type_pairs: Option<PathBuf>,
    /// Names that are never reported.
    #[arg(long)]
    stopwords: Option<PathBuf>,
    /// Also report identifier-like tokens missing from the dictionary, with
    /// type 0, whatever `--types` lists.
    #[arg(long, default_value_t = false)]
    autodetect: bool,
    #[arg(long, default_value_t = 1.0)]
    document_weight: f64,
    #[arg(long, default_value_t = 2.0)]
    paragraph_weight: f64,
    #[arg(long, default_value_t = 0.2)]
    sentence_weight: f64,
    #[arg(long, default_value_t = 0.6)]
    normalization_factor: f64,
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    threads: u16,
    /// Match listing destination; standard output when omitted.
    #[arg(long)]
    out_matches: Option<PathBuf>,
    /// Pair score destination; pair scoring is off when omitted.
    #[arg(long)]
    out_pairs: Option<PathBuf>,
    /// Memory-map dictionary files or read them into memory.
    #[arg(long, env = "TAGCORPUS_LOAD_MODE", default_value = "mmap", value_parser = parse_load_mode)]
    load_mode: LoadMode,
    #[arg(long, value_enum, default_value_t = Format::Tsv)]
    format: Format,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Tsv,
    Jsonl,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Tsv => OutputFormat::Tsv,
            Format::Jsonl => OutputFormat::Jsonl,
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help goes to stdout with status 0; usage errors exit 1.
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let load_start = Instant::now();
    info!("loading dictionary (mode: {:?})", cli.load_mode);
    let mut entity_types = load_type_filter(&cli.types, cli.load_mode)?;
    if cli.autodetect && !entity_types.contains(&EntityType::CANDIDATE) {
        // Candidates have no dictionary type, so the allow-list never names them.
        entity_types.push(EntityType::CANDIDATE);
    }
    let mut tagger = BatchTagger::new(cli.load_mode);
    tagger.load_names(&cli.entities, &cli.names)?;
    if let Some(groups) = &cli.groups {
        tagger.load_groups(groups)?;
    }
    if let Some(stopwords) = &cli.stopwords {
        tagger.load_global(stopwords)?;
    }
    let pair_filter = match (&cli.type_pairs, &cli.out_pairs) {
        (Some(path), Some(_)) => Some(TypePairFilter::load(path, cli.load_mode)?),
        (Some(path), None) => {
            warn!("{} ignored without --out-pairs", path.display());
            None
        }
        _ => None,
    };
    info!(
        "dictionary loaded in {} ms",
        load_start.elapsed().as_millis()
    );

    let format = OutputFormat::from(cli.format);
    let weights = ScoreWeights {
        document: cli.document_weight,
        paragraph: cli.paragraph_weight,
        sentence: cli.sentence_weight,
        normalization_factor: cli.normalization_factor,
    };
    let matches_out = cli.out_matches.clone().map_or(Output::Stdout, Output::File);
    let mut pipeline = HandlerPipeline::default();
    pipeline.push(Handler::Print(PrintHandler::new(
        open_output(&matches_out)?,
        format,
    )));
    if let Some(path) = &cli.out_pairs {
        let sink = open_output(&Output::File(path.clone()))?;
        pipeline.push(match pair_filter {
            Some(filter) => {
                info!("selective pair scoring over {} type pairs", filter.len());
                Handler::SelectiveScore(SelectiveScoreHandler::new(sink, format, weights, filter))
            }
            None => Handler::Score(ScoreHandler::new(sink, format, weights)),
        });
    }

    let input: Box<dyn BufRead + Send> = match &cli.documents {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let mut reader = TsvDocumentReader::new(input);
    let params = MatchParams {
        entity_types,
        autodetect: cli.autodetect,
    };

    let stats = tagger.process(
        usize::from(cli.threads),
        &mut reader,
        &params,
        &mut pipeline,
    )?;
    if stats.skipped > 0 {
        warn!("{} documents skipped", stats.skipped);
    }
    Ok(())
}

fn open_output(output: &Output) -> anyhow::Result<Box<dyn io::Write>> {
    output.open().with_context(|| match output {
        Output::Stdout => "opening standard output".to_string(),
        Output::File(path) => format!("creating {}", path.display()),
    })
}

fn parse_load_mode(raw: &str) -> Result<LoadMode, String> {
    match raw.to_ascii_lowercase().as_str() {
        "mmap" => Ok(LoadMode::Mmap),
        "owned" => Ok(LoadMode::Owned),
        other => Err(format!("unknown load mode `{other}` (expected mmap or owned)")),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let max_level = env_filter
        .max_level_hint()
        .and_then(|hint| hint.into_level())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .with_max_level(max_level)
        .init();
}
