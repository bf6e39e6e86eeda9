use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tagcorpus_dict::TypePairFilter;
use tagcorpus_types::Match;
use thiserror::Error;

use crate::score::{PairScorer, ScoreWeights, ScoredPair};

/// Matches of one document, handed to handlers in input order.
#[derive(Debug, Clone)]
pub struct TaggedDocument {
    pub id: Arc<str>,
    pub matches: Vec<Match>,
}

/// Consumer of tagged documents.
///
/// Calls are never concurrent: one thread delivers documents strictly in
/// input order, then calls `finish` once.
pub trait BatchHandler {
    fn handle(&mut self, document: &TaggedDocument) -> Result<(), HandlerError>;
    fn finish(&mut self) -> Result<(), HandlerError>;
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OutputFormat {
    #[default]
    Tsv,
    Jsonl,
}

/// Where a handler writes.
#[derive(Clone, Debug)]
pub enum Output {
    Stdout,
    File(PathBuf),
}

impl Output {
    pub fn open(&self) -> io::Result<Box<dyn Write>> {
        Ok(match self {
            Output::Stdout => Box::new(io::stdout()),
            Output::File(path) => Box::new(File::create(path)?),
        })
    }
}

#[derive(Serialize)]
struct MatchRecord<'a> {
    document: &'a str,
    entity: Option<u64>,
    entity_type: i32,
    sentence: usize,
    paragraph: usize,
    start: usize,
    end: usize,
    text: &'a str,
}

#[derive(Serialize)]
struct PairRecord {
    entity_a: u64,
    entity_b: u64,
    score: f64,
}

/// Writes one line per match, in the order received.
pub struct PrintHandler {
    out: BufWriter<Box<dyn Write>>,
    format: OutputFormat,
}

impl PrintHandler {
    pub fn new(out: Box<dyn Write>, format: OutputFormat) -> Self {
        Self {
            out: BufWriter::new(out),
            format,
        }
    }
}

impl BatchHandler for PrintHandler {
    fn handle(&mut self, document: &TaggedDocument) -> Result<(), HandlerError> {
        for m in &document.matches {
            match self.format {
                OutputFormat::Tsv => {
                    let entity = m
                        .entity
                        .map(|e| Cow::Owned(e.to_string()))
                        .unwrap_or(Cow::Borrowed("-"));
                    writeln!(
                        self.out,
                        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                        escape_field(&m.document),
                        entity,
                        m.entity_type,
                        m.sentence,
                        m.paragraph,
                        m.start,
                        m.end,
                        escape_field(&m.text)
                    )?;
                }
                OutputFormat::Jsonl => {
                    let record = MatchRecord {
                        document: &m.document,
                        entity: m.entity.map(|e| e.0),
                        entity_type: m.entity_type.0,
                        sentence: m.sentence,
                        paragraph: m.paragraph,
                        start: m.start,
                        end: m.end,
                        text: &m.text,
                    };
                    serde_json::to_writer(&mut self.out, &record)?;
                    self.out.write_all(b"\n")?;
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), HandlerError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Scores every co-occurring entity pair.
pub struct ScoreHandler {
    out: BufWriter<Box<dyn Write>>,
    format: OutputFormat,
    scorer: PairScorer,
}

impl ScoreHandler {
    pub fn new(out: Box<dyn Write>, format: OutputFormat, weights: ScoreWeights) -> Self {
        Self {
            out: BufWriter::new(out),
            format,
            scorer: PairScorer::new(weights),
        }
    }
}

impl BatchHandler for ScoreHandler {
    fn handle(&mut self, document: &TaggedDocument) -> Result<(), HandlerError> {
        self.scorer.add_document(&document.matches, |_, _| true);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), HandlerError> {
        write_scores(&mut self.out, self.format, &self.scorer.scores())
    }
}

/// Like [`ScoreHandler`], restricted to the allowed type pairs.
pub struct SelectiveScoreHandler {
    out: BufWriter<Box<dyn Write>>,
    format: OutputFormat,
    scorer: PairScorer,
    filter: TypePairFilter,
}

impl SelectiveScoreHandler {
    pub fn new(
        out: Box<dyn Write>,
        format: OutputFormat,
        weights: ScoreWeights,
        filter: TypePairFilter,
    ) -> Self {
        Self {
            out: BufWriter::new(out),
            format,
            scorer: PairScorer::new(weights),
            filter,
        }
    }
}

impl BatchHandler for SelectiveScoreHandler {
    fn handle(&mut self, document: &TaggedDocument) -> Result<(), HandlerError> {
        let filter = &self.filter;
        self.scorer
            .add_document(&document.matches, |a, b| filter.contains(a, b));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), HandlerError> {
        write_scores(&mut self.out, self.format, &self.scorer.scores())
    }
}

fn write_scores(
    out: &mut BufWriter<Box<dyn Write>>,
    format: OutputFormat,
    scores: &[ScoredPair],
) -> Result<(), HandlerError> {
    for pair in scores {
        match format {
            OutputFormat::Tsv => writeln!(out, "{}\t{}\t{:.6}", pair.a, pair.b, pair.score)?,
            OutputFormat::Jsonl => {
                let record = PairRecord {
                    entity_a: pair.a.0,
                    entity_b: pair.b.0,
                    score: pair.score,
                };
                serde_json::to_writer(&mut *out, &record)?;
                out.write_all(b"\n")?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

/// The closed set of handlers a run can be configured with.
pub enum Handler {
    Print(PrintHandler),
    Score(ScoreHandler),
    SelectiveScore(SelectiveScoreHandler),
}

impl BatchHandler for Handler {
    fn handle(&mut self, document: &TaggedDocument) -> Result<(), HandlerError> {
        match self {
            Handler::Print(h) => h.handle(document),
            Handler::Score(h) => h.handle(document),
            Handler::SelectiveScore(h) => h.handle(document),
        }
    }

    fn finish(&mut self) -> Result<(), HandlerError> {
        match self {
            Handler::Print(h) => h.finish(),
            Handler::Score(h) => h.finish(),
            Handler::SelectiveScore(h) => h.finish(),
        }
    }
}

/// Ordered chain of handlers; each sees every document before the next one does.
#[derive(Default)]
pub struct HandlerPipeline {
    handlers: Vec<Handler>,
}

impl HandlerPipeline {
    pub fn push(&mut self, handler: Handler) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl BatchHandler for HandlerPipeline {
    fn handle(&mut self, document: &TaggedDocument) -> Result<(), HandlerError> {
        for handler in &mut self.handlers {
            handler.handle(document)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), HandlerError> {
        for handler in &mut self.handlers {
            handler.finish()?;
        }
        Ok(())
    }
}

fn escape_field(text: &str) -> Cow<'_, str> {
    if !text.contains(['\\', '\t', '\n', '\r']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tagcorpus_types::{EntityId, EntityType};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn tagged(id: &str, matches: &[(Option<u64>, i32, usize, &str)]) -> TaggedDocument {
        let id: Arc<str> = Arc::from(id);
        TaggedDocument {
            id: id.clone(),
            matches: matches
                .iter()
                .map(|(entity, ty, sentence, text)| Match {
                    document: id.clone(),
                    entity: entity.map(EntityId),
                    entity_type: EntityType(*ty),
                    paragraph: 0,
                    sentence: *sentence,
                    start: 0,
                    end: text.len(),
                    text: text.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn prints_tsv_lines_in_order() {
        let buf = SharedBuf::default();
        let mut handler = PrintHandler::new(Box::new(buf.clone()), OutputFormat::Tsv);
        handler
            .handle(&tagged("d1", &[(Some(3), 9606, 0, "TP53"), (None, 0, 1, "Cdk2")]))
            .unwrap();
        handler.handle(&tagged("d2", &[(Some(1), 5, 0, "a\tb")])).unwrap();
        handler.finish().unwrap();
        assert_eq!(
            buf.contents(),
            "d1\t3\t9606\t0\t0\t0\t4\tTP53\nd1\t-\t0\t1\t0\t0\t4\tCdk2\nd2\t1\t5\t0\t0\t0\t3\ta\\tb\n"
        );
    }

    #[test]
    fn prints_json_lines() {
        let buf = SharedBuf::default();
        let mut handler = PrintHandler::new(Box::new(buf.clone()), OutputFormat::Jsonl);
        handler.handle(&tagged("d1", &[(None, 0, 2, "mTOR")])).unwrap();
        handler.finish().unwrap();
        let value: serde_json::Value = serde_json::from_str(buf.contents().trim()).unwrap();
        assert_eq!(value["document"], "d1");
        assert!(value["entity"].is_null());
        assert_eq!(value["sentence"], 2);
        assert_eq!(value["text"], "mTOR");
    }

    #[test]
    fn score_handler_writes_sorted_pairs_on_finish() {
        let buf = SharedBuf::default();
        let mut handler =
            ScoreHandler::new(Box::new(buf.clone()), OutputFormat::Tsv, ScoreWeights::default());
        for id in ["d1", "d2"] {
            handler
                .handle(&tagged(id, &[(Some(2), 5, 0, "b"), (Some(1), 5, 0, "a")]))
                .unwrap();
        }
        assert!(buf.contents().is_empty());
        handler.finish().unwrap();
        assert_eq!(buf.contents(), "1\t2\t0.400000\n");
    }

    #[test]
    fn selective_handler_drops_disallowed_type_pairs() {
        let buf = SharedBuf::default();
        let filter = TypePairFilter::from_pairs([(EntityType(9606), EntityType(-26))]);
        let mut handler = SelectiveScoreHandler::new(
            Box::new(buf.clone()),
            OutputFormat::Tsv,
            ScoreWeights::default(),
            filter,
        );
        let doc = tagged(
            "d1",
            &[(Some(1), 9606, 0, "a"), (Some(2), 9606, 0, "b"), (Some(3), -26, 0, "c")],
        );
        handler.handle(&doc).unwrap();
        handler.finish().unwrap();
        let contents = buf.contents();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("1\t3\t"));
        assert!(lines[1].starts_with("2\t3\t"));
    }

    #[test]
    fn pipeline_feeds_every_handler() {
        let matches = SharedBuf::default();
        let pairs = SharedBuf::default();
        let mut pipeline = HandlerPipeline::default();
        pipeline.push(Handler::Print(PrintHandler::new(
            Box::new(matches.clone()),
            OutputFormat::Tsv,
        )));
        pipeline.push(Handler::Score(ScoreHandler::new(
            Box::new(pairs.clone()),
            OutputFormat::Jsonl,
            ScoreWeights::default(),
        )));
        assert_eq!(pipeline.len(), 2);
        pipeline
            .handle(&tagged("d1", &[(Some(1), 5, 0, "a"), (Some(2), 5, 0, "b")]))
            .unwrap();
        pipeline.finish().unwrap();
        assert_eq!(matches.contents().lines().count(), 2);
        let value: serde_json::Value = serde_json::from_str(pairs.contents().trim()).unwrap();
        assert_eq!(value["entity_a"], 1);
        assert_eq!(value["entity_b"], 2);
    }

    #[test]
    fn escapes_control_characters() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a\\b\nc"), "a\\\\b\\nc");
    }
}
