//! Threaded batch tagging with ordered delivery.
//!
//! One dispatch thread reads documents and numbers them, a fixed pool of
//! scoped workers parses and tags them, and the calling thread reorders the
//! results and feeds the handler pipeline strictly in input order. The number
//! of documents in flight is capped by a credit channel: the dispatcher spends
//! a credit per document and delivery refunds it once the sequence number is
//! retired, so the reorder buffer stays bounded.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded};
use tagcorpus_dict::{Dictionary, DictionaryBuilder, LoadMode};
use tagcorpus_match::{MatchParams, Matcher};
use tagcorpus_types::Lexicon;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::document::{DocumentError, DocumentSource, RawDocument, parse_record};
use crate::handlers::{BatchHandler, HandlerError, TaggedDocument};

/// Extra in-flight documents allowed on top of one per worker.
pub const REORDER_MARGIN: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Idle,
    Loading,
    Running,
    Draining,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Loading => "loading",
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TaggerError {
    #[error("{0:#}")]
    Dictionary(anyhow::Error),
    #[error("reading documents failed: {0}")]
    Input(#[source] io::Error),
    #[error(transparent)]
    Output(#[from] HandlerError),
    #[error("cannot {action} while {phase}")]
    Phase { action: &'static str, phase: Phase },
    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchStats {
    /// Documents delivered to the handlers.
    pub documents: u64,
    /// Documents dropped because they failed to parse or tag.
    pub skipped: u64,
    pub matches: u64,
}

/// Drives one tagging run: `Idle → Loading → Running → Draining → Done`.
pub struct BatchTagger {
    phase: Phase,
    builder: Option<DictionaryBuilder>,
    dictionary: Option<Arc<Dictionary>>,
    names_loaded: bool,
}

impl BatchTagger {
    pub fn new(mode: LoadMode) -> Self {
        Self {
            phase: Phase::Idle,
            builder: Some(DictionaryBuilder::new(mode)),
            dictionary: None,
            names_loaded: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The frozen dictionary, once `process` has started.
    pub fn dictionary(&self) -> Option<&Dictionary> {
        self.dictionary.as_deref()
    }

    pub fn load_names(
        &mut self,
        entities: impl AsRef<Path>,
        names: impl AsRef<Path>,
    ) -> Result<(), TaggerError> {
        self.loading("load names")?
            .load_names(entities, names)
            .map_err(TaggerError::Dictionary)?;
        self.names_loaded = true;
        Ok(())
    }

    pub fn load_groups(&mut self, groups: impl AsRef<Path>) -> Result<(), TaggerError> {
        self.loading("load groups")?
            .load_groups(groups)
            .map_err(TaggerError::Dictionary)
    }

    pub fn load_global(&mut self, stopwords: impl AsRef<Path>) -> Result<(), TaggerError> {
        self.loading("load stopwords")?
            .load_global(stopwords)
            .map_err(TaggerError::Dictionary)
    }

    fn loading(&mut self, action: &'static str) -> Result<&mut DictionaryBuilder, TaggerError> {
        if !matches!(self.phase, Phase::Idle | Phase::Loading) {
            return Err(TaggerError::Phase {
                action,
                phase: self.phase,
            });
        }
        self.enter(Phase::Loading);
        self.builder.as_mut().ok_or(TaggerError::Phase {
            action,
            phase: self.phase,
        })
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "batch phase");
            self.phase = phase;
        }
    }

    /// Tag every document `reader` yields and feed the results to `handler`
    /// in input order, then let the handler finalize.
    pub fn process<R, H>(
        &mut self,
        threads: usize,
        reader: &mut R,
        params: &MatchParams,
        handler: &mut H,
    ) -> Result<BatchStats, TaggerError>
    where
        R: DocumentSource + Send,
        H: BatchHandler,
    {
        let builder = match (self.phase, self.names_loaded) {
            (Phase::Loading, true) => self.builder.take(),
            _ => None,
        };
        let Some(builder) = builder else {
            return Err(TaggerError::Phase {
                action: "process documents",
                phase: self.phase,
            });
        };
        let dictionary = Arc::new(builder.build());
        self.dictionary = Some(Arc::clone(&dictionary));
        self.enter(Phase::Running);

        let start = Instant::now();
        let result = tag_stream(&*dictionary, threads, reader, params, handler);
        self.enter(Phase::Draining);
        let stats = result?;
        handler.finish()?;
        self.enter(Phase::Done);

        info!(
            documents = stats.documents,
            skipped = stats.skipped,
            matches = stats.matches,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "batch done"
        );
        Ok(stats)
    }
}

/// Run the dispatch thread, `threads` workers and ordered delivery over any
/// [`Lexicon`], without touching a tagger's phases or finalizing `handler`.
///
/// On an output error the dispatcher is stopped before its next read, but a
/// read already blocked inside `read_document` (an idle pipe, say) has to
/// return before this does.
pub fn tag_stream<L, R, H>(
    lexicon: &L,
    threads: usize,
    reader: &mut R,
    params: &MatchParams,
    handler: &mut H,
) -> Result<BatchStats, TaggerError>
where
    L: Lexicon + ?Sized,
    R: DocumentSource + Send,
    H: BatchHandler,
{
    let threads = threads.max(1);
    let window = threads + REORDER_MARGIN;
    info!(threads, window, "tagging documents");

    let (delivered, dispatched) = thread::scope(|scope| {
        let (task_tx, task_rx) = bounded::<Task>(threads);
        let (result_tx, result_rx) = bounded::<Outcome>(window);
        let (credit_tx, credit_rx) = bounded::<()>(window);
        for _ in 0..window {
            let _ = credit_tx.send(());
        }
        let unspent = credit_rx.clone();

        let dispatcher = scope.spawn(move || dispatch(reader, task_tx, credit_rx));

        let mut workers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let tasks = task_rx.clone();
            let results = result_tx.clone();
            workers.push(scope.spawn(move || {
                let matcher = Matcher::new(lexicon, params);
                for task in tasks {
                    let result = tag_one(&matcher, &task.raw);
                    if results.send(Outcome { seq: task.seq, result }).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(task_rx);
        drop(result_tx);

        let delivered = deliver(result_rx, credit_tx, &mut *handler);
        if delivered.is_err() {
            // Reclaim unspent credits so the dispatcher's next recv disconnects.
            unspent.try_iter().for_each(drop);
        }
        drop(unspent);

        let workers_ok = workers
            .into_iter()
            .fold(true, |ok, worker| worker.join().is_ok() && ok);
        let dispatched = dispatcher
            .join()
            .map_err(|_| TaggerError::Panicked("dispatcher"));
        if !workers_ok {
            return (delivered, Err(TaggerError::Panicked("worker")));
        }
        (delivered, dispatched)
    });

    let stats = delivered?;
    let read = dispatched?.map_err(TaggerError::Input)?;
    debug!(read, "reader exhausted");
    Ok(stats)
}

struct Task {
    seq: u64,
    raw: RawDocument,
}

struct Outcome {
    seq: u64,
    result: Result<TaggedDocument, DocumentError>,
}

fn dispatch<R: DocumentSource>(
    reader: &mut R,
    tasks: Sender<Task>,
    credits: Receiver<()>,
) -> io::Result<u64> {
    let mut seq = 0;
    loop {
        // Delivery dropped the credit sender: the batch is aborting.
        if credits.recv().is_err() {
            return Ok(seq);
        }
        let Some(raw) = reader.read_document()? else {
            return Ok(seq);
        };
        if tasks.send(Task { seq, raw }).is_err() {
            return Ok(seq);
        }
        seq += 1;
    }
}

fn tag_one<L: Lexicon + ?Sized>(
    matcher: &Matcher<'_, L>,
    raw: &RawDocument,
) -> Result<TaggedDocument, DocumentError> {
    let document = parse_record(raw)?;
    let matches = panic::catch_unwind(AssertUnwindSafe(|| matcher.tag(&document))).map_err(
        |payload| DocumentError::Matching {
            id: document.id.to_string(),
            reason: panic_message(payload.as_ref()),
        },
    )?;
    Ok(TaggedDocument {
        id: document.id,
        matches,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic".to_string()
    }
}

fn deliver<H: BatchHandler>(
    results: Receiver<Outcome>,
    credits: Sender<()>,
    handler: &mut H,
) -> Result<BatchStats, TaggerError> {
    let mut stats = BatchStats::default();
    let mut reorder = ReorderBuffer::new();
    for outcome in &results {
        reorder.insert(outcome.seq, outcome.result);
        while let Some(result) = reorder.pop_ready() {
            match result {
                Ok(document) => {
                    stats.documents += 1;
                    stats.matches += document.matches.len() as u64;
                    // Dropping both channel ends on return unblocks every thread.
                    handler.handle(&document)?;
                }
                Err(err) => {
                    stats.skipped += 1;
                    warn!("skipping document: {err}");
                }
            }
            let _ = credits.send(());
        }
    }
    debug_assert!(reorder.is_empty(), "results left unretired");
    Ok(stats)
}

/// Holds results that finished ahead of their turn.
#[derive(Debug)]
struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    fn insert(&mut self, seq: u64, item: T) {
        self.pending.insert(seq, item);
    }

    fn pop_ready(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(item)
    }

    fn len(&self) -> usize {
        self.pending.len()
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TsvDocumentReader;

    #[test]
    fn reorder_buffer_releases_in_sequence() {
        let mut buf = ReorderBuffer::new();
        buf.insert(2, "c");
        buf.insert(1, "b");
        assert_eq!(buf.pop_ready(), None);
        assert_eq!(buf.len(), 2);
        buf.insert(0, "a");
        let drained: Vec<_> = std::iter::from_fn(|| buf.pop_ready()).collect();
        assert_eq!(drained, vec!["a", "b", "c"]);
        assert!(buf.is_empty());
        buf.insert(4, "e");
        assert_eq!(buf.pop_ready(), None);
        buf.insert(3, "d");
        assert_eq!(buf.pop_ready(), Some("d"));
        assert_eq!(buf.pop_ready(), Some("e"));
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::Idle.to_string(), "idle");
        assert_eq!(Phase::Draining.to_string(), "draining");
    }

    #[test]
    fn processing_before_loading_is_rejected() {
        struct Nothing;
        impl BatchHandler for Nothing {
            fn handle(&mut self, _: &TaggedDocument) -> Result<(), HandlerError> {
                Ok(())
            }
            fn finish(&mut self) -> Result<(), HandlerError> {
                Ok(())
            }
        }

        let mut tagger = BatchTagger::new(LoadMode::Owned);
        let mut reader = TsvDocumentReader::new(&b"d1\ttext"[..]);
        let err = tagger
            .process(1, &mut reader, &MatchParams::default(), &mut Nothing)
            .unwrap_err();
        assert!(matches!(
            err,
            TaggerError::Phase {
                phase: Phase::Idle,
                ..
            }
        ));
        assert_eq!(tagger.phase(), Phase::Idle);
        assert!(tagger.dictionary().is_none());
    }

    #[test]
    fn loader_failures_are_fatal_dictionary_errors() {
        let mut tagger = BatchTagger::new(LoadMode::Owned);
        let err = tagger
            .load_names("/nonexistent/entities.tsv", "/nonexistent/names.tsv")
            .unwrap_err();
        assert!(matches!(err, TaggerError::Dictionary(_)));
        assert_eq!(tagger.phase(), Phase::Loading);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let caught = panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom 1");
        let caught = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "static");
    }
}
