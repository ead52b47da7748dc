use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::Path;
use std::time::Instant;

use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot};

use crate::model::*;
use crate::observability::{JOURNAL_FLUSH_BATCH_SIZE, JOURNAL_FLUSH_DURATION_SECONDS, RESERVATIONS_LIVE};
use crate::wal::Journal;

use super::error::ReservationError;

const JOURNAL_QUEUE: usize = 4096;

// ── Group-commit journal writer ─────────────────────────────────

enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = Vec<(Event, oneshot::Sender<io::Result<()>>)>;

/// Owns the journal file. Appends that queue up while a flush is running
/// are committed together with a single fsync.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    let mut pending: Pending = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut next = Some(cmd);
        while let Some(cmd) = next.take() {
            match cmd {
                JournalCommand::Append { event, response } => {
                    pending.push((event, response));
                    if let Ok(more) = rx.try_recv() {
                        next = Some(more);
                    }
                }
                other => {
                    commit(&mut journal, &mut pending);
                    handle_control(&mut journal, other);
                }
            }
        }
        commit(&mut journal, &mut pending);
    }
}

fn commit(journal: &mut Journal, pending: &mut Pending) {
    if pending.is_empty() {
        return;
    }
    metrics::histogram!(JOURNAL_FLUSH_BATCH_SIZE).record(pending.len() as f64);
    let started = Instant::now();

    let appended = pending
        .iter()
        .try_for_each(|(event, _)| journal.append_buffered(event));
    let result = appended.and_then(|()| journal.flush_sync());

    metrics::histogram!(JOURNAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(error = %e, batch = pending.len(), "journal flush failed");
        // A rejected batch must not come back on replay.
        if let Err(e) = journal.roll_back() {
            tracing::error!(error = %e, "journal roll back failed, rejected frames may replay");
        }
    }
    for (_, tx) in pending.drain(..) {
        let _ = tx.send(match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

fn handle_control(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Rewrite { events, response } => {
            let _ = response.send(journal.rewrite(&events));
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { event, response } => {
            let mut single = vec![(event, response)];
            commit(journal, &mut single);
        }
    }
}

/// Handle to the writer task.
#[derive(Clone)]
struct JournalHandle {
    tx: mpsc::Sender<JournalCommand>,
}

fn writer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "journal writer shut down")
}

impl JournalHandle {
    fn spawn(journal: Journal) -> Self {
        let (tx, rx) = mpsc::channel(JOURNAL_QUEUE);
        tokio::spawn(journal_writer_loop(journal, rx));
        Self { tx }
    }

    async fn append(&self, event: &Event) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response,
            })
            .await
            .map_err(|_| writer_gone())?;
        rx.await.map_err(|_| writer_gone())?
    }

    async fn rewrite(&self, events: Vec<Event>) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(JournalCommand::Rewrite { events, response })
            .await
            .map_err(|_| writer_gone())?;
        rx.await.map_err(|_| writer_gone())?
    }

    async fn appends_since_compact(&self) -> io::Result<u64> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(JournalCommand::AppendsSinceCompact { response })
            .await
            .map_err(|_| writer_gone())?;
        rx.await.map_err(|_| writer_gone())
    }
}

fn journal_error(e: io::Error) -> ReservationError {
    ReservationError::Upstream(format!("reservation journal unavailable: {e}"))
}

// ── Store ────────────────────────────────────────────────────────

/// Live reservations, indexed by id and by raw date.
///
/// Not synchronized: the service keeps it behind the concurrency gate.
/// Every mutation is journaled before it is applied.
pub struct ReservationStore {
    records: BTreeMap<ReservationId, ReservationRecord>,
    by_date: HashMap<String, BTreeSet<ReservationId>>,
    journal: Option<JournalHandle>,
}

impl ReservationStore {
    /// A store that forgets everything on restart.
    pub fn in_memory() -> Self {
        Self {
            records: BTreeMap::new(),
            by_date: HashMap::new(),
            journal: None,
        }
    }

    /// Replay the journal at `path`, then keep appending to it.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let replay = Journal::replay(path)?;
        if replay.discarded_tail {
            tracing::warn!(path = %path.display(), "discarded torn tail of reservation journal");
        }
        let mut store = Self::in_memory();
        for event in &replay.events {
            store.apply(event);
        }
        tracing::info!(
            path = %path.display(),
            events = replay.events.len(),
            reservations = store.len(),
            "reservation journal replayed"
        );
        store.journal = Some(JournalHandle::spawn(Journal::open(path)?));
        Ok(store)
    }

    pub fn get(&self, id: &ReservationId) -> Option<&ReservationRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in id (creation) order.
    pub fn iter(&self) -> impl Iterator<Item = &ReservationRecord> {
        self.records.values()
    }

    /// Records stored under `date`.
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &ReservationRecord> {
        self.by_date
            .get(&format_date(date))
            .into_iter()
            .flatten()
            .filter_map(|id| self.records.get(id))
    }

    pub async fn insert(&mut self, record: ReservationRecord) -> Result<(), ReservationError> {
        self.persist_and_apply(Event::ReservationCreated(record)).await
    }

    pub async fn remove(&mut self, id: ReservationId) -> Result<Option<ReservationRecord>, ReservationError> {
        let Some(existing) = self.records.get(&id).cloned() else {
            return Ok(None);
        };
        self.persist_and_apply(Event::ReservationCancelled { id }).await?;
        Ok(Some(existing))
    }

    /// Remove every listed id that is present, as one journal entry.
    pub async fn remove_many(&mut self, ids: &[ReservationId]) -> Result<Vec<ReservationRecord>, ReservationError> {
        let removed: Vec<ReservationRecord> = ids.iter().filter_map(|id| self.records.get(id).cloned()).collect();
        if removed.is_empty() {
            return Ok(removed);
        }
        let ids = removed.iter().map(|r| r.id).collect();
        self.persist_and_apply(Event::ReservationsPurged { ids }).await?;
        Ok(removed)
    }

    /// The shortest event sequence that rebuilds the current state.
    pub fn snapshot_events(&self) -> Vec<Event> {
        self.records.values().cloned().map(Event::ReservationCreated).collect()
    }

    /// Rewrite the journal from the live set. Returns the events written.
    pub async fn compact(&mut self) -> Result<usize, ReservationError> {
        let Some(journal) = &self.journal else {
            return Ok(0);
        };
        let events = self.snapshot_events();
        let written = events.len();
        journal.rewrite(events).await.map_err(journal_error)?;
        Ok(written)
    }

    pub async fn appends_since_compact(&self) -> Result<u64, ReservationError> {
        match &self.journal {
            Some(journal) => journal.appends_since_compact().await.map_err(journal_error),
            None => Ok(0),
        }
    }

    async fn persist_and_apply(&mut self, event: Event) -> Result<(), ReservationError> {
        if let Some(journal) = &self.journal {
            journal.append(&event).await.map_err(journal_error)?;
        }
        self.apply(&event);
        Ok(())
    }

    fn apply(&mut self, event: &Event) {
        match event {
            Event::ReservationCreated(record) => {
                if let Some(previous) = self.records.insert(record.id, record.clone()) {
                    self.unindex(&previous);
                }
                self.by_date.entry(record.date.clone()).or_default().insert(record.id);
            }
            Event::ReservationCancelled { id } => self.drop_record(id),
            Event::ReservationsPurged { ids } => {
                for id in ids {
                    self.drop_record(id);
                }
            }
        }
        metrics::gauge!(RESERVATIONS_LIVE).set(self.records.len() as f64);
    }

    fn drop_record(&mut self, id: &ReservationId) {
        if let Some(record) = self.records.remove(id) {
            self.unindex(&record);
        }
    }

    fn unindex(&mut self, record: &ReservationRecord) {
        if let Some(ids) = self.by_date.get_mut(&record.date) {
            ids.remove(&record.id);
            if ids.is_empty() {
                self.by_date.remove(&record.date);
            }
        }
    }
}
