mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{
    available_tables, blocked_tables, find_available_tables, table_order, ReservationLedger, TableRegistry,
};
pub use error::EngineError;
pub use store::InMemoryStore;

use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::Settings;
use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that arrive while a flush is pending are written
/// together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush of {} events failed: {e}", batch.len());
        }
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

/// Write and fsync a batch. On failure the log is rolled back to its state
/// before the batch, so no caller told `Err` finds its event after a restart.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        tracing::error!("WAL rollback failed, refusing further writes: {e}");
    }
    result
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Tables, reservations and the log that makes them durable.
///
/// Reads go straight to the store. Every mutation takes `write_lock`, checks
/// its invariants, appends its event to the WAL and only then applies it.
pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) write_lock: Mutex<()>,
    settings: Settings,
}

impl Engine {
    /// Replay the log at `wal_path` and start the writer task. Must be called
    /// inside a tokio runtime.
    pub fn new(wal_path: PathBuf, settings: Settings) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = InMemoryStore::new(settings.default_duration());
        for event in &events {
            store.apply_event(event);
        }
        tracing::info!(
            "replayed {} events from {}: {} tables, {} reservations",
            events.len(),
            wal_path.display(),
            store.table_count(),
            store.reservation_count()
        );

        Ok(Self {
            store,
            wal_tx,
            write_lock: Mutex::new(()),
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply. Caller holds `write_lock`.
    pub(super) async fn persist_and_apply(&self, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        self.store.apply_event(&event);
        Ok(())
    }
}
