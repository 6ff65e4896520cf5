mod catalog;
mod classifier;
mod directory;
mod error;
mod guard;
mod lifecycle;
mod projection;
mod requests;
mod store;

pub use classifier::{Category, Page, TimePhase, UnknownCategory};
pub use directory::{Directory, ItemDirectory, UserDirectory};
pub use error::{EngineError, Entity};
pub use guard::Role;
pub use projection::last_and_next;
pub use store::{BookingRow, BookingStore, SharedBooking};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::model::*;
use crate::observability;
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

/// Owns the WAL. Each wake-up takes every append already queued, writes them
/// buffered, fsyncs once and answers all callers with the shared result.
/// A non-append command seen while draining is handled after that batch commits.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let first = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![first];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
    debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes are not carried
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// The booking engine: users, items, requests, comments and bookings, all rebuilt from
/// the WAL on start.
pub struct Engine {
    pub(super) directory: Directory,
    pub(super) bookings: BookingStore,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes user and item changes, which check cross-row invariants
    /// (unique email, owner limits) before they log.
    pub(super) catalog_lock: Mutex<()>,
    /// Held shared by every log-then-apply step and exclusively by compaction,
    /// so a snapshot never misses an event that was logged but not yet applied.
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    /// Must be called inside a tokio runtime: the WAL writer is spawned here.
    pub fn new(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            directory: Directory::new(),
            bookings: BookingStore::new(),
            clock,
            wal_tx,
            catalog_lock: Mutex::new(()),
            commit_gate: RwLock::new(()),
        };

        for event in &events {
            engine.apply(event);
        }
        info!(
            events = events.len(),
            users = engine.directory.user_count(),
            items = engine.directory.item_count(),
            bookings = engine.bookings.len(),
            "replayed WAL {}",
            wal_path.display()
        );
        Ok(engine)
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Apply a logged event to in-memory state.
    ///
    /// `BookingDecided` is only routed through here on replay; live decisions
    /// write the status under the row lock they already hold. During replay
    /// nothing else holds row locks, so `try_write` cannot fail.
    fn apply(&self, event: &Event) {
        match event {
            Event::UserRegistered { id, name, email } => self.directory.insert_user(User {
                id: *id,
                name: name.clone(),
                email: email.clone(),
            }),
            Event::UserUpdated { id, name, email } => self.directory.update_user(*id, name, email),
            Event::UserRemoved { id } => {
                for item in self.directory.remove_user(id) {
                    self.bookings.remove_for_item(&item);
                }
                self.bookings.remove_for_booker(id);
            }
            Event::ItemListed {
                id,
                owner,
                name,
                description,
                available,
                request,
            } => self.directory.insert_item(Item {
                id: *id,
                owner: *owner,
                name: name.clone(),
                description: description.clone(),
                available: *available,
                request: *request,
            }),
            Event::ItemUpdated {
                id,
                name,
                description,
                available,
            } => self.directory.update_item(*id, name, description, *available),
            Event::ItemRemoved { id } => {
                self.directory.remove_item(id);
                self.bookings.remove_for_item(id);
            }
            Event::BookingRequested { id, item, booker, span } => self.bookings.insert(Booking {
                id: *id,
                item: *item,
                booker: *booker,
                span: *span,
                status: BookingStatus::Waiting,
            }),
            Event::BookingDecided { id, status } => {
                if let Some(row) = self.bookings.get(id) {
                    row.cell.try_write().expect("replay: uncontended write").status = *status;
                }
            }
            Event::CommentPosted {
                id,
                item,
                author,
                text,
                created,
            } => self
                .directory
                .push_comment(*id, *item, *author, text.clone(), *created),
            Event::RequestPosted {
                id,
                requester,
                description,
                created,
            } => self.directory.insert_request(ItemRequest {
                id: *id,
                requester: *requester,
                description: description.clone(),
                created: *created,
            }),
        }
    }

    /// Write event to WAL via the background group-commit writer.
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

    /// Log, then apply. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(&self, event: &Event) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(event).await?;
        self.apply(event);
        Ok(())
    }

    /// Events that rebuild the current state from nothing.
    async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for user in self.directory.users() {
            events.push(Event::UserRegistered {
                id: user.id,
                name: user.name,
                email: user.email,
            });
        }
        for request in self.directory.requests() {
            events.push(Event::RequestPosted {
                id: request.id,
                requester: request.requester,
                description: request.description,
                created: request.created,
            });
        }
        let items = self.directory.items();
        for item in &items {
            events.push(Event::ItemListed {
                id: item.id,
                owner: item.owner,
                name: item.name.clone(),
                description: item.description.clone(),
                available: item.available,
                request: item.request,
            });
        }
        let mut ids = self.bookings.all_ids();
        ids.sort();
        for booking in self.bookings.read_all(&ids).await {
            events.push(Event::BookingRequested {
                id: booking.id,
                item: booking.item,
                booker: booking.booker,
                span: booking.span,
            });
            if booking.status != BookingStatus::Waiting {
                events.push(Event::BookingDecided {
                    id: booking.id,
                    status: booking.status,
                });
            }
        }
        for item in &items {
            for c in self.directory.comments_of(&item.id) {
                events.push(Event::CommentPosted {
                    id: c.id,
                    item: c.item,
                    author: c.author,
                    text: c.text,
                    created: c.created,
                });
            }
        }
        events
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let events = self.snapshot_events().await;
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        debug!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
