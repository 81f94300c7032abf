//! The per-device sync actor.
//!
//! One task owns the [`SyncEngine`] and the push queue inside it. Callers talk
//! to it through a cloneable [`SyncHandle`]; network calls run as spawned
//! tasks and report back over a completion channel tagged with the epoch they
//! were started in.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use moodsync_shared::merge::{dedupe_latest, merge};
use moodsync_shared::protocol::{PullResponse, PushResponse};
use moodsync_shared::sanitize::{sanitize_entry, SanitizeOptions};
use moodsync_shared::types::{now_ms, Entry};
use moodsync_store::Database;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::engine::{Action, EngineConfig, SyncEngine, SyncStatus};
use crate::error::SyncError;
use crate::handshake::{self, HandshakeOutcome};
use crate::signals::{IdentityCell, RuntimeSignals};
use crate::transport::{SyncTransport, TransportError};

const COMMAND_BUFFER: usize = 64;

type SharedDb = Arc<Mutex<Database>>;
type Ack = oneshot::Sender<Result<(), SyncError>>;

fn lock_db(db: &SharedDb) -> Result<MutexGuard<'_, Database>, SyncError> {
    db.lock().map_err(|_| SyncError::Lock)
}

/// Commands accepted by the actor.
#[derive(Debug)]
pub enum SyncCommand {
    /// A local entry was written to the store.
    Edited(Entry),
    Enable { ack: Ack },
    /// Stop syncing, and with `wipe` also erase the local store, in the same
    /// step that invalidates in-flight responses.
    Disable { wipe: bool, ack: Ack },
    SyncNow,
    SetSignals(RuntimeSignals),
    Status(oneshot::Sender<SyncStatus>),
    Shutdown,
}

enum Completion {
    Handshake {
        epoch: u64,
        outcome: HandshakeOutcome,
    },
    Pull {
        epoch: u64,
        result: Result<PullResponse, TransportError>,
    },
    Push {
        epoch: u64,
        result: Result<PushResponse, TransportError>,
    },
}

/// Cloneable front end of the sync actor.
///
/// Local writes land in the store before this returns, so reads through the
/// same handle are immediately consistent whatever the network does.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    db: SharedDb,
    identity: IdentityCell,
}

impl SyncHandle {
    async fn send(&self, cmd: SyncCommand) -> Result<(), SyncError> {
        self.commands.send(cmd).await.map_err(|_| SyncError::Closed)
    }

    async fn request(&self, cmd: impl FnOnce(Ack) -> SyncCommand) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.send(cmd(tx)).await?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Sanitize and store an edit, then schedule its upload.
    pub async fn record(&self, entry: Entry) -> Result<Entry, SyncError> {
        let opts = SanitizeOptions::local(now_ms());
        let clean = sanitize_entry(&entry, &opts)
            .ok_or_else(|| SyncError::InvalidEntry(entry.date.clone()))?;
        lock_db(&self.db)?.upsert_and_save(clean.clone())?;
        self.send(SyncCommand::Edited(clean.clone())).await?;
        Ok(clean)
    }

    pub fn entries(&self) -> Result<Vec<Entry>, SyncError> {
        Ok(lock_db(&self.db)?.load_entries()?)
    }

    pub fn username(&self) -> Result<Option<String>, SyncError> {
        Ok(lock_db(&self.db)?.cached_username()?)
    }

    pub fn set_identity(&self, init_data: Option<String>) {
        self.identity.set(init_data);
    }

    /// Turn sync on: persist the flag, restart from a full pull and upload
    /// every local entry.
    pub async fn enable(&self) -> Result<(), SyncError> {
        self.request(|ack| SyncCommand::Enable { ack }).await
    }

    pub async fn disable(&self) -> Result<(), SyncError> {
        self.request(|ack| SyncCommand::Disable { wipe: false, ack }).await
    }

    /// Disable sync and erase every local record.
    pub async fn reset_local(&self) -> Result<(), SyncError> {
        self.request(|ack| SyncCommand::Disable { wipe: true, ack }).await
    }

    pub async fn sync_now(&self) -> Result<(), SyncError> {
        self.send(SyncCommand::SyncNow).await
    }

    pub async fn set_signals(&self, signals: RuntimeSignals) -> Result<(), SyncError> {
        self.send(SyncCommand::SetSignals(signals)).await
    }

    pub async fn status(&self) -> Result<SyncStatus, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.send(SyncCommand::Status(tx)).await?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.send(SyncCommand::Shutdown).await
    }
}

pub struct SyncActor<T: SyncTransport> {
    engine: SyncEngine,
    db: SharedDb,
    transport: Arc<T>,
    identity: IdentityCell,
    commands: mpsc::Receiver<SyncCommand>,
    completions_tx: mpsc::Sender<Completion>,
    completions_rx: mpsc::Receiver<Completion>,
}

/// Start the actor on the current runtime.
pub fn spawn<T: SyncTransport>(
    db: Database,
    transport: T,
    identity: IdentityCell,
    config: EngineConfig,
) -> Result<(SyncHandle, JoinHandle<()>), SyncError> {
    let mut engine = SyncEngine::new(config);
    if db.sync_enabled()? {
        engine.resume(Instant::now());
    }

    let db = Arc::new(Mutex::new(db));
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (completions_tx, completions_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = SyncActor {
        engine,
        db: Arc::clone(&db),
        transport: Arc::new(transport),
        identity: identity.clone(),
        commands: cmd_rx,
        completions_tx,
        completions_rx,
    };
    let task = tokio::spawn(actor.run());

    let handle = SyncHandle {
        commands: cmd_tx,
        db,
        identity,
    };
    Ok((handle, task))
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl<T: SyncTransport> SyncActor<T> {
    pub async fn run(mut self) {
        tracing::info!(enabled = self.engine.is_enabled(), "sync actor started");
        self.drive();

        loop {
            let deadline = self.engine.next_deadline();
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(SyncCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(done) = self.completions_rx.recv() => self.handle_completion(done),
                _ = sleep_until_opt(deadline) => {}
            }
            self.drive();
        }

        tracing::info!(
            pending = self.engine.status().pending,
            "sync actor stopped"
        );
    }

    fn handle_command(&mut self, cmd: SyncCommand) {
        let now = Instant::now();
        match cmd {
            SyncCommand::Edited(entry) => self.engine.note_edit(now, entry),
            SyncCommand::Enable { ack } => {
                let result = self.enable(now);
                if let Err(e) = &result {
                    tracing::error!(error = %e, "failed to enable sync");
                }
                let _ = ack.send(result);
            }
            SyncCommand::Disable { wipe, ack } => {
                let result = self.disable(wipe);
                if let Err(e) = &result {
                    tracing::error!(error = %e, wipe, "failed to persist sync disable");
                }
                let _ = ack.send(result);
            }
            SyncCommand::SyncNow => self.engine.request_pull(),
            SyncCommand::SetSignals(signals) => self.engine.set_signals(signals),
            SyncCommand::Status(reply) => {
                let _ = reply.send(self.engine.status());
            }
            SyncCommand::Shutdown => {}
        }
    }

    /// Persist the flag, restart from a full pull and queue every local entry.
    fn enable(&mut self, now: Instant) -> Result<(), SyncError> {
        let entries = {
            let db = lock_db(&self.db)?;
            db.set_sync_enabled(true)?;
            db.clear_sync_cursor()?;
            db.load_entries()?
        };
        tracing::info!(count = entries.len(), "sync enabled");
        self.engine.enable(now, entries);
        Ok(())
    }

    /// The epoch moves before the store is touched, so a pull already queued
    /// on the completion channel is dropped instead of written back.
    fn disable(&mut self, wipe: bool) -> Result<(), SyncError> {
        self.engine.disable();
        let db = lock_db(&self.db)?;
        if wipe {
            db.wipe_local()?;
        } else {
            db.set_sync_enabled(false)?;
            db.clear_sync_cursor()?;
        }
        tracing::info!(wipe, "sync disabled");
        Ok(())
    }

    fn drive(&mut self) {
        for action in self.engine.poll(Instant::now()) {
            match action {
                Action::Handshake { epoch } => self.spawn_handshake(epoch),
                Action::Pull { epoch } => self.spawn_pull(epoch),
                Action::Push { epoch, entries } => self.spawn_push(epoch, entries),
                Action::Teardown => self.teardown(),
            }
        }
    }

    fn spawn_handshake(&self, epoch: u64) {
        let transport = Arc::clone(&self.transport);
        let identity = self.identity.clone();
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let outcome = handshake::run(transport.as_ref(), &identity).await;
            let _ = done.send(Completion::Handshake { epoch, outcome }).await;
        });
    }

    fn spawn_pull(&self, epoch: u64) {
        let since = match lock_db(&self.db).and_then(|db| Ok(db.sync_cursor()?)) {
            Ok(cursor) => cursor,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read sync cursor, pulling everything");
                None
            }
        };
        let transport = Arc::clone(&self.transport);
        let identity = self.identity.clone();
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = match identity.get() {
                Some(init_data) => transport.pull(&init_data, since.as_deref()).await,
                None => Err(TransportError::MissingIdentity),
            };
            let _ = done.send(Completion::Pull { epoch, result }).await;
        });
    }

    fn spawn_push(&self, epoch: u64, entries: Vec<Entry>) {
        tracing::debug!(count = entries.len(), "pushing entries");
        let transport = Arc::clone(&self.transport);
        let identity = self.identity.clone();
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = match identity.get() {
                Some(init_data) => transport.push(&init_data, &entries).await,
                None => Err(TransportError::MissingIdentity),
            };
            let _ = done.send(Completion::Push { epoch, result }).await;
        });
    }

    fn handle_completion(&mut self, done: Completion) {
        let now = Instant::now();
        match done {
            Completion::Handshake { epoch, outcome } => {
                if let HandshakeOutcome::Verified { username } = &outcome {
                    if self.engine.is_current(epoch) {
                        self.store_username(username.as_deref());
                    }
                }
                self.engine.on_handshake(epoch, now, &outcome);
            }
            Completion::Pull { epoch, result } => {
                if let Ok(resp) = &result {
                    if self.engine.is_current(epoch) {
                        match self.apply_pull(resp) {
                            Ok(changed) => tracing::debug!(
                                received = resp.entries.len(),
                                changed,
                                "pull applied"
                            ),
                            Err(e) => tracing::error!(error = %e, "failed to apply pulled entries"),
                        }
                    }
                }
                self.engine.on_pull_result(epoch, now, result.as_ref().map(|_| ()));
            }
            Completion::Push { epoch, result } => {
                if let Ok(resp) = &result {
                    tracing::debug!(
                        received = resp.received,
                        written = resp.written,
                        skipped = resp.skipped,
                        "push confirmed"
                    );
                }
                self.engine.on_push_result(epoch, now, result.as_ref().map(|_| ()));
            }
        }
    }

    /// Merge a pull response into the store and advance the cursor, even
    /// when nothing changed. Returns how many local records were replaced or
    /// added.
    fn apply_pull(&self, resp: &PullResponse) -> Result<usize, SyncError> {
        let opts = SanitizeOptions::local(now_ms());
        let incoming = dedupe_latest(
            resp.entries
                .iter()
                .filter_map(|e| sanitize_entry(e, &opts))
                .collect(),
        );

        let db = lock_db(&self.db)?;
        let local = db.load_entries()?;
        let merged = merge(&local, &incoming);
        let changed = merged
            .iter()
            .filter(|e| {
                local
                    .binary_search_by(|l| l.date.cmp(&e.date))
                    .map_or(true, |i| local[i] != **e)
            })
            .count();
        if changed > 0 {
            db.save_entries(&merged)?;
        }

        let cursor = resp
            .server_time
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        db.set_sync_cursor(&cursor)?;
        db.set_cached_username(resp.username.as_deref())?;
        Ok(changed)
    }

    fn store_username(&self, username: Option<&str>) {
        let result = lock_db(&self.db).and_then(|db| Ok(db.set_cached_username(username)?));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to cache username");
        }
    }

    fn teardown(&self) {
        let result = lock_db(&self.db).and_then(|db| {
            db.set_sync_enabled(false)?;
            db.clear_sync_cursor()?;
            Ok(())
        });
        match result {
            Ok(()) => tracing::warn!("sync turned off, identity no longer exists on the server"),
            Err(e) => tracing::error!(error = %e, "failed to persist sync teardown"),
        }
    }
}
