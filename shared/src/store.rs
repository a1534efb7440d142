use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::backend::{Credential, RemoteBackend};
use crate::error::{PersistenceError, StoreError};
use crate::model::{
    GeoPoint, Position, RecordDraft, RecordId, RecordKind, TripDate, TripRecord, UnixTimeMs,
};
use crate::path::project_path;
use crate::persistence::{LocalPersistence, StorageKey};
use crate::state::{reduce, Action, StoreState};

/// User id the authentication layer hands out for guest sessions.
pub const GUEST_USER_ID: &str = "guest";

/// Where a session's records live. Chosen by the authentication layer, never
/// by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Local,
    /// Without a credential the session simply has no data.
    Remote { credential: Option<Credential> },
}

impl Mode {
    pub fn remote(token: impl Into<String>) -> Self {
        Self::Remote {
            credential: Some(Credential::new(token)),
        }
    }

    pub const fn signed_out() -> Self {
        Self::Remote { credential: None }
    }

    /// Guest users stay local; anyone else goes through the backend with
    /// whatever token they have.
    pub fn from_auth(user_id: Option<&str>, token: Option<&str>) -> Self {
        if user_id == Some(GUEST_USER_ID) {
            return Self::Local;
        }
        Self::Remote {
            credential: token.filter(|t| !t.is_empty()).map(Credential::new),
        }
    }

    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

/// What a local session starts with when nothing usable is stored.
#[derive(Clone, Debug, PartialEq)]
pub enum SeedPolicy {
    Empty,
    Records(Vec<TripRecord>),
}

impl SeedPolicy {
    /// A welcome record for visited cities, nothing for plans.
    pub fn demo(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Visited => Self::Records(vec![RecordDraft {
                city_name: "Vancouver".into(),
                country: "Canada".into(),
                emoji: crate::model::flag_emoji("CA"),
                date: TripDate::new("2024-01-01T00:00:00.000Z"),
                notes: "Welcome to Guest Mode! This is sample data.".into(),
                position: Position::new(49.2827, -123.1207),
            }
            .into_record(RecordId::new("demo-van"))]),
            RecordKind::Planned => Self::Empty,
        }
    }

    pub fn records(&self) -> Vec<TripRecord> {
        match self {
            Self::Empty => Vec::new(),
            Self::Records(records) => records.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoreConfig {
    pub kind: RecordKind,
    pub key: StorageKey,
    pub seed: SeedPolicy,
}

impl StoreConfig {
    pub fn for_kind(kind: RecordKind) -> Self {
        Self {
            kind,
            key: StorageKey::for_kind(kind),
            seed: SeedPolicy::demo(kind),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: StorageKey) -> Self {
        self.key = key;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: SeedPolicy) -> Self {
        self.seed = seed;
        self
    }
}

/// Mints `<prefix>-<millis>` ids that strictly increase within the process,
/// even when two creates land in the same millisecond.
#[derive(Debug)]
pub struct LocalIdGenerator {
    prefix: &'static str,
    last: AtomicU64,
}

impl LocalIdGenerator {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            last: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> RecordId {
        let now = UnixTimeMs::now().0;
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return RecordId::new(format!("{}-{candidate}", self.prefix)),
                Err(actual) => last = actual,
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct StoreMetrics {
    pub loads: AtomicU64,
    pub creates: AtomicU64,
    pub deletes: AtomicU64,
    pub rejections: AtomicU64,
    pub persistence_read_failures: AtomicU64,
    pub persistence_write_failures: AtomicU64,
    pub stale_results_discarded: AtomicU64,
}

impl StoreMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            loads: self.loads.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            persistence_read_failures: self.persistence_read_failures.load(Ordering::Relaxed),
            persistence_write_failures: self.persistence_write_failures.load(Ordering::Relaxed),
            stale_results_discarded: self.stale_results_discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub loads: u64,
    pub creates: u64,
    pub deletes: u64,
    pub rejections: u64,
    pub persistence_read_failures: u64,
    pub persistence_write_failures: u64,
    pub stale_results_discarded: u64,
}

/// One authentication session. Operations of a session run one at a time on
/// its own lock, so a new session never queues behind an old one.
#[derive(Clone, Debug)]
struct Session {
    generation: u64,
    mode: Mode,
    /// Cleared when local storage could not be read; the session then lives
    /// in memory only and never writes over what is stored.
    durable: bool,
    ops: Arc<Mutex<()>>,
}

impl Session {
    fn new(generation: u64, mode: Mode) -> Self {
        Self {
            generation,
            mode,
            durable: true,
            ops: Arc::new(Mutex::new(())),
        }
    }
}

// ============================================================================
// RecordStore
// ============================================================================

/// Authoritative collection of one record kind.
///
/// Loads and mutations of a session are serialized. Results that arrive after
/// the session was re-initialized are dropped, so a slow response from a
/// previous user can never land in the current one's state.
pub struct RecordStore<B: RemoteBackend, P: LocalPersistence> {
    config: StoreConfig,
    backend: Arc<B>,
    persistence: Arc<P>,
    session: RwLock<Session>,
    state: watch::Sender<StoreState>,
    ids: LocalIdGenerator,
    metrics: StoreMetrics,
}

impl<B: RemoteBackend, P: LocalPersistence> RecordStore<B, P> {
    /// Creates an idle store. Nothing is loaded until [`Self::reinitialize`].
    pub fn new(config: StoreConfig, backend: Arc<B>, persistence: Arc<P>) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        let ids = LocalIdGenerator::new(config.kind.local_id_prefix());
        Self {
            config,
            backend,
            persistence,
            session: RwLock::new(Session::new(0, Mode::signed_out())),
            state,
            ids,
            metrics: StoreMetrics::default(),
        }
    }

    /// Creates a store and loads it for `mode`.
    pub async fn open(config: StoreConfig, backend: Arc<B>, persistence: Arc<P>, mode: Mode) -> Self {
        let store = Self::new(config, backend, persistence);
        if let Err(e) = store.reinitialize(mode).await {
            debug!(error = %e, "initial load failed, reported through state");
        }
        store
    }

    pub fn kind(&self) -> RecordKind {
        self.config.kind
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.session.read().mode.clone()
    }

    pub fn state(&self) -> StoreState {
        self.state.borrow().clone()
    }

    /// Receives every settled and intermediate state.
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The current collection as a time-ordered path.
    pub fn projected_path(&self) -> Vec<GeoPoint> {
        project_path(&self.state.borrow().records)
    }

    /// Starts a new session: previous state is dropped, in-flight results
    /// from the old session are ignored, and the collection is loaded.
    #[instrument(skip(self, mode), fields(kind = %self.config.kind, local = mode.is_local()))]
    pub async fn reinitialize(&self, mode: Mode) -> Result<(), StoreError> {
        {
            let mut session = self.session.write();
            *session = Session::new(session.generation + 1, mode);
        }
        self.state.send_modify(|state| *state = StoreState::default());
        self.load().await
    }

    /// Reloads the collection for the current session.
    #[instrument(skip(self), fields(kind = %self.config.kind))]
    pub async fn load(&self) -> Result<(), StoreError> {
        let Session {
            generation,
            mode,
            ops,
            ..
        } = self.session_snapshot();
        let _op = ops.lock().await;
        self.dispatch(generation, Action::Loading);

        let result = match mode {
            Mode::Local => Ok(self.read_local(generation).await),
            Mode::Remote { credential: None } => {
                debug!("no credential, session has no records");
                Ok(Vec::new())
            }
            Mode::Remote {
                credential: Some(credential),
            } => self
                .backend
                .list_records(Some(&credential))
                .await
                .map_err(|e| {
                    warn!(error = %e, "remote load failed");
                    StoreError::load_collection(self.config.kind)
                }),
        };

        match result {
            Ok(records) => {
                let records = dedupe_ids(records);
                let count = records.len();
                self.metrics.loads.fetch_add(1, Ordering::Relaxed);
                if self.dispatch(generation, Action::Loaded(records)) {
                    info!(count, "collection loaded");
                }
                Ok(())
            }
            Err(e) => {
                self.metrics.rejections.fetch_add(1, Ordering::Relaxed);
                self.dispatch(generation, Action::LoadRejected(e.clone()));
                Err(e)
            }
        }
    }

    /// Selects a record. Selecting the current record again does nothing.
    #[instrument(skip(self, id), fields(kind = %self.config.kind, id = %id))]
    pub async fn get(&self, id: &RecordId) -> Result<(), StoreError> {
        if id.as_str().is_empty() {
            return Ok(());
        }
        let already_current = self.state.borrow().current_id() == Some(id);
        if already_current {
            debug!("record already selected");
            return Ok(());
        }

        let Session {
            generation,
            mode,
            ops,
            ..
        } = self.session_snapshot();
        let _op = ops.lock().await;
        self.dispatch(generation, Action::Loading);

        let result = match mode {
            Mode::Local => {
                let found = self.state.borrow().find(id).cloned();
                found.ok_or_else(|| StoreError::not_found(self.config.kind, id.as_str()))
            }
            Mode::Remote { credential } => self
                .backend
                .get_record(credential.as_ref(), id)
                .await
                .map_err(|e| {
                    if e.is_not_found() {
                        debug!("record not on server");
                    } else {
                        warn!(error = %e, "remote fetch failed");
                    }
                    StoreError::load_record(self.config.kind)
                }),
        };

        match result {
            Ok(record) => {
                self.dispatch(generation, Action::RecordLoaded(record));
                Ok(())
            }
            Err(e) => {
                let e = e.fold_into_load(self.config.kind);
                self.metrics.rejections.fetch_add(1, Ordering::Relaxed);
                self.dispatch(generation, Action::Rejected(e.clone()));
                Err(e)
            }
        }
    }

    /// Adds a record and selects it. On failure the collection is untouched.
    #[instrument(skip(self, draft), fields(kind = %self.config.kind))]
    pub async fn create(&self, draft: RecordDraft) -> Result<TripRecord, StoreError> {
        let Session {
            generation,
            mode,
            ops,
            ..
        } = self.session_snapshot();
        let _op = ops.lock().await;
        self.dispatch(generation, Action::Loading);

        let result = match mode {
            Mode::Local => Ok(self.create_local(generation, draft).await),
            Mode::Remote { credential } => self
                .backend
                .create_record(credential.as_ref(), &draft)
                .await
                .map_err(|e| {
                    warn!(error = %e, "remote create failed");
                    StoreError::create(self.config.kind)
                }),
        };

        match result {
            Ok(record) => {
                self.metrics.creates.fetch_add(1, Ordering::Relaxed);
                if self.dispatch(generation, Action::Created(record.clone())) {
                    info!(id = %record.id, "record created");
                }
                Ok(record)
            }
            Err(e) => {
                self.metrics.rejections.fetch_add(1, Ordering::Relaxed);
                self.dispatch(generation, Action::Rejected(e.clone()));
                Err(e)
            }
        }
    }

    /// Removes a record. The selection is cleared whichever record it was.
    #[instrument(skip(self, id), fields(kind = %self.config.kind, id = %id))]
    pub async fn delete(&self, id: &RecordId) -> Result<(), StoreError> {
        let Session {
            generation,
            mode,
            ops,
            ..
        } = self.session_snapshot();
        let _op = ops.lock().await;
        self.dispatch(generation, Action::Loading);

        let result = match mode {
            Mode::Local => {
                let remaining: Vec<TripRecord> = self
                    .state
                    .borrow()
                    .records
                    .iter()
                    .filter(|r| &r.id != id)
                    .cloned()
                    .collect();
                self.persist(generation, &remaining).await;
                Ok(())
            }
            Mode::Remote { credential } => self
                .backend
                .delete_record(credential.as_ref(), id)
                .await
                .map_err(|e| {
                    warn!(error = %e, "remote delete failed");
                    StoreError::delete(self.config.kind)
                }),
        };

        match result {
            Ok(()) => {
                self.metrics.deletes.fetch_add(1, Ordering::Relaxed);
                if self.dispatch(generation, Action::Deleted(id.clone())) {
                    info!("record deleted");
                }
                Ok(())
            }
            Err(e) => {
                self.metrics.rejections.fetch_add(1, Ordering::Relaxed);
                self.dispatch(generation, Action::Rejected(e.clone()));
                Err(e)
            }
        }
    }

    fn session_snapshot(&self) -> Session {
        self.session.read().clone()
    }

    /// Applies `action` unless the session it belongs to has been replaced.
    fn dispatch(&self, generation: u64, action: Action) -> bool {
        let name = action.name();
        let applied = self.state.send_if_modified(|state| {
            if self.session.read().generation != generation {
                return false;
            }
            let previous = std::mem::take(state);
            *state = reduce(previous, action);
            true
        });
        if !applied {
            self.metrics
                .stale_results_discarded
                .fetch_add(1, Ordering::Relaxed);
            debug!(action = name, "discarding result of a superseded session");
        }
        applied
    }

    async fn read_local(&self, generation: u64) -> Vec<TripRecord> {
        match self.persistence.read(&self.config.key).await {
            Ok(Some(records)) => records,
            Ok(None) => {
                debug!(key = %self.config.key, "nothing stored, applying seed");
                self.config.seed.records()
            }
            // Unusable payload: the seed replaces it on the next write.
            Err(e @ (PersistenceError::Corrupted { .. } | PersistenceError::ValueTooLarge { .. })) => {
                self.metrics
                    .persistence_read_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(key = %self.config.key, error = %e, "stored collection unusable, applying seed");
                self.config.seed.records()
            }
            Err(e) => {
                self.metrics
                    .persistence_read_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.mark_non_durable(generation);
                warn!(key = %self.config.key, error = %e, "storage unreadable, session kept in memory only");
                self.config.seed.records()
            }
        }
    }

    fn mark_non_durable(&self, generation: u64) {
        let mut session = self.session.write();
        if session.generation == generation {
            session.durable = false;
        }
    }

    async fn create_local(&self, generation: u64, draft: RecordDraft) -> TripRecord {
        let mut records = self.state.borrow().records.clone();

        let mut id = self.ids.next_id();
        while records.iter().any(|r| r.id == id) {
            id = self.ids.next_id();
        }

        let record = draft.into_record(id);
        records.push(record.clone());
        self.persist(generation, &records).await;
        record
    }

    // Local durability is best effort: a failed write leaves the session
    // running from memory.
    async fn persist(&self, generation: u64, records: &[TripRecord]) {
        let writable = {
            let session = self.session.read();
            session.generation == generation && session.durable
        };
        if !writable {
            debug!(key = %self.config.key, "session is not durable, skipping write");
            return;
        }
        if let Err(e) = self.persistence.write(&self.config.key, records).await {
            self.metrics
                .persistence_write_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(key = %self.config.key, error = %e, "persistence write failed, continuing in memory");
        }
    }
}

fn dedupe_ids(records: Vec<TripRecord>) -> Vec<TripRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    let before = records.len();
    let unique: Vec<TripRecord> = records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect();
    if unique.len() != before {
        warn!(dropped = before - unique.len(), "dropped records with duplicate ids");
    }
    unique
}
