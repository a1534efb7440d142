//! Store state and its transition function.
//!
//! `reduce` is pure: the async store computes an [`Action`] from whatever I/O
//! it performed and folds it into the previous state. Nothing here knows
//! about backends, persistence or runtimes, so the same transitions can be
//! driven by a UI event loop, a test, or the [`crate::store::RecordStore`].

use serde::Serialize;

use crate::error::StoreError;
use crate::model::{RecordId, TripRecord};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    pub records: Vec<TripRecord>,
    pub is_loading: bool,
    #[serde(rename = "currentRecord")]
    pub current: Option<TripRecord>,
    pub error: Option<StoreError>,
}

impl StoreState {
    pub fn find(&self, id: &RecordId) -> Option<&TripRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    pub fn current_id(&self) -> Option<&RecordId> {
        self.current.as_ref().map(|r| &r.id)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(StoreError::message)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outcome of one step of a store operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Loading,
    Loaded(Vec<TripRecord>),
    RecordLoaded(TripRecord),
    Created(TripRecord),
    Deleted(RecordId),
    /// A single-record operation failed; the collection stays as it was.
    Rejected(StoreError),
    /// The collection itself could not be loaded; nothing stale is kept.
    LoadRejected(StoreError),
}

impl Action {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Loaded(_) => "loaded",
            Self::RecordLoaded(_) => "record_loaded",
            Self::Created(_) => "created",
            Self::Deleted(_) => "deleted",
            Self::Rejected(_) => "rejected",
            Self::LoadRejected(_) => "load_rejected",
        }
    }
}

pub fn reduce(mut state: StoreState, action: Action) -> StoreState {
    match action {
        Action::Loading => {
            state.is_loading = true;
            state.error = None;
        }
        Action::Loaded(records) => {
            state.is_loading = false;
            state.error = None;
            // Keep the selection only if it survived the reload.
            state.current = state
                .current
                .take()
                .and_then(|current| records.iter().find(|r| r.id == current.id).cloned());
            state.records = records;
        }
        Action::RecordLoaded(record) => {
            state.is_loading = false;
            match state.records.iter_mut().find(|r| r.id == record.id) {
                Some(slot) => *slot = record.clone(),
                None => state.records.push(record.clone()),
            }
            state.current = Some(record);
        }
        Action::Created(record) => {
            state.is_loading = false;
            state.records.retain(|r| r.id != record.id);
            state.records.push(record.clone());
            state.current = Some(record);
        }
        Action::Deleted(id) => {
            state.is_loading = false;
            state.records.retain(|r| r.id != id);
            state.current = None;
        }
        Action::Rejected(error) => {
            state.is_loading = false;
            state.error = Some(error);
        }
        Action::LoadRejected(error) => {
            state.is_loading = false;
            state.records.clear();
            state.current = None;
            state.error = Some(error);
        }
    }
    state
}
