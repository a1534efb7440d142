// lib.rs - travel log core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

//! Shared core of the travel log: record stores that switch between a remote
//! backend and local persistence, plus the path geometry the map draws.

pub mod backend;
pub mod config;
pub mod error;
pub mod log;
pub mod model;
pub mod path;
pub mod persistence;
pub mod render;
pub mod state;
pub mod store;
pub mod views;

pub use backend::{Credential, HttpBackend, NoBackend, RemoteBackend};
pub use config::TravelLogConfig;
pub use error::{BackendError, ConfigError, PersistenceError, StoreError};
pub use log::TravelLog;
pub use model::{
    flag_emoji, GeoPoint, GeocodedPlace, Position, RecordDraft, RecordId, RecordKind, TripDate,
    TripRecord,
};
pub use path::{project_path, resolve_connector, MapScene, Segment};
pub use persistence::{FilePersistence, LocalPersistence, MemoryPersistence, StorageKey};
pub use render::{
    orientation_degrees, place_markers, DirectionMarker, DirectionalPathRenderer, LayerKind,
    MapProjection, MapViewport, WebMercatorViewport,
};
pub use state::{reduce, Action, StoreState};
pub use store::{Mode, RecordStore, SeedPolicy, StoreConfig};
pub use views::{aggregate_countries, sort_countries, sort_records, CountrySummary, SortKey, SortOrder};
