use std::sync::Arc;

use tracing::info;

use crate::backend::{HttpBackend, RemoteBackend};
use crate::config::TravelLogConfig;
use crate::error::{ConfigError, StoreError};
use crate::model::RecordKind;
use crate::path::MapScene;
use crate::persistence::{FilePersistence, LocalPersistence};
use crate::store::{Mode, RecordStore};

/// The visited and planned stores of one user, switched together.
pub struct TravelLog<B: RemoteBackend, P: LocalPersistence> {
    visited: RecordStore<B, P>,
    planned: RecordStore<B, P>,
}

impl<B: RemoteBackend, P: LocalPersistence> TravelLog<B, P> {
    pub fn new(visited: RecordStore<B, P>, planned: RecordStore<B, P>) -> Self {
        Self { visited, planned }
    }

    pub fn visited(&self) -> &RecordStore<B, P> {
        &self.visited
    }

    pub fn planned(&self) -> &RecordStore<B, P> {
        &self.planned
    }

    pub fn store(&self, kind: RecordKind) -> &RecordStore<B, P> {
        match kind {
            RecordKind::Visited => &self.visited,
            RecordKind::Planned => &self.planned,
        }
    }

    /// Re-initializes both stores for a new session. Both are reloaded even
    /// if one of them fails.
    pub async fn set_session(&self, mode: Mode) -> Result<(), StoreError> {
        info!(local = mode.is_local(), "switching session");
        let (visited, planned) = tokio::join!(
            self.visited.reinitialize(mode.clone()),
            self.planned.reinitialize(mode),
        );
        visited.and(planned)
    }

    pub fn scene(&self) -> MapScene {
        MapScene::compose(&self.visited.state().records, &self.planned.state().records)
    }
}

impl TravelLog<HttpBackend, FilePersistence> {
    /// Idle stores wired from configuration; call [`Self::set_session`] to
    /// load them.
    pub fn from_config(config: &TravelLogConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let persistence = Arc::new(config.file_persistence());

        let open = |kind: RecordKind| -> Result<RecordStore<HttpBackend, FilePersistence>, ConfigError> {
            let backend = config.http_backend(kind)?.ok_or_else(|| {
                ConfigError::Validation(format!(
                    "{} must be set to use the http backend",
                    crate::config::ENV_API_URL
                ))
            })?;
            Ok(RecordStore::new(
                config.store_config(kind)?,
                Arc::new(backend),
                Arc::clone(&persistence),
            ))
        };

        Ok(Self::new(open(RecordKind::Visited)?, open(RecordKind::Planned)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NoBackend;
    use crate::model::{Position, RecordDraft, TripDate};
    use crate::persistence::MemoryPersistence;
    use crate::store::{SeedPolicy, StoreConfig};
    use url::Url;

    fn local_log(persistence: Arc<MemoryPersistence>) -> TravelLog<NoBackend, MemoryPersistence> {
        let store = |kind| {
            RecordStore::new(
                StoreConfig::for_kind(kind).with_seed(SeedPolicy::Empty),
                Arc::new(NoBackend),
                Arc::clone(&persistence),
            )
        };
        TravelLog::new(store(RecordKind::Visited), store(RecordKind::Planned))
    }

    #[tokio::test]
    async fn scene_connects_visited_to_planned() {
        let log = local_log(Arc::new(MemoryPersistence::new()));
        log.set_session(Mode::Local).await.unwrap();

        for (city, lat, date) in [("A", 10.0, "2020-01-01"), ("B", 20.0, "2020-02-01")] {
            log.visited()
                .create(RecordDraft::new(city, Position::new(lat, lat), TripDate::new(date)))
                .await
                .unwrap();
        }
        for (city, lat, date) in [("C", 30.0, "2030-01-01"), ("D", 40.0, "2030-02-01")] {
            log.store(RecordKind::Planned)
                .create(RecordDraft::new(city, Position::new(lat, lat), TripDate::new(date)))
                .await
                .unwrap();
        }

        let scene = log.scene();
        let connector = scene.connector.unwrap();
        assert_eq!(connector.from.as_pair(), [20.0, 20.0]);
        assert_eq!(connector.to.as_pair(), [30.0, 30.0]);
        assert!(log.planned().state().records[0].id.as_str().starts_with("plan-"));
    }

    #[tokio::test]
    async fn stores_use_separate_keys() {
        let persistence = Arc::new(MemoryPersistence::new());
        let log = local_log(persistence.clone());
        log.set_session(Mode::Local).await.unwrap();
        log.visited()
            .create(RecordDraft::new("Rome", Position::new(41.9, 12.5), TripDate::new("2024-01-01")))
            .await
            .unwrap();

        assert!(log.planned().state().is_empty());
        let fresh = local_log(persistence);
        fresh.set_session(Mode::Local).await.unwrap();
        assert_eq!(fresh.visited().state().len(), 1);
        assert!(fresh.planned().state().is_empty());
    }

    #[test]
    fn from_config_requires_api_url() {
        assert!(TravelLog::from_config(&TravelLogConfig::default()).is_err());

        let config = TravelLogConfig {
            api_base_url: Some(Url::parse("http://localhost:8000").unwrap()),
            ..TravelLogConfig::default()
        };
        let log = TravelLog::from_config(&config).unwrap();
        assert_eq!(log.visited().kind(), RecordKind::Visited);
        assert_eq!(log.planned().config().key.as_str(), "planned_cities");
    }
}
