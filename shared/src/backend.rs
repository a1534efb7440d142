use std::fmt;
use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{instrument, warn};
use url::Url;

use crate::error::BackendError;
use crate::model::{Position, RecordDraft, RecordId, TripDate, TripRecord};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bearer token of an authenticated session. Never printed.
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::new(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for Credential {}

/// Server side of a remote-mode store.
///
/// Every call takes the session credential when there is one; implementations
/// send it as a bearer token and treat any non-2xx answer as an error.
#[async_trait::async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn list_records(
        &self,
        credential: Option<&Credential>,
    ) -> Result<Vec<TripRecord>, BackendError>;

    async fn get_record(
        &self,
        credential: Option<&Credential>,
        id: &RecordId,
    ) -> Result<TripRecord, BackendError>;

    /// The returned record carries the identity the server assigned.
    async fn create_record(
        &self,
        credential: Option<&Credential>,
        draft: &RecordDraft,
    ) -> Result<TripRecord, BackendError>;

    async fn delete_record(
        &self,
        credential: Option<&Credential>,
        id: &RecordId,
    ) -> Result<(), BackendError>;
}

/// Backend for deployments that only ever run local sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackend;

impl NoBackend {
    fn unavailable() -> BackendError {
        BackendError::Transport("no remote backend configured".into())
    }
}

#[async_trait::async_trait]
impl RemoteBackend for NoBackend {
    async fn list_records(&self, _: Option<&Credential>) -> Result<Vec<TripRecord>, BackendError> {
        Err(Self::unavailable())
    }

    async fn get_record(&self, _: Option<&Credential>, _: &RecordId) -> Result<TripRecord, BackendError> {
        Err(Self::unavailable())
    }

    async fn create_record(
        &self,
        _: Option<&Credential>,
        _: &RecordDraft,
    ) -> Result<TripRecord, BackendError> {
        Err(Self::unavailable())
    }

    async fn delete_record(&self, _: Option<&Credential>, _: &RecordId) -> Result<(), BackendError> {
        Err(Self::unavailable())
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    #[serde(rename = "_id", default)]
    object_id: Option<RecordId>,
    #[serde(default)]
    id: Option<RecordId>,
    #[serde(default)]
    city_name: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    emoji: String,
    #[serde(default)]
    date: TripDate,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    position: Position,
}

/// Turns a server document into a record, preferring `_id` over `id`.
pub fn normalize_record(value: Value) -> Result<TripRecord, BackendError> {
    let wire: WireRecord =
        serde_json::from_value(value).map_err(|e| BackendError::Decode(e.to_string()))?;
    let id = wire
        .object_id
        .or(wire.id)
        .ok_or(BackendError::MissingIdentity)?;

    Ok(TripRecord {
        id,
        city_name: wire.city_name,
        country: wire.country,
        emoji: wire.emoji,
        date: wire.date,
        notes: wire.notes,
        position: wire.position,
    })
}

/// A list response that is not an array counts as empty. Documents without
/// any identity are dropped.
pub fn normalize_list(value: Value) -> Result<Vec<TripRecord>, BackendError> {
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match normalize_record(item) {
            Ok(record) => records.push(record),
            Err(BackendError::MissingIdentity) => warn!("dropping record without identity"),
            Err(e) => return Err(e),
        }
    }
    Ok(records)
}

// ============================================================================
// HTTP
// ============================================================================

/// JSON-over-HTTP backend: `{base}/{collection}` and `{base}/{collection}/{id}`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    collection: String,
}

impl HttpBackend {
    pub fn new(
        base_url: Url,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, collection))
    }

    pub fn with_client(client: reqwest::Client, base_url: Url, collection: impl Into<String>) -> Self {
        Self {
            client,
            base_url,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn endpoint(&self, id: Option<&RecordId>) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| BackendError::InvalidUrl(self.base_url.to_string()))?;
            segments.pop_if_empty().push(&self.collection);
            if let Some(id) = id {
                segments.push(id.as_str());
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        credential: Option<&Credential>,
    ) -> Result<Response, BackendError> {
        let request = match credential {
            Some(credential) => request.bearer_auth(credential.expose()),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    // An empty or non-JSON success body reads as `null`.
    async fn json_body(response: Response) -> Result<Value, BackendError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }
}

#[async_trait::async_trait]
impl RemoteBackend for HttpBackend {
    #[instrument(skip(self, credential), fields(collection = %self.collection))]
    async fn list_records(
        &self,
        credential: Option<&Credential>,
    ) -> Result<Vec<TripRecord>, BackendError> {
        let url = self.endpoint(None)?;
        let response = self.send(self.client.get(url), credential).await?;
        normalize_list(Self::json_body(response).await?)
    }

    #[instrument(skip(self, credential, id), fields(collection = %self.collection, id = %id))]
    async fn get_record(
        &self,
        credential: Option<&Credential>,
        id: &RecordId,
    ) -> Result<TripRecord, BackendError> {
        let url = self.endpoint(Some(id))?;
        let response = self.send(self.client.get(url), credential).await?;
        normalize_record(Self::json_body(response).await?)
    }

    #[instrument(skip(self, credential, draft), fields(collection = %self.collection))]
    async fn create_record(
        &self,
        credential: Option<&Credential>,
        draft: &RecordDraft,
    ) -> Result<TripRecord, BackendError> {
        let url = self.endpoint(None)?;
        let response = self.send(self.client.post(url).json(draft), credential).await?;
        normalize_record(Self::json_body(response).await?)
    }

    #[instrument(skip(self, credential, id), fields(collection = %self.collection, id = %id))]
    async fn delete_record(
        &self,
        credential: Option<&Credential>,
        id: &RecordId,
    ) -> Result<(), BackendError> {
        let url = self.endpoint(Some(id))?;
        self.send(self.client.delete(url), credential).await?;
        Ok(())
    }
}
