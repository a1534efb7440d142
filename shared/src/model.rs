use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{cmp::Ordering, fmt};

/// Offset between an ASCII capital letter and its regional indicator symbol.
pub const REGIONAL_INDICATOR_OFFSET: u32 = 127_397;

// --- Identity ---

/// Record identity, unique within one store.
///
/// Backends are free to hand out numeric ids; they are kept in their decimal
/// text form so comparisons behave the same regardless of the wire type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(Self(s)),
            Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "record id must be a string or number, got {other}"
            ))),
        }
    }
}

/// Explicit timestamp unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    pub fn now() -> Self {
        Self(u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0))
    }
}

// --- Dates ---

/// A trip date exactly as it was stored or received.
///
/// The raw text is kept even when it does not parse, so a malformed value
/// survives a round trip through persistence untouched. Parsing happens on
/// demand and never fails loudly.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TripDate(String);

impl TripDate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts RFC 3339, a naive ISO date-time (read as UTC) or a bare
    /// `YYYY-MM-DD` date.
    pub fn parse(&self) -> Option<DateTime<Utc>> {
        let raw = self.0.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(naive.and_utc());
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.parse().map(|dt| dt.timestamp_millis())
    }

    pub fn is_valid(&self) -> bool {
        self.parse().is_some()
    }

    /// Ascending order with unparseable dates after every valid one.
    pub fn chronological(a: &Self, b: &Self) -> Ordering {
        match (a.timestamp_ms(), b.timestamp_ms()) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

impl<'de> Deserialize<'de> for TripDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        };
        Ok(Self(raw))
    }
}

// --- Coordinates ---

/// A finite lat/lng pair, the unit every path computation works in.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        Some(Self { lat, lng })
    }

    pub const fn as_pair(self) -> [f64; 2] {
        [self.lat, self.lng]
    }

    /// Linear interpolation in lat/lng space.
    pub fn lerp(self, to: Self, t: f64) -> Self {
        Self {
            lat: self.lat + (to.lat - self.lat) * t,
            lng: self.lng + (to.lng - self.lng) * t,
        }
    }
}

impl From<[f64; 2]> for GeoPoint {
    fn from([lat, lng]: [f64; 2]) -> Self {
        Self { lat, lng }
    }
}

/// Stored position of a record. Either half may be missing or garbage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(
        default,
        deserialize_with = "lenient_coordinate",
        skip_serializing_if = "Option::is_none"
    )]
    pub lat: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_coordinate",
        skip_serializing_if = "Option::is_none"
    )]
    pub lng: Option<f64>,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat: Some(lat),
            lng: Some(lng),
        }
    }

    /// `None` unless both halves are present and finite.
    pub fn geo_point(&self) -> Option<GeoPoint> {
        GeoPoint::new(self.lat?, self.lng?)
    }
}

impl From<GeoPoint> for Position {
    fn from(p: GeoPoint) -> Self {
        Self::new(p.lat, p.lng)
    }
}

// Numbers and numeric strings are accepted; anything else becomes absent.
fn lenient_coordinate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(value.filter(|v| v.is_finite()))
}

// --- Records ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Visited,
    Planned,
}

impl RecordKind {
    pub const fn noun(self) -> &'static str {
        match self {
            Self::Visited => "city",
            Self::Planned => "plan",
        }
    }

    pub const fn plural(self) -> &'static str {
        match self {
            Self::Visited => "cities",
            Self::Planned => "plans",
        }
    }

    /// Prefix for ids minted without a backend.
    pub const fn local_id_prefix(self) -> &'static str {
        match self {
            Self::Visited => "guest",
            Self::Planned => "plan",
        }
    }

    pub const fn default_storage_key(self) -> &'static str {
        match self {
            Self::Visited => "guest_cities",
            Self::Planned => "planned_cities",
        }
    }

    pub const fn default_collection(self) -> &'static str {
        self.plural()
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Visited => "visited",
            Self::Planned => "planned",
        })
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRecord {
    pub id: RecordId,
    #[serde(default)]
    pub city_name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub date: TripDate,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub position: Position,
}

impl TripRecord {
    pub fn geo_point(&self) -> Option<GeoPoint> {
        self.position.geo_point()
    }
}

// Notes are free text typed by the user; keep them out of logs.
impl fmt::Debug for TripRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TripRecord")
            .field("id", &self.id)
            .field("city_name", &self.city_name)
            .field("country", &self.country)
            .field("date", &self.date)
            .field("position", &self.position)
            .field("notes_present", &!self.notes.is_empty())
            .finish()
    }
}

/// A record before it has an identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    #[serde(default)]
    pub city_name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub date: TripDate,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub position: Position,
}

impl RecordDraft {
    pub fn new(city_name: impl Into<String>, position: Position, date: TripDate) -> Self {
        Self {
            city_name: city_name.into(),
            position,
            date,
            ..Self::default()
        }
    }

    /// Prefills place fields from a reverse-geocode answer.
    pub fn from_place(place: &GeocodedPlace, position: Position, date: TripDate) -> Self {
        Self {
            city_name: place.display_city().to_string(),
            country: place.country_name.clone(),
            emoji: flag_emoji(&place.country_code),
            date,
            notes: String::new(),
            position,
        }
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>, country_code: &str) -> Self {
        self.country = country.into();
        self.emoji = flag_emoji(country_code);
        self
    }

    pub fn into_record(self, id: RecordId) -> TripRecord {
        TripRecord {
            id,
            city_name: self.city_name,
            country: self.country,
            emoji: self.emoji,
            date: self.date,
            notes: self.notes,
            position: self.position,
        }
    }
}

/// Answer of the external reverse-geocoding service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodedPlace {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub locality: String,
    #[serde(default)]
    pub country_name: String,
    #[serde(default)]
    pub country_code: String,
}

impl GeocodedPlace {
    pub fn display_city(&self) -> &str {
        if self.city.is_empty() {
            &self.locality
        } else {
            &self.city
        }
    }
}

/// Two-letter country code to flag emoji. Anything that is not exactly two
/// ASCII letters yields an empty string.
pub fn flag_emoji(country_code: &str) -> String {
    let code = country_code.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return String::new();
    }
    code.chars()
        .filter_map(|c| char::from_u32(REGIONAL_INDICATOR_OFFSET + c.to_ascii_uppercase() as u32))
        .collect()
}
