//! List projections: sorted records and per-country summaries.
//!
//! Unlike the map path, lists treat an unparseable date as the epoch, so such
//! records sort first ascending and last descending.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::model::{TripDate, TripRecord};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Name,
    Date,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::Asc => ordering,
            Self::Desc => ordering.reverse(),
        }
    }
}

fn list_timestamp(date: &TripDate) -> i64 {
    date.timestamp_ms().unwrap_or(0)
}

/// Defaults of the city list: newest first.
pub const RECORD_LIST_DEFAULT: (SortKey, SortOrder) = (SortKey::Date, SortOrder::Desc);

/// Defaults of the country list: alphabetical.
pub const COUNTRY_LIST_DEFAULT: (SortKey, SortOrder) = (SortKey::Name, SortOrder::Asc);

/// Stable sort; names compare case-insensitively.
pub fn sort_records(records: &[TripRecord], key: SortKey, order: SortOrder) -> Vec<TripRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| {
        let ordering = match key {
            SortKey::Name => a.city_name.to_lowercase().cmp(&b.city_name.to_lowercase()),
            SortKey::Date => list_timestamp(&a.date).cmp(&list_timestamp(&b.date)),
        };
        order.apply(ordering)
    });
    sorted
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountrySummary {
    pub country: String,
    pub emoji: String,
    /// Latest visit in epoch milliseconds, 0 when no date parsed.
    pub latest_date_ms: i64,
    pub record_count: usize,
}

/// One entry per country, in order of first appearance. The first record
/// seen decides the emoji.
pub fn aggregate_countries(records: &[TripRecord]) -> Vec<CountrySummary> {
    let mut summaries: Vec<CountrySummary> = Vec::new();
    for record in records {
        let date = list_timestamp(&record.date);
        match summaries.iter_mut().find(|s| s.country == record.country) {
            Some(summary) => {
                summary.latest_date_ms = summary.latest_date_ms.max(date);
                summary.record_count += 1;
            }
            None => summaries.push(CountrySummary {
                country: record.country.clone(),
                emoji: record.emoji.clone(),
                latest_date_ms: date,
                record_count: 1,
            }),
        }
    }
    summaries
}

pub fn sort_countries(countries: &mut [CountrySummary], key: SortKey, order: SortOrder) {
    countries.sort_by(|a, b| {
        let ordering = match key {
            SortKey::Name => a.country.to_lowercase().cmp(&b.country.to_lowercase()),
            SortKey::Date => a.latest_date_ms.cmp(&b.latest_date_ms),
        };
        order.apply(ordering)
    });
}
