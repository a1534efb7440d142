//! Pure path geometry over record collections.
//!
//! Nothing here caches: the same records always give the same path, so views
//! can recompute on every state change.

use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use serde::Serialize;
use serde_json::json;

use crate::model::{GeoPoint, RecordId, RecordKind, TripDate, TripRecord};

/// Records in travel order paired with their point. Records without a usable
/// position are skipped; unparseable dates go last.
pub fn ordered_positioned(records: &[TripRecord]) -> Vec<(&TripRecord, GeoPoint)> {
    let mut ordered: Vec<&TripRecord> = records.iter().collect();
    // `sort_by` is stable, so equal dates keep collection order.
    ordered.sort_by(|a, b| TripDate::chronological(&a.date, &b.date));
    ordered
        .into_iter()
        .filter_map(|record| record.geo_point().map(|point| (record, point)))
        .collect()
}

pub fn project_path(records: &[TripRecord]) -> Vec<GeoPoint> {
    ordered_positioned(records)
        .into_iter()
        .map(|(_, point)| point)
        .collect()
}

/// Same path as `[lat, lng]` pairs.
pub fn project_pairs(records: &[TripRecord]) -> Vec<[f64; 2]> {
    project_path(records).into_iter().map(GeoPoint::as_pair).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Segment {
    pub from: GeoPoint,
    pub to: GeoPoint,
}

impl Segment {
    pub const fn points(&self) -> [GeoPoint; 2] {
        [self.from, self.to]
    }
}

/// Bridge from where the visited path ends to where the planned one begins.
pub fn resolve_connector(visited: &[GeoPoint], planned: &[GeoPoint]) -> Option<Segment> {
    let from = *visited.last()?;
    let to = *planned.first()?;
    if from == to {
        return None;
    }
    Some(Segment { from, to })
}

/// A record shown as a map marker.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapPin {
    pub kind: RecordKind,
    pub id: RecordId,
    pub city_name: String,
    pub emoji: String,
    pub point: GeoPoint,
}

impl MapPin {
    pub fn label(&self) -> String {
        match self.kind {
            RecordKind::Visited => self.city_name.clone(),
            RecordKind::Planned => format!("(Planned) {}", self.city_name),
        }
    }
}

/// Everything the map draws for one pair of collections.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MapScene {
    pub visited: Vec<GeoPoint>,
    pub planned: Vec<GeoPoint>,
    pub connector: Option<Segment>,
    pub pins: Vec<MapPin>,
}

impl MapScene {
    pub fn compose(visited: &[TripRecord], planned: &[TripRecord]) -> Self {
        let visited = ordered_positioned(visited);
        let planned = ordered_positioned(planned);

        let pins = visited
            .iter()
            .map(|(record, point)| pin(RecordKind::Visited, record, *point))
            .chain(
                planned
                    .iter()
                    .map(|(record, point)| pin(RecordKind::Planned, record, *point)),
            )
            .collect();

        let visited: Vec<GeoPoint> = visited.into_iter().map(|(_, p)| p).collect();
        let planned: Vec<GeoPoint> = planned.into_iter().map(|(_, p)| p).collect();
        let connector = resolve_connector(&visited, &planned);

        Self {
            visited,
            planned,
            connector,
            pins,
        }
    }

    /// A single point has no direction, so a path needs two to be drawn.
    pub fn visited_drawable(&self) -> bool {
        self.visited.len() >= 2
    }

    pub fn planned_drawable(&self) -> bool {
        self.planned.len() >= 2
    }

    /// Drawable lines and every pin. Coordinates are `[lng, lat]`.
    pub fn to_geojson(&self) -> FeatureCollection {
        let mut features = Vec::new();

        if self.visited_drawable() {
            features.push(line_feature("visited", &self.visited));
        }
        if self.planned_drawable() {
            features.push(line_feature("planned", &self.planned));
        }
        if let Some(connector) = &self.connector {
            features.push(line_feature("connector", &connector.points()));
        }

        for pin in &self.pins {
            let mut properties = JsonObject::new();
            properties.insert("layer".into(), json!("pin"));
            properties.insert("kind".into(), json!(pin.kind));
            properties.insert("id".into(), json!(pin.id));
            properties.insert("label".into(), json!(pin.label()));
            properties.insert("emoji".into(), json!(pin.emoji));
            features.push(Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::Point(lng_lat(pin.point)))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            });
        }

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

fn pin(kind: RecordKind, record: &TripRecord, point: GeoPoint) -> MapPin {
    MapPin {
        kind,
        id: record.id.clone(),
        city_name: record.city_name.clone(),
        emoji: record.emoji.clone(),
        point,
    }
}

fn lng_lat(point: GeoPoint) -> Vec<f64> {
    vec![point.lng, point.lat]
}

fn line_feature(layer: &str, points: &[GeoPoint]) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("layer".into(), json!(layer));
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geojson::Value::LineString(
            points.iter().copied().map(lng_lat).collect(),
        ))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}
