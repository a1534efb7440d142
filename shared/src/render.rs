//! Direction markers along projected paths.
//!
//! Marker angles are measured in screen space, so they depend on the current
//! zoom and center. Renderers subscribe to viewport changes and recompute
//! every layer they own whenever the map moves.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::trace;

use crate::model::{GeoPoint, RecordKind};
use crate::path::MapScene;

/// Where along a segment the marker sits, as a fraction from its start.
pub const MARKER_POSITION: f64 = 0.6;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

/// Geographic to pixel transform, y growing downwards.
pub trait MapProjection {
    fn project_to_screen(&self, point: GeoPoint) -> ScreenPoint;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewportChange {
    Zoom,
    Pan,
    Resize,
}

pub type ListenerId = u64;

pub type ViewportListener = dyn Fn(ViewportChange) + Send + Sync;

/// Listener registry for viewport changes.
///
/// The lock is never held while listeners run, so a listener may subscribe,
/// unsubscribe or read the viewport from inside its callback.
pub struct ViewportEvents {
    listeners: Mutex<Vec<(ListenerId, Arc<ViewportListener>)>>,
    next_id: AtomicU64,
}

impl ViewportEvents {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn on(&self, listener: Arc<ViewportListener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        id
    }

    /// Unknown ids are ignored.
    pub fn off(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    pub fn emit(&self, change: ViewportChange) {
        let snapshot: Vec<Arc<ViewportListener>> = {
            let guard = self.listeners.lock();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in snapshot {
            cb(change);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

impl Default for ViewportEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// A live map: a projection plus change notifications.
pub trait MapViewport: MapProjection + Send + Sync {
    fn subscribe(&self, listener: Arc<ViewportListener>) -> ListenerId;
    fn unsubscribe(&self, id: ListenerId);
}

// ============================================================================
// Web Mercator
// ============================================================================

#[derive(Clone, Copy, Debug)]
struct ViewState {
    center: GeoPoint,
    zoom: f64,
    width: f64,
    height: f64,
}

/// Slippy-map viewport with 256px tiles.
pub struct WebMercatorViewport {
    view: RwLock<ViewState>,
    events: ViewportEvents,
}

impl WebMercatorViewport {
    pub const TILE_SIZE: f64 = 256.0;
    const MAX_SIN_LAT: f64 = 0.9999;

    pub fn new(center: GeoPoint, zoom: f64, width: f64, height: f64) -> Self {
        Self {
            view: RwLock::new(ViewState {
                center,
                zoom,
                width,
                height,
            }),
            events: ViewportEvents::new(),
        }
    }

    pub fn center(&self) -> GeoPoint {
        self.view.read().center
    }

    pub fn zoom(&self) -> f64 {
        self.view.read().zoom
    }

    pub fn pan_to(&self, center: GeoPoint) {
        self.view.write().center = center;
        self.events.emit(ViewportChange::Pan);
    }

    pub fn set_zoom(&self, zoom: f64) {
        self.view.write().zoom = zoom;
        self.events.emit(ViewportChange::Zoom);
    }

    pub fn resize(&self, width: f64, height: f64) {
        {
            let mut view = self.view.write();
            view.width = width;
            view.height = height;
        }
        self.events.emit(ViewportChange::Resize);
    }

    pub fn listener_count(&self) -> usize {
        self.events.len()
    }

    fn world(point: GeoPoint, zoom: f64) -> (f64, f64) {
        let scale = Self::TILE_SIZE * zoom.exp2();
        let x = (point.lng + 180.0) / 360.0 * scale;
        let sin_lat = point
            .lat
            .to_radians()
            .sin()
            .clamp(-Self::MAX_SIN_LAT, Self::MAX_SIN_LAT);
        let y = (0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI)) * scale;
        (x, y)
    }
}

impl MapProjection for WebMercatorViewport {
    fn project_to_screen(&self, point: GeoPoint) -> ScreenPoint {
        let view = *self.view.read();
        let (x, y) = Self::world(point, view.zoom);
        let (cx, cy) = Self::world(view.center, view.zoom);
        ScreenPoint {
            x: x - cx + view.width / 2.0,
            y: y - cy + view.height / 2.0,
        }
    }
}

impl MapViewport for WebMercatorViewport {
    fn subscribe(&self, listener: Arc<ViewportListener>) -> ListenerId {
        self.events.on(listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.events.off(id);
    }
}

// ============================================================================
// Markers
// ============================================================================

/// Clockwise rotation in degrees for a marker travelling `from` -> `to`.
///
/// Due east is 0. Screen y grows downwards, so the flipped `dy` makes a
/// segment heading up the screen come out at -90.
pub fn orientation_degrees(from: ScreenPoint, to: ScreenPoint) -> f64 {
    let dx = to.x - from.x;
    let dy = -(to.y - from.y);
    -(dy.atan2(dx).to_degrees())
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionMarker {
    pub position: GeoPoint,
    pub angle_deg: f64,
}

/// One marker per consecutive pair, projected through `projection` as it is
/// right now.
pub fn place_markers<P: MapProjection + ?Sized>(
    path: &[GeoPoint],
    projection: &P,
) -> Vec<DirectionMarker> {
    path.windows(2)
        .map(|pair| {
            let (from, to) = (pair[0], pair[1]);
            let angle_deg = orientation_degrees(
                projection.project_to_screen(from),
                projection.project_to_screen(to),
            );
            DirectionMarker {
                position: from.lerp(to, MARKER_POSITION),
                angle_deg,
            }
        })
        .collect()
}

// ============================================================================
// Layers
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Visited,
    Planned,
    Connector,
}

impl LayerKind {
    pub const ALL: [Self; 3] = [Self::Visited, Self::Planned, Self::Connector];

    const fn index(self) -> usize {
        match self {
            Self::Visited => 0,
            Self::Planned => 1,
            Self::Connector => 2,
        }
    }

    pub const fn style(self) -> LayerStyle {
        match self {
            Self::Visited => LayerStyle {
                arrow_color: "#2ecc71",
                line_color: None,
                pane: "arrows",
                z_index: 650,
                dash_array: None,
            },
            Self::Planned => LayerStyle {
                arrow_color: "#ff3b30",
                line_color: Some("#ff9800"),
                pane: "arrows-planned",
                z_index: 651,
                dash_array: None,
            },
            Self::Connector => LayerStyle {
                arrow_color: "#ff3b30",
                line_color: Some("#ff9800"),
                pane: "arrows-connector",
                z_index: 652,
                dash_array: Some("6 6"),
            },
        }
    }
}

impl From<RecordKind> for LayerKind {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Visited => Self::Visited,
            RecordKind::Planned => Self::Planned,
        }
    }
}

/// `None` colors fall back to the map's default polyline style.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStyle {
    pub arrow_color: &'static str,
    pub line_color: Option<&'static str>,
    pub pane: &'static str,
    pub z_index: u32,
    pub dash_array: Option<&'static str>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PathLayer {
    pub kind: LayerKind,
    pub points: Vec<GeoPoint>,
    pub markers: Vec<DirectionMarker>,
}

impl PathLayer {
    fn empty(kind: LayerKind) -> Self {
        Self {
            kind,
            points: Vec::new(),
            markers: Vec::new(),
        }
    }

    pub fn style(&self) -> LayerStyle {
        self.kind.style()
    }

    pub fn is_drawable(&self) -> bool {
        self.points.len() >= 2
    }
}

struct LayerSet {
    layers: [PathLayer; 3],
    revision: u64,
}

impl LayerSet {
    fn recompute<P: MapProjection + ?Sized>(&mut self, projection: &P) {
        for layer in &mut self.layers {
            layer.markers = place_markers(&layer.points, projection);
        }
        self.revision += 1;
    }
}

/// Keeps the visited, planned and connector layers' markers in step with the
/// viewport. Unsubscribes when dropped.
pub struct DirectionalPathRenderer<V: MapViewport + 'static> {
    viewport: Arc<V>,
    layers: Arc<Mutex<LayerSet>>,
    listener: ListenerId,
}

impl<V: MapViewport + 'static> DirectionalPathRenderer<V> {
    pub fn new(viewport: Arc<V>) -> Self {
        let layers = Arc::new(Mutex::new(LayerSet {
            layers: LayerKind::ALL.map(PathLayer::empty),
            revision: 0,
        }));

        let weak_layers: Weak<Mutex<LayerSet>> = Arc::downgrade(&layers);
        let weak_viewport: Weak<V> = Arc::downgrade(&viewport);
        let listener = viewport.subscribe(Arc::new(move |change: ViewportChange| {
            let (Some(layers), Some(viewport)) = (weak_layers.upgrade(), weak_viewport.upgrade())
            else {
                return;
            };
            trace!(?change, "viewport changed, recomputing markers");
            layers.lock().recompute(viewport.as_ref());
        }));

        Self {
            viewport,
            layers,
            listener,
        }
    }

    pub fn viewport(&self) -> &Arc<V> {
        &self.viewport
    }

    /// Replaces one layer's coordinates and recomputes its markers.
    pub fn set_path(&self, kind: LayerKind, points: Vec<GeoPoint>) {
        let mut set = self.layers.lock();
        let layer = &mut set.layers[kind.index()];
        layer.markers = place_markers(&points, self.viewport.as_ref());
        layer.points = points;
        set.revision += 1;
    }

    pub fn show_scene(&self, scene: &MapScene) {
        self.set_path(LayerKind::Visited, scene.visited.clone());
        self.set_path(LayerKind::Planned, scene.planned.clone());
        self.set_path(
            LayerKind::Connector,
            scene.connector.map(|c| c.points().to_vec()).unwrap_or_default(),
        );
    }

    pub fn layer(&self, kind: LayerKind) -> PathLayer {
        self.layers.lock().layers[kind.index()].clone()
    }

    pub fn markers(&self, kind: LayerKind) -> Vec<DirectionMarker> {
        self.layers.lock().layers[kind.index()].markers.clone()
    }

    /// Bumped on every recomputation.
    pub fn revision(&self) -> u64 {
        self.layers.lock().revision
    }
}

impl<V: MapViewport + 'static> Drop for DirectionalPathRenderer<V> {
    fn drop(&mut self) {
        self.viewport.unsubscribe(self.listener);
    }
}
