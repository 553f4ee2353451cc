//! Location discovery: attribute filtering and map-marker clustering.
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::models::{Id, Location, Town};

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LocationQuery {
    /// Town slug.
    pub town: Option<String>,
    pub category: Option<String>,
    /// Comma separated; every tag must be present.
    pub tag: Option<String>,
    /// Free text over name, address and category.
    pub q: Option<String>,
    #[serde(default)]
    pub with_coordinates: bool,
}

impl LocationQuery {
    fn tags(&self) -> Vec<String> {
        self.tag
            .as_deref()
            .map(|t| {
                t.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn filter_locations(locations: Vec<Location>, towns: &[Town], query: &LocationQuery) -> Vec<Location> {
    let town_id: Option<Option<Id>> = query
        .town
        .as_deref()
        .map(|slug| towns.iter().find(|t| t.slug == slug).map(|t| t.id));
    let category = query.category.as_deref().map(str::to_lowercase);
    let tags = query.tags();
    let needle = query.q.as_deref().map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty());

    locations
        .into_iter()
        .filter(|l| match town_id {
            None => true,
            Some(Some(id)) => l.town_id == id,
            // unknown town slug matches nothing
            Some(None) => false,
        })
        .filter(|l| match &category {
            None => true,
            Some(c) => l.business_category.as_deref().map(|lc| lc.eq_ignore_ascii_case(c)).unwrap_or(false),
        })
        .filter(|l| tags.iter().all(|t| l.business_tags.iter().any(|lt| lt.eq_ignore_ascii_case(t))))
        .filter(|l| match &needle {
            None => true,
            Some(n) => {
                l.name.to_lowercase().contains(n)
                    || l.address.to_lowercase().contains(n)
                    || l.business_category.as_deref().map(|c| c.to_lowercase().contains(n.as_str())).unwrap_or(false)
            }
        })
        .filter(|l| !query.with_coordinates || l.coordinates().is_some())
        .collect()
}

#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct Viewport {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
    pub zoom: u8,
}

impl Viewport {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        let lat_ok = lat >= self.min_lat && lat <= self.max_lat;
        // a viewport may straddle the antimeridian
        let lng_ok = if self.min_lng <= self.max_lng {
            lng >= self.min_lng && lng <= self.max_lng
        } else {
            lng >= self.min_lng || lng <= self.max_lng
        };
        lat_ok && lng_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapPoint {
    pub location_id: Id,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MapMarker {
    Point { location_id: Id, lat: f64, lng: f64 },
    Cluster { lat: f64, lng: f64, count: usize, location_ids: Vec<Id> },
}

pub const MAX_ZOOM: u8 = 22;
pub const DEFAULT_RADIUS_PX: f64 = 60.0;
const TILE_SIZE: f64 = 256.0;
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Web Mercator world pixel coordinates at `zoom`.
fn project(lat: f64, lng: f64, zoom: u8) -> (f64, f64) {
    let scale = TILE_SIZE * f64::from(1u32 << zoom.min(MAX_ZOOM));
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let x = (lng + 180.0) / 360.0 * scale;
    let y = (1.0 - ((PI / 4.0 + lat / 2.0).tan()).ln() / PI) / 2.0 * scale;
    (x, y)
}

/// Greedy radius clustering in screen pixels. Points are taken in id
/// order; each unclaimed point claims every unclaimed point within
/// `radius_px` of it. Groups of one stay points, the rest become a cluster
/// at the mean position of its members.
pub fn cluster(points: &[MapPoint], viewport: &Viewport, radius_px: f64) -> Vec<MapMarker> {
    let radius = if radius_px > 0.0 { radius_px } else { DEFAULT_RADIUS_PX };
    let world = TILE_SIZE * f64::from(1u32 << viewport.zoom.min(MAX_ZOOM));
    let mut sorted: Vec<&MapPoint> = points.iter().filter(|p| viewport.contains(p.lat, p.lng)).collect();
    sorted.sort_by_key(|p| p.location_id);
    let projected: Vec<(f64, f64)> = sorted.iter().map(|p| project(p.lat, p.lng, viewport.zoom)).collect();

    let mut claimed = vec![false; sorted.len()];
    let mut markers = Vec::new();
    for seed in 0..sorted.len() {
        if claimed[seed] {
            continue;
        }
        let (sx, sy) = projected[seed];
        let mut members = Vec::new();
        for i in seed..sorted.len() {
            if claimed[i] {
                continue;
            }
            let (x, y) = projected[i];
            // x wraps around the antimeridian
            let dx = (x - sx).abs().min(world - (x - sx).abs());
            if dx.hypot(y - sy) <= radius {
                claimed[i] = true;
                members.push(sorted[i]);
            }
        }

        markers.push(if let [only] = members.as_slice() {
            MapMarker::Point { location_id: only.location_id, lat: only.lat, lng: only.lng }
        } else {
            let n = members.len() as f64;
            MapMarker::Cluster {
                lat: members.iter().map(|p| p.lat).sum::<f64>() / n,
                lng: members.iter().map(|p| p.lng).sum::<f64>() / n,
                count: members.len(),
                location_ids: members.iter().map(|p| p.location_id).collect(),
            }
        });
    }
    markers
}

pub fn map_points(locations: &[Location]) -> Vec<MapPoint> {
    locations
        .iter()
        .filter_map(|l| l.coordinates().map(|(lat, lng)| MapPoint { location_id: l.id, lat, lng }))
        .collect()
}
