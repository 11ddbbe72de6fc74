//! Boundary to the road-routing provider (OpenRouteService).
//!
//! Provider failures never escape this module: with no credential or on
//! any network or parse error the caller receives a straight-line
//! segment computed from the haversine distance.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::geo::haversine_km;
use crate::AVERAGE_SPEED_KMPH;

const PROVIDER_URL: &str = "https://api.openrouteservice.org/v2/directions/driving-car/json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Minimum spacing between sequential provider calls in a batch.
const BATCH_CALL_FLOOR: Duration = Duration::from_millis(200);
/// Environment key consulted when a request carries no credential.
pub const API_KEY_ENV: &str = "OPENROUTE_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct RoutePoint {
    pub lat: f64,
    pub lng: f64,
}

/// Driving route between two points: kilometers, minutes, and the road
/// path as coordinates.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RouteSegment {
    pub distance: f64,
    pub duration: f64,
    pub geometry: Vec<RoutePoint>,
}

#[derive(Debug)]
enum ProviderError {
    Network(String),
    Provider(String),
    Parse(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Network(msg) => write!(f, "network error: {}", msg),
            ProviderError::Provider(msg) => write!(f, "provider error: {}", msg),
            ProviderError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

/// Fetches the driving route between two coordinates.
///
/// The credential is taken from the argument, falling back to the
/// `OPENROUTE_API_KEY` environment variable. It is never persisted.
pub async fn get_route(
    from_lat: f64,
    from_lng: f64,
    to_lat: f64,
    to_lng: f64,
    api_key: Option<&str>,
) -> RouteSegment {
    let Some(key) = resolve_key(api_key) else {
        debug!("no routing credential configured, using straight-line fallback");
        return fallback_route(from_lat, from_lng, to_lat, to_lng);
    };

    match fetch_route(from_lat, from_lng, to_lat, to_lng, &key).await {
        Ok(segment) => segment,
        Err(err) => {
            warn!(error = %err, "road routing failed, using straight-line fallback");
            fallback_route(from_lat, from_lng, to_lat, to_lng)
        }
    }
}

/// Fetches routes for consecutive point pairs, keeping at least 200 ms
/// between provider calls. Without a credential no spacing is needed
/// since every segment is computed locally.
pub async fn batch_get_routes(
    pairs: &[(RoutePoint, RoutePoint)],
    api_key: Option<&str>,
) -> Vec<RouteSegment> {
    let rate_limited = resolve_key(api_key).is_some();
    let mut segments = Vec::with_capacity(pairs.len());

    for (i, (from, to)) in pairs.iter().enumerate() {
        if rate_limited && i > 0 {
            tokio::time::sleep(BATCH_CALL_FLOOR).await;
        }
        segments.push(get_route(from.lat, from.lng, to.lat, to.lng, api_key).await);
    }

    segments
}

fn resolve_key(api_key: Option<&str>) -> Option<String> {
    api_key
        .map(str::to_string)
        .filter(|key| !key.is_empty())
        .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty()))
}

async fn fetch_route(
    from_lat: f64,
    from_lng: f64,
    to_lat: f64,
    to_lng: f64,
    api_key: &str,
) -> Result<RouteSegment, ProviderError> {
    // The provider expects [lng, lat] coordinate pairs.
    let body = serde_json::json!({
        "coordinates": [[from_lng, from_lat], [to_lng, to_lat]],
        "geometry": true,
    });

    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|err| ProviderError::Network(err.to_string()))?;

    let response = client
        .post(PROVIDER_URL)
        .header("Authorization", api_key)
        .json(&body)
        .send()
        .await
        .map_err(|err| ProviderError::Network(err.to_string()))?;

    if !response.status().is_success() {
        return Err(ProviderError::Provider(format!(
            "unexpected status {}",
            response.status()
        )));
    }

    let parsed: ProviderResponse = response
        .json()
        .await
        .map_err(|err| ProviderError::Parse(err.to_string()))?;

    let Some(route) = parsed.routes.into_iter().next() else {
        return Err(ProviderError::Provider("no routes in response".to_string()));
    };

    let geometry = decode_geometry(&route.geometry)
        .ok_or_else(|| ProviderError::Parse("unrecognized geometry format".to_string()))?;

    Ok(RouteSegment {
        distance: route.summary.distance / 1000.0,
        duration: route.summary.duration / 60.0,
        geometry,
    })
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    routes: Vec<ProviderRoute>,
}

#[derive(Debug, Deserialize)]
struct ProviderRoute {
    #[serde(default)]
    summary: ProviderSummary,
    #[serde(default)]
    geometry: Value,
}

#[derive(Debug, Deserialize, Default)]
struct ProviderSummary {
    /// Meters.
    #[serde(default)]
    distance: f64,
    /// Seconds.
    #[serde(default)]
    duration: f64,
}

/// The provider returns geometry as an encoded polyline string, a
/// GeoJSON object, or a bare coordinate array depending on the request.
fn decode_geometry(geometry: &Value) -> Option<Vec<RoutePoint>> {
    match geometry {
        Value::String(encoded) => Some(decode_polyline(encoded)),
        Value::Object(map) => map
            .get("coordinates")
            .and_then(Value::as_array)
            .map(|coords| coords.iter().filter_map(lnglat_point).collect()),
        Value::Array(coords) => Some(coords.iter().filter_map(lnglat_point).collect()),
        _ => None,
    }
}

fn lnglat_point(value: &Value) -> Option<RoutePoint> {
    let coord = value.as_array()?;
    Some(RoutePoint {
        lat: coord.get(1)?.as_f64()?,
        lng: coord.get(0)?.as_f64()?,
    })
}

/// Straight-line stand-in for a road route, at city driving speed.
pub fn fallback_route(from_lat: f64, from_lng: f64, to_lat: f64, to_lng: f64) -> RouteSegment {
    let distance = haversine_km(from_lat, from_lng, to_lat, to_lng);
    RouteSegment {
        distance,
        duration: distance / AVERAGE_SPEED_KMPH * 60.0,
        geometry: vec![
            RoutePoint {
                lat: from_lat,
                lng: from_lng,
            },
            RoutePoint {
                lat: to_lat,
                lng: to_lng,
            },
        ],
    }
}

/// Decodes a Google Polyline (factor 1e5) string. An empty string yields
/// an empty geometry; a malformed tail stops the decode and returns the
/// points recovered so far.
pub fn decode_polyline(encoded: &str) -> Vec<RoutePoint> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut index = 0;
    let mut lat = 0i64;
    let mut lng = 0i64;

    while index < bytes.len() {
        let Some((delta_lat, next)) = decode_value(bytes, index) else {
            break;
        };
        index = next;
        lat += delta_lat;

        let Some((delta_lng, next)) = decode_value(bytes, index) else {
            break;
        };
        index = next;
        lng += delta_lng;

        points.push(RoutePoint {
            lat: lat as f64 / 1e5,
            lng: lng as f64 / 1e5,
        });
    }

    points
}

/// Reads one zigzag-encoded varint starting at `index`. Returns the
/// value and the index after it, or `None` when the stream ends
/// mid-value or contains a byte below the encoding range.
fn decode_value(bytes: &[u8], mut index: usize) -> Option<(i64, usize)> {
    let mut result = 0i64;
    let mut shift = 0;

    loop {
        let &byte = bytes.get(index)?;
        index += 1;
        let chunk = (byte as i64) - 63;
        if chunk < 0 {
            return None;
        }
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }

    let value = if result & 1 != 0 { !(result >> 1) } else { result >> 1 };
    Some((value, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_google_reference_polyline() {
        let points = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@");
        let expected = [(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)];
        assert_eq!(points.len(), expected.len());
        for (point, (lat, lng)) in points.iter().zip(expected.iter()) {
            assert!((point.lat - lat).abs() < 1e-5);
            assert!((point.lng - lng).abs() < 1e-5);
        }
    }

    #[test]
    fn empty_polyline_decodes_to_nothing() {
        assert!(decode_polyline("").is_empty());
    }

    #[test]
    fn malformed_tail_keeps_decoded_prefix() {
        // A trailing continuation byte cannot complete a value.
        let mut encoded = String::from("_p~iF~ps|U");
        encoded.push('_');
        let points = decode_polyline(&encoded);
        assert_eq!(points.len(), 1);
        assert!((points[0].lat - 38.5).abs() < 1e-5);
        assert!((points[0].lng + 120.2).abs() < 1e-5);
    }

    #[test]
    fn byte_below_encoding_range_stops_decode() {
        let points = decode_polyline("\u{1}_p~iF");
        assert!(points.is_empty());
    }

    #[test]
    fn fallback_is_straight_line_at_city_speed() {
        let segment = fallback_route(0.0, 0.0, 0.0, 1.0);
        assert_eq!(segment.geometry.len(), 2);
        assert_eq!(segment.geometry[0], RoutePoint { lat: 0.0, lng: 0.0 });
        assert!((segment.distance - 111.19).abs() < 0.2);
        assert!((segment.duration - segment.distance / 40.0 * 60.0).abs() < 1e-9);
    }

    #[test]
    fn geometry_variants_decode() {
        let geojson = serde_json::json!({"coordinates": [[-120.2, 38.5], [-120.95, 40.7]]});
        let points = decode_geometry(&geojson).unwrap();
        assert_eq!(points.len(), 2);
        assert!((points[0].lat - 38.5).abs() < 1e-9);

        let array = serde_json::json!([[-120.2, 38.5]]);
        let points = decode_geometry(&array).unwrap();
        assert_eq!(points.len(), 1);

        assert!(decode_geometry(&serde_json::json!(42)).is_none());
    }

    #[tokio::test]
    async fn missing_credential_short_circuits_to_fallback() {
        std::env::remove_var(API_KEY_ENV);
        let segment = get_route(0.0, 0.0, 0.0, 0.5, None).await;
        assert_eq!(segment.geometry.len(), 2);
        let expected = haversine_km(0.0, 0.0, 0.0, 0.5);
        assert!((segment.distance - expected).abs() < 1e-9);
    }
}
