//! Response decoding.
//!
//! Replies carry no self-description. The caller knows which schema to
//! expect from the command it sent.
//!
//! # HTTP
//!
//! [`decode_http`] checks the status and the `ok` flag, then decodes the body
//! into the requested schema. [`classify_http`] maps a body onto [`Response`]
//! when no schema is known.
//!
//! # Pipe
//!
//! [`decode`] classifies a [`WireValue`] with an ordered rule list. The first
//! matching rule wins:
//!
//! | Order | Rule | Result |
//! |-------|------|--------|
//! | 1 | status `OK` | [`Response::Ok`] |
//! | 2 | status `PONG` | [`Response::Pong`] |
//! | 3 | bulk parsing as a channel message | [`Response::SubscribeEvent`] |
//! | 4 | `[..., [[..., object], ...]]` | [`Response::GeoObjectList`] |
//! | 5 | anything else | [`Response::Unknown`] |

// ============================================================================
// Imports
// ============================================================================

use geojson::GeoJson;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::event::SubscribeEvent;
use super::geometry;
use super::wire::WireValue;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

const STATUS_OK: &str = "OK";
const STATUS_PONG: &str = "PONG";
const HTTP_OK: u16 = 200;

// ============================================================================
// Response
// ============================================================================

/// A classified pipe reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Command succeeded with no payload.
    Ok,
    /// Reply to `PING`.
    Pong,
    /// Geometries extracted from a list reply.
    GeoObjectList(Vec<GeoJson>),
    /// Channel message.
    SubscribeEvent(SubscribeEvent),
    /// Matched no rule.
    Unknown(WireValue),
}

impl Response {
    /// Requires [`Response::Ok`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadResponse`] for any other variant.
    pub fn expect_ok(self) -> Result<()> {
        match self {
            Self::Ok => Ok(()),
            other => Err(other.mismatch("ok")),
        }
    }

    /// Requires [`Response::Pong`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadResponse`] for any other variant.
    pub fn expect_pong(self) -> Result<()> {
        match self {
            Self::Pong => Ok(()),
            other => Err(other.mismatch("pong")),
        }
    }

    /// Requires [`Response::GeoObjectList`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadResponse`] for any other variant.
    pub fn expect_objects(self) -> Result<Vec<GeoJson>> {
        match self {
            Self::GeoObjectList(objects) => Ok(objects),
            other => Err(other.mismatch("geo object list")),
        }
    }

    /// Requires [`Response::SubscribeEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadResponse`] for any other variant.
    pub fn expect_event(self) -> Result<SubscribeEvent> {
        match self {
            Self::SubscribeEvent(event) => Ok(event),
            other => Err(other.mismatch("subscribe event")),
        }
    }

    /// Returns the variant name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Pong => "pong",
            Self::GeoObjectList(_) => "geo_object_list",
            Self::SubscribeEvent(_) => "subscribe_event",
            Self::Unknown(_) => "unknown",
        }
    }

    fn mismatch(&self, expected: &str) -> Error {
        Error::bad_response(format!("expected {expected}, got {}", self.kind()))
    }
}

// ============================================================================
// Pipe Decoding
// ============================================================================

/// Classifies a pipe reply. Never fails; unmatched values are
/// [`Response::Unknown`].
#[must_use]
pub fn decode(value: &WireValue) -> Response {
    if is_status(value, STATUS_OK) {
        return Response::Ok;
    }
    if is_status(value, STATUS_PONG) {
        return Response::Pong;
    }
    if let WireValue::Bulk(bytes) = value
        && let Ok(event) = SubscribeEvent::parse(bytes)
    {
        return Response::SubscribeEvent(event);
    }
    if let Some(objects) = geo_object_list(value) {
        return Response::GeoObjectList(objects);
    }
    Response::Unknown(value.clone())
}

fn is_status(value: &WireValue, expected: &str) -> bool {
    matches!(value, WireValue::Status(text) if text == expected)
}

/// Unwraps `[..., [[..., object], ...]]`.
///
/// Returns `None` when the structure does not match. Entries whose payload
/// fails to parse are skipped.
fn geo_object_list(value: &WireValue) -> Option<Vec<GeoJson>> {
    let outer = value.as_array()?;
    let Some(last) = outer.last() else {
        return Some(Vec::new());
    };
    let entries = last.as_array()?;
    if !entries.iter().all(|entry| matches!(entry, WireValue::Array(_))) {
        return None;
    }

    let mut objects = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match entry_object(entry) {
            Some(object) => objects.push(object),
            None => debug!(index, "Skipping list entry without a parseable object"),
        }
    }
    Some(objects)
}

/// Finds the object payload of one entry, searching from the end.
///
/// Entries look like `[id, object]` or `[id, object, [fields...]]`, and
/// the object itself may be wrapped in further arrays.
fn entry_object(entry: &WireValue) -> Option<GeoJson> {
    let elements = entry.as_array()?;
    elements.iter().rev().find_map(|element| {
        let bytes = terminal(element)?;
        match geometry::decode(bytes) {
            Ok(object) => Some(object),
            Err(e) => {
                debug!(error = %e, "List element is not a geometry");
                None
            }
        }
    })
}

/// Descends through trailing arrays to a bulk payload.
fn terminal(value: &WireValue) -> Option<&[u8]> {
    match value {
        WireValue::Bulk(bytes) => Some(bytes),
        WireValue::Array(items) => terminal(items.last()?),
        _ => None,
    }
}

// ============================================================================
// HTTP Decoding
// ============================================================================

/// Decodes an HTTP reply into schema `T`.
///
/// # Errors
///
/// - [`Error::BadResponse`] if `status` is not 200, the body is not a JSON
///   object, or `ok` is missing or false.
/// - [`Error::DecodeFailure`] if the body does not match `T`.
pub fn decode_http<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<T> {
    let document = checked_document(status, body)?;
    serde_json::from_value(document).map_err(|e| Error::decode(e.to_string()))
}

/// Maps an HTTP reply onto [`Response`].
///
/// # Errors
///
/// Same status and `ok` checks as [`decode_http`].
pub fn classify_http(status: u16, body: &[u8]) -> Result<Response> {
    let document = checked_document(status, body)?;

    if document.get("ping").and_then(Value::as_str) == Some("pong") {
        return Ok(Response::Pong);
    }

    if let Some(items) = document.get("objects").and_then(Value::as_array) {
        let objects = items
            .iter()
            .filter_map(|item| object_of(item).ok())
            .collect();
        return Ok(Response::GeoObjectList(objects));
    }

    let only_status = document
        .as_object()
        .is_some_and(|map| map.keys().all(|key| key == "ok" || key == "elapsed"));
    if only_status {
        return Ok(Response::Ok);
    }

    Ok(Response::Unknown(WireValue::bulk(body.to_vec())))
}

fn checked_document(status: u16, body: &[u8]) -> Result<Value> {
    if status != HTTP_OK {
        let detail = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v.get("err").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
        return Err(Error::bad_response(format!("status {status}: {detail}")));
    }

    let document: Value = serde_json::from_slice(body)
        .map_err(|e| Error::bad_response(format!("body is not JSON: {e}")))?;
    let Some(map) = document.as_object() else {
        return Err(Error::bad_response("body is not a JSON object"));
    };

    match map.get("ok").and_then(Value::as_bool) {
        Some(true) => Ok(document),
        Some(false) => {
            let err = map.get("err").and_then(Value::as_str).unwrap_or("ok is false");
            Err(Error::bad_response(err.to_string()))
        }
        None => Err(Error::bad_response("missing ok field")),
    }
}

fn object_of(item: &Value) -> Result<GeoJson> {
    let object = item
        .get("object")
        .cloned()
        .ok_or_else(|| Error::decode("list entry has no object"))?;
    geometry::from_value(object)
}

// ============================================================================
// Schemas
// ============================================================================

/// Field values keyed by name.
pub type Fields = FxHashMap<String, f64>;

/// A point in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Point {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
}

/// A rectangle in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Rect {
    /// South-west corner.
    pub sw: Point,
    /// North-east corner.
    pub ne: Point,
}

/// Reply with no payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OkResponse {
    /// Always `true` once decoded.
    pub ok: bool,
    /// Server processing time, e.g. `"42.1µs"`.
    pub elapsed: String,
}

/// Reply to `PING`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PingResponse {
    /// Always `true` once decoded.
    pub ok: bool,
    /// Always `"pong"`.
    pub ping: String,
    /// Server processing time.
    pub elapsed: String,
}

/// Polygon geometry of a `BOUNDS` reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BoundsPolygon {
    /// GeoJSON type, `Polygon`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Polygon rings.
    pub coordinates: Vec<Vec<Vec<f64>>>,
}

/// Reply to `BOUNDS`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BoundsResponse {
    /// Always `true` once decoded.
    pub ok: bool,
    /// Bounding polygon of the collection.
    pub bounds: BoundsPolygon,
}

/// Reply to `KEYS`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeysResponse {
    /// Always `true` once decoded.
    pub ok: bool,
    /// Matching keys.
    pub keys: Vec<String>,
}

/// Per-key statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct KeyStats {
    /// Memory used by the collection in bytes.
    pub in_memory_size: u64,
    /// Number of objects.
    pub num_objects: u64,
    /// Number of points.
    pub num_points: u64,
}

/// Reply to `STATS`. Missing keys map to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatsResponse {
    /// Always `true` once decoded.
    pub ok: bool,
    /// Statistics in request order.
    pub stats: Vec<Option<KeyStats>>,
}

/// Reply to `TTL`. `-1` means no expiry.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TtlResponse {
    /// Always `true` once decoded.
    pub ok: bool,
    /// Remaining seconds.
    pub ttl: f64,
}

/// Reply to `GET ... OBJECT`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GetObjectResponse {
    /// Stored object.
    pub object: GeoJson,
    /// Field values when requested.
    pub fields: Option<Fields>,
}

/// Reply to `GET ... POINT`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GetPointResponse {
    /// Object center.
    pub point: Point,
    /// Field values when requested.
    pub fields: Option<Fields>,
}

/// Reply to `GET ... BOUNDS`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GetBoundsResponse {
    /// Object bounds.
    pub bounds: Rect,
    /// Field values when requested.
    pub fields: Option<Fields>,
}

/// Reply to `GET ... HASH`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GetHashResponse {
    /// Geohash of the object.
    pub hash: String,
    /// Field values when requested.
    pub fields: Option<Fields>,
}

/// Reply to a list query with `IDS`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdsResponse {
    /// Always `true` once decoded.
    pub ok: bool,
    /// Matching ids.
    pub ids: Vec<String>,
    /// Number of ids.
    pub count: u64,
    /// Cursor for the next page, 0 when done.
    pub cursor: u64,
}

/// Alias kept next to the other list schemas.
pub type ListIdsResponse = IdsResponse;

/// Reply to a list query in the default `OBJECTS` format.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListObjectsResponse {
    /// Always `true` once decoded.
    pub ok: bool,
    /// Field names, positionally matching each entry's `fields`.
    pub fields: Option<Vec<String>>,
    /// Raw entries. Each has `id`, `object` and optionally `fields`.
    pub objects: Vec<Value>,
    /// Number of entries.
    pub count: u64,
    /// Cursor for the next page, 0 when done.
    pub cursor: u64,
}

impl ListObjectsResponse {
    /// Parses each entry's object, skipping the ones that fail.
    #[must_use]
    pub fn geojson_objects(&self) -> Vec<GeoJson> {
        self.objects
            .iter()
            .filter_map(|item| match object_of(item) {
                Ok(object) => Some(object),
                Err(e) => {
                    debug!(error = %e, "Unable to parse list object");
                    None
                }
            })
            .collect()
    }
}

/// One entry of a `POINTS` reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdPoint {
    /// Object id.
    pub id: String,
    /// Object center.
    pub point: Point,
}

/// Reply to a list query in `POINTS` format.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListPointsResponse {
    /// Always `true` once decoded.
    pub ok: bool,
    /// Field names.
    pub fields: Option<Vec<String>>,
    /// Entries.
    pub points: Vec<IdPoint>,
    /// Number of entries.
    pub count: u64,
    /// Cursor for the next page.
    pub cursor: u64,
}

/// Reply to a list query in `COUNT` format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ListCountResponse {
    /// Always `true` once decoded.
    pub ok: bool,
    /// Number of matches.
    pub count: u64,
    /// Cursor for the next page.
    pub cursor: u64,
}

/// One entry of a `BOUNDS` reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdBounds {
    /// Object id.
    pub id: String,
    /// Object bounds.
    pub bounds: Rect,
}

/// Reply to a list query in `BOUNDS` format.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListBoundsResponse {
    /// Always `true` once decoded.
    pub ok: bool,
    /// Field names.
    pub fields: Option<Vec<String>>,
    /// Entries.
    pub bounds: Vec<IdBounds>,
    /// Number of entries.
    pub count: u64,
    /// Cursor for the next page.
    pub cursor: u64,
}

/// One entry of a `HASHES` reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdHash {
    /// Object id.
    pub id: String,
    /// Geohash.
    pub hash: String,
}

/// Reply to a list query in `HASHES` format.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListHashesResponse {
    /// Always `true` once decoded.
    pub ok: bool,
    /// Field names.
    pub fields: Option<Vec<String>>,
    /// Entries.
    pub hashes: Vec<IdHash>,
    /// Number of entries.
    pub count: u64,
    /// Cursor for the next page.
    pub cursor: u64,
}

// ============================================================================
// Tests
// ============================================================================
