//! GeoJSON adapter.
//!
//! The client treats geometry as an opaque codec: objects are serialized
//! into a single command token and parsed back out of reply payloads.

// ============================================================================
// Imports
// ============================================================================

use geojson::{GeoJson, Geometry, Value};

use crate::error::{Error, Result};

// ============================================================================
// Codec
// ============================================================================

/// Serializes a GeoJSON object into its compact JSON form.
#[inline]
#[must_use]
pub fn encode(object: &GeoJson) -> String {
    object.to_string()
}

/// Parses a GeoJSON object from raw bytes.
///
/// # Errors
///
/// Returns [`Error::DecodeFailure`] if the bytes are not valid GeoJSON.
pub fn decode(bytes: &[u8]) -> Result<GeoJson> {
    serde_json::from_slice::<GeoJson>(bytes)
        .map_err(|e| Error::decode(format!("invalid GeoJSON: {e}")))
}

/// Parses a GeoJSON object from an already decoded JSON value.
///
/// # Errors
///
/// Returns [`Error::DecodeFailure`] if the value is not valid GeoJSON.
pub fn from_value(value: serde_json::Value) -> Result<GeoJson> {
    serde_json::from_value::<GeoJson>(value)
        .map_err(|e| Error::decode(format!("invalid GeoJSON: {e}")))
}

/// Builds a GeoJSON point geometry.
///
/// GeoJSON positions are `[lon, lat]`; the arguments follow the server's
/// `lat, lon` command order.
#[must_use]
pub fn point(lat: f64, lon: f64) -> GeoJson {
    GeoJson::Geometry(Geometry::new(Value::Point(vec![lon, lat])))
}

// ============================================================================
// Tests
// ============================================================================
