//! Command model.
//!
//! Every server operation is a small typed struct that renders into a
//! [`Command`]: a name plus an ordered list of string tokens. The same
//! [`Command`] value renders into both wire forms:
//!
//! | Transport | Rendering |
//! |-----------|-----------|
//! | HTTP | `/NAME+arg1+arg2` (each token percent-encoded) |
//! | Pipe | command `NAME`, arguments as bulk strings |
//!
//! # Command Groups
//!
//! | Group | Commands | HTTP schema |
//! |-------|----------|-------------|
//! | Object | [`Get`] | caller chooses (`Get*Response`) |
//! | OK | [`Set`], [`Delete`], [`Drop`], [`Expire`], [`FSet`], [`PDelete`], [`Persist`], [`Rename`], [`SetChan`], [`DelChan`] | [`OkResponse`] |
//! | Ungrouped | [`Ping`], [`Bounds`], [`Keys`], [`Stats`], [`Ttl`] | fixed per command |
//! | Lists | see [`query`](super::query) | caller chooses (`List*Response`) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use geojson::GeoJson;
use serde::de::DeserializeOwned;

use super::geometry;
use super::query::Coordinate;
use super::response::{
    BoundsResponse, KeysResponse, OkResponse, PingResponse, StatsResponse, TtlResponse,
};
use super::wire::WireValue;

// ============================================================================
// Constants
// ============================================================================

/// Separator between tokens in the HTTP path rendering.
pub const HTTP_SEPARATOR: char = '+';

/// Lowest geohash precision the server accepts.
pub const MIN_HASH_PRECISION: i32 = 1;

/// Highest geohash precision the server accepts.
pub const MAX_HASH_PRECISION: i32 = 22;

/// Token inserted by fence wrapping.
pub(crate) const FENCE_TOKEN: &str = "FENCE";

/// Token introducing the detection list in fence wrapping.
pub(crate) const DETECT_TOKEN: &str = "DETECT";

// ============================================================================
// Command
// ============================================================================

/// A rendered server command.
///
/// Immutable once built. `raw()` yields the name followed by the arguments,
/// which is the token sequence both transports are derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    name: String,
    arguments: Vec<String>,
}

impl Command {
    /// Creates a command from a name and its argument tokens.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Returns the command name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the argument tokens, excluding the name.
    #[inline]
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Returns the full token sequence, name first.
    pub fn raw(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.arguments.iter().map(String::as_str))
    }

    /// Renders the HTTP path segment (without the leading `/`).
    #[must_use]
    pub fn http_path(&self) -> String {
        let mut path = String::new();
        for (index, token) in self.raw().enumerate() {
            if index > 0 {
                path.push(HTTP_SEPARATOR);
            }
            path.push_str(&urlencoding::encode(token));
        }
        path
    }

    /// Renders the arguments as pipe transport values.
    #[must_use]
    pub fn wire_arguments(&self) -> Vec<WireValue> {
        self.arguments
            .iter()
            .map(|argument| WireValue::bulk(argument.as_bytes().to_vec()))
            .collect()
    }

    /// Returns a copy with the `FENCE` / `DETECT list` tokens removed.
    ///
    /// Inverse of fence wrapping: for any spatial query `q`,
    /// `Fence::new(q).to_command().without_fence_tokens() == q.to_command()`.
    #[must_use]
    pub fn without_fence_tokens(&self) -> Self {
        let mut arguments = self.arguments.clone();
        if let Some(position) = arguments
            .iter()
            .skip(1)
            .position(|token| token == FENCE_TOKEN)
            .map(|offset| offset + 1)
        {
            arguments.remove(position);
            if arguments.get(position).map(String::as_str) == Some(DETECT_TOKEN) {
                arguments.drain(position..(position + 2).min(arguments.len()));
            }
        }
        Self::new(self.name.clone(), arguments)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in self.raw() {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(token)?;
            first = false;
        }
        Ok(())
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Anything that renders into a [`Command`].
pub trait ToCommand {
    /// Renders the command.
    fn to_command(&self) -> Command;
}

impl ToCommand for Command {
    #[inline]
    fn to_command(&self) -> Command {
        self.clone()
    }
}

/// A command whose HTTP reply always has the same schema.
pub trait TypedCommand: ToCommand {
    /// Schema of the HTTP JSON reply.
    type Response: DeserializeOwned;
}

// ============================================================================
// Helpers
// ============================================================================

/// Clamps a geohash precision into the range the server accepts.
#[inline]
#[must_use]
pub fn clamp_precision(precision: i32) -> i32 {
    precision.clamp(MIN_HASH_PRECISION, MAX_HASH_PRECISION)
}

/// Formats a float the way the server parses it.
#[inline]
pub(crate) fn number(value: f64) -> String {
    value.to_string()
}

// ============================================================================
// Get
// ============================================================================

/// Output format of a [`Get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GetFormat {
    /// GeoJSON object.
    #[default]
    Object,
    /// Point.
    Point,
    /// Bounding box.
    Bounds,
    /// Geohash with the given precision, clamped to 1..=22.
    Hash(i32),
}

impl GetFormat {
    fn push_tokens(self, tokens: &mut Vec<String>) {
        match self {
            Self::Object => tokens.push("OBJECT".to_string()),
            Self::Point => tokens.push("POINT".to_string()),
            Self::Bounds => tokens.push("BOUNDS".to_string()),
            Self::Hash(precision) => {
                tokens.push("HASH".to_string());
                tokens.push(clamp_precision(precision).to_string());
            }
        }
    }
}

/// `GET key id [WITHFIELDS] OBJECT|POINT|BOUNDS|HASH precision`
#[derive(Debug, Clone, PartialEq)]
pub struct Get {
    key: String,
    id: String,
    with_fields: bool,
    format: GetFormat,
}

impl Get {
    /// Creates a GET returning the object.
    #[must_use]
    pub fn new(key: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id: id.into(),
            with_fields: false,
            format: GetFormat::Object,
        }
    }

    /// Includes field values in the reply.
    #[inline]
    #[must_use]
    pub fn with_fields(mut self) -> Self {
        self.with_fields = true;
        self
    }

    /// Sets the output format.
    #[inline]
    #[must_use]
    pub fn format(mut self, format: GetFormat) -> Self {
        self.format = format;
        self
    }
}

impl ToCommand for Get {
    fn to_command(&self) -> Command {
        let mut tokens = vec![self.key.clone(), self.id.clone()];
        if self.with_fields {
            tokens.push("WITHFIELDS".to_string());
        }
        self.format.push_tokens(&mut tokens);
        Command::new("GET", tokens)
    }
}

// ============================================================================
// Set
// ============================================================================

/// A named numeric field attached to an object.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: f64,
}

impl Field {
    /// Creates a field.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Value stored by a [`Set`].
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    /// `POINT lat lon`
    Point {
        /// Latitude.
        lat: f64,
        /// Longitude.
        lon: f64,
    },
    /// `POINT lat lon z`
    PointZ {
        /// Latitude.
        lat: f64,
        /// Longitude.
        lon: f64,
        /// Elevation or other third coordinate.
        z: f64,
    },
    /// `BOUNDS swlat swlon nelat nelon`
    Bounds {
        /// South-west corner.
        sw: Coordinate,
        /// North-east corner.
        ne: Coordinate,
    },
    /// `OBJECT geojson`
    Object(GeoJson),
}

impl SetValue {
    fn push_tokens(&self, tokens: &mut Vec<String>) {
        match self {
            Self::Point { lat, lon } => {
                tokens.extend(["POINT".to_string(), number(*lat), number(*lon)]);
            }
            Self::PointZ { lat, lon, z } => {
                tokens.extend([
                    "POINT".to_string(),
                    number(*lat),
                    number(*lon),
                    number(*z),
                ]);
            }
            Self::Bounds { sw, ne } => {
                tokens.push("BOUNDS".to_string());
                sw.push_tokens(tokens);
                ne.push_tokens(tokens);
            }
            Self::Object(object) => {
                tokens.extend(["OBJECT".to_string(), geometry::encode(object)]);
            }
        }
    }
}

/// `SET key id [FIELD name value ...] [EX seconds] value`
#[derive(Debug, Clone, PartialEq)]
pub struct Set {
    key: String,
    id: String,
    fields: Vec<Field>,
    expire: Option<u64>,
    value: SetValue,
}

impl Set {
    /// Creates a SET storing `value`.
    #[must_use]
    pub fn new(key: impl Into<String>, id: impl Into<String>, value: SetValue) -> Self {
        Self {
            key: key.into(),
            id: id.into(),
            fields: Vec::new(),
            expire: None,
            value,
        }
    }

    /// Creates a SET storing a point.
    #[inline]
    #[must_use]
    pub fn point(key: impl Into<String>, id: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self::new(key, id, SetValue::Point { lat, lon })
    }

    /// Attaches a field.
    #[inline]
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.push(Field::new(name, value));
        self
    }

    /// Expires the object after `seconds`. Zero means no expiry.
    #[inline]
    #[must_use]
    pub fn expire(mut self, seconds: u64) -> Self {
        self.expire = Some(seconds);
        self
    }
}

impl ToCommand for Set {
    fn to_command(&self) -> Command {
        let mut tokens = vec![self.key.clone(), self.id.clone()];
        for field in &self.fields {
            tokens.extend(["FIELD".to_string(), field.name.clone(), number(field.value)]);
        }
        if let Some(seconds) = self.expire
            && seconds > 0
        {
            tokens.extend(["EX".to_string(), seconds.to_string()]);
        }
        self.value.push_tokens(&mut tokens);
        Command::new("SET", tokens)
    }
}

impl TypedCommand for Set {
    type Response = OkResponse;
}

// ============================================================================
// FSet
// ============================================================================

/// `FSET key id name value [name value ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct FSet {
    key: String,
    id: String,
    fields: Vec<Field>,
}

impl FSet {
    /// Creates an FSET updating `fields`.
    #[must_use]
    pub fn new(key: impl Into<String>, id: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            key: key.into(),
            id: id.into(),
            fields,
        }
    }
}

impl ToCommand for FSet {
    fn to_command(&self) -> Command {
        let mut tokens = vec![self.key.clone(), self.id.clone()];
        for field in &self.fields {
            tokens.extend([field.name.clone(), number(field.value)]);
        }
        Command::new("FSET", tokens)
    }
}

impl TypedCommand for FSet {
    type Response = OkResponse;
}

// ============================================================================
// Key/Id Commands
// ============================================================================

/// `DEL key id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    key: String,
    id: String,
}

impl Delete {
    /// Creates a DEL.
    #[must_use]
    pub fn new(key: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id: id.into(),
        }
    }
}

impl ToCommand for Delete {
    fn to_command(&self) -> Command {
        Command::new("DEL", vec![self.key.clone(), self.id.clone()])
    }
}

impl TypedCommand for Delete {
    type Response = OkResponse;
}

/// `PERSIST key id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persist {
    key: String,
    id: String,
}

impl Persist {
    /// Creates a PERSIST.
    #[must_use]
    pub fn new(key: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id: id.into(),
        }
    }
}

impl ToCommand for Persist {
    fn to_command(&self) -> Command {
        Command::new("PERSIST", vec![self.key.clone(), self.id.clone()])
    }
}

impl TypedCommand for Persist {
    type Response = OkResponse;
}

/// `EXPIRE key id seconds`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expire {
    key: String,
    id: String,
    seconds: u64,
}

impl Expire {
    /// Creates an EXPIRE.
    #[must_use]
    pub fn new(key: impl Into<String>, id: impl Into<String>, seconds: u64) -> Self {
        Self {
            key: key.into(),
            id: id.into(),
            seconds,
        }
    }
}

impl ToCommand for Expire {
    fn to_command(&self) -> Command {
        Command::new(
            "EXPIRE",
            vec![self.key.clone(), self.id.clone(), self.seconds.to_string()],
        )
    }
}

impl TypedCommand for Expire {
    type Response = OkResponse;
}

/// `TTL key id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ttl {
    key: String,
    id: String,
}

impl Ttl {
    /// Creates a TTL.
    #[must_use]
    pub fn new(key: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id: id.into(),
        }
    }
}

impl ToCommand for Ttl {
    fn to_command(&self) -> Command {
        Command::new("TTL", vec![self.key.clone(), self.id.clone()])
    }
}

impl TypedCommand for Ttl {
    type Response = TtlResponse;
}

// ============================================================================
// Key Commands
// ============================================================================

/// `DROP key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drop {
    key: String,
}

impl Drop {
    /// Creates a DROP.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl ToCommand for Drop {
    fn to_command(&self) -> Command {
        Command::new("DROP", vec![self.key.clone()])
    }
}

impl TypedCommand for Drop {
    type Response = OkResponse;
}

/// `PDEL key pattern`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PDelete {
    key: String,
    pattern: String,
}

impl PDelete {
    /// Creates a PDEL removing ids matching `pattern`.
    #[must_use]
    pub fn new(key: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            pattern: pattern.into(),
        }
    }
}

impl ToCommand for PDelete {
    fn to_command(&self) -> Command {
        Command::new("PDEL", vec![self.key.clone(), self.pattern.clone()])
    }
}

impl TypedCommand for PDelete {
    type Response = OkResponse;
}

/// `RENAME key newkey`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    key: String,
    new_key: String,
}

impl Rename {
    /// Creates a RENAME.
    #[must_use]
    pub fn new(key: impl Into<String>, new_key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            new_key: new_key.into(),
        }
    }
}

impl ToCommand for Rename {
    fn to_command(&self) -> Command {
        Command::new("RENAME", vec![self.key.clone(), self.new_key.clone()])
    }
}

impl TypedCommand for Rename {
    type Response = OkResponse;
}

/// `BOUNDS key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bounds {
    key: String,
}

impl Bounds {
    /// Creates a BOUNDS.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl ToCommand for Bounds {
    fn to_command(&self) -> Command {
        Command::new("BOUNDS", vec![self.key.clone()])
    }
}

impl TypedCommand for Bounds {
    type Response = BoundsResponse;
}

/// `KEYS pattern`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    pattern: String,
}

impl Keys {
    /// Creates a KEYS.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

impl ToCommand for Keys {
    fn to_command(&self) -> Command {
        Command::new("KEYS", vec![self.pattern.clone()])
    }
}

impl TypedCommand for Keys {
    type Response = KeysResponse;
}

/// `STATS key [key ...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    keys: Vec<String>,
}

impl Stats {
    /// Creates a STATS over `keys`.
    #[must_use]
    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl ToCommand for Stats {
    fn to_command(&self) -> Command {
        Command::new("STATS", self.keys.clone())
    }
}

impl TypedCommand for Stats {
    type Response = StatsResponse;
}

/// `PING`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ping;

impl ToCommand for Ping {
    fn to_command(&self) -> Command {
        Command::new("PING", Vec::new())
    }
}

impl TypedCommand for Ping {
    type Response = PingResponse;
}

// ============================================================================
// Channel Commands
// ============================================================================

/// `SETCHAN name <fenced query>`
///
/// Registers a pub/sub channel fed by a fence. Subscribe to it with
/// [`Connection::subscribe`](crate::Connection::subscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetChan {
    name: String,
    fence: Command,
}

impl SetChan {
    /// Creates a SETCHAN from any fence-wrapped query.
    #[must_use]
    pub fn new(name: impl Into<String>, fence: &impl ToCommand) -> Self {
        Self {
            name: name.into(),
            fence: fence.to_command(),
        }
    }
}

impl ToCommand for SetChan {
    fn to_command(&self) -> Command {
        let mut tokens = vec![self.name.clone()];
        tokens.extend(self.fence.raw().map(str::to_string));
        Command::new("SETCHAN", tokens)
    }
}

impl TypedCommand for SetChan {
    type Response = OkResponse;
}

/// `DELCHAN name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelChan {
    name: String,
}

impl DelChan {
    /// Creates a DELCHAN.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ToCommand for DelChan {
    fn to_command(&self) -> Command {
        Command::new("DELCHAN", vec![self.name.clone()])
    }
}

impl TypedCommand for DelChan {
    type Response = OkResponse;
}

// ============================================================================
// Tests
// ============================================================================
