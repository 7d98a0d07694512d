//! List-producing queries and fence wrapping.
//!
//! Search commands share [`Options`] and [`Shape`], each of which contributes
//! a fixed token sequence. Token order is part of the wire contract:
//!
//! ```text
//! NAME key [CURSOR n] [SPARSE n | LIMIT n] [IDS] [MATCH glob]...
//!          [WHERE field min max]... [WHEREIN field count v...]...
//!          [NOFIELDS] [format] <shape>
//! ```
//!
//! A [`Fence`] re-derives a spatial query with `FENCE [DETECT list]`
//! inserted right after the key.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use geojson::GeoJson;
use tracing::warn;

use super::command::{
    Command, DETECT_TOKEN, FENCE_TOKEN, ToCommand, clamp_precision, number,
};
use super::geometry;

// ============================================================================
// Coordinate
// ============================================================================

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
}

impl Coordinate {
    /// Creates a coordinate.
    #[inline]
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub(crate) fn push_tokens(&self, tokens: &mut Vec<String>) {
        tokens.push(number(self.lat));
        tokens.push(number(self.lon));
    }
}

// ============================================================================
// Shape
// ============================================================================

/// Geometric target of an area query.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Axis-aligned rectangle.
    Bounds {
        /// South-west corner.
        sw: Coordinate,
        /// North-east corner.
        ne: Coordinate,
    },
    /// Arbitrary GeoJSON object.
    Object(GeoJson),
}

impl Shape {
    /// Creates a bounds shape.
    #[inline]
    #[must_use]
    pub const fn bounds(sw: Coordinate, ne: Coordinate) -> Self {
        Self::Bounds { sw, ne }
    }

    fn push_tokens(&self, tokens: &mut Vec<String>) {
        match self {
            Self::Bounds { sw, ne } => {
                tokens.push("BOUNDS".to_string());
                sw.push_tokens(tokens);
                ne.push_tokens(tokens);
            }
            Self::Object(object) => {
                tokens.push("OBJECT".to_string());
                tokens.push(geometry::encode(object));
            }
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// `WHERE field min max`
#[derive(Debug, Clone, PartialEq)]
pub struct Where {
    /// Field name.
    pub field: String,
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
}

impl Where {
    /// Creates a range filter.
    #[inline]
    #[must_use]
    pub fn new(field: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            field: field.into(),
            min,
            max,
        }
    }
}

/// `WHEREIN field count value...`
#[derive(Debug, Clone, PartialEq)]
pub struct WhereIn {
    /// Field name.
    pub field: String,
    /// Accepted values.
    pub values: Vec<f64>,
}

impl WhereIn {
    /// Creates a membership filter.
    #[inline]
    #[must_use]
    pub fn new(field: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            field: field.into(),
            values: values.into_iter().collect(),
        }
    }
}

// ============================================================================
// Format
// ============================================================================

/// Output format of a list query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Count only.
    Count,
    /// Ids only. Same as [`Options::ids`].
    Ids,
    /// GeoJSON objects (server default).
    Objects,
    /// Points.
    Points,
    /// Bounding boxes.
    Bounds,
    /// Geohashes with the given precision, clamped to 1..=22.
    Hashes(i32),
}

impl Format {
    fn push_tokens(self, tokens: &mut Vec<String>) {
        match self {
            Self::Count => tokens.push("COUNT".to_string()),
            // Emitted in the IDS slot.
            Self::Ids => {}
            Self::Objects => tokens.push("OBJECTS".to_string()),
            Self::Points => tokens.push("POINTS".to_string()),
            Self::Bounds => tokens.push("BOUNDS".to_string()),
            Self::Hashes(precision) => {
                tokens.push("HASHES".to_string());
                tokens.push(clamp_precision(precision).to_string());
            }
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Options shared by list-producing queries.
///
/// Setter order does not matter; [`Options::tokens`] always emits the fixed
/// wire order.
///
/// # Example
///
/// ```ignore
/// let options = Options::new()
///     .format(Format::Points)
///     .limit(10)
///     .matching("truck*");
///
/// assert_eq!(options.tokens(), ["LIMIT", "10", "MATCH", "truck*", "POINTS"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    cursor: Option<u64>,
    limit: Option<u64>,
    ids: bool,
    sparse: Option<u8>,
    matches: Vec<String>,
    wheres: Vec<Where>,
    where_ins: Vec<WhereIn>,
    no_fields: bool,
    format: Option<Format>,
}

impl Options {
    /// Creates empty options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts iteration at `cursor`.
    #[inline]
    #[must_use]
    pub fn cursor(mut self, cursor: u64) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Limits the number of results. Ignored when sparse sampling is set.
    #[inline]
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns ids only.
    #[inline]
    #[must_use]
    pub fn ids(mut self) -> Self {
        self.ids = true;
        self
    }

    /// Samples the result set with `spread` levels of sparseness.
    #[inline]
    #[must_use]
    pub fn sparse(mut self, spread: u8) -> Self {
        self.sparse = Some(spread);
        self
    }

    /// Adds an id glob filter. Repeatable.
    #[inline]
    #[must_use]
    pub fn matching(mut self, glob: impl Into<String>) -> Self {
        self.matches.push(glob.into());
        self
    }

    /// Adds a field range filter. Repeatable.
    #[inline]
    #[must_use]
    pub fn filter(mut self, filter: Where) -> Self {
        self.wheres.push(filter);
        self
    }

    /// Adds a field membership filter. Repeatable.
    #[inline]
    #[must_use]
    pub fn filter_in(mut self, filter: WhereIn) -> Self {
        self.where_ins.push(filter);
        self
    }

    /// Omits field values from the reply.
    #[inline]
    #[must_use]
    pub fn no_fields(mut self) -> Self {
        self.no_fields = true;
        self
    }

    /// Sets the output format.
    #[inline]
    #[must_use]
    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    /// Renders the option tokens in wire order.
    #[must_use]
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        self.push_tokens(&mut tokens);
        tokens
    }

    pub(crate) fn push_tokens(&self, tokens: &mut Vec<String>) {
        if let Some(cursor) = self.cursor {
            tokens.extend(["CURSOR".to_string(), cursor.to_string()]);
        }

        match (self.sparse, self.limit) {
            (Some(spread), limit) => {
                if let Some(limit) = limit {
                    warn!(limit, spread, "LIMIT ignored because SPARSE is set");
                }
                tokens.extend(["SPARSE".to_string(), spread.to_string()]);
            }
            (None, Some(limit)) => tokens.extend(["LIMIT".to_string(), limit.to_string()]),
            (None, None) => {}
        }

        if self.ids || self.format == Some(Format::Ids) {
            tokens.push("IDS".to_string());
        }

        for glob in &self.matches {
            tokens.extend(["MATCH".to_string(), glob.clone()]);
        }

        for filter in &self.wheres {
            tokens.extend([
                "WHERE".to_string(),
                filter.field.clone(),
                number(filter.min),
                number(filter.max),
            ]);
        }

        for filter in &self.where_ins {
            tokens.extend([
                "WHEREIN".to_string(),
                filter.field.clone(),
                filter.values.len().to_string(),
            ]);
            tokens.extend(filter.values.iter().copied().map(number));
        }

        if self.no_fields {
            tokens.push("NOFIELDS".to_string());
        }

        if let Some(format) = self.format {
            format.push_tokens(tokens);
        }
    }
}

// ============================================================================
// Spatial Queries
// ============================================================================

/// A list query the server can turn into a live fence.
pub trait SpatialQuery: ToCommand {}

/// `INTERSECTS key [options] shape`
#[derive(Debug, Clone, PartialEq)]
pub struct Intersects {
    key: String,
    shape: Shape,
    options: Options,
}

impl Intersects {
    /// Creates an INTERSECTS query.
    #[must_use]
    pub fn new(key: impl Into<String>, shape: Shape) -> Self {
        Self {
            key: key.into(),
            shape,
            options: Options::default(),
        }
    }

    /// Replaces the query options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
}

impl ToCommand for Intersects {
    fn to_command(&self) -> Command {
        let mut tokens = vec![self.key.clone()];
        self.options.push_tokens(&mut tokens);
        self.shape.push_tokens(&mut tokens);
        Command::new("INTERSECTS", tokens)
    }
}

impl SpatialQuery for Intersects {}

/// `WITHIN key [options] shape`
#[derive(Debug, Clone, PartialEq)]
pub struct Within {
    key: String,
    shape: Shape,
    options: Options,
}

impl Within {
    /// Creates a WITHIN query.
    #[must_use]
    pub fn new(key: impl Into<String>, shape: Shape) -> Self {
        Self {
            key: key.into(),
            shape,
            options: Options::default(),
        }
    }

    /// Replaces the query options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
}

impl ToCommand for Within {
    fn to_command(&self) -> Command {
        let mut tokens = vec![self.key.clone()];
        self.options.push_tokens(&mut tokens);
        self.shape.push_tokens(&mut tokens);
        Command::new("WITHIN", tokens)
    }
}

impl SpatialQuery for Within {}

/// `NEARBY key [options] POINT lat lon meters`
#[derive(Debug, Clone, PartialEq)]
pub struct Nearby {
    key: String,
    point: Coordinate,
    meters: f64,
    options: Options,
}

impl Nearby {
    /// Creates a NEARBY query around `point` within `meters`.
    #[must_use]
    pub fn new(key: impl Into<String>, point: Coordinate, meters: f64) -> Self {
        Self {
            key: key.into(),
            point,
            meters,
            options: Options::default(),
        }
    }

    /// Replaces the query options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
}

impl ToCommand for Nearby {
    fn to_command(&self) -> Command {
        let mut tokens = vec![self.key.clone()];
        self.options.push_tokens(&mut tokens);
        tokens.push("POINT".to_string());
        self.point.push_tokens(&mut tokens);
        tokens.push(number(self.meters));
        Command::new("NEARBY", tokens)
    }
}

impl SpatialQuery for Nearby {}

// ============================================================================
// Scan / Search
// ============================================================================

/// `SCAN key [options]`
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    key: String,
    options: Options,
}

impl Scan {
    /// Creates a SCAN over the whole collection.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            options: Options::default(),
        }
    }

    /// Replaces the query options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
}

impl ToCommand for Scan {
    fn to_command(&self) -> Command {
        let mut tokens = vec![self.key.clone()];
        self.options.push_tokens(&mut tokens);
        Command::new("SCAN", tokens)
    }
}

/// Sort order of a [`Search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Ascending.
    #[default]
    Ascending,
    /// Descending.
    Descending,
}

impl Order {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// `SEARCH key [MATCH pattern] ASC|DESC`
///
/// Searches string values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    key: String,
    pattern: Option<String>,
    order: Order,
}

impl Search {
    /// Creates a SEARCH.
    #[must_use]
    pub fn new(key: impl Into<String>, order: Order) -> Self {
        Self {
            key: key.into(),
            pattern: None,
            order,
        }
    }

    /// Restricts results to values matching `pattern`.
    #[inline]
    #[must_use]
    pub fn matching(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

impl ToCommand for Search {
    fn to_command(&self) -> Command {
        let mut tokens = vec![self.key.clone()];
        if let Some(pattern) = &self.pattern {
            tokens.extend(["MATCH".to_string(), pattern.clone()]);
        }
        tokens.push(self.order.as_str().to_string());
        Command::new("SEARCH", tokens)
    }
}

// ============================================================================
// Fence
// ============================================================================

/// Detection type reported by a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Detect {
    /// Object is inside the area.
    Inside,
    /// Object is outside the area.
    Outside,
    /// Object entered the area.
    Enter,
    /// Object left the area.
    Exit,
    /// Object crossed the area.
    Cross,
}

impl Detect {
    /// Returns the server token.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inside => "inside",
            Self::Outside => "outside",
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::Cross => "cross",
        }
    }
}

impl fmt::Display for Detect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A spatial query turned into a live fence.
///
/// The rendered command keeps the query's name and argument order and adds
/// `FENCE [DETECT list]` after the key.
#[derive(Debug, Clone, PartialEq)]
pub struct Fence<Q> {
    query: Q,
    detect: Vec<Detect>,
}

impl<Q: SpatialQuery> Fence<Q> {
    /// Wraps `query`, reporting every detection type.
    #[must_use]
    pub fn new(query: Q) -> Self {
        Self {
            query,
            detect: Vec::new(),
        }
    }

    /// Restricts notifications to the given detection types.
    #[must_use]
    pub fn detect(mut self, detect: impl IntoIterator<Item = Detect>) -> Self {
        self.detect = detect.into_iter().collect();
        self
    }

    /// Returns the wrapped query.
    #[inline]
    #[must_use]
    pub fn query(&self) -> &Q {
        &self.query
    }
}

impl<Q: SpatialQuery> ToCommand for Fence<Q> {
    fn to_command(&self) -> Command {
        let base = self.query.to_command();
        let mut inserted = vec![FENCE_TOKEN.to_string()];
        if !self.detect.is_empty() {
            let list: Vec<&str> = self.detect.iter().map(|d| d.as_str()).collect();
            inserted.push(DETECT_TOKEN.to_string());
            inserted.push(list.join(","));
        }

        // Insert after the key (index 0 of the arguments).
        let mut arguments = base.arguments().to_vec();
        let at = arguments.len().min(1);
        arguments.splice(at..at, inserted);
        Command::new(base.name(), arguments)
    }
}

// ============================================================================
// Tests
// ============================================================================
