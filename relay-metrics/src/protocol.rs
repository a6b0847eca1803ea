use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::iter::FusedIterator;
use std::str::FromStr;

use smallvec::SmallVec;

/// Characters escaped in measurement names.
const MEASUREMENT_SPECIAL: &[char] = &[',', ' '];
/// Characters escaped in tag keys, tag values and field keys.
const KEY_SPECIAL: &[char] = &[',', '=', ' '];
/// Characters escaped within string field values.
const STRING_SPECIAL: &[char] = &['"', '\\'];

/// The time unit of timestamps in a write request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Precision {
    /// Nanoseconds, the default if no precision is requested.
    #[default]
    Nanoseconds,
    /// Microseconds.
    Microseconds,
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
}

impl Precision {
    /// Returns the number of nanoseconds in one unit of this precision.
    pub fn nanos(self) -> i64 {
        match self {
            Self::Nanoseconds => 1,
            Self::Microseconds => 1_000,
            Self::Milliseconds => 1_000_000,
            Self::Seconds => 1_000_000_000,
            Self::Minutes => 60_000_000_000,
            Self::Hours => 3_600_000_000_000,
        }
    }

    /// Truncates a nanosecond timestamp to a multiple of this precision.
    pub fn truncate(self, timestamp: i64) -> i64 {
        timestamp - timestamp.rem_euclid(self.nanos())
    }

    /// Converts a nanosecond timestamp into units of this precision.
    pub fn from_nanos(self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.nanos())
    }

    /// Returns the canonical query string representation of this precision.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nanoseconds => "ns",
            Self::Microseconds => "u",
            Self::Milliseconds => "ms",
            Self::Seconds => "s",
            Self::Minutes => "m",
            Self::Hours => "h",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned when parsing an unknown [`Precision`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("invalid precision")]
pub struct ParsePrecisionError;

impl FromStr for Precision {
    type Err = ParsePrecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" | "n" | "ns" => Self::Nanoseconds,
            "u" | "us" | "µ" => Self::Microseconds,
            "ms" => Self::Milliseconds,
            "s" => Self::Seconds,
            "m" => Self::Minutes,
            "h" => Self::Hours,
            _ => return Err(ParsePrecisionError),
        })
    }
}

/// The value of a single field of a [`Point`].
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// A 64-bit float, written without a suffix.
    Float(f64),
    /// A signed 64-bit integer, written with an `i` suffix.
    Integer(i64),
    /// An unsigned 64-bit integer, written with a `u` suffix.
    UInteger(u64),
    /// A quoted string.
    String(String),
    /// A boolean.
    Boolean(bool),
}

impl FieldValue {
    /// Returns `true` if this value counts as a datapoint.
    ///
    /// Only floats, integers and unsigned integers are datapoints.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Float(_) | Self::Integer(_) | Self::UInteger(_))
    }

    /// Returns the numeric value as float, or `None` for strings and booleans.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(value) => Some(value),
            Self::Integer(value) => Some(value as f64),
            Self::UInteger(value) => Some(value as f64),
            Self::String(_) | Self::Boolean(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}i"),
            Self::UInteger(value) => write!(f, "{value}u"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::String(value) => {
                f.write_char('"')?;
                write_escaped(f, value, STRING_SPECIAL)?;
                f.write_char('"')
            }
        }
    }
}

/// The reason a line could not be parsed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    /// The line is not valid UTF-8.
    #[error("invalid utf-8")]
    InvalidUtf8,
    /// The line does not start with a measurement name.
    #[error("missing measurement")]
    MissingMeasurement,
    /// A tag is missing its key, its value, or the separating `=`.
    #[error("invalid tag")]
    InvalidTag,
    /// The line has no fields.
    #[error("missing fields")]
    MissingFields,
    /// A field is missing its key or the separating `=`.
    #[error("invalid field")]
    InvalidField,
    /// A field value is not a valid float, integer, string, or boolean.
    #[error("invalid field value")]
    InvalidFieldValue,
    /// The timestamp is not an integer or out of range.
    #[error("invalid timestamp")]
    InvalidTimestamp,
}

/// An error returned by [`parse_points`] and [`Point::parse_all`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unable to parse line {line}: {kind}")]
pub struct ParsePointError {
    line: usize,
    kind: ParseErrorKind,
}

impl ParsePointError {
    /// Returns the 1-based line number of the malformed line.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Returns the reason for this error.
    pub fn kind(&self) -> ParseErrorKind {
        self.kind
    }
}

/// A single line of the line protocol.
///
/// Tags are kept sorted by key. Fields retain their order of appearance.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: SmallVec<[(String, FieldValue); 4]>,
    timestamp: i64,
}

impl Point {
    /// Creates a new point from its parts. The timestamp is in nanoseconds.
    pub fn new(
        measurement: impl Into<String>,
        tags: BTreeMap<String, String>,
        fields: impl IntoIterator<Item = (String, FieldValue)>,
        timestamp: i64,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            tags,
            fields: fields.into_iter().collect(),
            timestamp,
        }
    }

    /// Parses all points from a request body.
    ///
    /// Empty lines and comments starting with `#` are skipped. Lines without a timestamp receive
    /// `default_timestamp` (in nanoseconds) truncated to the precision. Timestamps in the body are
    /// interpreted in units of `precision`.
    pub fn parse_all(
        slice: &[u8],
        default_timestamp: i64,
        precision: Precision,
    ) -> ParsePoints<'_> {
        ParsePoints {
            slice,
            line: 0,
            default_timestamp,
            precision,
        }
    }

    /// Returns the name of the measurement.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Returns all tags sorted by key.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Returns the value of a tag.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns all fields in their original order.
    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// Returns the timestamp in nanoseconds since the UNIX epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Iterates the numeric fields of this point.
    pub fn datapoints(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields
            .iter()
            .filter(|(_, value)| value.is_numeric())
            .map(|(key, value)| (key.as_str(), value))
    }

    /// Returns the number of numeric fields of this point.
    pub fn datapoint_count(&self) -> usize {
        self.datapoints().count()
    }

    /// Returns the escaped measurement and tags, identifying the series of this point.
    pub fn series_key(&self) -> String {
        let mut key = String::new();
        self.write_key(&mut key).ok();
        key
    }

    /// Serializes this point with all fields and the timestamp in the given precision.
    ///
    /// The returned line does not have a trailing newline.
    pub fn to_line(&self, precision: Precision) -> String {
        let mut line = String::new();
        self.write_line(&mut line, precision, |_| true).ok();
        line
    }

    /// Appends a line with only the numeric fields of this point, followed by a newline.
    ///
    /// Returns the number of written datapoints. If the point has no numeric fields, nothing is
    /// written.
    pub fn write_datapoints(&self, out: &mut String, precision: Precision) -> usize {
        let count = self.datapoint_count();
        if count > 0 {
            self.write_line(out, precision, FieldValue::is_numeric).ok();
            out.push('\n');
        }
        count
    }

    fn write_key<W: Write>(&self, out: &mut W) -> fmt::Result {
        write_escaped(out, &self.measurement, MEASUREMENT_SPECIAL)?;
        for (key, value) in &self.tags {
            out.write_char(',')?;
            write_escaped(out, key, KEY_SPECIAL)?;
            out.write_char('=')?;
            write_escaped(out, value, KEY_SPECIAL)?;
        }
        Ok(())
    }

    fn write_line<W, F>(&self, out: &mut W, precision: Precision, filter: F) -> fmt::Result
    where
        W: Write,
        F: Fn(&FieldValue) -> bool,
    {
        self.write_key(out)?;

        let mut separator = ' ';
        for (key, value) in self.fields.iter().filter(|(_, value)| filter(value)) {
            out.write_char(separator)?;
            write_escaped(out, key, KEY_SPECIAL)?;
            write!(out, "={value}")?;
            separator = ',';
        }

        write!(out, " {}", precision.from_nanos(self.timestamp))
    }
}

/// Parses all points from a request body, failing on the first malformed line.
///
/// See [`Point::parse_all`] for details.
pub fn parse_points(
    slice: &[u8],
    default_timestamp: i64,
    precision: Precision,
) -> Result<Vec<Point>, ParsePointError> {
    Point::parse_all(slice, default_timestamp, precision).collect()
}

/// Iterator over parsed points returned from [`Point::parse_all`].
#[derive(Clone, Debug)]
pub struct ParsePoints<'a> {
    slice: &'a [u8],
    line: usize,
    default_timestamp: i64,
    precision: Precision,
}

impl Iterator for ParsePoints<'_> {
    type Item = Result<Point, ParsePointError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();
            self.line += 1;

            let string = match std::str::from_utf8(current) {
                Ok(string) => string.strip_suffix('\r').unwrap_or(string).trim_start(),
                Err(_) => {
                    return Some(Err(ParsePointError {
                        line: self.line,
                        kind: ParseErrorKind::InvalidUtf8,
                    }));
                }
            };

            if string.is_empty() || string.starts_with('#') {
                continue;
            }

            let result = parse_line(string, self.default_timestamp, self.precision);
            return Some(result.map_err(|kind| ParsePointError {
                line: self.line,
                kind,
            }));
        }
    }
}

impl FusedIterator for ParsePoints<'_> {}

fn write_escaped<W: Write + ?Sized>(out: &mut W, value: &str, special: &[char]) -> fmt::Result {
    for c in value.chars() {
        if special.contains(&c) {
            out.write_char('\\')?;
        }
        out.write_char(c)?;
    }
    Ok(())
}

/// A simple cursor over the remainder of a line.
struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.rest = &self.rest[c.len_utf8()..];
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Reads until the next unescaped stop character.
    ///
    /// A backslash escapes the following character only if it is in `escapable`, otherwise the
    /// backslash is kept literally.
    fn read_escaped(&mut self, stops: &[char], escapable: &[char]) -> String {
        let mut out = String::new();

        while let Some(c) = self.peek() {
            if stops.contains(&c) {
                break;
            }

            self.bump();
            if c == '\\' {
                if let Some(next) = self.peek().filter(|n| escapable.contains(n)) {
                    self.bump();
                    out.push(next);
                    continue;
                }
            }

            out.push(c);
        }

        out
    }

    /// Reads until the next stop character without interpreting escapes.
    fn read_raw(&mut self, stops: &[char]) -> &'a str {
        let end = self.rest.find(stops).unwrap_or(self.rest.len());
        let (head, tail) = self.rest.split_at(end);
        self.rest = tail;
        head
    }
}

fn parse_line(
    line: &str,
    default_timestamp: i64,
    precision: Precision,
) -> Result<Point, ParseErrorKind> {
    let mut cursor = Cursor { rest: line };

    let measurement = cursor.read_escaped(&[',', ' '], MEASUREMENT_SPECIAL);
    if measurement.is_empty() {
        return Err(ParseErrorKind::MissingMeasurement);
    }

    let mut tags = BTreeMap::new();
    while cursor.eat(',') {
        let key = cursor.read_escaped(&['=', ',', ' '], KEY_SPECIAL);
        if key.is_empty() || !cursor.eat('=') {
            return Err(ParseErrorKind::InvalidTag);
        }

        let value = cursor.read_escaped(&[',', ' '], KEY_SPECIAL);
        if value.is_empty() {
            return Err(ParseErrorKind::InvalidTag);
        }

        tags.insert(key, value);
    }

    if !cursor.eat(' ') {
        return Err(ParseErrorKind::MissingFields);
    }
    while cursor.eat(' ') {}

    let mut fields: SmallVec<[(String, FieldValue); 4]> = SmallVec::new();
    loop {
        let key = cursor.read_escaped(&['=', ',', ' '], KEY_SPECIAL);
        if key.is_empty() && fields.is_empty() && cursor.peek().is_none() {
            return Err(ParseErrorKind::MissingFields);
        }
        if key.is_empty() || !cursor.eat('=') {
            return Err(ParseErrorKind::InvalidField);
        }

        let value = parse_field_value(&mut cursor)?;
        fields.push((key, value));

        if !cursor.eat(',') {
            break;
        }
    }

    let raw_timestamp = cursor.rest.trim();
    if !raw_timestamp.is_empty() && !cursor.rest.starts_with(' ') {
        return Err(ParseErrorKind::InvalidFieldValue);
    }

    let timestamp = if raw_timestamp.is_empty() {
        precision.truncate(default_timestamp)
    } else {
        raw_timestamp
            .parse::<i64>()
            .ok()
            .and_then(|ts| ts.checked_mul(precision.nanos()))
            .ok_or(ParseErrorKind::InvalidTimestamp)?
    };

    Ok(Point {
        measurement,
        tags,
        fields,
        timestamp,
    })
}

fn parse_field_value(cursor: &mut Cursor<'_>) -> Result<FieldValue, ParseErrorKind> {
    if cursor.eat('"') {
        let mut value = String::new();
        loop {
            match cursor.bump() {
                None => return Err(ParseErrorKind::InvalidFieldValue),
                Some('"') => break,
                Some('\\') => match cursor.peek() {
                    Some(c) if STRING_SPECIAL.contains(&c) => {
                        cursor.bump();
                        value.push(c);
                    }
                    _ => value.push('\\'),
                },
                Some(c) => value.push(c),
            }
        }
        return Ok(FieldValue::String(value));
    }

    let raw = cursor.read_raw(&[',', ' ']);
    match raw {
        "" => return Err(ParseErrorKind::InvalidFieldValue),
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
        _ => (),
    }

    if let Some(int) = raw.strip_suffix('i') {
        return int
            .parse()
            .map(FieldValue::Integer)
            .map_err(|_| ParseErrorKind::InvalidFieldValue);
    }

    if let Some(uint) = raw.strip_suffix('u') {
        return uint
            .parse()
            .map(FieldValue::UInteger)
            .map_err(|_| ParseErrorKind::InvalidFieldValue);
    }

    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(FieldValue::Float(value)),
        _ => Err(ParseErrorKind::InvalidFieldValue),
    }
}
