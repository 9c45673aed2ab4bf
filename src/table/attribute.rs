use std::fmt::{self, Write as _};
use std::hash::{Hash, Hasher};
use std::mem;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::common::{EdfError, Result, SysVal};
use crate::storage::codec::{pack_f64, pack_u64, unpack_f64, unpack_u64};

use super::Dictionary;

/// How an attribute turns text into a cell and back.
#[derive(Debug, Clone)]
pub enum AttributeKind {
    /// A plain float. With a precision, values render with that many
    /// decimals; otherwise the shortest text that round-trips.
    Float { precision: Option<usize> },
    /// A value from a shared dictionary; the cell holds its index.
    Categorical(Arc<Dictionary>),
    /// `0` or `1`.
    Binary,
    /// Free text interned into a shared pool; the cell holds its index.
    String(Arc<Dictionary>),
    /// An unsigned 64-bit identifier stored as raw bits.
    Identifier,
    /// A point in time parsed with a chrono format string; the cell holds
    /// seconds since the Unix epoch.
    Timestamp { layout: String },
}

impl AttributeKind {
    fn type_name(&self) -> &'static str {
        match self {
            AttributeKind::Float { .. } => "FloatAttribute",
            AttributeKind::Categorical(_) => "CategoricalAttribute",
            AttributeKind::Binary => "BinaryAttribute",
            AttributeKind::String(_) => "StringAttribute",
            AttributeKind::Identifier => "IdentifierAttribute",
            AttributeKind::Timestamp { .. } => "TimestampAttribute",
        }
    }
}

/// A named, typed column.
///
/// Two attributes are equal when their kinds and names match, so an
/// attribute built from the same schema twice resolves to the same column.
/// Cloning is cheap; dictionaries are shared.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
    kind: AttributeKind,
}

impl Attribute {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Float { precision: None })
    }

    pub fn float_with_precision(name: impl Into<String>, precision: usize) -> Self {
        Self::new(
            name,
            AttributeKind::Float {
                precision: Some(precision),
            },
        )
    }

    pub fn categorical(name: impl Into<String>) -> Self {
        Self::categorical_with(name, Arc::new(Dictionary::new()))
    }

    /// A categorical attribute that interns into `values`.
    pub fn categorical_with(name: impl Into<String>, values: Arc<Dictionary>) -> Self {
        Self::new(name, AttributeKind::Categorical(values))
    }

    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Binary)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::string_with(name, Arc::new(Dictionary::new()))
    }

    pub fn string_with(name: impl Into<String>, pool: Arc<Dictionary>) -> Self {
        Self::new(name, AttributeKind::String(pool))
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        Self::new(name, AttributeKind::Identifier)
    }

    pub fn timestamp(name: impl Into<String>, layout: impl Into<String>) -> Self {
        Self::new(
            name,
            AttributeKind::Timestamp {
                layout: layout.into(),
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    /// The dictionary behind a categorical or string attribute.
    pub fn dictionary(&self) -> Option<&Arc<Dictionary>> {
        match &self.kind {
            AttributeKind::Categorical(dict) | AttributeKind::String(dict) => Some(dict),
            _ => None,
        }
    }

    /// Converts text into this attribute's cell representation.
    pub fn encode(&self, value: &str) -> Result<SysVal> {
        let trimmed = value.trim();
        match &self.kind {
            AttributeKind::Float { .. } => trimmed
                .parse::<f64>()
                .map(pack_f64)
                .map_err(|e| self.encode_error(value, e)),
            AttributeKind::Categorical(dict) => Ok(pack_f64(dict.intern(trimmed) as f64)),
            AttributeKind::String(pool) => Ok(pack_f64(pool.intern(value) as f64)),
            AttributeKind::Binary => {
                let bit = match trimmed {
                    "true" | "TRUE" | "True" => true,
                    "false" | "FALSE" | "False" => false,
                    _ => {
                        trimmed
                            .parse::<f64>()
                            .map_err(|e| self.encode_error(value, e))?
                            != 0.0
                    }
                };
                Ok(pack_f64(if bit { 1.0 } else { 0.0 }))
            }
            AttributeKind::Identifier => trimmed
                .parse::<u64>()
                .map(pack_u64)
                .map_err(|e| self.encode_error(value, e)),
            AttributeKind::Timestamp { layout } => {
                let parsed = NaiveDateTime::parse_from_str(trimmed, layout).or_else(|e| {
                    NaiveDate::parse_from_str(trimmed, layout)
                        .ok()
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                        .ok_or(e)
                });
                let parsed = parsed.map_err(|e| self.encode_error(value, e))?;
                let utc = parsed.and_utc();
                let seconds =
                    utc.timestamp() as f64 + utc.timestamp_subsec_nanos() as f64 / 1e9;
                Ok(pack_f64(seconds))
            }
        }
    }

    /// Renders a cell of this attribute as text.
    pub fn decode(&self, cell: &SysVal) -> Result<String> {
        match &self.kind {
            AttributeKind::Float { precision } => {
                let value = unpack_f64(cell);
                Ok(match precision {
                    Some(p) => format!("{:.*}", p, value),
                    None => format!("{}", value),
                })
            }
            AttributeKind::Categorical(dict) | AttributeKind::String(dict) => {
                let index = self.dictionary_index(cell)?;
                dict.get(index).ok_or_else(|| {
                    self.decode_error(format!("index {} is not in the dictionary", index))
                })
            }
            AttributeKind::Binary => Ok(if unpack_f64(cell) != 0.0 { "1" } else { "0" }.into()),
            AttributeKind::Identifier => Ok(unpack_u64(cell).to_string()),
            AttributeKind::Timestamp { layout } => {
                let value = unpack_f64(cell);
                let seconds = value.floor();
                let nanos = ((value - seconds) * 1e9).round().min(999_999_999.0) as u32;
                let time = DateTime::from_timestamp(seconds as i64, nanos)
                    .ok_or_else(|| self.decode_error(format!("{} is out of range", value)))?;
                let mut out = String::new();
                write!(out, "{}", time.naive_utc().format(layout)).map_err(|_| {
                    self.decode_error(format!("invalid timestamp layout {:?}", layout))
                })?;
                Ok(out)
            }
        }
    }

    /// Whether cells of `other` can be read as cells of `self`.
    pub fn compatible_with(&self, other: &Attribute) -> bool {
        use AttributeKind::*;
        match (&self.kind, &other.kind) {
            (Identifier, Identifier | Categorical(_)) => true,
            (Timestamp { .. }, Binary) => false,
            (Timestamp { .. }, _) => true,
            (a, b) => mem::discriminant(a) == mem::discriminant(b),
        }
    }

    fn dictionary_index(&self, cell: &SysVal) -> Result<usize> {
        let value = unpack_f64(cell);
        if value < 0.0 || value.fract() != 0.0 || !value.is_finite() {
            return Err(self.decode_error(format!("{} is not a dictionary index", value)));
        }
        Ok(value as usize)
    }

    fn encode_error(&self, value: &str, reason: impl fmt::Display) -> EdfError {
        EdfError::Encode {
            attribute: self.name.clone(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn decode_error(&self, reason: String) -> EdfError {
        EdfError::Decode {
            attribute: self.name.clone(),
            reason,
        }
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && mem::discriminant(&self.kind) == mem::discriminant(&other.kind)
    }
}

impl Eq for Attribute {}

impl Hash for Attribute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(&self.kind).hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind.type_name(), self.name)
    }
}
