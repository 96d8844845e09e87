//! Attribute descriptions: storage types, defaults, and key flags.
//!
//! The attribute format is deliberately open. [`DataType`] recognizes the
//! common storage types and carries anything else through unchanged as
//! [`DataType::Other`], and [`AttributeDef::extra`] keeps every option this
//! crate does not model. Code that transforms attributes only inspects the
//! ownership tag, nullability, default, and key flags.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Storage type of an attribute.
///
/// Serialized as the conventional upper-case type name (`INTEGER`,
/// `STRING(255)`, `DATE`, ...). Unrecognized names parse into
/// [`DataType::Other`] and render back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Double-precision float.
    Float,
    /// Arbitrary-precision decimal.
    Decimal,
    /// Variable-length string with an optional maximum length.
    String {
        /// Maximum length in characters, if bounded.
        length: Option<u32>,
    },
    /// Unbounded text.
    Text,
    /// Boolean flag.
    Boolean,
    /// Timestamp with time zone.
    Date,
    /// Calendar date without a time component.
    DateOnly,
    /// UUID.
    Uuid,
    /// JSON document.
    Json,
    /// Any storage type this crate does not know about, kept verbatim.
    Other(String),
}

impl FromStr for DataType {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        let parsed = match upper.as_str() {
            "INTEGER" | "INT" => Self::Integer,
            "BIGINT" => Self::BigInt,
            "FLOAT" | "DOUBLE" | "REAL" => Self::Float,
            "DECIMAL" | "NUMERIC" => Self::Decimal,
            "STRING" => Self::String { length: None },
            "TEXT" => Self::Text,
            "BOOLEAN" | "BOOL" => Self::Boolean,
            "DATE" => Self::Date,
            "DATEONLY" => Self::DateOnly,
            "UUID" => Self::Uuid,
            "JSON" | "JSONB" => Self::Json,
            _ => upper
                .strip_prefix("STRING(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|len| len.trim().parse().ok())
                .map_or_else(
                    || Self::Other(trimmed.to_owned()),
                    |length| Self::String {
                        length: Some(length),
                    },
                ),
        };
        Ok(parsed)
    }
}

impl From<String> for DataType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(data_type) => data_type,
            Err(never) => match never {},
        }
    }
}

impl From<DataType> for String {
    fn from(data_type: DataType) -> Self {
        data_type.to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => f.write_str("INTEGER"),
            Self::BigInt => f.write_str("BIGINT"),
            Self::Float => f.write_str("FLOAT"),
            Self::Decimal => f.write_str("DECIMAL"),
            Self::String { length: None } => f.write_str("STRING"),
            Self::String {
                length: Some(length),
            } => write!(f, "STRING({length})"),
            Self::Text => f.write_str("TEXT"),
            Self::Boolean => f.write_str("BOOLEAN"),
            Self::Date => f.write_str("DATE"),
            Self::DateOnly => f.write_str("DATEONLY"),
            Self::Uuid => f.write_str("UUID"),
            Self::Json => f.write_str("JSON"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Default applied to an attribute when an insert does not supply it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DefaultValue {
    /// Current time at row-insert time.
    Now,
    /// A fixed value.
    Literal(Value),
}

/// Description of one attribute (column) of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDef {
    /// Storage type.
    #[serde(rename = "type")]
    pub data_type: DataType,

    /// Whether the attribute accepts null.
    #[serde(default = "default_allow_null")]
    pub allow_null: bool,

    /// Default applied on insert when no value is supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<DefaultValue>,

    /// Part of the primary key.
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,

    /// Values must be unique across rows.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,

    /// Values are assigned from a per-table sequence.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_increment: bool,

    /// Name of a host-registered accessor applied when reading the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getter: Option<String>,

    /// Name of a host-registered mutator applied when writing the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setter: Option<String>,

    /// Back-reference to the model that owns this attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Internal marker set by the host on attributes it manages itself.
    #[serde(default, skip_serializing_if = "is_false")]
    pub model_attribute: bool,

    /// Free-form column comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Every other option, carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

const fn default_allow_null() -> bool {
    true
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(flag: &bool) -> bool {
    !*flag
}

impl AttributeDef {
    /// Create a nullable attribute of the given type with no flags set.
    pub const fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            allow_null: true,
            default_value: None,
            primary_key: false,
            unique: false,
            auto_increment: false,
            getter: None,
            setter: None,
            model: None,
            model_attribute: false,
            comment: None,
            extra: BTreeMap::new(),
        }
    }

    /// Reject null values.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    /// Mark as (part of) the primary key. Primary keys are never null.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.allow_null = false;
        self
    }

    /// Require unique values.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Assign values from a sequence when none is supplied.
    #[must_use]
    pub const fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Set the insert-time default.
    #[must_use]
    pub fn with_default(mut self, default_value: DefaultValue) -> Self {
        self.default_value = Some(default_value);
        self
    }
}
