//! Query-related data models.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One result row, keyed by column name.
pub type JsonRow = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Interpret a command-line value: JSON scalars where they parse, text otherwise.
    pub fn from_cli_value(raw: &str) -> Self {
        match serde_json::from_str::<JsonValue>(raw) {
            Ok(JsonValue::Null) => Self::Null,
            Ok(JsonValue::Bool(b)) => Self::Bool(b),
            Ok(JsonValue::Number(n)) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n
                    .as_f64()
                    .map(Self::Float)
                    .unwrap_or_else(|| Self::String(raw.to_string())),
            },
            Ok(JsonValue::String(s)) => Self::String(s),
            _ => Self::String(raw.to_string()),
        }
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Where a facade sends its next statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "target", content = "transaction_id", rename_all = "snake_case")]
pub enum QueryRoute {
    Pool,
    /// Carries the attached transaction's id.
    Transaction(String),
}

impl std::fmt::Display for QueryRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pool => write!(f, "pool"),
            Self::Transaction(id) => write!(f, "transaction:{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_types() {
        assert_eq!(QueryParam::Null.type_name(), "null");
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(QueryParam::from("hello").type_name(), "string");
    }

    #[test]
    fn test_untagged_deserialization() {
        let params: Vec<QueryParam> =
            serde_json::from_str(r#"[null, true, 7, 1.5, "db1"]"#).unwrap();
        assert_eq!(
            params,
            vec![
                QueryParam::Null,
                QueryParam::Bool(true),
                QueryParam::Int(7),
                QueryParam::Float(1.5),
                QueryParam::String("db1".to_string()),
            ]
        );
    }

    #[test]
    fn test_from_cli_value() {
        assert_eq!(QueryParam::from_cli_value("42"), QueryParam::Int(42));
        assert_eq!(QueryParam::from_cli_value("2.5"), QueryParam::Float(2.5));
        assert_eq!(QueryParam::from_cli_value("false"), QueryParam::Bool(false));
        assert_eq!(QueryParam::from_cli_value("null"), QueryParam::Null);
        assert_eq!(
            QueryParam::from_cli_value("alice"),
            QueryParam::String("alice".to_string())
        );
        assert_eq!(
            QueryParam::from_cli_value("\"42\""),
            QueryParam::String("42".to_string())
        );
    }

    #[test]
    fn test_query_route_display() {
        assert_eq!(QueryRoute::Pool.to_string(), "pool");
        assert_eq!(
            QueryRoute::Transaction("tx_1".to_string()).to_string(),
            "transaction:tx_1"
        );
    }
}
