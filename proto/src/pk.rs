use serde_json::Value;

/// A primary key value as it appears in JSON payloads.
///
/// Keys are totally ordered and unique within a collection; payloads carry
/// them as JSON numbers or strings. Integers that fit `i64` canonicalize to
/// `Int` so that `1u64` and `1i64` hash identically; anything else falls back
/// to its string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pk {
    Int(i64),
    Uint(u64),
    Str(String),
}

impl Pk {
    /// Extract a key from a JSON value. `None` for values that cannot key an
    /// entity (null, arrays, objects, booleans).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Pk::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Some(Pk::Uint(u))
                } else {
                    // Fractional keys are unusual but the server is free to use them
                    Some(Pk::Str(n.to_string()))
                }
            }
            Value::String(s) => Some(Pk::Str(s.clone())),
            _ => None,
        }
    }

    /// The JSON representation used when the key travels back out in a query.
    pub fn to_value(&self) -> Value {
        match self {
            Pk::Int(i) => Value::from(*i),
            Pk::Uint(u) => Value::from(*u),
            Pk::Str(s) => Value::from(s.clone()),
        }
    }
}

impl std::fmt::Display for Pk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pk::Int(i) => write!(f, "{i}"),
            Pk::Uint(u) => write!(f, "{u}"),
            Pk::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Pk {
    fn from(i: i64) -> Self { Pk::Int(i) }
}

impl From<&str> for Pk {
    fn from(s: &str) -> Self { Pk::Str(s.to_string()) }
}

impl From<String> for Pk {
    fn from(s: String) -> Self { Pk::Str(s) }
}
