//! Document values: YAML data plus callables.

use crate::document::callable::Callable;
use crate::document::extract::extract;
use crate::error::DocumentError;
use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Number, Value as JsonValue};
use serde_yaml_ng::value::{Tag, TaggedValue};
use serde_yaml_ng::{Mapping, Value as YamlValue};

/// Tag written back when a callable is serialized.
pub const FUNCTION_TAG: &str = "js/function";

/// A node of a parsed job document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Seq(Vec<DocValue>),
    Map(IndexMap<String, DocValue>),
    Callable(Callable),
}

/// Whether a YAML tag marks a function literal.
///
/// Accepts `!function`, `!js/function` and `!!js/function` (which the parser reports in
/// its resolved `tag:yaml.org,2002:js/function` form).
pub fn is_function_tag(tag: &Tag) -> bool {
    let rendered = tag.to_string();
    let name = rendered.trim_start_matches('!');
    name == "function" || name.ends_with(FUNCTION_TAG)
}

impl DocValue {
    /// Convert a parsed YAML node, extracting every function-tagged scalar.
    ///
    /// `path` names the node in error messages (`main`, `play.callback`, ...).
    pub fn from_yaml(value: YamlValue, path: &str) -> Result<Self, DocumentError> {
        Ok(match value {
            YamlValue::Null => DocValue::Null,
            YamlValue::Bool(b) => DocValue::Bool(b),
            YamlValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DocValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    DocValue::Float(f)
                } else {
                    return Err(DocumentError::Malformed(format!(
                        "number at '{}' is out of range",
                        path
                    )));
                }
            }
            YamlValue::String(s) => DocValue::String(s),
            YamlValue::Sequence(items) => {
                let mut seq = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    seq.push(DocValue::from_yaml(item, &format!("{}[{}]", path, index))?);
                }
                DocValue::Seq(seq)
            }
            YamlValue::Mapping(mapping) => DocValue::Map(map_from_yaml(mapping, path)?),
            YamlValue::Tagged(tagged) => {
                let TaggedValue { tag, value } = *tagged;
                if is_function_tag(&tag) {
                    let source = match value {
                        YamlValue::String(s) => s,
                        _ => {
                            return Err(DocumentError::InvalidField {
                                field: path.to_string(),
                                expected: "a function literal string".to_string(),
                            })
                        }
                    };
                    let callable = extract(&source).map_err(|source| DocumentError::Extraction {
                        field: path.to_string(),
                        source,
                    })?;
                    DocValue::Callable(callable)
                } else {
                    // Unknown tags carry no meaning here; keep the tagged content.
                    DocValue::from_yaml(value, path)?
                }
            }
        })
    }

    /// Convert back to YAML, re-tagging callables with their source text.
    pub fn to_yaml(&self) -> YamlValue {
        match self {
            DocValue::Null => YamlValue::Null,
            DocValue::Bool(b) => YamlValue::Bool(*b),
            DocValue::Int(i) => YamlValue::Number((*i).into()),
            DocValue::Float(f) => YamlValue::Number((*f).into()),
            DocValue::String(s) => YamlValue::String(s.clone()),
            DocValue::Seq(items) => YamlValue::Sequence(items.iter().map(DocValue::to_yaml).collect()),
            DocValue::Map(map) => {
                let mut mapping = Mapping::new();
                for (key, value) in map {
                    mapping.insert(YamlValue::String(key.clone()), value.to_yaml());
                }
                YamlValue::Mapping(mapping)
            }
            DocValue::Callable(callable) => YamlValue::Tagged(Box::new(TaggedValue {
                tag: Tag::new(FUNCTION_TAG),
                value: YamlValue::String(callable.source.clone()),
            })),
        }
    }

    /// JSON view of the value. Callables render as their source text.
    pub fn to_json(&self) -> JsonValue {
        match self {
            DocValue::Null => JsonValue::Null,
            DocValue::Bool(b) => JsonValue::Bool(*b),
            DocValue::Int(i) => JsonValue::Number((*i).into()),
            DocValue::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DocValue::String(s) => JsonValue::String(s.clone()),
            DocValue::Seq(items) => JsonValue::Array(items.iter().map(DocValue::to_json).collect()),
            DocValue::Map(map) => {
                let mut object = JsonMap::new();
                for (key, value) in map {
                    object.insert(key.clone(), value.to_json());
                }
                JsonValue::Object(object)
            }
            DocValue::Callable(callable) => JsonValue::String(callable.source.clone()),
        }
    }

    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => DocValue::Null,
            JsonValue::Bool(b) => DocValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => DocValue::Int(i),
                None => DocValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => DocValue::String(s.clone()),
            JsonValue::Array(items) => DocValue::Seq(items.iter().map(DocValue::from_json).collect()),
            JsonValue::Object(object) => DocValue::Map(
                object
                    .iter()
                    .map(|(k, v)| (k.clone(), DocValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Truthiness used to decide whether a scenario action is present.
    pub fn is_truthy(&self) -> bool {
        match self {
            DocValue::Null => false,
            DocValue::Bool(b) => *b,
            DocValue::Int(i) => *i != 0,
            DocValue::Float(f) => *f != 0.0 && !f.is_nan(),
            DocValue::String(s) => !s.is_empty(),
            DocValue::Seq(_) | DocValue::Map(_) | DocValue::Callable(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DocValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DocValue::Int(i) => Some(*i),
            DocValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DocValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, DocValue>> {
        match self {
            DocValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[DocValue]> {
        match self {
            DocValue::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            DocValue::Callable(callable) => Some(callable),
            _ => None,
        }
    }

    /// Look up a key when the value is a map.
    pub fn get(&self, key: &str) -> Option<&DocValue> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            DocValue::Null => "null",
            DocValue::Bool(_) => "bool",
            DocValue::Int(_) => "int",
            DocValue::Float(_) => "float",
            DocValue::String(_) => "string",
            DocValue::Seq(_) => "sequence",
            DocValue::Map(_) => "map",
            DocValue::Callable(_) => "function",
        }
    }
}

impl From<&str> for DocValue {
    fn from(s: &str) -> Self {
        DocValue::String(s.to_string())
    }
}

impl From<String> for DocValue {
    fn from(s: String) -> Self {
        DocValue::String(s)
    }
}

impl From<i64> for DocValue {
    fn from(i: i64) -> Self {
        DocValue::Int(i)
    }
}

impl From<bool> for DocValue {
    fn from(b: bool) -> Self {
        DocValue::Bool(b)
    }
}

pub(crate) fn map_from_yaml(
    mapping: Mapping,
    path: &str,
) -> Result<IndexMap<String, DocValue>, DocumentError> {
    let mut map = IndexMap::with_capacity(mapping.len());
    for (key, value) in mapping {
        let key = scalar_key(&key).ok_or_else(|| {
            DocumentError::Malformed(format!("unsupported mapping key under '{}'", path))
        })?;
        let child = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        let value = DocValue::from_yaml(value, &child)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn scalar_key(key: &YamlValue) -> Option<String> {
    match key {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Null => Some("null".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_tags_are_recognized() {
        assert!(is_function_tag(&Tag::new("js/function")));
        assert!(is_function_tag(&Tag::new("!function")));
        assert!(is_function_tag(&Tag::new("tag:yaml.org,2002:js/function")));
        assert!(!is_function_tag(&Tag::new("js/regexp")));
    }

    #[test]
    fn truthiness_follows_scenario_rules() {
        assert!(!DocValue::Null.is_truthy());
        assert!(!DocValue::Bool(false).is_truthy());
        assert!(!DocValue::Int(0).is_truthy());
        assert!(!DocValue::String(String::new()).is_truthy());
        assert!(DocValue::Int(500).is_truthy());
        assert!(DocValue::Map(IndexMap::new()).is_truthy());
        assert!(DocValue::from("h1").is_truthy());
    }

    #[test]
    fn json_conversion_keeps_key_order() {
        let json: JsonValue = serde_json::from_str(r#"{"z": 1, "a": [true, null], "m": 1.5}"#).unwrap();
        let value = DocValue::from_json(&json);
        let keys: Vec<_> = value.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(value.to_json(), json);
    }
}
