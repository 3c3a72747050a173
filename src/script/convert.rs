//! Conversions between script values and document / JSON values.

use crate::document::DocValue;
use indexmap::IndexMap;
use rhai::{Array, Dynamic, Map};
use serde_json::Value as JsonValue;

pub fn doc_to_dynamic(value: &DocValue) -> Dynamic {
    match value {
        DocValue::Null => Dynamic::UNIT,
        DocValue::Bool(b) => Dynamic::from_bool(*b),
        DocValue::Int(i) => Dynamic::from_int(*i),
        DocValue::Float(f) => Dynamic::from_float(*f),
        DocValue::String(s) => Dynamic::from(s.clone()),
        DocValue::Seq(items) => {
            let array: Array = items.iter().map(doc_to_dynamic).collect();
            Dynamic::from_array(array)
        }
        DocValue::Map(map) => Dynamic::from_map(map_to_rhai(map)),
        DocValue::Callable(callable) => Dynamic::from(callable.source.clone()),
    }
}

pub fn map_to_rhai(map: &IndexMap<String, DocValue>) -> Map {
    let mut out = Map::new();
    for (key, value) in map {
        out.insert(key.as_str().into(), doc_to_dynamic(value));
    }
    out
}

/// Convert a script value into document data.
///
/// Function pointers become their name; host types without a data view become their
/// type name.
pub fn dynamic_to_doc(value: &Dynamic) -> DocValue {
    let value = value.flatten_clone();
    if value.is_unit() {
        return DocValue::Null;
    }
    if let Ok(b) = value.as_bool() {
        return DocValue::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return DocValue::Int(i);
    }
    if let Ok(f) = value.as_float() {
        return DocValue::Float(f);
    }
    if value.is_string() || value.is_char() {
        return DocValue::String(value.to_string());
    }
    if value.is_array() {
        let items = value.clone().into_array().unwrap_or_default();
        return DocValue::Seq(items.iter().map(dynamic_to_doc).collect());
    }
    if value.is_map() {
        let map = value.clone().try_cast::<Map>().unwrap_or_default();
        return DocValue::Map(
            map.iter()
                .map(|(k, v)| (k.to_string(), dynamic_to_doc(v)))
                .collect(),
        );
    }
    if value.is_fnptr() {
        return DocValue::String(value.to_string());
    }
    if let Some(blob) = value.clone().try_cast::<rhai::Blob>() {
        return DocValue::Seq(blob.into_iter().map(|b| DocValue::Int(b as i64)).collect());
    }
    DocValue::String(value.type_name().to_string())
}

pub fn json_to_dynamic(value: &JsonValue) -> Dynamic {
    doc_to_dynamic(&DocValue::from_json(value))
}

pub fn dynamic_to_json(value: &Dynamic) -> JsonValue {
    dynamic_to_doc(value).to_json()
}
