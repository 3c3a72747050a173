//! Job documents
//!
//! A job document is YAML text mixing plain data with function literals tagged
//! `!!js/function`. Parsing extracts every tagged literal into a [`Callable`]; all other
//! fields pass through untouched and survive a round trip through [`JobDocument::to_yaml`].

pub mod callable;
pub mod extract;
pub mod options;
mod tags;
pub mod value;

pub use callable::Callable;
pub use extract::extract;
pub use options::{Backoff, BackoffKind, DateSpec, JobOptions, RepeatOptions, Retention};
pub use value::DocValue;

use crate::error::DocumentError;
use crate::types::JobKind;
use indexmap::IndexMap;
use serde_yaml_ng::Value as YamlValue;

/// A capability requested by a document's `modules` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    /// Namespace the capability is exposed under
    pub name: String,
    /// Locator: a built-in capability name or a script module path
    pub source: Option<String>,
}

impl ModuleRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
        }
    }
}

/// A parsed job document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobDocument {
    fields: IndexMap<String, DocValue>,
}

impl JobDocument {
    /// Parse document text. Function literals are extracted here; a literal that cannot be
    /// extracted rejects the whole document.
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let text = tags::normalize_function_tags(text);
        let value: YamlValue =
            serde_yaml_ng::from_str(&text).map_err(|e| DocumentError::Malformed(e.to_string()))?;
        match value {
            YamlValue::Mapping(mapping) => Ok(Self {
                fields: value::map_from_yaml(mapping, "")?,
            }),
            YamlValue::Null => Err(DocumentError::Malformed("document is empty".to_string())),
            _ => Err(DocumentError::Malformed(
                "document root must be a mapping".to_string(),
            )),
        }
    }

    pub fn from_fields(fields: IndexMap<String, DocValue>) -> Self {
        Self { fields }
    }

    /// Serialize back to YAML with callables re-tagged.
    pub fn to_yaml(&self) -> Result<String, DocumentError> {
        let mut mapping = serde_yaml_ng::Mapping::new();
        for (key, value) in &self.fields {
            mapping.insert(YamlValue::String(key.clone()), value.to_yaml());
        }
        serde_yaml_ng::to_string(&YamlValue::Mapping(mapping))
            .map_err(|e| DocumentError::Malformed(e.to_string()))
    }

    pub fn fields(&self) -> &IndexMap<String, DocValue> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&DocValue> {
        self.fields.get(key)
    }

    /// Set a field, keeping its position when it already exists.
    pub fn set(&mut self, key: impl Into<String>, value: DocValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<DocValue> {
        self.fields.shift_remove(key)
    }

    /// Queue name declared by the document.
    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(DocValue::as_str).filter(|s| !s.is_empty())
    }

    pub fn callable(&self, key: &str) -> Option<&Callable> {
        self.get(key).and_then(DocValue::as_callable)
    }

    pub fn main(&self) -> Option<&Callable> {
        self.callable("main")
    }

    pub fn error_hook(&self) -> Option<&Callable> {
        self.callable("error")
    }

    pub fn options(&self) -> Result<JobOptions, DocumentError> {
        JobOptions::from_value(self.get("option"))
    }

    /// Capabilities requested by the document, in declaration order.
    pub fn modules(&self) -> Result<Vec<ModuleRef>, DocumentError> {
        let entries = match self.get("modules") {
            None | Some(DocValue::Null) => return Ok(Vec::new()),
            Some(DocValue::Seq(entries)) => entries,
            Some(_) => {
                return Err(DocumentError::InvalidField {
                    field: "modules".to_string(),
                    expected: "a list of names or {name, source} entries".to_string(),
                })
            }
        };
        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| module_ref(entry, index))
            .collect()
    }

    /// Every callable in the document with its field path, in document order.
    pub fn callables(&self) -> Vec<(String, &Callable)> {
        let mut found = Vec::new();
        for (key, value) in &self.fields {
            collect_callables(value, key.clone(), &mut found);
        }
        found
    }

    /// Check the fields a job of `kind` needs before it may be enqueued.
    pub fn validate_for(&self, kind: JobKind) -> Result<(), DocumentError> {
        if let Some(name) = self.get("name") {
            if !matches!(name, DocValue::String(_) | DocValue::Null) {
                return Err(invalid("name", "a string"));
            }
        }
        self.modules()?;
        self.options()?;
        self.expect_optional_callable("error")?;

        match kind {
            JobKind::Generic => match self.get("main") {
                None | Some(DocValue::Null) => {
                    return Err(DocumentError::MissingField("main".to_string()))
                }
                Some(DocValue::Callable(_)) => {}
                Some(_) => return Err(invalid("main", "a function literal")),
            },
            JobKind::Shell => {
                match self.get("command") {
                    None | Some(DocValue::Null) => {
                        return Err(DocumentError::MissingField("command".to_string()))
                    }
                    Some(DocValue::String(command)) if !command.trim().is_empty() => {}
                    Some(_) => return Err(invalid("command", "a non-empty string")),
                }
                if let Some(args) = self.get("args") {
                    let valid = match args {
                        DocValue::Null => true,
                        DocValue::Seq(items) => items.iter().all(is_scalar),
                        _ => false,
                    };
                    if !valid {
                        return Err(invalid("args", "a list of scalars"));
                    }
                }
            }
            JobKind::Browser => {
                match self.get("play") {
                    None | Some(DocValue::Null) => {
                        return Err(DocumentError::MissingField("play".to_string()))
                    }
                    Some(DocValue::Map(_)) => {}
                    Some(DocValue::Seq(items)) if items.iter().all(|s| s.as_map().is_some()) => {}
                    Some(_) => return Err(invalid("play", "a scenario map or a list of them")),
                }
                self.expect_optional_callable("init")?;
                self.expect_optional_callable("then")?;
            }
        }
        Ok(())
    }

    fn expect_optional_callable(&self, key: &str) -> Result<(), DocumentError> {
        match self.get(key) {
            None | Some(DocValue::Null) | Some(DocValue::Callable(_)) => Ok(()),
            Some(_) => Err(invalid(key, "a function literal")),
        }
    }
}

fn invalid(field: &str, expected: &str) -> DocumentError {
    DocumentError::InvalidField {
        field: field.to_string(),
        expected: expected.to_string(),
    }
}

fn is_scalar(value: &DocValue) -> bool {
    matches!(
        value,
        DocValue::String(_) | DocValue::Int(_) | DocValue::Float(_) | DocValue::Bool(_)
    )
}

fn module_ref(entry: &DocValue, index: usize) -> Result<ModuleRef, DocumentError> {
    match entry {
        DocValue::String(name) if !name.is_empty() => Ok(ModuleRef::named(name.clone())),
        DocValue::Map(map) => {
            let name = map
                .get("name")
                .and_then(DocValue::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| invalid(&format!("modules[{}].name", index), "a non-empty string"))?;
            let source = match map.get("source") {
                None | Some(DocValue::Null) => None,
                Some(DocValue::String(source)) => Some(source.clone()),
                Some(_) => return Err(invalid(&format!("modules[{}].source", index), "a string")),
            };
            Ok(ModuleRef {
                name: name.to_string(),
                source,
            })
        }
        _ => Err(invalid(
            &format!("modules[{}]", index),
            "a name or a {name, source} entry",
        )),
    }
}

fn collect_callables<'a>(value: &'a DocValue, path: String, found: &mut Vec<(String, &'a Callable)>) {
    match value {
        DocValue::Callable(callable) => found.push((path, callable)),
        DocValue::Seq(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_callables(item, format!("{}[{}]", path, index), found);
            }
        }
        DocValue::Map(map) => {
            for (key, item) in map {
                collect_callables(item, format!("{}.{}", path, key), found);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionError;

    const GENERIC: &str = r#"
name: reports
modules:
  - time
  - name: store
    source: kv
count: 0
main: !!js/function >
  function (job) {
    job.complete(job.get("count"));
  }
error: !!js/function "(job, message) => message"
option:
  attempts: 2
"#;

    #[test]
    fn parses_generic_document() {
        let doc = JobDocument::parse(GENERIC).unwrap();
        assert_eq!(doc.name(), Some("reports"));
        assert_eq!(doc.main().unwrap().params, vec!["job"]);
        assert_eq!(doc.error_hook().unwrap().params, vec!["job", "message"]);
        assert_eq!(
            doc.modules().unwrap(),
            vec![
                ModuleRef::named("time"),
                ModuleRef {
                    name: "store".to_string(),
                    source: Some("kv".to_string())
                }
            ]
        );
        assert_eq!(doc.options().unwrap().max_attempts(), 2);
        doc.validate_for(JobKind::Generic).unwrap();
    }

    #[test]
    fn accepts_all_function_tag_spellings() {
        for tag in ["!!js/function", "!js/function", "!function"] {
            let text = format!("main: {} 'job => job.complete(1)'", tag);
            let doc = JobDocument::parse(&text).unwrap();
            assert!(doc.main().is_some(), "tag {} not recognized", tag);
        }
    }

    #[test]
    fn tag_text_inside_scalars_stays_text() {
        let text = r#"
note: "call !!js/function later"
script: |
  !!js/function x => x
main: !!js/function |
  (job) => job.complete("!!js/function")
"#;
        let doc = JobDocument::parse(text).unwrap();
        assert_eq!(doc.get("note").and_then(DocValue::as_str), Some("call !!js/function later"));
        assert_eq!(
            doc.get("script").and_then(DocValue::as_str),
            Some("!!js/function x => x\n")
        );
        assert!(doc.main().unwrap().body.contains("\"!!js/function\""));
    }

    #[test]
    fn missing_main_is_rejected() {
        let doc = JobDocument::parse("name: q\ncount: 1\n").unwrap();
        assert!(matches!(
            doc.validate_for(JobKind::Generic),
            Err(DocumentError::MissingField(field)) if field == "main"
        ));
    }

    #[test]
    fn untagged_main_is_rejected() {
        let doc = JobDocument::parse("main: 'job => 1'\n").unwrap();
        assert!(matches!(
            doc.validate_for(JobKind::Generic),
            Err(DocumentError::InvalidField { .. })
        ));
    }

    #[test]
    fn shell_and_browser_require_their_fields() {
        let doc = JobDocument::parse("name: q\n").unwrap();
        assert!(matches!(
            doc.validate_for(JobKind::Shell),
            Err(DocumentError::MissingField(field)) if field == "command"
        ));
        assert!(matches!(
            doc.validate_for(JobKind::Browser),
            Err(DocumentError::MissingField(field)) if field == "play"
        ));
        let shell = JobDocument::parse("command: echo\nargs: [hi, 2]\n").unwrap();
        shell.validate_for(JobKind::Shell).unwrap();
    }

    #[test]
    fn unextractable_literal_rejects_document() {
        let err = JobDocument::parse("main: !!js/function '42'\n").unwrap_err();
        match err {
            DocumentError::Extraction { field, source } => {
                assert_eq!(field, "main");
                assert!(matches!(source, ExtractionError::Shape(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn nested_callables_are_found_with_paths() {
        let text = r#"
play:
  goto: https://example.com
  callback: !!js/function "page => page.url()"
main: !!js/function "job => job.complete()"
"#;
        let doc = JobDocument::parse(text).unwrap();
        let paths: Vec<_> = doc.callables().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["play.callback", "main"]);
    }

    #[test]
    fn round_trip_keeps_unknown_fields_and_callables() {
        let doc = JobDocument::parse(GENERIC).unwrap();
        let text = doc.to_yaml().unwrap();
        assert!(text.contains("!js/function"));
        let reparsed = JobDocument::parse(&text).unwrap();
        assert_eq!(reparsed, doc);
        assert_eq!(reparsed.get("count"), Some(&DocValue::Int(0)));
    }

    #[test]
    fn non_mapping_root_is_malformed() {
        assert!(matches!(
            JobDocument::parse("- a\n- b\n"),
            Err(DocumentError::Malformed(_))
        ));
        assert!(matches!(
            JobDocument::parse("main: [unclosed"),
            Err(DocumentError::Malformed(_))
        ));
    }
}
