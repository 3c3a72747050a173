//! Property-based tests for function literal extraction

use docket::document::{extract, DocValue, JobDocument};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn ident() -> impl Strategy<Value = String> {
    "arg_[a-z0-9]{1,5}"
}

fn params() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(ident(), 0..4)
        .prop_map(|names: BTreeSet<String>| names.into_iter().collect())
}

proptest! {
    /// Every literal form yields the declared parameters in order.
    #[test]
    fn test_parameters_are_preserved(params in params(), is_async in any::<bool>()) {
        let list = params.join(", ");
        let prefix = if is_async { "async " } else { "" };
        let forms = [
            format!("{}function ({}) {{ return 1; }}", prefix, list),
            format!("{}function named({}) {{ return 1; }}", prefix, list),
            format!("{}({}) => 1", prefix, list),
            format!("{}({}) => {{ return 1; }}", prefix, list),
        ];
        for form in &forms {
            let callable = extract(form).unwrap();
            prop_assert_eq!(&callable.params, &params);
            prop_assert_eq!(callable.is_async, is_async);
            prop_assert_eq!(callable.source.as_str(), form.trim());
        }
    }

    /// A bare single-parameter arrow is the same callable as its parenthesized form.
    #[test]
    fn test_bare_arrow_matches_parenthesized(name in ident(), value in any::<i32>()) {
        let bare = extract(&format!("{} => {}", name, value)).unwrap();
        let wrapped = extract(&format!("({}) => {}", name, value)).unwrap();
        prop_assert_eq!(bare.params, wrapped.params);
        prop_assert_eq!(bare.body, wrapped.body);
    }

    /// Plain strings never turn into callables; only tagged values do.
    #[test]
    fn test_untagged_strings_stay_strings(text in "[a-zA-Z0-9 ()=>{};]{1,40}") {
        let yaml = format!("value: {}\n", serde_json::to_string(&text).unwrap());
        let document = JobDocument::parse(&yaml).unwrap();
        prop_assert_eq!(document.get("value"), Some(&DocValue::String(text)));
        prop_assert!(document.callables().is_empty());
    }

    /// Extraction never panics on arbitrary printable input.
    #[test]
    fn test_extract_total(source in "[ -~]{0,64}") {
        let _ = extract(&source);
    }
}
