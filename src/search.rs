//! Search term to predicate: each token matched against every search field.

use crate::config::SplitSearch;
use crate::query::{split_lookup, Lookup, Predicate};
use serde_json::Value;

/// Tokens of `q` under the split mode. Empty tokens are dropped.
pub fn tokens(q: &str, split: &SplitSearch) -> Vec<String> {
    let parts: Vec<&str> = match split {
        SplitSearch::Disabled => vec![q],
        SplitSearch::Whitespace => q.split_whitespace().collect(),
        SplitSearch::Separator(sep) => q.split(sep.as_str()).collect(),
    };
    parts
        .into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// OR over tokens of (OR over fields). A bare field name matches with `icontains`;
/// fields whose base name is in `scoped` are skipped. `None` when nothing is searched.
pub fn build_search(fields: &[String], q: &str, split: &SplitSearch, scoped: &[String]) -> Option<Predicate> {
    let fields: Vec<(&str, Lookup)> = fields
        .iter()
        .map(|f| split_lookup(f, Lookup::IContains))
        .filter(|(name, _)| !scoped.iter().any(|s| s == name))
        .collect();
    if fields.is_empty() {
        return None;
    }
    let per_token = tokens(q, split).into_iter().filter_map(|token| {
        Predicate::any(
            fields
                .iter()
                .map(|(name, lookup)| Predicate::field(*name, *lookup, Value::String(token.clone()))),
        )
    });
    Predicate::any(per_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<String> {
        vec!["name".into(), "email".into()]
    }

    #[test]
    fn split_search_ors_tokens_across_fields() {
        let p = build_search(&fields(), "john doe", &SplitSearch::Whitespace, &[]).unwrap();
        assert_eq!(
            p.to_string(),
            "((name~\"john\" OR email~\"john\") OR (name~\"doe\" OR email~\"doe\"))"
        );
    }

    #[test]
    fn unsplit_search_matches_whole_term() {
        let p = build_search(&fields(), "john doe", &SplitSearch::Disabled, &[]).unwrap();
        assert_eq!(p.to_string(), "(name~\"john doe\" OR email~\"john doe\")");
    }

    #[test]
    fn custom_separator_and_empty_tokens() {
        assert_eq!(tokens("a,,b, ", &SplitSearch::Separator(",".into())), vec!["a", "b"]);
        assert!(build_search(&fields(), "   ", &SplitSearch::Whitespace, &[]).is_none());
    }

    #[test]
    fn lookup_suffix_and_scoped_fields() {
        let fields = vec!["code__iexact".to_string(), "customer".to_string()];
        let p = build_search(&fields, "x1", &SplitSearch::Disabled, &["customer".to_string()]).unwrap();
        assert_eq!(p.to_string(), "code__iexact=\"x1\"");
        assert!(build_search(&["customer".to_string()], "x", &SplitSearch::Disabled, &["customer".to_string()]).is_none());
    }
}
