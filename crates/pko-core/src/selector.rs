//! Label selector evaluation

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;

/// True when `labels` satisfy every requirement of `selector`.
///
/// An empty selector matches everything.
pub fn matches(selector: &LabelSelector, labels: Option<&BTreeMap<String, String>>) -> bool {
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);

    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
    }

    for expression in selector.match_expressions.as_deref().unwrap_or_default() {
        let values = expression.values.as_deref().unwrap_or_default();
        let actual = labels.get(&expression.key);
        let satisfied = match expression.operator.as_str() {
            "In" => actual.is_some_and(|v| values.contains(v)),
            "NotIn" => actual.is_none_or(|v| !values.contains(v)),
            "Exists" => actual.is_some(),
            "DoesNotExist" => actual.is_none(),
            _ => false,
        };
        if !satisfied {
            return false;
        }
    }
    true
}

/// Render a selector in the query syntax accepted by list calls.
pub fn to_query(selector: &LabelSelector) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(match_labels) = &selector.match_labels {
        parts.extend(match_labels.iter().map(|(k, v)| format!("{k}={v}")));
    }

    for expression in selector.match_expressions.as_deref().unwrap_or_default() {
        let values = expression.values.as_deref().unwrap_or_default().join(",");
        match expression.operator.as_str() {
            "In" => parts.push(format!("{} in ({values})", expression.key)),
            "NotIn" => parts.push(format!("{} notin ({values})", expression.key)),
            "Exists" => parts.push(expression.key.clone()),
            "DoesNotExist" => parts.push(format!("!{}", expression.key)),
            _ => {}
        }
    }

    parts.join(",")
}

/// Selector matching exactly the given labels.
pub fn from_labels(labels: &BTreeMap<String, String>) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels.clone()),
        match_expressions: None,
    }
}
