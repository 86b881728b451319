//! Package configuration admission
//!
//! User configuration is pruned to the fields the manifest's OpenAPI v3
//! schema declares, schema defaults are filled in and the result is
//! validated. Without a schema the admitted configuration is empty.

use serde_json::{Map, Value as JsonValue};

use pko_core::PackageManifest;

use crate::error::{EngineError, Result};

const PRESERVE_UNKNOWN_FIELDS: &str = "x-kubernetes-preserve-unknown-fields";

/// Admit `config` against the manifest schema.
pub fn admit_config(manifest: &PackageManifest, config: Option<&JsonValue>) -> Result<JsonValue> {
    let errors = check_schema(manifest);
    if !errors.is_empty() {
        return Err(EngineError::Schema {
            message: errors.join(", "),
        });
    }
    admission_errors(manifest, config).map_err(|errors| EngineError::Config {
        errors: errors.into_iter().map(|e| format!("config{e}")).collect(),
    })
}

/// Problems compiling the manifest's schema, if any.
pub fn check_schema(manifest: &PackageManifest) -> Vec<String> {
    match &manifest.spec.config.open_api_v3_schema {
        Some(schema) => match jsonschema::validator_for(schema) {
            Ok(_) => Vec::new(),
            Err(e) => vec![e.to_string()],
        },
        None => Vec::new(),
    }
}

/// Admit `config`, returning every failure as `<field path>: <message>`
/// where the field path is relative to the configuration root.
pub fn admission_errors(
    manifest: &PackageManifest,
    config: Option<&JsonValue>,
) -> std::result::Result<JsonValue, Vec<String>> {
    let Some(schema) = &manifest.spec.config.open_api_v3_schema else {
        return Ok(JsonValue::Object(Map::new()));
    };

    let mut admitted = match config {
        None | Some(JsonValue::Null) => JsonValue::Object(Map::new()),
        Some(value @ JsonValue::Object(_)) => value.clone(),
        Some(other) => {
            return Err(vec![format!(
                ": Invalid value: {other}: must be an object"
            )]);
        }
    };
    prune(&mut admitted, schema);
    apply_defaults(&mut admitted, schema);

    let validator = jsonschema::validator_for(schema).map_err(|e| vec![format!(": {e}")])?;
    let errors: Vec<String> = validator
        .iter_errors(&admitted)
        .map(|e| {
            format!(
                "{}: {}",
                field_path(&e.instance_path.to_string()),
                e.to_string().replace('"', "'")
            )
        })
        .collect();

    if errors.is_empty() {
        tracing::trace!(config = %admitted, "configuration admitted");
        Ok(admitted)
    } else {
        Err(errors)
    }
}

/// `/a/b/0` becomes `.a.b[0]`.
fn field_path(pointer: &str) -> String {
    pointer
        .split('/')
        .skip(1)
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .map(|token| match token.parse::<usize>() {
            Ok(index) => format!("[{index}]"),
            Err(_) => format!(".{token}"),
        })
        .collect()
}

fn preserves_unknown(schema: &JsonValue) -> bool {
    schema
        .get(PRESERVE_UNKNOWN_FIELDS)
        .and_then(JsonValue::as_bool)
        .unwrap_or(false)
}

/// Drop every field the schema does not declare.
pub fn prune(value: &mut JsonValue, schema: &JsonValue) {
    match value {
        JsonValue::Object(map) => {
            let properties = schema.get("properties").and_then(JsonValue::as_object);
            let additional = schema
                .get("additionalProperties")
                .filter(|a| a.is_object());
            let keep_unknown = preserves_unknown(schema)
                || schema.get("additionalProperties") == Some(&JsonValue::Bool(true));

            map.retain(|key, field| {
                let field_schema = properties.and_then(|p| p.get(key)).or(additional);
                match field_schema {
                    Some(field_schema) => {
                        prune(field, field_schema);
                        true
                    }
                    None => keep_unknown,
                }
            });
        }
        JsonValue::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for item in items {
                    prune(item, item_schema);
                }
            }
        }
        _ => {}
    }
}

/// Fill absent fields from schema defaults, top down.
pub fn apply_defaults(value: &mut JsonValue, schema: &JsonValue) {
    match value {
        JsonValue::Object(map) => {
            if let Some(properties) = schema.get("properties").and_then(JsonValue::as_object) {
                for (key, field_schema) in properties {
                    if !map.contains_key(key) {
                        if let Some(default) = field_schema.get("default") {
                            map.insert(key.clone(), default.clone());
                        }
                    }
                    if let Some(field) = map.get_mut(key) {
                        apply_defaults(field, field_schema);
                    }
                }
            }
            if let Some(additional) = schema.get("additionalProperties").filter(|a| a.is_object()) {
                let declared = schema.get("properties").and_then(JsonValue::as_object);
                for (key, field) in map.iter_mut() {
                    if declared.is_some_and(|d| d.contains_key(key)) {
                        continue;
                    }
                    apply_defaults(field, additional);
                }
            }
        }
        JsonValue::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for item in items {
                    apply_defaults(item, item_schema);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(schema: Option<JsonValue>) -> PackageManifest {
        let mut manifest = PackageManifest::default();
        manifest.spec.config.open_api_v3_schema = schema;
        manifest
    }

    fn schema() -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "replicas": {"type": "integer", "default": 1, "minimum": 1},
                "image": {
                    "type": "object",
                    "properties": {
                        "tag": {"type": "string", "default": "latest"}
                    }
                },
                "extra": {"type": "object", "x-kubernetes-preserve-unknown-fields": true},
                "ports": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {"port": {"type": "integer"}, "protocol": {"type": "string", "default": "TCP"}}
                    }
                }
            }
        })
    }

    #[test]
    fn test_no_schema_admits_empty() {
        let admitted = admit_config(&manifest(None), Some(&json!({"anything": 1}))).unwrap();
        assert_eq!(admitted, json!({}));
    }

    #[test]
    fn test_prune_and_default() {
        let config = json!({
            "unknown": true,
            "image": {"repository": "nginx"},
            "extra": {"free": {"form": 1}},
            "ports": [{"port": 80, "name": "http"}]
        });
        let admitted = admit_config(&manifest(Some(schema())), Some(&config)).unwrap();
        assert_eq!(
            admitted,
            json!({
                "replicas": 1,
                "image": {"tag": "latest"},
                "extra": {"free": {"form": 1}},
                "ports": [{"port": 80, "protocol": "TCP"}]
            })
        );
    }

    #[test]
    fn test_missing_config_gets_defaults() {
        let admitted = admit_config(&manifest(Some(schema())), None).unwrap();
        assert_eq!(admitted, json!({"replicas": 1}));
    }

    #[test]
    fn test_validation_errors_carry_paths() {
        let config = json!({"replicas": 0, "ports": [{"port": "eighty"}]});
        let err = admit_config(&manifest(Some(schema())), Some(&config)).unwrap_err();
        let EngineError::Config { errors } = err else {
            panic!("expected config error, got {err:?}");
        };
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors.iter().any(|e| e.starts_with("config.replicas: ")));
        assert!(errors.iter().any(|e| e.starts_with("config.ports[0].port: ")));
    }

    #[test]
    fn test_non_object_config() {
        let err = admit_config(&manifest(Some(schema())), Some(&json!([1]))).unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }

    #[test]
    fn test_invalid_schema() {
        let bad = manifest(Some(json!({"type": 12})));
        assert_eq!(check_schema(&bad).len(), 1);
        assert!(matches!(
            admit_config(&bad, None).unwrap_err(),
            EngineError::Schema { .. }
        ));
    }

    #[test]
    fn test_field_path() {
        assert_eq!(field_path(""), "");
        assert_eq!(field_path("/a/b/0/c~1d"), ".a.b[0].c/d");
    }
}
