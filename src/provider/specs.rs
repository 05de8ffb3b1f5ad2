//! Per-pool extra specs: a fixed schema checked before anything is decoded.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
enum FieldType {
    Boolean,
    StringArray,
    String,
    StringMap,
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::StringArray => "array",
            FieldType::String => "string",
            FieldType::StringMap => "object",
        }
    }

    fn check(&self, field: &str, value: &Value) -> Result<()> {
        let mismatch = |given: &Value| {
            Error::Schema(format!(
                "{field}: Invalid type. Expected: {}, given: {}",
                self.name(),
                json_type(given)
            ))
        };

        match (self, value) {
            (FieldType::Boolean, Value::Bool(_)) | (FieldType::String, Value::String(_)) => Ok(()),
            (FieldType::StringArray, Value::Array(items)) => {
                for (idx, item) in items.iter().enumerate() {
                    if !item.is_string() {
                        return Err(Error::Schema(format!(
                            "{field}.{idx}: Invalid type. Expected: string, given: {}",
                            json_type(item)
                        )));
                    }
                }
                Ok(())
            }
            (FieldType::StringMap, Value::Object(entries)) => {
                for (key, item) in entries {
                    if !item.is_string() {
                        return Err(Error::Schema(format!(
                            "{field}.{key}: Invalid type. Expected: string, given: {}",
                            json_type(item)
                        )));
                    }
                }
                Ok(())
            }
            (_, other) => Err(mismatch(other)),
        }
    }
}

/// Every top-level key the extra specs may carry.
const SCHEMA: &[(&str, FieldType)] = &[
    ("extra_packages", FieldType::StringArray),
    ("disable_updates", FieldType::Boolean),
    ("enable_boot_debug", FieldType::Boolean),
    ("runner_install_template", FieldType::String),
    ("pre_install_scripts", FieldType::StringMap),
    ("extra_context", FieldType::StringMap),
];

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check `value` against the extra-specs schema.
pub fn validate(value: &Value) -> Result<()> {
    let Value::Object(fields) = value else {
        return Err(Error::Schema(format!(
            "(root): Invalid type. Expected: object, given: {}",
            json_type(value)
        )));
    };

    for (key, field_value) in fields {
        let Some((_, field_type)) = SCHEMA.iter().find(|(name, _)| *name == key.as_str()) else {
            return Err(Error::Schema(format!(
                "(root): Additional property {key} is not allowed"
            )));
        };
        field_type.check(key, field_value)?;
    }
    Ok(())
}

/// Inputs owned by the cloud-config renderer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloudConfigSpec {
    pub runner_install_template: Vec<u8>,
    pub pre_install_scripts: BTreeMap<String, Vec<u8>>,
    pub extra_context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtraSpecs {
    pub extra_packages: Vec<String>,
    pub disable_updates: bool,
    pub enable_boot_debug: bool,
    pub cloud_config: CloudConfigSpec,
}

#[derive(Deserialize, Default)]
struct RawExtraSpecs {
    #[serde(default)]
    extra_packages: Vec<String>,
    #[serde(default)]
    disable_updates: bool,
    #[serde(default)]
    enable_boot_debug: bool,
    #[serde(default)]
    runner_install_template: Option<String>,
    #[serde(default)]
    pre_install_scripts: BTreeMap<String, String>,
    #[serde(default)]
    extra_context: BTreeMap<String, String>,
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| Error::Schema(format!("{field}: invalid base64: {e}")))
}

impl ExtraSpecs {
    /// Validate and decode the extra specs of a bootstrap request. Missing
    /// specs yield the defaults.
    pub fn parse(value: Option<&Value>) -> Result<Self> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(Self::default());
        };
        validate(value)?;

        let raw: RawExtraSpecs = serde_json::from_value(value.clone())
            .map_err(|e| Error::Schema(format!("unmarshaling extra specs: {e}")))?;

        let runner_install_template = match raw.runner_install_template.as_deref() {
            Some(encoded) => decode_base64("runner_install_template", encoded)?,
            None => Vec::new(),
        };
        let pre_install_scripts = raw
            .pre_install_scripts
            .iter()
            .map(|(name, encoded)| {
                decode_base64(&format!("pre_install_scripts.{name}"), encoded)
                    .map(|script| (name.clone(), script))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self {
            extra_packages: raw.extra_packages,
            disable_updates: raw.disable_updates,
            enable_boot_debug: raw.enable_boot_debug,
            cloud_config: CloudConfigSpec {
                runner_install_template,
                pre_install_scripts,
                extra_context: raw.extra_context,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{CloudConfigSpec, ExtraSpecs, validate};
    use crate::error::Error;
    use serde_json::json;

    #[test]
    fn valid_input() {
        let specs = json!({
            "disable_updates": true,
            "extra_packages": ["openssh-server", "jq"],
            "enable_boot_debug": false
        });
        assert!(validate(&specs).is_ok());
    }

    #[test]
    fn wrong_data_type_names_the_field() {
        let err = validate(&json!({"disable_updates": "true"})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "schema validation failed: disable_updates: Invalid type. Expected: boolean, given: string"
        );
    }

    #[test]
    fn additional_property_is_rejected() {
        let err = validate(&json!({"additional_property": true})).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(
            err.to_string()
                .contains("Additional property additional_property is not allowed")
        );
    }

    #[test]
    fn array_items_must_be_strings() {
        let err = validate(&json!({"extra_packages": ["jq", 1]})).unwrap_err();
        assert!(err.to_string().contains("extra_packages.1"));
    }

    #[test]
    fn full_specs() {
        let value = json!({
            "disable_updates": true,
            "extra_packages": ["package1", "package2"],
            "enable_boot_debug": true,
            "runner_install_template": "IyEvYmluL2Jhc2gKZWNobyBJbnN0YWxsaW5nIHJ1bm5lci4uLg==",
            "pre_install_scripts": {"setup.sh": "IyEvYmluL2Jhc2gKZWNobyBTZXR1cCBzY3JpcHQuLi4="},
            "extra_context": {"key": "value"}
        });

        let specs = ExtraSpecs::parse(Some(&value)).unwrap();
        assert_eq!(
            specs,
            ExtraSpecs {
                extra_packages: vec!["package1".to_string(), "package2".to_string()],
                disable_updates: true,
                enable_boot_debug: true,
                cloud_config: CloudConfigSpec {
                    runner_install_template: b"#!/bin/bash\necho Installing runner...".to_vec(),
                    pre_install_scripts: [(
                        "setup.sh".to_string(),
                        b"#!/bin/bash\necho Setup script...".to_vec()
                    )]
                    .into_iter()
                    .collect(),
                    extra_context: [("key".to_string(), "value".to_string())]
                        .into_iter()
                        .collect(),
                },
            }
        );
    }

    #[test]
    fn empty_and_missing_specs() {
        assert_eq!(ExtraSpecs::parse(Some(&json!({}))).unwrap(), ExtraSpecs::default());
        assert_eq!(ExtraSpecs::parse(None).unwrap(), ExtraSpecs::default());
        assert_eq!(
            ExtraSpecs::parse(Some(&serde_json::Value::Null)).unwrap(),
            ExtraSpecs::default()
        );
    }

    #[test]
    fn bad_base64_is_a_schema_error() {
        let err = ExtraSpecs::parse(Some(&json!({"runner_install_template": "%%%"}))).unwrap_err();
        assert!(err.to_string().contains("runner_install_template: invalid base64"));
    }
}
