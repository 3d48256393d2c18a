use serde::Deserialize;
use serde_yaml_with_quirks as serde_yaml;
use serde_yaml_with_quirks::Mapping;
use serde_yaml_with_quirks::Value;

use crate::constants::FIELD_API_VERSION;
use crate::constants::FIELD_KIND;
use crate::constants::FIELD_METADATA;
use crate::constants::FIELD_NAME;
use crate::constants::FIELD_NAMESPACE;
use crate::constants::FIELD_RESOURCE_VERSION;
use crate::constants::FIELD_UID;
use crate::errors::ManifestError;
use crate::manifest::ResourceIdentity;
use crate::manifest::ResourceVersion;

/// Extract the resource identity from manifest text.
///
/// Accepts exactly one YAML document (null documents from stray `---`
/// separators are ignored). `apiVersion`, `kind` and `metadata.name` are
/// required; `metadata.namespace`, `metadata.uid` and
/// `metadata.resourceVersion` are carried when present.
///
/// # Errors
/// - [`ManifestError::Parse`] if the text is not well-formed YAML
/// - [`ManifestError::MultipleDocuments`] for multi-document input
/// - [`ManifestError::MissingField`] / [`ManifestError::EmptyField`] when
///   identity fields are absent or blank
pub fn parse_identity(text: &str) -> Result<ResourceIdentity, ManifestError> {
    let doc = parse_single_document(text)?;
    let root = doc.as_mapping().ok_or(ManifestError::NotAMapping)?;

    let api_version = require_field(root, FIELD_API_VERSION)?;
    let kind = require_field(root, FIELD_KIND)?;

    let metadata = field(root, FIELD_METADATA)
        .and_then(Value::as_mapping)
        .ok_or(ManifestError::MissingField {
            field: FIELD_METADATA,
        })?;

    let name = require_field(metadata, FIELD_NAME)?;
    let namespace = optional_field(metadata, FIELD_NAMESPACE);
    let uid = optional_field(metadata, FIELD_UID);
    let resource_version = optional_field(metadata, FIELD_RESOURCE_VERSION).map(ResourceVersion::new);

    Ok(ResourceIdentity {
        api_version,
        kind,
        namespace,
        name,
        uid,
        resource_version,
    })
}

/// Write `version` into `metadata.resourceVersion`, returning the re-rendered
/// manifest text.
///
/// All other fields round-trip untouched, in their original order. The
/// output is normalized YAML, so formatting details such as quoting or
/// comments do not survive.
pub fn set_resource_version(
    text: &str,
    version: &ResourceVersion,
) -> Result<String, ManifestError> {
    let mut doc = parse_single_document(text)?;
    let root = doc.as_mapping_mut().ok_or(ManifestError::NotAMapping)?;

    let metadata_key = yaml_key(FIELD_METADATA);
    if !root.contains_key(&metadata_key) {
        root.insert(metadata_key.clone(), Value::Mapping(Mapping::new()));
    }
    let metadata = root
        .get_mut(&metadata_key)
        .and_then(Value::as_mapping_mut)
        .ok_or(ManifestError::MissingField {
            field: FIELD_METADATA,
        })?;

    metadata.insert(
        yaml_key(FIELD_RESOURCE_VERSION),
        Value::String(version.as_str().to_string()),
    );

    serde_yaml::to_string(&doc).map_err(ManifestError::Parse)
}

/// Parse manifest text expecting exactly one non-null YAML document.
fn parse_single_document(text: &str) -> Result<Value, ManifestError> {
    let mut first: Option<Value> = None;
    let mut count = 0usize;

    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document).map_err(ManifestError::Parse)?;
        // Skip null documents produced by leading/trailing separators
        if value.is_null() {
            continue;
        }
        count += 1;
        if first.is_none() {
            first = Some(value);
        }
    }

    if count > 1 {
        return Err(ManifestError::MultipleDocuments { count });
    }
    first.ok_or(ManifestError::EmptyDocument)
}

fn yaml_key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn field<'a>(
    mapping: &'a Mapping,
    name: &str,
) -> Option<&'a Value> {
    mapping.get(&yaml_key(name))
}

/// Scalars only; numbers are accepted because unquoted version tokens parse
/// as integers under YAML 1.1.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn optional_field(
    mapping: &Mapping,
    name: &str,
) -> Option<String> {
    field(mapping, name)
        .and_then(scalar_to_string)
        .filter(|s| !s.is_empty())
}

fn require_field(
    mapping: &Mapping,
    name: &'static str,
) -> Result<String, ManifestError> {
    let value = field(mapping, name).ok_or(ManifestError::MissingField { field: name })?;
    let text = scalar_to_string(value).ok_or(ManifestError::MissingField { field: name })?;
    if text.is_empty() {
        return Err(ManifestError::EmptyField { field: name });
    }
    Ok(text)
}
