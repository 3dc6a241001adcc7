//! Validated application arguments and the field descriptions derived from their JSON schema.

use std::collections::BTreeMap;

use schemars::schema::{InstanceType, RootSchema, Schema, SchemaObject, SingleOrVec};
use serde::Serialize;
use serde_json::{Map, Value};

/// An argument set after validation: every field present, defaults applied.
///
/// Two sets are equal when their serialized values are equal, so comparisons never depend on how
/// a default was produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    values: Map<String, Value>,
}

impl Arguments {
    pub(crate) fn from_values(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Fields whose value differs from `defaults`; fields without a default are always kept.
    pub fn non_default(&self, defaults: &Map<String, Value>) -> Map<String, Value> {
        self.values
            .iter()
            .filter(|(name, value)| defaults.get(name.as_str()) != Some(value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// One argument field as shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldInfo {
    #[serde(rename = "type")]
    pub type_name: String,
    pub help: Option<String>,
    pub default: Option<Value>,
    pub current: Value,
    pub required: bool,
}

fn properties(schema: &RootSchema) -> impl Iterator<Item = (&String, &Schema)> {
    schema
        .schema
        .object
        .iter()
        .flat_map(|object| object.properties.iter())
}

fn metadata_default(schema: &Schema) -> Option<Value> {
    match schema {
        Schema::Object(object) => object.metadata.as_ref().and_then(|m| m.default.clone()),
        Schema::Bool(_) => None,
    }
}

/// Declared defaults per field, as recorded in the schema.
pub fn schema_defaults(schema: &RootSchema) -> Map<String, Value> {
    properties(schema)
        .filter_map(|(name, field)| metadata_default(field).map(|value| (name.clone(), value)))
        .collect()
}

/// Describes every field of `schema` with its current effective value.
pub fn describe_fields(schema: &RootSchema, arguments: &Arguments) -> BTreeMap<String, FieldInfo> {
    let required = schema
        .schema
        .object
        .as_ref()
        .map(|object| object.required.clone())
        .unwrap_or_default();

    properties(schema)
        .map(|(name, field)| {
            let default = metadata_default(field);
            let current = arguments
                .get(name)
                .cloned()
                .or_else(|| default.clone())
                .unwrap_or(Value::Null);
            let help = match field {
                Schema::Object(object) => object
                    .metadata
                    .as_ref()
                    .and_then(|m| m.description.clone()),
                Schema::Bool(_) => None,
            };
            let info = FieldInfo {
                type_name: type_name(field),
                help,
                default,
                current,
                required: required.contains(name),
            };
            (name.clone(), info)
        })
        .collect()
}

fn type_name(schema: &Schema) -> String {
    match schema {
        Schema::Bool(_) => "any".to_string(),
        Schema::Object(object) => object_type_name(object),
    }
}

fn object_type_name(object: &SchemaObject) -> String {
    if let Some(reference) = &object.reference {
        return reference.rsplit('/').next().unwrap_or(reference).to_string();
    }
    if let Some(subschemas) = &object.subschemas {
        let alternatives = subschemas
            .all_of
            .as_ref()
            .or(subschemas.any_of.as_ref())
            .or(subschemas.one_of.as_ref());
        if let Some(alternatives) = alternatives {
            return alternatives
                .iter()
                .map(type_name)
                .collect::<Vec<_>>()
                .join(" or ");
        }
    }
    match &object.instance_type {
        Some(SingleOrVec::Single(instance)) => instance_name(instance).to_string(),
        Some(SingleOrVec::Vec(instances)) => instances
            .iter()
            .map(instance_name)
            .collect::<Vec<_>>()
            .join(" or "),
        None => "any".to_string(),
    }
}

fn instance_name(instance: &InstanceType) -> &'static str {
    match instance {
        InstanceType::Null => "null",
        InstanceType::Boolean => "boolean",
        InstanceType::Object => "object",
        InstanceType::Array => "array",
        InstanceType::Number => "number",
        InstanceType::String => "string",
        InstanceType::Integer => "integer",
    }
}
