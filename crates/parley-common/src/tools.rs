//! Tool definitions and tool calls exchanged with the model.
//!
//! A [`Tool`] is the JSON-schema description sent with a request. The model
//! answers with [`ToolCall`]s whose arguments are kept as structured JSON.
//! While streaming, calls arrive as [`ToolCallDelta`] fragments that a
//! [`ToolCallAssembler`] stitches back together.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//!
//! use parley_common::tools::{Parameters, Property, Tool};
//!
//! let mut properties = HashMap::new();
//! properties.insert("location".to_string(), Property::string("City name, e.g. Seoul"));
//!
//! let tool = Tool::function(
//!     "get_weather",
//!     "Look up the current weather for a city",
//!     Parameters::new(properties, vec!["location".to_string()]),
//! );
//! assert_eq!(tool.function.name, "get_weather");
//! assert_eq!(tool.r#type, "function");
//! ```

use std::collections::{BTreeMap, HashMap};

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// One property of a tool's parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Property {
    /// JSON-schema type name (`string`, `integer`, ...).
    #[serde(rename = "type")]
    pub prop_type: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// Allowed values for enumerated strings.
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl Property {
    fn typed(prop_type: &str, description: impl Into<String>) -> Self {
        Self {
            prop_type: prop_type.to_string(),
            description: description.into(),
            enum_values: None,
        }
    }

    /// A free-form string property.
    #[must_use]
    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    /// A whole-number property.
    #[must_use]
    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed("integer", description)
    }

    /// A floating point property.
    #[must_use]
    pub fn number(description: impl Into<String>) -> Self {
        Self::typed("number", description)
    }

    /// A boolean property.
    #[must_use]
    pub fn boolean(description: impl Into<String>) -> Self {
        Self::typed("boolean", description)
    }

    /// A string restricted to `values`.
    #[must_use]
    pub fn string_enum(description: impl Into<String>, values: &[&str]) -> Self {
        Self {
            enum_values: Some(values.iter().map(|v| (*v).to_string()).collect()),
            ..Self::typed("string", description)
        }
    }
}

/// Object schema describing a tool's arguments.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Parameters {
    /// Always `"object"`.
    #[serde(rename = "type")]
    pub param_type: String,
    pub properties: HashMap<String, Property>,
    pub required: Vec<String>,
}

impl Parameters {
    #[must_use]
    pub fn new(properties: HashMap<String, Property>, required: Vec<String>) -> Self {
        Self {
            param_type: "object".to_string(),
            properties,
            required,
        }
    }

    /// Schema for a tool that takes no arguments.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(HashMap::new(), Vec::new())
    }

    /// Converts the schema into a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl From<Parameters> for Value {
    fn from(params: Parameters) -> Self {
        match serde_json::to_value(params) {
            Ok(value) => value,
            Err(e) => {
                warn!("Parameters serialization unexpectedly failed: {e}");
                Self::Null
            }
        }
    }
}

/// Name, description and schema of a callable function.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Function {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool offered to the model for one request.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, Eq, PartialEq)]
pub struct Tool {
    #[serde(rename = "type")]
    #[builder(default = "function".to_string())]
    pub r#type: String,
    pub function: Function,
}

impl Tool {
    /// Builds a `function` tool.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: impl Into<Value>,
    ) -> Self {
        Self {
            r#type: "function".to_string(),
            function: Function {
                name: name.into(),
                description: description.into(),
                parameters: parameters.into(),
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// The function half of a [`ToolCall`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    /// Parsed arguments. Text the provider sent that is not valid JSON is
    /// kept as a JSON string, with the original text in `raw_arguments`.
    pub arguments: Value,
    /// Wire text that failed to parse, sent back unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_arguments: Option<String>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
            raw_arguments: None,
        }
    }

    /// Builds a call from the argument text a provider put on the wire.
    pub fn from_raw(name: impl Into<String>, raw_arguments: &str) -> Self {
        match try_parse_arguments(raw_arguments) {
            Ok(arguments) => Self::new(name, arguments),
            Err(e) => {
                warn!("Tool arguments are not valid JSON, keeping raw text: {e}");
                Self {
                    name: name.into(),
                    arguments: Value::String(raw_arguments.to_string()),
                    raw_arguments: Some(raw_arguments.to_string()),
                }
            }
        }
    }

    /// Arguments in the string form the chat-completions wire format expects.
    #[must_use]
    pub fn arguments_json(&self) -> String {
        if let Some(raw) = &self.raw_arguments {
            return raw.clone();
        }
        match &self.arguments {
            Value::Null => "{}".to_string(),
            other => other.to_string(),
        }
    }
}

fn try_parse_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(trimmed)
}

/// Parses provider argument text; blank text is an empty object.
#[must_use]
pub fn parse_arguments(raw: &str) -> Value {
    try_parse_arguments(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// A request from the model to run one function.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ToolCall {
    /// Provider-assigned identifier, echoed back by the tool result.
    pub id: String,
    pub function: FunctionCall,
    pub call_type: String,
}

impl ToolCall {
    /// Creates a call with a fresh identifier.
    pub fn new(name: impl Into<String>, arguments: impl Into<Value>) -> Self {
        Self::with_id(generate_call_id(), name, arguments)
    }

    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<Value>,
    ) -> Self {
        Self {
            id: id.into(),
            function: FunctionCall::new(name, arguments),
            call_type: "function".to_string(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

fn generate_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// A streamed fragment of a tool call.
///
/// Fragments sharing an `index` belong to the same call. The id and name
/// normally arrive once; argument text is split across fragments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct PartialToolCall {
    id: Option<String>,
    call_type: Option<String>,
    name: String,
    arguments: String,
}

/// Rebuilds complete tool calls from streamed fragments, ordered by index.
#[derive(Debug, Clone, Default)]
pub struct ToolCallAssembler {
    partials: BTreeMap<u32, PartialToolCall>,
}

impl ToolCallAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &ToolCallDelta) {
        let partial = self.partials.entry(delta.index).or_default();

        if partial.id.is_none() {
            partial.id.clone_from(&delta.id);
        }
        if partial.call_type.is_none() {
            partial.call_type.clone_from(&delta.call_type);
        }
        if let Some(name) = &delta.name
            && partial.name.is_empty()
        {
            partial.name.clone_from(name);
        }
        if let Some(arguments) = &delta.arguments {
            partial.arguments.push_str(arguments);
        }
    }

    pub fn extend(&mut self, deltas: &[ToolCallDelta]) {
        for delta in deltas {
            self.push(delta);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.partials.len()
    }

    /// Finishes every call seen so far.
    #[must_use]
    pub fn finish(self) -> SmallVec<[ToolCall; 2]> {
        self.partials
            .into_iter()
            .map(|(index, partial)| {
                let id = partial.id.unwrap_or_else(|| {
                    warn!("Streamed tool call at index {index} carried no id, generating one");
                    generate_call_id()
                });
                ToolCall {
                    id,
                    call_type: partial.call_type.unwrap_or_else(|| "function".to_string()),
                    function: FunctionCall::from_raw(partial.name, &partial.arguments),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_serialization_skips_missing_enum() {
        let prop = Property::integer("Position in the sequence");

        let json = serde_json::to_value(&prop).expect("Failed to serialize");
        assert_eq!(json["type"], "integer");
        assert_eq!(json["description"], "Position in the sequence");
        assert!(json.get("enum").is_none());
    }

    #[test]
    fn test_property_string_enum() {
        let prop = Property::string_enum("Unit", &["celsius", "fahrenheit"]);

        let json = serde_json::to_value(&prop).expect("Failed to serialize");
        assert_eq!(json["type"], "string");
        assert_eq!(json["enum"], json!(["celsius", "fahrenheit"]));

        let back: Property = serde_json::from_value(json).expect("Failed to deserialize");
        assert_eq!(prop, back);
    }

    #[test]
    fn test_parameters_into_value() {
        let mut properties = HashMap::new();
        properties.insert("n".to_string(), Property::integer("Index"));
        let value: Value = Parameters::new(properties, vec!["n".to_string()]).into();

        assert_eq!(value["type"], "object");
        assert_eq!(value["properties"]["n"]["type"], "integer");
        assert_eq!(value["required"], json!(["n"]));
    }

    #[test]
    fn test_empty_parameters() {
        let value = Parameters::empty().to_value().unwrap();
        assert_eq!(value, json!({"type": "object", "properties": {}, "required": []}));
    }

    #[test]
    fn test_tool_wire_shape() {
        let tool = Tool::function("get_weather", "Weather lookup", Parameters::empty());
        let json = serde_json::to_value(&tool).unwrap();

        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "get_weather");
        assert_eq!(json["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_tool_builder_defaults_type() {
        let tool = Tool::builder()
            .function(Function {
                name: "noop".to_string(),
                description: "Does nothing".to_string(),
                parameters: json!({"type": "object"}),
            })
            .build();
        assert_eq!(tool.r#type, "function");
        assert_eq!(tool.name(), "noop");
    }

    #[test]
    fn test_tool_call_new_generates_unique_ids() {
        let a = ToolCall::new("f", json!({}));
        let b = ToolCall::new("f", json!({}));
        assert!(a.id.starts_with("call_"));
        assert_ne!(a.id, b.id);
        assert_eq!(a.call_type, "function");
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(""), json!({}));
        assert_eq!(parse_arguments("   "), json!({}));
        assert_eq!(parse_arguments(r#"{"n": 10}"#), json!({"n": 10}));
        assert_eq!(parse_arguments("[1, 2]"), json!([1, 2]));
        assert_eq!(parse_arguments(r#"{"broken"#), json!(r#"{"broken"#));
    }

    #[test]
    fn test_arguments_json_forms() {
        let structured = FunctionCall::from_raw("f", r#"{"location":"Seoul"}"#);
        assert_eq!(structured.arguments_json(), r#"{"location":"Seoul"}"#);

        let raw = FunctionCall::from_raw("f", "not json");
        assert_eq!(raw.arguments_json(), "not json");

        let null = FunctionCall::new("f", Value::Null);
        assert_eq!(null.arguments_json(), "{}");
    }

    #[test]
    fn test_string_argument_survives_round_trip() {
        let call = FunctionCall::from_raw("get_weather", r#""Seoul""#);
        assert_eq!(call.arguments, json!("Seoul"));
        assert_eq!(call.raw_arguments, None);
        assert_eq!(call.arguments_json(), r#""Seoul""#);

        let raw = FunctionCall::from_raw("get_weather", "Seoul");
        assert_eq!(raw.arguments, json!("Seoul"));
        assert_eq!(raw.raw_arguments.as_deref(), Some("Seoul"));
        assert_eq!(raw.arguments_json(), "Seoul");
    }

    #[test]
    fn test_assembler_joins_fragments_by_index() {
        let mut assembler = ToolCallAssembler::new();
        assembler.extend(&[
            ToolCallDelta {
                index: 0,
                id: Some("call_a".to_string()),
                call_type: Some("function".to_string()),
                name: Some("calculate_fibonacci".to_string()),
                arguments: Some(r#"{"n":"#.to_string()),
            },
            ToolCallDelta {
                index: 1,
                id: Some("call_b".to_string()),
                name: Some("get_weather".to_string()),
                arguments: Some(r#"{"location":"Busan"}"#.to_string()),
                ..Default::default()
            },
            ToolCallDelta {
                index: 0,
                arguments: Some("10}".to_string()),
                ..Default::default()
            },
        ]);
        assert_eq!(assembler.len(), 2);

        let calls = assembler.finish();
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].name(), "calculate_fibonacci");
        assert_eq!(calls[0].function.arguments, json!({"n": 10}));
        assert_eq!(calls[1].id, "call_b");
        assert_eq!(calls[1].call_type, "function");
        assert_eq!(calls[1].function.arguments, json!({"location": "Busan"}));
    }

    #[test]
    fn test_assembler_generates_missing_id() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push(&ToolCallDelta {
            index: 3,
            name: Some("get_weather".to_string()),
            ..Default::default()
        });

        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].function.arguments, json!({}));
    }
}
