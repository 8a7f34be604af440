//! # parley-tools
//!
//! Local functions a model can ask a conversation to run.
//!
//! ## Core Components
//!
//! - [`ToolImplementation`]: a named function with a JSON-schema definition
//! - [`ToolRegistry`]: thread-safe name → implementation map
//! - [`ToolExecutor`]: runs a [`ToolCall`] against the registry
//!
//! ## Built-in Tools
//!
//! - [`FibonacciTool`]: `calculate_fibonacci`, returns `{"result": F(n)}`
//! - [`WeatherTool`]: `get_weather`, returns a canned forecast
//!
//! ## Example: Registering a Custom Tool
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use parley_common::tools::{Parameters, Property, Tool, ToolCall};
//! use parley_tools::{ToolExecutor, ToolImplementation};
//! use serde_json::{Value, json};
//!
//! struct GreetingTool;
//!
//! #[async_trait]
//! impl ToolImplementation for GreetingTool {
//!     fn get_definition(&self) -> Tool {
//!         let parameters = Parameters::new(
//!             [("name".to_string(), Property::string("The person's name"))].into(),
//!             vec!["name".to_string()],
//!         );
//!         Tool::function("greet", "Greet a person by name", parameters)
//!     }
//!
//!     async fn execute(&self, args: &Value) -> Result<String> {
//!         let name = args["name"].as_str().unwrap_or("stranger");
//!         Ok(format!("Hello, {name}!"))
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let mut executor = ToolExecutor::new();
//! executor.add_tool(GreetingTool);
//!
//! let call = ToolCall::new("greet", json!({"name": "Ada"}));
//! assert_eq!(executor.execute_tool(&call).await?, "Hello, Ada!");
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! [`ToolRegistry`] is backed by `DashMap`, so definitions can be read from
//! several tasks without extra locking.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use serde_json::Value;

use parley_common::tools::{FunctionCall, Tool, ToolCall};

mod generic;
pub use generic::{FibonacciTool, WeatherTool, fibonacci};

#[async_trait]
pub trait ToolImplementation: Send + Sync {
    fn get_definition(&self) -> Tool;

    /// Runs the tool. The returned string becomes the tool message content.
    async fn execute(&self, args: &Value) -> Result<String>;

    fn is_auto_approved(&self) -> bool {
        false
    }
}

pub struct ToolRegistry {
    tools: Arc<DashMap<String, Arc<dyn ToolImplementation>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: Arc::new(DashMap::new()),
        }
    }

    /// Registers `tool` under its definition's name, replacing any
    /// previous tool with that name.
    pub fn register(&self, tool: Arc<dyn ToolImplementation>) {
        let name = tool.get_definition().function.name;
        debug!("Registering tool '{name}'");
        self.tools.insert(name, tool);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolImplementation>> {
        self.tools.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Definitions of every registered tool, sorted by name so requests
    /// are stable across runs.
    #[must_use]
    pub fn get_all_definitions(&self) -> Vec<Tool> {
        let mut definitions: Vec<Tool> = self.tools.iter().map(|t| t.get_definition()).collect();
        definitions.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        definitions
    }

    #[must_use]
    pub fn is_tool_auto_approved(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|t| t.is_auto_approved())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }
}

/// Runs tool calls against a [`ToolRegistry`].
#[derive(Default)]
pub struct ToolExecutor {
    registry: ToolRegistry,
}

impl ToolExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor with the built-in demo tools registered.
    #[must_use]
    pub fn with_builtin_tools() -> Self {
        let mut executor = Self::new();
        executor.add_tool(FibonacciTool);
        executor.add_tool(WeatherTool);
        executor
    }

    pub fn add_tool<T: ToolImplementation + 'static>(&mut self, tool: T) {
        self.registry.register(Arc::new(tool));
    }

    #[must_use]
    pub fn has_tool(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Definitions to offer the model.
    #[must_use]
    pub fn get_all_tools(&self) -> Vec<Tool> {
        self.registry.get_all_definitions()
    }

    /// Whether `name` may run without asking the user first. Unknown tools
    /// are never auto-approved.
    #[must_use]
    pub fn is_tool_auto_approved(&self, name: &str) -> bool {
        self.registry.is_tool_auto_approved(name)
    }

    /// Execute a tool call.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool is not registered or its execution fails.
    pub async fn execute_tool(&self, tool_call: &ToolCall) -> Result<String> {
        let function = &tool_call.function;

        let tool = self
            .registry
            .get(&function.name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: '{}'", function.name))?;

        debug!(
            "Executing tool '{}' for call {} with {}",
            function.name, tool_call.id, function.arguments
        );

        tool.execute(&Self::arguments(function)).await
    }

    fn arguments(function: &FunctionCall) -> Value {
        match &function.arguments {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use parley_common::tools::Parameters;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl ToolImplementation for EchoTool {
        fn get_definition(&self) -> Tool {
            Tool::function("echo", "Echo the arguments back", Parameters::empty())
        }

        async fn execute(&self, args: &Value) -> Result<String> {
            Ok(args.to_string())
        }

        fn is_auto_approved(&self) -> bool {
            true
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolImplementation for FailingTool {
        fn get_definition(&self) -> Tool {
            Tool::function("fail", "Always fails", Parameters::empty())
        }

        async fn execute(&self, _args: &Value) -> Result<String> {
            anyhow::bail!("disk on fire")
        }
    }

    #[test]
    fn test_registry_register_and_lookup() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(FailingTool));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("echo"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.tool_names(), vec!["echo", "fail"]);
        assert!(registry.is_tool_auto_approved("echo"));
        assert!(!registry.is_tool_auto_approved("fail"));
        assert!(!registry.is_tool_auto_approved("missing"));
    }

    #[test]
    fn test_builtin_approval() {
        let executor = ToolExecutor::with_builtin_tools();
        assert!(executor.is_tool_auto_approved("calculate_fibonacci"));
        assert!(!executor.is_tool_auto_approved("get_weather"));
        assert!(!executor.is_tool_auto_approved("no_such_fn"));
    }

    #[test]
    fn test_definitions_sorted_by_name() {
        let executor = ToolExecutor::with_builtin_tools();
        let names: Vec<String> = executor
            .get_all_tools()
            .into_iter()
            .map(|t| t.function.name)
            .collect();
        assert_eq!(names, vec!["calculate_fibonacci", "get_weather"]);
    }

    #[tokio::test]
    async fn test_execute_passes_structured_arguments() {
        let mut executor = ToolExecutor::new();
        executor.add_tool(EchoTool);

        let call = ToolCall::new("echo", json!({"key": "value", "number": 42}));
        let result = executor.execute_tool(&call).await.unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&result).unwrap(),
            json!({"key": "value", "number": 42})
        );
    }

    #[tokio::test]
    async fn test_execute_null_arguments_become_empty_object() {
        let mut executor = ToolExecutor::new();
        executor.add_tool(EchoTool);

        let call = ToolCall::new("echo", Value::Null);
        assert_eq!(executor.execute_tool(&call).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_execute_unparsed_arguments_passed_as_string() {
        let mut executor = ToolExecutor::new();
        executor.add_tool(EchoTool);

        let call = ToolCall {
            id: "call_1".to_string(),
            function: FunctionCall::from_raw("echo", r#"{"incomplete json"#),
            call_type: "function".to_string(),
        };
        let result = executor.execute_tool(&call).await.unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&result).unwrap(),
            json!(r#"{"incomplete json"#)
        );
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let executor = ToolExecutor::new();
        let call = ToolCall::new("no_such_fn", json!({}));

        let err = executor.execute_tool(&call).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: 'no_such_fn'");
    }

    #[tokio::test]
    async fn test_execute_failure_propagates() {
        let mut executor = ToolExecutor::new();
        executor.add_tool(FailingTool);

        let err = executor
            .execute_tool(&ToolCall::new("fail", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
    }
}
