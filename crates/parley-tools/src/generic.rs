use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ToolImplementation;
use parley_common::tools::{Parameters, Property, Tool};

/// The `n`th Fibonacci number with F(1) = F(2) = 1. Any `n <= 0` gives 0.
///
/// Returns `None` once the value no longer fits in a `u128` (n > 186).
#[must_use]
pub fn fibonacci(n: i64) -> Option<u128> {
    if n <= 0 {
        return Some(0);
    }
    let (mut a, mut b) = (0u128, 1u128);
    for _ in 1..n {
        let next = a.checked_add(b)?;
        a = b;
        b = next;
    }
    Some(b)
}

#[derive(Deserialize)]
struct FibonacciArgs {
    n: i64,
}

#[derive(Serialize)]
struct FibonacciResult {
    result: u128,
}

pub struct FibonacciTool;

#[async_trait]
impl ToolImplementation for FibonacciTool {
    fn get_definition(&self) -> Tool {
        let mut properties = HashMap::new();
        properties.insert(
            "n".to_string(),
            Property::integer("Position in the sequence to compute, starting at 1"),
        );

        Tool::function(
            "calculate_fibonacci",
            "Calculate the nth term of the Fibonacci sequence",
            Parameters::new(properties, vec!["n".to_string()]),
        )
    }

    async fn execute(&self, args: &Value) -> Result<String> {
        let FibonacciArgs { n } = FibonacciArgs::deserialize(args)
            .context("Expected an integer 'n' parameter")?;

        let result = fibonacci(n)
            .ok_or_else(|| anyhow::anyhow!("Fibonacci number {n} is too large to compute"))?;

        // u128 needs the text serializer; `Value` tops out at u64.
        Ok(serde_json::to_string(&FibonacciResult { result })?)
    }

    fn is_auto_approved(&self) -> bool {
        true
    }
}

#[derive(Deserialize)]
struct WeatherArgs {
    location: String,
}

/// Canned weather lookup; every city is sunny. Stands in for an external
/// service, so it is not auto-approved.
pub struct WeatherTool;

#[async_trait]
impl ToolImplementation for WeatherTool {
    fn get_definition(&self) -> Tool {
        let mut properties = HashMap::new();
        properties.insert(
            "location".to_string(),
            Property::string("City name, e.g. Seoul, Busan"),
        );

        Tool::function(
            "get_weather",
            "Get the current weather for a city",
            Parameters::new(properties, vec!["location".to_string()]),
        )
    }

    async fn execute(&self, args: &Value) -> Result<String> {
        let WeatherArgs { location } =
            WeatherArgs::deserialize(args).context("Missing or invalid 'location' parameter")?;

        if location.trim().is_empty() {
            anyhow::bail!("'location' cannot be empty");
        }

        Ok(format!("{location}: sunny, 15°C"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_fibonacci_values() {
        assert_eq!(fibonacci(-3), Some(0));
        assert_eq!(fibonacci(0), Some(0));
        assert_eq!(fibonacci(1), Some(1));
        assert_eq!(fibonacci(2), Some(1));
        assert_eq!(fibonacci(3), Some(2));
        assert_eq!(fibonacci(10), Some(55));
        assert_eq!(fibonacci(50), Some(12_586_269_025));
    }

    #[test]
    fn test_fibonacci_overflow() {
        assert!(fibonacci(186).is_some());
        assert_eq!(fibonacci(187), None);
    }

    #[tokio::test]
    async fn test_fibonacci_tool() {
        let result = FibonacciTool.execute(&json!({"n": 10})).await.unwrap();
        assert_eq!(result, r#"{"result":55}"#);

        let result = FibonacciTool.execute(&json!({"n": 100})).await.unwrap();
        assert_eq!(result, r#"{"result":354224848179261915075}"#);
    }

    #[tokio::test]
    async fn test_fibonacci_tool_bad_arguments() {
        assert!(FibonacciTool.execute(&json!({})).await.is_err());
        assert!(FibonacciTool.execute(&json!({"n": "ten"})).await.is_err());
        assert!(FibonacciTool.execute(&json!({"n": 500})).await.is_err());
    }

    #[tokio::test]
    async fn test_weather_tool() {
        let result = WeatherTool
            .execute(&json!({"location": "Seoul"}))
            .await
            .unwrap();
        assert_eq!(result, "Seoul: sunny, 15°C");

        assert!(WeatherTool.execute(&json!({"location": " "})).await.is_err());
        assert!(WeatherTool.execute(&json!("Seoul")).await.is_err());
    }

    #[test]
    fn test_definitions() {
        let fib = FibonacciTool.get_definition();
        assert_eq!(fib.name(), "calculate_fibonacci");
        assert_eq!(fib.function.parameters["properties"]["n"]["type"], "integer");
        assert_eq!(fib.function.parameters["required"], json!(["n"]));

        let weather = WeatherTool.get_definition();
        assert_eq!(weather.name(), "get_weather");
        assert_eq!(
            weather.function.parameters["properties"]["location"]["type"],
            "string"
        );
    }
}
