//! Generated operation documentation.
//!
//! Usage text assembled from discovered schemas, plus a machine-readable
//! catalogue dump. Nothing here is hand-maintained; it always reflects
//! whatever the runtime catalogue currently exposes.

use crate::engine::ops;
use crate::errors::{Error, ErrorKind, Result};
use crate::schema::{self, OperationSchema};
use serde_json::json;

fn type_brief(schema: &OperationSchema, index: usize) -> String {
    crate::bridge::registry::type_name(schema.arguments[index].declared_type)
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Human-readable usage text for one operation.
pub fn describe(operation: &str) -> Result<String> {
    let schema = schema::get_schema(operation)?;
    if schema.is_deprecated() {
        return Err(Error::with_detail(
            ErrorKind::NoSuchOperation { name: operation.to_string() },
            format!("operation '{}' is deprecated", operation),
        ));
    }

    let arg_name = |index: &usize| schema.arguments[*index].name.clone();
    let required_output: Vec<String> = schema.required_output.iter().map(arg_name).collect();
    let positional: Vec<String> = schema.method_arguments().iter().map(arg_name).collect();

    let mut text = String::new();
    let description = &schema.description;
    if let Some(first) = description.chars().next() {
        text.push_str(&first.to_uppercase().to_string());
        text.push_str(&description[first.len_utf8()..]);
    }
    text.push_str(".\n\nUsage:\n   ");
    text.push_str(&required_output.join(", "));
    text.push_str(" = ");
    match schema.receiver {
        Some(receiver) => {
            text.push_str(&schema.arguments[receiver].name);
            text.push('.');
        }
        None => text.push_str("Image."),
    }
    text.push_str(&schema.name);
    text.push('(');
    text.push_str(&positional.join(", "));
    text.push_str(")\n");

    text.push_str("Where:\n");
    let mut named: Vec<usize> = schema.required_output.clone();
    if let Some(receiver) = schema.receiver {
        named.push(receiver);
    }
    named.extend(schema.method_arguments());
    for index in named {
        let spec = &schema.arguments[index];
        text.push_str(&format!(
            "   {:<10}- {}, {}\n",
            spec.name,
            spec.blurb,
            type_brief(&schema, index)
        ));
    }

    if !schema.optional_input.is_empty() {
        text.push_str("Keyword parameters:\n");
        for &index in &schema.optional_input {
            let spec = &schema.arguments[index];
            text.push_str(&format!(
                "   {:<10}- {}, {}\n",
                spec.name,
                spec.blurb,
                type_brief(&schema, index)
            ));
        }
    }

    if !schema.optional_output.is_empty() {
        text.push_str("Extra output options:\n");
        for &index in &schema.optional_output {
            let spec = &schema.arguments[index];
            text.push_str(&format!(
                "   {:<10}- {}, {}\n",
                spec.name,
                spec.blurb,
                type_brief(&schema, index)
            ));
        }
    }

    Ok(text)
}

/// The whole catalogue as JSON, one entry per operation.
pub fn catalogue_json() -> Result<serde_json::Value> {
    let mut operations = Vec::new();
    for name in ops::names() {
        let schema = schema::get_schema(name)?;
        let value = serde_json::to_value(schema.as_ref()).map_err(|error| {
            Error::with_detail(
                ErrorKind::OperationFailed { operation: name.to_string() },
                error.to_string(),
            )
        })?;
        operations.push(value);
    }
    Ok(json!({ "operations": operations }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_method_style() {
        let text = describe("add").unwrap();
        assert!(text.starts_with("Add two images."));
        assert!(text.contains("out = left.add(right)"));
    }

    #[test]
    fn test_describe_class_style() {
        let text = describe("black").unwrap();
        assert!(text.contains("out = Image.black(width, height)"));
        assert!(text.contains("Keyword parameters:"));
    }

    #[test]
    fn test_describe_deprecated_fails() {
        assert!(describe("im_add").is_err());
    }

    #[test]
    fn test_catalogue_lists_operations() {
        let catalogue = catalogue_json().unwrap();
        let operations = catalogue["operations"].as_array().unwrap();
        assert!(operations.iter().any(|op| op["name"] == "linear"));
    }
}
