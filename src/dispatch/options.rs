//! The string-options mini-syntax.
//!
//! A compact, optionally bracketed list of `key=value` pairs and bare
//! flags: `"strip,tile=true,Q=90"`. Values are decoded against the
//! declared argument type; bare flags read as booleans. Applied before
//! any explicit argument, so explicit arguments always win.

use crate::bridge::value::Value;
use crate::engine::instance::Instance;
use crate::engine::types::Fundamental;
use crate::errors::{Error, ErrorKind, Result};
use crate::schema::OperationSchema;

/// Apply an options string to a transient instance.
pub(crate) fn apply(instance: &mut Instance, schema: &OperationSchema, options: &str) -> Result<()> {
    for (key, raw) in parse(options) {
        let canonical = key.replace('-', "_");
        let Some((_, spec)) = schema.argument(&canonical) else {
            return Err(Error::unknown_argument(&schema.name, &key));
        };
        let fundamental = crate::bridge::registry::fundamental_of(spec.declared_type)?;
        let value = decode(&schema.name, &key, fundamental, raw.as_deref())?;
        super::bind_argument(&schema.name, instance, spec, &value)?;
    }
    Ok(())
}

/// Split an options string into `(key, value)` pairs; bare flags have no
/// value. Surrounding brackets, as in filename option strings, are
/// stripped.
fn parse(options: &str) -> Vec<(String, Option<String>)> {
    let trimmed = options.trim();
    let trimmed = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);

    trimmed
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (key.trim().to_string(), Some(value.trim().to_string())),
            None => (part.to_string(), None),
        })
        .collect()
}

fn bad_option(operation: &str, key: &str, raw: Option<&str>) -> Error {
    Error::with_detail(
        ErrorKind::OperationFailed { operation: operation.to_string() },
        format!("bad value '{}' for option '{}'", raw.unwrap_or(""), key),
    )
}

fn decode(operation: &str, key: &str, fundamental: Fundamental, raw: Option<&str>) -> Result<Value> {
    match fundamental {
        Fundamental::Bool => match raw {
            None | Some("true") | Some("1") => Ok(Value::Bool(true)),
            Some("false") | Some("0") => Ok(Value::Bool(false)),
            other => Err(bad_option(operation, key, other)),
        },
        Fundamental::Int => raw
            .and_then(|text| text.parse::<i64>().ok())
            .map(Value::Int)
            .ok_or_else(|| bad_option(operation, key, raw)),
        Fundamental::Double => raw
            .and_then(|text| text.parse::<f64>().ok())
            .map(Value::Double)
            .ok_or_else(|| bad_option(operation, key, raw)),
        Fundamental::Str | Fundamental::RefStr => raw
            .map(|text| Value::Str(text.to_string()))
            .ok_or_else(|| bad_option(operation, key, raw)),
        // enum nicks pass through as strings; the conversion table
        // resolves them and reports unknown members
        Fundamental::Enum => raw
            .map(|text| match text.parse::<i64>() {
                Ok(number) => Value::Int(number),
                Err(_) => Value::Str(text.to_string()),
            })
            .ok_or_else(|| bad_option(operation, key, raw)),
        Fundamental::Flags => raw
            .map(|text| match text.parse::<i64>() {
                Ok(number) => Value::Int(number),
                Err(_) => Value::Str(text.to_string()),
            })
            .ok_or_else(|| bad_option(operation, key, raw)),
        Fundamental::ArrayInt => decode_array(operation, key, raw, |text| {
            text.parse::<i64>().ok().map(Value::Int)
        }),
        Fundamental::ArrayDouble => decode_array(operation, key, raw, |text| {
            text.parse::<f64>().ok().map(Value::Double)
        }),
        Fundamental::Object | Fundamental::ArrayImage | Fundamental::Blob => {
            Err(bad_option(operation, key, raw))
        }
    }
}

fn decode_array(
    operation: &str,
    key: &str,
    raw: Option<&str>,
    element: impl Fn(&str) -> Option<Value>,
) -> Result<Value> {
    let text = raw.ok_or_else(|| bad_option(operation, key, raw))?;
    let mut items = Vec::new();
    for part in text.split_whitespace() {
        match element(part) {
            Some(value) => items.push(value),
            None => return Err(bad_option(operation, key, raw)),
        }
    }
    if items.is_empty() {
        return Err(bad_option(operation, key, raw));
    }
    Ok(Value::Array(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs_and_flags() {
        let parsed = parse("strip,tile=true,Q=90");
        assert_eq!(
            parsed,
            vec![
                ("strip".to_string(), None),
                ("tile".to_string(), Some("true".to_string())),
                ("Q".to_string(), Some("90".to_string())),
            ]
        );
    }

    #[test]
    fn test_parse_strips_brackets() {
        assert_eq!(parse("[shrink=2]"), vec![("shrink".to_string(), Some("2".to_string()))]);
        assert_eq!(parse(""), vec![]);
    }

    #[test]
    fn test_decode_bool_flag() {
        let value = decode("black", "uchar", Fundamental::Bool, None).unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn test_decode_int_rejects_garbage() {
        assert!(decode("black", "bands", Fundamental::Int, Some("many")).is_err());
    }

    #[test]
    fn test_decode_double_array() {
        let value = decode("embed", "background", Fundamental::ArrayDouble, Some("1 2 3")).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![Value::Double(1.0), Value::Double(2.0), Value::Double(3.0)])
        );
    }
}
