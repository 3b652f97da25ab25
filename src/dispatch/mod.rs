//! The generic call dispatcher.
//!
//! One entry point calls any catalogue operation by name: resolve the
//! schema, check arity, apply string options, bind positional and
//! keyword arguments through the tagged-value bridge (promoting bare
//! constants against the first object found among the arguments, and
//! deep-copying anything the operation would mutate), execute through
//! the memo cache, then collect declared outputs into a deterministic
//! shape. Binding state is owned by RAII types, so failure at any step
//! releases everything already bound.

pub(crate) mod cache;
pub mod options;

pub use cache::{drop_all as cache_drop_all, set_max as cache_set_max};

use crate::bridge::tagged::TaggedValue;
use crate::bridge::value::Value;
use crate::engine::instance::Instance;
use crate::engine::types::{self, ArgumentFlags};
use crate::errors::{Error, ErrorKind, Result};
use crate::image::Image;
use crate::lifetime::{self, TrackedBuffer};
use crate::schema::{self, ArgumentSpec};
use smallvec::SmallVec;
use tracing::debug;

/// Result shape when an operation produces more than one value: required
/// outputs in declaration order, then requested optional outputs in
/// request order.
#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub required: Vec<Value>,
    pub optional: Vec<(String, Value)>,
}

impl AggregateResult {
    pub fn optional(&self, name: &str) -> Option<&Value> {
        self.optional
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone)]
pub enum CallReturn {
    /// Exactly one required output and no requested optionals.
    Single(Value),
    Aggregate(AggregateResult),
}

impl CallReturn {
    pub fn into_single(self) -> Option<Value> {
        match self {
            CallReturn::Single(value) => Some(value),
            CallReturn::Aggregate(_) => None,
        }
    }

    pub fn into_image(self) -> Option<Image> {
        self.into_single()?.into_image()
    }

    pub fn into_double(self) -> Option<f64> {
        self.into_single()?.as_f64()
    }

    pub fn into_aggregate(self) -> Option<AggregateResult> {
        match self {
            CallReturn::Single(_) => None,
            CallReturn::Aggregate(aggregate) => Some(aggregate),
        }
    }
}

/// Call an operation with positional arguments only.
pub fn call(operation: &str, args: &[Value]) -> Result<CallReturn> {
    call_full(operation, args, &[], "")
}

/// Call an operation: positional arguments, keyword arguments, and a
/// string-encoded option list applied before anything explicit.
pub fn call_full(
    operation: &str,
    args: &[Value],
    keywords: &[(&str, Value)],
    string_options: &str,
) -> Result<CallReturn> {
    let schema = schema::get_schema(operation)?;
    debug!(
        operation,
        positional = args.len(),
        keywords = keywords.len(),
        "dispatching"
    );

    if args.len() != schema.required_input.len() {
        return Err(Error::arity(operation, schema.required_input.len(), args.len()));
    }

    let mut instance =
        Instance::new(operation).ok_or_else(|| Error::no_such_operation(operation))?;

    // string options first, so explicit arguments take precedence
    if !string_options.is_empty() {
        options::apply(&mut instance, &schema, string_options)?;
    }

    // the first object among the arguments is the template bare
    // constants are expanded against
    let match_target = find_image(args).cloned();
    let mut pending: SmallVec<[TrackedBuffer; 4]> = SmallVec::new();

    // required inputs, bound positionally in declaration order
    for (position, &index) in schema.required_input.iter().enumerate() {
        let spec = &schema.arguments[index];
        let bound = prepare(operation, spec, &args[position], match_target.as_ref())?;
        collect_tracked(&bound, &mut pending);
        bind_argument(operation, &mut instance, spec, &bound)?;
    }

    // keywords: optional inputs bind now, optional outputs are requests
    let mut requested: Vec<String> = Vec::new();
    for (key, value) in keywords {
        let canonical = key.replace('-', "_");
        let Some((index, spec)) = schema.argument(&canonical) else {
            return Err(Error::unknown_argument(operation, key));
        };
        if schema.optional_input.contains(&index) {
            let bound = prepare(operation, spec, value, match_target.as_ref())?;
            collect_tracked(&bound, &mut pending);
            bind_argument(operation, &mut instance, spec, &bound)?;
        } else if schema.optional_output.contains(&index) {
            requested.push(canonical);
        } else {
            return Err(Error::unknown_argument(operation, key));
        }
    }

    // execute, at most once per equivalent bound-argument set; in-place
    // operations are never memoized
    let modifies = schema
        .arguments
        .iter()
        .any(|spec| spec.flags.contains(ArgumentFlags::MODIFY));
    let key = if modifies {
        None
    } else {
        Some(cache::key_for(operation, &instance))
    };

    let memoized = key.as_ref().and_then(cache::lookup);
    let outputs: cache::CachedOutputs = match memoized {
        Some(cached) => {
            debug!(operation, "reusing memoized result");
            cached
        }
        None => {
            instance
                .build()
                .map_err(|_| Error::operation_failed(operation))?;
            let mut outputs: cache::CachedOutputs = Vec::new();
            for &index in schema.required_output.iter() {
                let name = &schema.arguments[index].name;
                let payload = instance
                    .payload(name)
                    .map_err(|_| Error::operation_failed(operation))?;
                outputs.push((name.clone(), payload));
            }
            // every declared optional output the executor produced is
            // kept, so later memoized calls can request any of them
            for &index in schema.optional_output.iter() {
                let name = &schema.arguments[index].name;
                if let Some(payload) = instance.maybe_payload(name) {
                    outputs.push((name.clone(), payload));
                }
            }
            if let Some(key) = key {
                cache::insert(key, &outputs);
            }
            outputs
        }
    };

    let find_output = |name: &str| {
        outputs
            .iter()
            .find(|(held, _)| held == name)
            .map(|(_, payload)| payload)
    };

    // required outputs, in declaration order
    let mut required_values = Vec::with_capacity(schema.required_output.len());
    for &index in schema.required_output.iter() {
        let spec = &schema.arguments[index];
        let payload = find_output(&spec.name).ok_or_else(|| Error::operation_failed(operation))?;
        let value = TaggedValue::from_payload(spec.declared_type, payload.duplicate()).get()?;
        propagate_tracked(&value, &pending);
        required_values.push(value);
    }

    // requested optional outputs, in request order
    let mut optional_values = Vec::with_capacity(requested.len());
    for name in &requested {
        let Some((_, spec)) = schema.argument(name) else {
            continue;
        };
        let payload = find_output(name).ok_or_else(|| Error::operation_failed(operation))?;
        let value = TaggedValue::from_payload(spec.declared_type, payload.duplicate()).get()?;
        propagate_tracked(&value, &pending);
        optional_values.push((name.clone(), value));
    }

    // the transient instance and its bound values release on drop here

    if optional_values.is_empty() && required_values.len() == 1 {
        return Ok(CallReturn::Single(required_values.remove(0)));
    }
    Ok(CallReturn::Aggregate(AggregateResult {
        required: required_values,
        optional: optional_values,
    }))
}

/// Convert one host value through the bridge and bind it onto the
/// instance under the argument's declared type.
pub(crate) fn bind_argument(
    operation: &str,
    instance: &mut Instance,
    spec: &ArgumentSpec,
    value: &Value,
) -> Result<()> {
    let mut slot = TaggedValue::declare(spec.declared_type)?;
    slot.set(value)?;
    let payload = slot
        .payload()
        .ok_or_else(|| Error::operation_failed(operation))?;
    instance
        .set_payload(&spec.name, payload)
        .map_err(|_| Error::operation_failed(operation))
}

/// Promotion and copy-before-mutate, applied before binding.
fn prepare(
    operation: &str,
    spec: &ArgumentSpec,
    supplied: &Value,
    match_target: Option<&Image>,
) -> Result<Value> {
    let mut value = supplied.clone();

    if spec.declared_type == types::image_type() && value.as_image().is_none() {
        value = Value::Image(imageize(operation, match_target, &value)?);
    } else if spec.declared_type == types::array_image_type() {
        if let Value::Array(items) = &value {
            if items.iter().any(|item| item.as_image().is_none()) {
                let promoted = items
                    .iter()
                    .map(|item| match item {
                        Value::Image(_) => Ok(item.clone()),
                        other => imageize(operation, match_target, other).map(Value::Image),
                    })
                    .collect::<Result<Vec<Value>>>()?;
                value = Value::Array(promoted);
            }
        }
    }

    // never mutate a value the caller still holds: in-place arguments
    // bind an independent deep copy, which also becomes the output
    if spec.flags.contains(ArgumentFlags::MODIFY) {
        if let Value::Image(image) = &value {
            debug!(operation, argument = %spec.name, "copying in-place argument");
            value = Value::Image(image.copy_for_modify()?);
        }
    }

    Ok(value)
}

/// Expand a bare constant into a full image: 2D arrays become matrix
/// images on their own; scalars and vectors need a template to take
/// their shape from.
fn imageize(operation: &str, match_target: Option<&Image>, value: &Value) -> Result<Image> {
    if let Some(image) = value.as_image() {
        return Ok(image.clone());
    }
    if let Some(rows) = as_2d(value) {
        return Image::new_from_array(&rows);
    }
    let Some(pixel) = as_pixel(value) else {
        return Err(Error::with_detail(
            ErrorKind::UnsupportedType { type_name: "Image".to_string() },
            format!("cannot make an image from host {}", value.type_of()),
        ));
    };
    let target = match_target.ok_or_else(|| Error::no_match_target(operation))?;
    target.new_from_image(&pixel)
}

/// A number or a flat numeric array: one band value per element.
fn as_pixel(value: &Value) -> Option<Vec<f64>> {
    match value {
        Value::Int(v) => Some(vec![*v as f64]),
        Value::Double(v) => Some(vec![*v]),
        Value::Array(items) => items.iter().map(Value::as_f64).collect(),
        _ => None,
    }
}

/// A rectangular array of numeric rows.
fn as_2d(value: &Value) -> Option<Vec<Vec<f64>>> {
    let Value::Array(rows) = value else {
        return None;
    };
    let mut matrix = Vec::with_capacity(rows.len());
    for row in rows {
        let Value::Array(items) = row else {
            return None;
        };
        let converted: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
        matrix.push(converted?);
    }
    if matrix.is_empty() || matrix.iter().any(|row| row.len() != matrix[0].len()) {
        return None;
    }
    Some(matrix)
}

/// First object in left-to-right, outer-to-inner order, descending into
/// nested sequences.
fn find_image(values: &[Value]) -> Option<&Image> {
    values.iter().find_map(find_image_in)
}

fn find_image_in(value: &Value) -> Option<&Image> {
    match value {
        Value::Image(image) => Some(image),
        Value::Array(items) => items.iter().find_map(find_image_in),
        _ => None,
    }
}

/// Union everything the value's objects depend on into the pending set.
fn collect_tracked(value: &Value, pending: &mut SmallVec<[TrackedBuffer; 4]>) {
    match value {
        Value::Image(image) => {
            for buffer in lifetime::tracked(image.raw()) {
                if !pending.iter().any(|held| held.same(&buffer)) {
                    pending.push(buffer);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_tracked(item, pending);
            }
        }
        _ => {}
    }
}

/// Attach the pending set to every object in a result value.
fn propagate_tracked(value: &Value, pending: &[TrackedBuffer]) {
    if pending.is_empty() {
        return;
    }
    match value {
        Value::Image(image) => lifetime::track_all(image.raw(), pending),
        Value::Array(items) => {
            for item in items {
                propagate_tracked(item, pending);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_image_recurses_in_order() {
        let image = Image::black(2, 2).unwrap();
        let other = Image::black(3, 3).unwrap();
        let args = vec![
            Value::Int(1),
            Value::Array(vec![Value::Int(2), Value::Image(image.clone())]),
            Value::Image(other),
        ];
        let found = find_image(&args).unwrap();
        assert_eq!(found.raw(), image.raw());
    }

    #[test]
    fn test_as_2d_requires_rectangular() {
        let ragged = Value::Array(vec![
            Value::Array(vec![Value::Int(1), Value::Int(2)]),
            Value::Array(vec![Value::Int(3)]),
        ]);
        assert!(as_2d(&ragged).is_none());

        let square = Value::Array(vec![
            Value::Array(vec![Value::Int(1), Value::Int(2)]),
            Value::Array(vec![Value::Int(3), Value::Int(4)]),
        ]);
        assert_eq!(as_2d(&square).unwrap(), vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_as_pixel() {
        assert_eq!(as_pixel(&Value::Int(3)), Some(vec![3.0]));
        assert_eq!(
            as_pixel(&Value::Array(vec![Value::Int(1), Value::Double(2.5)])),
            Some(vec![1.0, 2.5])
        );
        assert_eq!(as_pixel(&Value::Str("x".into())), None);
    }
}
