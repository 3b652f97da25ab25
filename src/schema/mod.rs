//! Operation schemas.
//!
//! An `OperationSchema` is the discovered contract of one operation: its
//! argument table, walked once from a transient instance, with the
//! derived classifications positional binding depends on. Schemas are
//! immutable, cached for the process lifetime, and published atomically:
//! a racing first lookup may build twice but every caller sees one
//! complete schema.

use crate::engine::instance::Instance;
use crate::engine::types::{self, ArgumentFlags, TypeTag};
use crate::errors::{Error, Result};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One declared argument, with host-convention naming.
#[derive(Debug, Clone, Serialize)]
pub struct ArgumentSpec {
    pub name: String,
    pub flags: ArgumentFlags,
    pub declared_type: TypeTag,
    pub blurb: String,
}

/// The discovered contract of one operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationSchema {
    pub name: String,
    pub description: String,
    pub operation_flags: u32,
    /// Every construct-time argument, in declaration order.
    pub arguments: Vec<ArgumentSpec>,
    /// Indices into `arguments`, in declaration order.
    pub required_input: Vec<usize>,
    pub optional_input: Vec<usize>,
    /// Required outputs; arguments the operation mutates in place appear
    /// here as well as in `required_input`.
    pub required_output: Vec<usize>,
    pub optional_output: Vec<usize>,
    /// First required input typed as the primary object, if any: the
    /// implicit `self` of method-style calls.
    pub receiver: Option<usize>,
}

impl OperationSchema {
    /// Find an argument by canonical name.
    pub fn argument(&self, name: &str) -> Option<(usize, &ArgumentSpec)> {
        self.arguments
            .iter()
            .enumerate()
            .find(|(_, spec)| spec.name == name)
    }

    /// Positional arguments of a method-style call: required inputs with
    /// the receiver taken out, since the call site supplies it.
    pub fn method_arguments(&self) -> Vec<usize> {
        self.required_input
            .iter()
            .copied()
            .filter(|index| Some(*index) != self.receiver)
            .collect()
    }

    pub fn is_deprecated(&self) -> bool {
        self.operation_flags & types::OPERATION_DEPRECATED != 0
    }
}

static CACHE: Lazy<DashMap<String, Arc<OperationSchema>>> = Lazy::new(DashMap::new);
static WALKS: AtomicU64 = AtomicU64::new(0);

/// Schema for an operation name, from the cache or a one-time walk.
pub fn get_schema(name: &str) -> Result<Arc<OperationSchema>> {
    if let Some(hit) = CACHE.get(name) {
        return Ok(hit.clone());
    }

    let instance = Instance::new(name).ok_or_else(|| Error::no_such_operation(name))?;
    WALKS.fetch_add(1, Ordering::Relaxed);
    let schema = build(&instance);

    // build-then-publish: losers of a racing first build drop their copy
    let published = CACHE
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(schema))
        .clone();
    Ok(published)
}

/// How many argument-table walks have run; cached lookups do not add.
pub fn introspections() -> u64 {
    WALKS.load(Ordering::Relaxed)
}

fn build(instance: &Instance) -> OperationSchema {
    let arguments: Vec<ArgumentSpec> = instance
        .arguments()
        .map(|arg| ArgumentSpec {
            // the runtime separates name parts with '-'; hosts want '_'
            name: arg.name.replace('-', "_"),
            flags: arg.flags,
            declared_type: arg.tag,
            blurb: arg.blurb.to_string(),
        })
        .collect();

    let mut required_input = Vec::new();
    let mut optional_input = Vec::new();
    let mut required_output = Vec::new();
    let mut optional_output = Vec::new();

    for (index, spec) in arguments.iter().enumerate() {
        let flags = spec.flags;
        if flags.contains(ArgumentFlags::DEPRECATED) {
            continue;
        }
        if flags.contains(ArgumentFlags::INPUT) {
            if flags.contains(ArgumentFlags::REQUIRED) {
                required_input.push(index);
            } else {
                optional_input.push(index);
            }
        }
        if flags.contains(ArgumentFlags::OUTPUT) {
            if flags.contains(ArgumentFlags::REQUIRED) {
                required_output.push(index);
            } else {
                optional_output.push(index);
            }
        }
        // in-place arguments come back out as well
        if flags.contains(ArgumentFlags::INPUT) && flags.contains(ArgumentFlags::MODIFY) {
            required_output.push(index);
        }
    }

    let receiver = required_input
        .iter()
        .copied()
        .find(|&index| arguments[index].declared_type == types::image_type());

    OperationSchema {
        name: instance.name().to_string(),
        description: instance.description().to_string(),
        operation_flags: instance.operation_flags(),
        arguments,
        required_input,
        optional_input,
        required_output,
        optional_output,
        receiver,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(schema: &OperationSchema, indices: &[usize]) -> Vec<String> {
        indices
            .iter()
            .map(|&i| schema.arguments[i].name.clone())
            .collect()
    }

    #[test]
    fn test_black_schema() {
        let schema = get_schema("black").unwrap();
        assert_eq!(names(&schema, &schema.required_input), ["width", "height"]);
        assert_eq!(names(&schema, &schema.optional_input), ["bands"]);
        assert_eq!(names(&schema, &schema.required_output), ["out"]);
        assert!(schema.receiver.is_none());
    }

    #[test]
    fn test_add_schema_has_receiver() {
        let schema = get_schema("add").unwrap();
        assert_eq!(names(&schema, &schema.required_input), ["left", "right"]);
        let receiver = schema.receiver.unwrap();
        assert_eq!(schema.arguments[receiver].name, "left");
        // method-style calls supply the receiver implicitly
        assert_eq!(names(&schema, &schema.method_arguments()), ["right"]);
    }

    #[test]
    fn test_deprecated_arguments_are_skipped() {
        let schema = get_schema("im_add").unwrap();
        assert_eq!(names(&schema, &schema.required_input), ["left", "right"]);
        assert!(schema.is_deprecated());
    }

    #[test]
    fn test_modify_argument_is_also_output() {
        let schema = get_schema("draw_rect").unwrap();
        assert_eq!(names(&schema, &schema.required_output), ["image"]);
        assert!(schema
            .required_input
            .iter()
            .any(|&i| schema.arguments[i].name == "image"));
    }

    #[test]
    fn test_min_optional_outputs() {
        let schema = get_schema("min").unwrap();
        assert_eq!(names(&schema, &schema.optional_output), ["x", "y"]);
    }

    #[test]
    fn test_dashes_become_underscores() {
        let schema = get_schema("getpoint").unwrap();
        assert_eq!(names(&schema, &schema.required_output), ["out_array"]);
        let schema = get_schema("copy").unwrap();
        assert!(schema.argument("page_height").is_some());
    }

    #[test]
    fn test_schema_is_cached() {
        let before = introspections();
        let first = get_schema("embed").unwrap();
        let second = get_schema("embed").unwrap();
        let after = introspections();
        assert!(Arc::ptr_eq(&first, &second));
        // at most one walk for the two lookups (zero if another test won)
        assert!(after - before <= 1);
    }

    #[test]
    fn test_unknown_operation() {
        let err = get_schema("frobnicate").unwrap_err();
        assert!(matches!(
            err.kind,
            crate::errors::ErrorKind::NoSuchOperation { .. }
        ));
    }
}
