//! Transient operation instances.
//!
//! An instance is created per call: arguments are bound into its property
//! store through payloads, `build` validates the required inputs and runs
//! the executor, and the instance is dropped afterwards, releasing every
//! reference it took. Argument names treat `-` and `_` interchangeably,
//! like the runtime's own property lookup.

use super::error::{fail, EngineResult};
use super::heap::ObjectId;
use super::ops::{self, ArgDef, OperationDef};
use super::payload::{BlobBuf, ObjectRef, Payload};
use super::types::{self, ArgumentFlags, Fundamental, TypeTag};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Canonical spelling of an argument name: dashes become underscores.
pub fn canonical_name(name: &str) -> String {
    name.replace('-', "_")
}

fn payload_matches(fundamental: Fundamental, payload: &Payload) -> bool {
    matches!(
        (fundamental, payload),
        (Fundamental::Bool, Payload::Bool(_))
            | (Fundamental::Int, Payload::Int(_))
            | (Fundamental::Double, Payload::Double(_))
            | (Fundamental::Str, Payload::Str(_))
            | (Fundamental::RefStr, Payload::Str(_))
            | (Fundamental::Enum, Payload::Enum(_))
            | (Fundamental::Flags, Payload::Flags(_))
            | (Fundamental::Object, Payload::Object(_))
            | (Fundamental::ArrayInt, Payload::ArrayInt(_))
            | (Fundamental::ArrayDouble, Payload::ArrayDouble(_))
            | (Fundamental::ArrayImage, Payload::ArrayObject(_))
            | (Fundamental::Blob, Payload::Blob(_))
    )
}

pub struct Instance {
    def: Arc<OperationDef>,
    props: HashMap<String, Payload>,
    built: bool,
}

impl Instance {
    /// Instantiate an operation by catalogue name.
    pub fn new(name: &str) -> Option<Instance> {
        let def = ops::find(name)?;
        trace!(operation = name, "operation instance created");
        Some(Instance {
            def,
            props: HashMap::new(),
            built: false,
        })
    }

    pub fn name(&self) -> &'static str {
        self.def.name
    }

    pub fn description(&self) -> &'static str {
        self.def.description
    }

    pub fn operation_flags(&self) -> u32 {
        self.def.flags
    }

    /// Walk the argument table in declaration order.
    pub fn arguments(&self) -> impl Iterator<Item = &ArgDef> {
        self.def
            .args
            .iter()
            .filter(|arg| arg.flags.contains(ArgumentFlags::CONSTRUCT))
    }

    /// Declaration entry for an argument, by canonical name.
    pub fn argument(&self, name: &str) -> Option<&ArgDef> {
        let wanted = canonical_name(name);
        self.def
            .args
            .iter()
            .find(|arg| canonical_name(arg.name) == wanted)
    }

    /// Declared type of an argument; `None` if the name is unknown.
    pub fn argument_type(&self, name: &str) -> Option<TypeTag> {
        self.argument(name).map(|arg| arg.tag)
    }

    /// Copy a payload into the property store. The store takes its own
    /// reference on any object the payload carries.
    pub fn set_payload(&mut self, name: &str, payload: &Payload) -> EngineResult<()> {
        let Some(arg) = self.argument(name) else {
            return fail(format!("{} has no argument '{}'", self.def.name, name));
        };
        let Some(fundamental) = types::fundamental(arg.tag) else {
            return fail(format!("argument '{}' has an unregistered type", name));
        };
        if !payload_matches(fundamental, payload) {
            return fail(format!(
                "argument '{}' wants {:?}, got {} payload",
                name,
                fundamental,
                payload.kind()
            ));
        }
        self.props.insert(canonical_name(name), payload.duplicate());
        Ok(())
    }

    /// Duplicate a bound payload out of the property store.
    pub fn payload(&self, name: &str) -> EngineResult<Payload> {
        match self.maybe_payload(name) {
            Some(payload) => Ok(payload),
            None => fail(format!(
                "{}: no value bound for argument '{}'",
                self.def.name, name
            )),
        }
    }

    /// Like [`Instance::payload`], but absence is not an error.
    pub fn maybe_payload(&self, name: &str) -> Option<Payload> {
        self.props
            .get(&canonical_name(name))
            .map(Payload::duplicate)
    }

    /// Bound arguments, for fingerprinting. Canonical names, stable only
    /// after sorting.
    pub fn bound(&self) -> impl Iterator<Item = (&str, &Payload)> {
        self.props.iter().map(|(name, payload)| (name.as_str(), payload))
    }

    /// Validate required inputs and run the operation.
    pub fn build(&mut self) -> EngineResult<()> {
        if self.built {
            return fail(format!("{} built twice", self.def.name));
        }
        for arg in self.def.args.iter() {
            let needed = arg.flags.contains(ArgumentFlags::REQUIRED)
                && arg.flags.contains(ArgumentFlags::INPUT)
                && arg.flags.contains(ArgumentFlags::CONSTRUCT)
                && !arg.flags.contains(ArgumentFlags::DEPRECATED);
            if needed && !self.props.contains_key(&canonical_name(arg.name)) {
                return fail(format!(
                    "{}: no value supplied for required argument '{}'",
                    self.def.name, arg.name
                ));
            }
        }
        let def = self.def.clone();
        let mut ctx = ExecCtx {
            props: &mut self.props,
        };
        (def.execute)(&mut ctx)?;
        self.built = true;
        Ok(())
    }
}

/// Typed access to an instance's property store, for executors.
pub struct ExecCtx<'a> {
    props: &'a mut HashMap<String, Payload>,
}

impl ExecCtx<'_> {
    fn get(&self, name: &str) -> Option<&Payload> {
        self.props.get(name)
    }

    fn missing<T>(&self, name: &str) -> EngineResult<T> {
        fail(format!("no value for argument '{}'", name))
    }

    pub fn int(&self, name: &str) -> EngineResult<i64> {
        match self.get(name) {
            Some(Payload::Int(v)) => Ok(*v),
            _ => self.missing(name),
        }
    }

    pub fn opt_int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(Payload::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn opt_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(Payload::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn double_array(&self, name: &str) -> EngineResult<Vec<f64>> {
        match self.get(name) {
            Some(Payload::ArrayDouble(v)) => Ok(v.clone()),
            _ => self.missing(name),
        }
    }

    pub fn opt_double_array(&self, name: &str) -> Option<Vec<f64>> {
        match self.get(name) {
            Some(Payload::ArrayDouble(v)) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn enum_value(&self, name: &str) -> EngineResult<i32> {
        match self.get(name) {
            Some(Payload::Enum(v)) => Ok(*v),
            _ => self.missing(name),
        }
    }

    pub fn opt_enum(&self, name: &str) -> Option<i32> {
        match self.get(name) {
            Some(Payload::Enum(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn image(&self, name: &str) -> EngineResult<ObjectId> {
        match self.get(name) {
            Some(Payload::Object(r)) => Ok(r.id()),
            _ => self.missing(name),
        }
    }

    pub fn image_array(&self, name: &str) -> EngineResult<Vec<ObjectId>> {
        match self.get(name) {
            Some(Payload::ArrayObject(refs)) => Ok(refs.iter().map(ObjectRef::id).collect()),
            _ => self.missing(name),
        }
    }

    pub fn blob(&self, name: &str) -> EngineResult<BlobBuf> {
        match self.get(name) {
            Some(Payload::Blob(b)) => Ok(b.clone()),
            _ => self.missing(name),
        }
    }

    /// Store an output object; the store adopts the caller's reference.
    pub fn set_image(&mut self, name: &str, id: ObjectId) {
        self.props
            .insert(name.to_string(), Payload::Object(ObjectRef::owned(id)));
    }

    pub fn set_int(&mut self, name: &str, value: i64) {
        self.props.insert(name.to_string(), Payload::Int(value));
    }

    pub fn set_double(&mut self, name: &str, value: f64) {
        self.props.insert(name.to_string(), Payload::Double(value));
    }

    pub fn set_double_array(&mut self, name: &str, values: Vec<f64>) {
        self.props
            .insert(name.to_string(), Payload::ArrayDouble(values));
    }

    pub fn set_blob(&mut self, name: &str, bytes: Vec<u8>) {
        self.props
            .insert(name.to_string(), Payload::Blob(BlobBuf::copied(&bytes, None)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_operation() {
        assert!(Instance::new("frobnicate").is_none());
    }

    #[test]
    fn test_argument_names_are_canonical() {
        let instance = Instance::new("copy").unwrap();
        assert!(instance.argument("page-height").is_some());
        assert!(instance.argument("page_height").is_some());
        assert!(instance.argument("page height").is_none());
    }

    #[test]
    fn test_set_payload_checks_fundamental() {
        let mut instance = Instance::new("black").unwrap();
        assert!(instance.set_payload("width", &Payload::Int(4)).is_ok());
        assert!(instance.set_payload("width", &Payload::Str("4".into())).is_err());
        assert!(instance.set_payload("nonsense", &Payload::Int(4)).is_err());
        crate::engine::error::clear();
    }

    #[test]
    fn test_build_requires_inputs() {
        let mut instance = Instance::new("black").unwrap();
        instance.set_payload("width", &Payload::Int(4)).unwrap();
        assert!(instance.build().is_err());
        crate::engine::error::clear();
    }
}
