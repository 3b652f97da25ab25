//! The tagged-value bridge.
//!
//! A `TaggedValue` is one typed slot at the call boundary: declared with
//! a type tag, populated from a host `Value`, read back out, and released
//! exactly once (on drop, if not before). Conversions are table-driven:
//! one `Conversion` entry per fundamental, so supporting a new family is
//! one registration line, not a new branch in a type switch.
//!
//! The one asymmetry: setting an object slot borrows the host's existing
//! reference, while reading an object slot takes a new reference for the
//! wrapper handed back, so releasing the slot can never invalidate
//! what the caller holds.

use super::value::Value;
use crate::engine::payload::{BlobBuf, ObjectRef, Payload};
use crate::engine::types::{self, Fundamental, TypeTag};
use crate::errors::{Error, ErrorKind, Result};
use crate::image::Image;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::trace;

struct Conversion {
    set: fn(TypeTag, &Value) -> Result<Payload>,
    get: fn(TypeTag, &Payload) -> Result<Value>,
}

static CONVERSIONS: Lazy<HashMap<Fundamental, Conversion>> = Lazy::new(|| {
    let mut table: HashMap<Fundamental, Conversion> = HashMap::new();
    table.insert(Fundamental::Bool, Conversion { set: set_bool, get: get_bool });
    table.insert(Fundamental::Int, Conversion { set: set_int, get: get_int });
    table.insert(Fundamental::Double, Conversion { set: set_double, get: get_double });
    table.insert(Fundamental::Str, Conversion { set: set_str, get: get_str });
    table.insert(Fundamental::RefStr, Conversion { set: set_str, get: get_str });
    table.insert(Fundamental::Enum, Conversion { set: set_enum, get: get_enum });
    table.insert(Fundamental::Flags, Conversion { set: set_flags, get: get_flags });
    table.insert(Fundamental::Object, Conversion { set: set_object, get: get_object });
    table.insert(Fundamental::ArrayInt, Conversion { set: set_array_int, get: get_array_int });
    table.insert(Fundamental::ArrayDouble, Conversion { set: set_array_double, get: get_array_double });
    table.insert(Fundamental::ArrayImage, Conversion { set: set_array_image, get: get_array_image });
    table.insert(Fundamental::Blob, Conversion { set: set_blob, get: get_blob });
    table
});

/// Display name for a tag, falling back to the raw number.
fn type_label(tag: TypeTag) -> String {
    types::type_name(tag).unwrap_or_else(|| format!("tag#{}", tag.0))
}

fn mismatch(tag: TypeTag, value: &Value) -> Error {
    Error::with_detail(
        ErrorKind::UnsupportedType { type_name: type_label(tag) },
        format!(
            "cannot convert host {} into {}",
            value.type_of(),
            type_label(tag)
        ),
    )
}

fn bad_payload(tag: TypeTag, payload: &Payload) -> Error {
    Error::with_detail(
        ErrorKind::UnsupportedType { type_name: type_label(tag) },
        format!(
            "{} slot holds a {} payload",
            type_label(tag),
            payload.kind()
        ),
    )
}

/// One typed slot at the call boundary.
pub struct TaggedValue {
    tag: TypeTag,
    payload: Option<Payload>,
}

impl TaggedValue {
    /// Allocate an empty slot for `tag`. Fails for tags the type table
    /// does not know.
    pub fn declare(tag: TypeTag) -> Result<TaggedValue> {
        if types::fundamental(tag).is_none() {
            return Err(Error::unsupported_type(format!("tag#{}", tag.0)));
        }
        Ok(TaggedValue { tag, payload: None })
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Convert a host value into the slot.
    pub fn set(&mut self, value: &Value) -> Result<()> {
        let conversion = self.conversion()?;
        let payload = (conversion.set)(self.tag, value)?;
        trace!(tag = self.tag.0, kind = payload.kind(), "tagged value set");
        // replacing an earlier payload releases whatever it held
        self.payload = Some(payload);
        Ok(())
    }

    /// Convert the slot back into a host value.
    pub fn get(&self) -> Result<Value> {
        let conversion = self.conversion()?;
        let payload = self.payload.as_ref().ok_or_else(|| {
            Error::with_detail(
                ErrorKind::UnsupportedType { type_name: type_label(self.tag) },
                "tagged value was never set",
            )
        })?;
        (conversion.get)(self.tag, payload)
    }

    /// Release owned resources. Idempotent; also runs on drop.
    pub fn release(&mut self) {
        self.payload = None;
    }

    pub(crate) fn from_payload(tag: TypeTag, payload: Payload) -> TaggedValue {
        TaggedValue { tag, payload: Some(payload) }
    }

    pub(crate) fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    fn conversion(&self) -> Result<&'static Conversion> {
        let fundamental = types::fundamental(self.tag)
            .ok_or_else(|| Error::unsupported_type(type_label(self.tag)))?;
        CONVERSIONS
            .get(&fundamental)
            .ok_or_else(|| Error::unsupported_type(type_label(self.tag)))
    }
}

impl Drop for TaggedValue {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// conversion entries

fn set_bool(tag: TypeTag, value: &Value) -> Result<Payload> {
    match value {
        Value::Bool(v) => Ok(Payload::Bool(*v)),
        other => Err(mismatch(tag, other)),
    }
}

fn get_bool(tag: TypeTag, payload: &Payload) -> Result<Value> {
    match payload {
        Payload::Bool(v) => Ok(Value::Bool(*v)),
        other => Err(bad_payload(tag, other)),
    }
}

fn set_int(tag: TypeTag, value: &Value) -> Result<Payload> {
    match value {
        Value::Int(v) => Ok(Payload::Int(*v)),
        other => Err(mismatch(tag, other)),
    }
}

fn get_int(tag: TypeTag, payload: &Payload) -> Result<Value> {
    match payload {
        Payload::Int(v) => Ok(Value::Int(*v)),
        other => Err(bad_payload(tag, other)),
    }
}

fn set_double(tag: TypeTag, value: &Value) -> Result<Payload> {
    match value {
        Value::Double(v) => Ok(Payload::Double(*v)),
        // ints pass into double slots, like any C double parameter
        Value::Int(v) => Ok(Payload::Double(*v as f64)),
        other => Err(mismatch(tag, other)),
    }
}

fn get_double(tag: TypeTag, payload: &Payload) -> Result<Value> {
    match payload {
        Payload::Double(v) => Ok(Value::Double(*v)),
        other => Err(bad_payload(tag, other)),
    }
}

fn set_str(tag: TypeTag, value: &Value) -> Result<Payload> {
    match value {
        Value::Str(v) => Ok(Payload::Str(v.clone())),
        other => Err(mismatch(tag, other)),
    }
}

fn get_str(tag: TypeTag, payload: &Payload) -> Result<Value> {
    match payload {
        Payload::Str(v) => Ok(Value::Str(v.clone())),
        other => Err(bad_payload(tag, other)),
    }
}

fn set_enum(tag: TypeTag, value: &Value) -> Result<Payload> {
    match value {
        Value::Str(nick) => match types::enum_from_nick(tag, nick) {
            Some(resolved) => Ok(Payload::Enum(resolved)),
            None => Err(Error::invalid_enum(type_label(tag), nick)),
        },
        Value::Int(v) => Ok(Payload::Enum(*v as i32)),
        other => Err(mismatch(tag, other)),
    }
}

fn get_enum(tag: TypeTag, payload: &Payload) -> Result<Value> {
    match payload {
        Payload::Enum(v) => match types::enum_nick(tag, *v) {
            Some(nick) => Ok(Value::Str(nick)),
            None => Err(Error::invalid_enum(type_label(tag), &v.to_string())),
        },
        other => Err(bad_payload(tag, other)),
    }
}

fn set_flags(tag: TypeTag, value: &Value) -> Result<Payload> {
    match value {
        Value::Int(v) => Ok(Payload::Flags(*v as u32)),
        Value::Str(nick) => match types::flags_from_nick(tag, nick) {
            Some(resolved) => Ok(Payload::Flags(resolved)),
            None => Err(Error::invalid_enum(type_label(tag), nick)),
        },
        other => Err(mismatch(tag, other)),
    }
}

fn get_flags(tag: TypeTag, payload: &Payload) -> Result<Value> {
    match payload {
        Payload::Flags(v) => Ok(Value::Int(*v as i64)),
        other => Err(bad_payload(tag, other)),
    }
}

fn set_object(tag: TypeTag, value: &Value) -> Result<Payload> {
    match value {
        // borrow the host wrapper's reference; the slot takes nothing
        Value::Image(image) => Ok(Payload::Object(ObjectRef::borrowed(image.raw()))),
        other => Err(mismatch(tag, other)),
    }
}

fn get_object(tag: TypeTag, payload: &Payload) -> Result<Value> {
    match payload {
        // a new wrapper gets its own reference, matched by its drop
        Payload::Object(object) => Ok(Value::Image(Image::retained(object.id()))),
        other => Err(bad_payload(tag, other)),
    }
}

fn set_array_int(tag: TypeTag, value: &Value) -> Result<Payload> {
    match value {
        Value::Int(v) => Ok(Payload::ArrayInt(vec![*v])),
        Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Int(v) => values.push(*v),
                    other => return Err(mismatch(tag, other)),
                }
            }
            Ok(Payload::ArrayInt(values))
        }
        other => Err(mismatch(tag, other)),
    }
}

fn get_array_int(tag: TypeTag, payload: &Payload) -> Result<Value> {
    match payload {
        Payload::ArrayInt(values) => Ok(Value::Array(
            values.iter().map(|v| Value::Int(*v)).collect(),
        )),
        other => Err(bad_payload(tag, other)),
    }
}

fn set_array_double(tag: TypeTag, value: &Value) -> Result<Payload> {
    match value {
        Value::Int(v) => Ok(Payload::ArrayDouble(vec![*v as f64])),
        Value::Double(v) => Ok(Payload::ArrayDouble(vec![*v])),
        Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item.as_f64() {
                    Some(v) => values.push(v),
                    None => return Err(mismatch(tag, item)),
                }
            }
            Ok(Payload::ArrayDouble(values))
        }
        other => Err(mismatch(tag, other)),
    }
}

fn get_array_double(tag: TypeTag, payload: &Payload) -> Result<Value> {
    match payload {
        Payload::ArrayDouble(values) => Ok(Value::Array(
            values.iter().map(|v| Value::Double(*v)).collect(),
        )),
        other => Err(bad_payload(tag, other)),
    }
}

fn set_array_image(tag: TypeTag, value: &Value) -> Result<Payload> {
    match value {
        // the array co-owns every element: retain each on the way in
        Value::Image(image) => Ok(Payload::ArrayObject(vec![ObjectRef::retained(image.raw())])),
        Value::Array(items) => {
            let mut refs = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Image(image) => refs.push(ObjectRef::retained(image.raw())),
                    other => return Err(mismatch(tag, other)),
                }
            }
            Ok(Payload::ArrayObject(refs))
        }
        other => Err(mismatch(tag, other)),
    }
}

fn get_array_image(tag: TypeTag, payload: &Payload) -> Result<Value> {
    match payload {
        Payload::ArrayObject(refs) => Ok(Value::Array(
            refs.iter()
                .map(|object| Value::Image(Image::retained(object.id())))
                .collect(),
        )),
        other => Err(bad_payload(tag, other)),
    }
}

fn set_blob(tag: TypeTag, value: &Value) -> Result<Payload> {
    match value {
        Value::Blob(bytes) => {
            // copy into a runtime-owned buffer; the runtime frees it via
            // the registered callback once the last reference drops
            let length = bytes.len();
            let buffer = BlobBuf::copied(
                bytes,
                Some(Box::new(move || {
                    trace!(bytes = length, "blob buffer freed");
                })),
            );
            Ok(Payload::Blob(buffer))
        }
        other => Err(mismatch(tag, other)),
    }
}

fn get_blob(tag: TypeTag, payload: &Payload) -> Result<Value> {
    match payload {
        Payload::Blob(buffer) => Ok(Value::Blob(buffer.bytes().to_vec())),
        other => Err(bad_payload(tag, other)),
    }
}
