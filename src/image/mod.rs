//! Image handles.
//!
//! `Image` is the host-side wrapper for one runtime image object: it
//! owns exactly one reference, taken when the wrapper is created and
//! given back in `Drop`. Cloning retains. Everything an image can do
//! beyond holding that reference is one-line sugar over the generic
//! dispatcher: the typed methods below are the forward-compatible
//! method table, and `method`/`call` stay open for operations unknown
//! at build time.

use crate::bridge::tagged::TaggedValue;
use crate::bridge::value::Value;
use crate::dispatch::{self, AggregateResult, CallReturn};
use crate::engine::heap::{self, ObjectId};
use crate::engine::image as kernels;
use crate::engine::payload::Payload;
use crate::engine::types::{self, TypeTag};
use crate::errors::{Error, ErrorKind, Result};
use crate::lifetime::{self, TrackedBuffer};
use std::fmt;
use std::sync::Arc;

pub use crate::engine::image::{EvalPhase, Progress};

pub struct Image {
    id: ObjectId,
}

fn shape_error(operation: &str, wanted: &str) -> Error {
    Error::with_detail(
        ErrorKind::OperationFailed { operation: operation.to_string() },
        format!("operation did not return {}", wanted),
    )
}

fn want_image(operation: &str, ret: CallReturn) -> Result<Image> {
    ret.into_image().ok_or_else(|| shape_error(operation, "an image"))
}

fn want_double(operation: &str, ret: CallReturn) -> Result<f64> {
    ret.into_double().ok_or_else(|| shape_error(operation, "a value"))
}

fn position_of(operation: &str, aggregate: &AggregateResult) -> Result<(i64, i64)> {
    let x = aggregate
        .optional("x")
        .and_then(Value::as_i64)
        .ok_or_else(|| shape_error(operation, "an x position"))?;
    let y = aggregate
        .optional("y")
        .and_then(Value::as_i64)
        .ok_or_else(|| shape_error(operation, "a y position"))?;
    Ok((x, y))
}

impl Image {
    /// Wrap an object, taking a new reference for this wrapper.
    pub(crate) fn retained(id: ObjectId) -> Image {
        heap::retain(id);
        Image { id }
    }

    /// Wrap an object, adopting an existing reference.
    pub(crate) fn from_owned(id: ObjectId) -> Image {
        Image { id }
    }

    /// The native handle. The wrapper keeps its reference; callers must
    /// not release through this.
    pub(crate) fn raw(&self) -> ObjectId {
        self.id
    }

    // ------------------------------------------------------------------
    // constructors

    /// Make a zero-filled one-band image.
    pub fn black(width: i32, height: i32) -> Result<Image> {
        want_image("black", dispatch::call("black", &[width.into(), height.into()])?)
    }

    /// Make a zero-filled image with a band count.
    pub fn black_bands(width: i32, height: i32, bands: i32) -> Result<Image> {
        want_image(
            "black",
            dispatch::call_full(
                "black",
                &[width.into(), height.into()],
                &[("bands", bands.into())],
                "",
            )?,
        )
    }

    /// Make a one-band matrix image from a rectangular array.
    pub fn new_from_array(rows: &[Vec<f64>]) -> Result<Image> {
        Image::new_from_array_scaled(rows, 1.0, 0.0)
    }

    /// Matrix image with scale and offset metadata, for integer
    /// convolution-style uses.
    pub fn new_from_array_scaled(rows: &[Vec<f64>], scale: f64, offset: f64) -> Result<Image> {
        let height = rows.len() as i32;
        let width = rows.first().map(|row| row.len()).unwrap_or(0) as i32;
        if width == 0 || rows.iter().any(|row| row.len() != width as usize) {
            return Err(Error::with_detail(
                ErrorKind::OperationFailed { operation: "new_from_array".to_string() },
                "array is empty or not rectangular",
            ));
        }
        let values: Vec<f64> = rows.iter().flatten().copied().collect();
        let data = kernels::from_matrix(width, height, &values)
            .map_err(|_| Error::operation_failed("new_from_array"))?;
        let image = Image::from_owned(heap::alloc(data));
        image.set_type(types::double_type(), "scale", &Value::Double(scale))?;
        image.set_type(types::double_type(), "offset", &Value::Double(offset))?;
        Ok(image)
    }

    /// Wrap host-owned memory as a one-byte-per-band image, without
    /// copying. The buffer is lifetime-tracked: it stays alive while
    /// this image, or anything derived from it, exists.
    pub fn new_from_memory(
        data: Arc<[u8]>,
        width: i32,
        height: i32,
        bands: i32,
    ) -> Result<Image> {
        let buffer = TrackedBuffer::new(data.clone());
        let image_data = kernels::borrowed_from_bytes(data, width, height, bands)
            .map_err(|_| Error::operation_failed("new_from_memory"))?;
        let id = heap::alloc(image_data);
        lifetime::track(id, buffer);
        Ok(Image::from_owned(id))
    }

    /// Make a constant image matching this image's shape, the way bare
    /// scalars are expanded before binding: a one-pixel image carrying
    /// the constant, cast to this format, grown to this size.
    pub fn new_from_image(&self, pixel: &[f64]) -> Result<Image> {
        if pixel.is_empty() {
            return Err(Error::with_detail(
                ErrorKind::OperationFailed { operation: "new_from_image".to_string() },
                "no band values given",
            ));
        }
        let one = want_image(
            "black",
            dispatch::call_full(
                "black",
                &[1.into(), 1.into()],
                &[("bands", (pixel.len() as i64).into())],
                "",
            )?,
        )?;
        let constant = want_image(
            "linear",
            dispatch::call_full(
                "linear",
                &[Value::Image(one)],
                &[("b", pixel.into())],
                "",
            )?,
        )?;
        let cast = constant.cast(self.format())?;
        let grown = want_image(
            "embed",
            dispatch::call_full(
                "embed",
                &[
                    Value::Image(cast),
                    0.into(),
                    0.into(),
                    self.width().into(),
                    self.height().into(),
                ],
                &[("extend", "copy".into())],
                "",
            )?,
        )?;
        Ok(grown)
    }

    /// Deep copy into fresh runtime-owned memory.
    pub fn copy_memory(&self) -> Result<Image> {
        let ctrl = kernels::eval_control(self.id);
        let data = match heap::snapshot(self.id) {
            Some(data) => data,
            None => return Err(shape_error("copy_memory", "a live image")),
        };
        let copied = kernels::copy(&data, ctrl.as_deref())
            .map_err(|_| Error::operation_failed("copy_memory"))?;
        let id = heap::alloc(copied);
        lifetime::propagate(&[self.id], id);
        Ok(Image::from_owned(id))
    }

    /// Independent deep copy for in-place binding.
    pub(crate) fn copy_for_modify(&self) -> Result<Image> {
        let id = heap::duplicate(self.id)
            .ok_or_else(|| shape_error("copy", "a live image"))?;
        lifetime::propagate(&[self.id], id);
        Ok(Image::from_owned(id))
    }

    // ------------------------------------------------------------------
    // header fields

    pub fn width(&self) -> i32 {
        heap::with_image(self.id, |data| data.width).unwrap_or(0)
    }

    pub fn height(&self) -> i32 {
        heap::with_image(self.id, |data| data.height).unwrap_or(0)
    }

    pub fn bands(&self) -> i32 {
        heap::with_image(self.id, |data| data.bands).unwrap_or(0)
    }

    /// Band format nick, e.g. `"uchar"`.
    pub fn format(&self) -> &'static str {
        heap::with_image(self.id, |data| data.format.nick()).unwrap_or("uchar")
    }

    // ------------------------------------------------------------------
    // metadata

    /// Type of a metadata field; `TypeTag::NONE` when unset.
    pub fn get_typeof(&self, name: &str) -> TypeTag {
        heap::with_image(self.id, |data| {
            data.meta.get(name).map(|(tag, _)| *tag).unwrap_or(TypeTag::NONE)
        })
        .unwrap_or(TypeTag::NONE)
    }

    /// Read a metadata field.
    pub fn get(&self, name: &str) -> Result<Value> {
        let held = heap::with_image(self.id, |data| {
            data.meta
                .get(name)
                .map(|(tag, payload)| (*tag, payload.duplicate()))
        });
        match held.flatten() {
            Some((tag, payload)) => TaggedValue::from_payload(tag, payload).get(),
            None => Err(Error::with_detail(
                ErrorKind::OperationFailed { operation: "get".to_string() },
                format!("no such metadata field '{}'", name),
            )),
        }
    }

    /// Write a metadata field with an explicit type.
    ///
    /// Object-valued metadata is not supported; fields hold scalars,
    /// strings, arrays and blobs.
    pub fn set_type(&self, tag: TypeTag, name: &str, value: &Value) -> Result<()> {
        let mut slot = TaggedValue::declare(tag)?;
        slot.set(value)?;
        let payload = slot
            .payload()
            .ok_or_else(|| Error::operation_failed("set"))?;
        if matches!(payload, Payload::Object(_) | Payload::ArrayObject(_)) {
            return Err(Error::with_detail(
                ErrorKind::UnsupportedType { type_name: "Image".to_string() },
                "metadata fields cannot hold objects",
            ));
        }
        let duplicate = payload.duplicate();
        let evicted = heap::with_image_mut(self.id, |data| {
            data.meta.insert(name.to_string(), (tag, duplicate))
        });
        // replaced payload drops here, after the heap lock is gone
        drop(evicted);
        Ok(())
    }

    /// Write a metadata field, inferring the type from the existing one.
    pub fn set(&self, name: &str, value: &Value) -> Result<()> {
        let tag = self.get_typeof(name);
        if tag == TypeTag::NONE {
            return Err(Error::with_detail(
                ErrorKind::UnsupportedType { type_name: "Image".to_string() },
                format!("metadata field '{}' has no type yet, use set_type", name),
            ));
        }
        self.set_type(tag, name, value)
    }

    /// Remove a metadata field. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        let evicted = heap::with_image_mut(self.id, |data| data.meta.remove(name));
        match evicted {
            Some(Some(field)) => {
                drop(field);
                true
            }
            _ => false,
        }
    }

    /// Matrix scale metadata, defaulting to 1.
    pub fn get_scale(&self) -> f64 {
        if self.get_typeof("scale") != TypeTag::NONE {
            self.get("scale").ok().and_then(|v| v.as_f64()).unwrap_or(1.0)
        } else {
            1.0
        }
    }

    /// Matrix offset metadata, defaulting to 0.
    pub fn get_offset(&self) -> f64 {
        if self.get_typeof("offset") != TypeTag::NONE {
            self.get("offset").ok().and_then(|v| v.as_f64()).unwrap_or(0.0)
        } else {
            0.0
        }
    }

    // ------------------------------------------------------------------
    // calling operations

    /// Call any catalogue operation by name.
    pub fn call(operation: &str, args: &[Value]) -> Result<CallReturn> {
        dispatch::call(operation, args)
    }

    /// Method-style call: this image is the implicit first argument.
    pub fn method(&self, operation: &str, args: &[Value]) -> Result<CallReturn> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Image(self.clone()));
        full.extend_from_slice(args);
        dispatch::call(operation, &full)
    }

    pub fn add(&self, other: &Image) -> Result<Image> {
        want_image("add", self.method("add", &[other.into()])?)
    }

    pub fn subtract(&self, other: &Image) -> Result<Image> {
        want_image("subtract", self.method("subtract", &[other.into()])?)
    }

    pub fn multiply(&self, other: &Image) -> Result<Image> {
        want_image("multiply", self.method("multiply", &[other.into()])?)
    }

    pub fn divide(&self, other: &Image) -> Result<Image> {
        want_image("divide", self.method("divide", &[other.into()])?)
    }

    /// Per-band `a * x + b`.
    pub fn linear(&self, a: &[f64], b: &[f64]) -> Result<Image> {
        want_image(
            "linear",
            dispatch::call_full(
                "linear",
                &[self.into()],
                &[("a", a.into()), ("b", b.into())],
                "",
            )?,
        )
    }

    pub fn invert(&self) -> Result<Image> {
        want_image("invert", self.method("invert", &[])?)
    }

    /// Cast to a band format, by nick.
    pub fn cast(&self, format: &str) -> Result<Image> {
        want_image("cast", self.method("cast", &[format.into()])?)
    }

    pub fn embed(&self, x: i32, y: i32, width: i32, height: i32) -> Result<Image> {
        want_image(
            "embed",
            self.method("embed", &[x.into(), y.into(), width.into(), height.into()])?,
        )
    }

    pub fn flip(&self, direction: &str) -> Result<Image> {
        want_image("flip", self.method("flip", &[direction.into()])?)
    }

    pub fn rot(&self, angle: &str) -> Result<Image> {
        want_image("rot", self.method("rot", &[angle.into()])?)
    }

    pub fn extract_band(&self, band: i32) -> Result<Image> {
        want_image("extract_band", self.method("extract_band", &[band.into()])?)
    }

    /// Append other images bandwise after this one.
    pub fn bandjoin(&self, others: &[Image]) -> Result<Image> {
        let mut all = Vec::with_capacity(others.len() + 1);
        all.push(Value::Image(self.clone()));
        all.extend(others.iter().map(Value::from));
        want_image("bandjoin", dispatch::call("bandjoin", &[Value::Array(all)])?)
    }

    /// Band values at a point.
    pub fn getpoint(&self, x: i32, y: i32) -> Result<Vec<f64>> {
        let value = self
            .method("getpoint", &[x.into(), y.into()])?
            .into_single()
            .ok_or_else(|| shape_error("getpoint", "a point"))?;
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_f64().ok_or_else(|| shape_error("getpoint", "a point")))
                .collect(),
            _ => Err(shape_error("getpoint", "a point")),
        }
    }

    pub fn avg(&self) -> Result<f64> {
        want_double("avg", self.method("avg", &[])?)
    }

    pub fn min(&self) -> Result<f64> {
        want_double("min", self.method("min", &[])?)
    }

    pub fn max(&self) -> Result<f64> {
        want_double("max", self.method("max", &[])?)
    }

    /// Minimum value and the position of its first occurrence.
    pub fn min_position(&self) -> Result<(f64, i64, i64)> {
        let aggregate = dispatch::call_full(
            "min",
            &[self.into()],
            &[("x", true.into()), ("y", true.into())],
            "",
        )?
        .into_aggregate()
        .ok_or_else(|| shape_error("min", "positions"))?;
        let value = aggregate
            .required
            .first()
            .and_then(Value::as_f64)
            .ok_or_else(|| shape_error("min", "a value"))?;
        let (x, y) = position_of("min", &aggregate)?;
        Ok((value, x, y))
    }

    /// Maximum value and the position of its first occurrence.
    pub fn max_position(&self) -> Result<(f64, i64, i64)> {
        let aggregate = dispatch::call_full(
            "max",
            &[self.into()],
            &[("x", true.into()), ("y", true.into())],
            "",
        )?
        .into_aggregate()
        .ok_or_else(|| shape_error("max", "positions"))?;
        let value = aggregate
            .required
            .first()
            .and_then(Value::as_f64)
            .ok_or_else(|| shape_error("max", "a value"))?;
        let (x, y) = position_of("max", &aggregate)?;
        Ok((value, x, y))
    }

    /// Paint a rectangle. The receiver is untouched; the painted copy
    /// comes back.
    pub fn draw_rect(
        &self,
        ink: &[f64],
        left: i32,
        top: i32,
        width: i32,
        height: i32,
        fill: bool,
    ) -> Result<Image> {
        want_image(
            "draw_rect",
            dispatch::call_full(
                "draw_rect",
                &[
                    self.into(),
                    ink.into(),
                    left.into(),
                    top.into(),
                    width.into(),
                    height.into(),
                ],
                &[("fill", fill.into())],
                "",
            )?,
        )
    }

    /// Serialize to bytes through the catalogue.
    pub fn write_to_buffer(&self) -> Result<Vec<u8>> {
        let value = self
            .method("bufsave", &[])?
            .into_single()
            .ok_or_else(|| shape_error("bufsave", "a buffer"))?;
        match value {
            Value::Blob(bytes) => Ok(bytes),
            _ => Err(shape_error("bufsave", "a buffer")),
        }
    }

    // ------------------------------------------------------------------
    // progress and lifetime

    /// Install a progress handler, fired between evaluation strips of
    /// operations reading this image. The handler may flip the kill
    /// switch to cancel the evaluation.
    pub fn set_progress(&self, handler: impl FnMut(&Progress) + Send + 'static) {
        kernels::set_progress_handler(self.id, Box::new(handler));
    }

    /// Remove the progress handler and kill switch.
    pub fn clear_progress(&self) {
        kernels::clear_eval(self.id);
    }

    /// Cancel evaluations reading this image. Safe to call from a
    /// progress handler or any other thread.
    pub fn set_kill(&self, flag: bool) {
        kernels::set_kill(self.id, flag);
    }

    /// Host buffers this image depends on.
    pub fn tracked_buffers(&self) -> Vec<TrackedBuffer> {
        lifetime::tracked(self.id)
    }

    /// Current reference count, for tests and diagnostics.
    pub fn refcount(&self) -> u32 {
        heap::refcount(self.id)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        heap::release(self.id);
    }
}

impl Clone for Image {
    fn clone(&self) -> Image {
        Image::retained(self.id)
    }
}

/// Handle identity: two wrappers are equal when they name the same
/// runtime object.
impl PartialEq for Image {
    fn eq(&self, other: &Image) -> bool {
        self.id == other.id
    }
}

impl Eq for Image {}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Image({}x{} {}, {} bands)",
            self.width(),
            self.height(),
            self.format(),
            self.bands()
        )
    }
}
