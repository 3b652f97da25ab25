//! Operation catalogue.
//!
//! Every callable unit the runtime exposes is registered here: a name, a
//! description, operation flags, the walkable argument table, and an
//! executor. The catalogue is the introspection surface: callers
//! discover argument contracts from these tables at run time instead of
//! linking against per-operation entry points.

use super::error::{fail, EngineResult};
use super::heap::{self, ObjectId};
use super::image::{self, BandFormat, Extend, ImageData};
use super::instance::ExecCtx;
use super::payload::Payload;
use super::types::{self, ArgumentFlags, TypeTag, OPERATION_DEPRECATED};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

pub struct ArgDef {
    pub name: &'static str,
    pub flags: ArgumentFlags,
    pub tag: TypeTag,
    pub blurb: &'static str,
}

pub struct OperationDef {
    pub name: &'static str,
    pub description: &'static str,
    pub flags: u32,
    pub args: Vec<ArgDef>,
    pub execute: fn(&mut ExecCtx<'_>) -> EngineResult<()>,
}

// common flag shapes
const RI: ArgumentFlags = ArgumentFlags::REQUIRED
    .with(ArgumentFlags::CONSTRUCT)
    .with(ArgumentFlags::INPUT);
const OI: ArgumentFlags = ArgumentFlags::CONSTRUCT.with(ArgumentFlags::INPUT);
const RO: ArgumentFlags = ArgumentFlags::REQUIRED
    .with(ArgumentFlags::CONSTRUCT)
    .with(ArgumentFlags::OUTPUT);
const OO: ArgumentFlags = ArgumentFlags::CONSTRUCT.with(ArgumentFlags::OUTPUT);

fn arg(name: &'static str, flags: ArgumentFlags, tag: TypeTag, blurb: &'static str) -> ArgDef {
    ArgDef { name, flags, tag, blurb }
}

static REGISTRY: Lazy<DashMap<&'static str, Arc<OperationDef>>> = Lazy::new(build_catalogue);

pub fn find(name: &str) -> Option<Arc<OperationDef>> {
    REGISTRY.get(name).map(|def| def.clone())
}

/// Catalogue names, sorted for deterministic listings.
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<_> = REGISTRY.iter().map(|entry| *entry.key()).collect();
    names.sort_unstable();
    names
}

// ---------------------------------------------------------------------------
// executor helpers

fn input(id: ObjectId) -> EngineResult<ImageData> {
    match heap::snapshot(id) {
        Some(data) => Ok(data),
        None => fail("image object is no longer alive"),
    }
}

fn emit(ctx: &mut ExecCtx<'_>, name: &str, data: ImageData) {
    ctx.set_image(name, heap::alloc(data));
}

fn band_format(value: i32) -> EngineResult<BandFormat> {
    match BandFormat::from_value(value) {
        Some(format) => Ok(format),
        None => fail(format!("{} is not a band format", value)),
    }
}

// ---------------------------------------------------------------------------
// executors

fn black_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let width = ctx.int("width")? as i32;
    let height = ctx.int("height")? as i32;
    let bands = ctx.opt_int("bands").unwrap_or(1) as i32;
    let data = image::black(width, height, bands)?;
    emit(ctx, "out", data);
    Ok(())
}

fn arith_exec(ctx: &mut ExecCtx<'_>, op: fn(f64, f64) -> f64) -> EngineResult<()> {
    let left = input(ctx.image("left")?)?;
    let right = input(ctx.image("right")?)?;
    let ctrl = image::eval_control(ctx.image("left")?);
    let data = image::elementwise(&left, &right, ctrl.as_deref(), op)?;
    emit(ctx, "out", data);
    Ok(())
}

fn add_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    arith_exec(ctx, |a, b| a + b)
}

fn subtract_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    arith_exec(ctx, |a, b| a - b)
}

fn multiply_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    arith_exec(ctx, |a, b| a * b)
}

fn divide_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    arith_exec(ctx, |a, b| a / b)
}

fn linear_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let id = ctx.image("in")?;
    let source = input(id)?;
    let a = ctx.opt_double_array("a").unwrap_or_else(|| vec![1.0]);
    let b = ctx.opt_double_array("b").unwrap_or_else(|| vec![0.0]);
    let ctrl = image::eval_control(id);
    let mut data = image::linear(&source, &a, &b, ctrl.as_deref())?;
    if ctx.opt_bool("uchar").unwrap_or(false) {
        data = image::cast(&data, BandFormat::UChar)?;
    }
    emit(ctx, "out", data);
    Ok(())
}

fn invert_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let id = ctx.image("in")?;
    let source = input(id)?;
    let ctrl = image::eval_control(id);
    let data = image::invert(&source, ctrl.as_deref())?;
    emit(ctx, "out", data);
    Ok(())
}

fn cast_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let source = input(ctx.image("in")?)?;
    let format = band_format(ctx.enum_value("format")?)?;
    let data = image::cast(&source, format)?;
    emit(ctx, "out", data);
    Ok(())
}

fn embed_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let source = input(ctx.image("in")?)?;
    let x = ctx.int("x")? as i32;
    let y = ctx.int("y")? as i32;
    let width = ctx.int("width")? as i32;
    let height = ctx.int("height")? as i32;
    let extend = match Extend::from_value(ctx.opt_enum("extend").unwrap_or(0)) {
        Some(extend) => extend,
        None => return fail("unknown extend mode"),
    };
    let background = ctx.opt_double_array("background").unwrap_or_default();
    let data = image::embed(&source, x, y, width, height, extend, &background)?;
    emit(ctx, "out", data);
    Ok(())
}

fn flip_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let source = input(ctx.image("in")?)?;
    let horizontal = ctx.enum_value("direction")? == 0;
    let data = image::flip(&source, horizontal)?;
    emit(ctx, "out", data);
    Ok(())
}

fn rot_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let source = input(ctx.image("in")?)?;
    let data = image::rot(&source, ctx.enum_value("angle")?)?;
    emit(ctx, "out", data);
    Ok(())
}

fn extract_band_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let source = input(ctx.image("in")?)?;
    let band = ctx.int("band")? as i32;
    let n = ctx.opt_int("n").unwrap_or(1) as i32;
    let data = image::extract_band(&source, band, n)?;
    emit(ctx, "out", data);
    Ok(())
}

fn bandjoin_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let ids = ctx.image_array("in")?;
    let mut sources = Vec::with_capacity(ids.len());
    for id in ids {
        sources.push(input(id)?);
    }
    let data = image::bandjoin(&sources)?;
    emit(ctx, "out", data);
    Ok(())
}

fn getpoint_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let source = input(ctx.image("in")?)?;
    let x = ctx.int("x")? as i32;
    let y = ctx.int("y")? as i32;
    let point = image::getpoint(&source, x, y)?;
    ctx.set_double_array("out_array", point);
    Ok(())
}

fn avg_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let id = ctx.image("in")?;
    let source = input(id)?;
    let ctrl = image::eval_control(id);
    let mean = image::avg(&source, ctrl.as_deref())?;
    ctx.set_double("out", mean);
    Ok(())
}

fn min_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let source = input(ctx.image("in")?)?;
    let (min, min_x, min_y, _, _, _) = image::minmax(&source)?;
    ctx.set_double("out", min);
    ctx.set_int("x", min_x as i64);
    ctx.set_int("y", min_y as i64);
    Ok(())
}

fn max_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let source = input(ctx.image("in")?)?;
    let (_, _, _, max, max_x, max_y) = image::minmax(&source)?;
    ctx.set_double("out", max);
    ctx.set_int("x", max_x as i64);
    ctx.set_int("y", max_y as i64);
    Ok(())
}

fn draw_rect_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let id = ctx.image("image")?;
    let ink = ctx.double_array("ink")?;
    let left = ctx.int("left")? as i32;
    let top = ctx.int("top")? as i32;
    let width = ctx.int("width")? as i32;
    let height = ctx.int("height")? as i32;
    let fill = ctx.opt_bool("fill").unwrap_or(false);
    match heap::with_image_mut(id, |data| {
        image::draw_rect(data, &ink, left, top, width, height, fill)
    }) {
        Some(result) => result,
        None => fail("image object is no longer alive"),
    }
}

fn copy_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let id = ctx.image("in")?;
    let source = input(id)?;
    let ctrl = image::eval_control(id);
    let mut data = image::copy(&source, ctrl.as_deref())?;
    if let Some(page_height) = ctx.opt_int("page_height") {
        data.meta.insert(
            "page-height".to_string(),
            (types::int_type(), Payload::Int(page_height)),
        );
    }
    emit(ctx, "out", data);
    Ok(())
}

fn bufload_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let blob = ctx.blob("buffer")?;
    let width = ctx.int("width")? as i32;
    let height = ctx.int("height")? as i32;
    let bands = ctx.opt_int("bands").unwrap_or(1) as i32;
    let data = image::from_bytes(blob.bytes(), width, height, bands)?;
    emit(ctx, "out", data);
    Ok(())
}

fn bufsave_exec(ctx: &mut ExecCtx<'_>) -> EngineResult<()> {
    let source = input(ctx.image("in")?)?;
    let bytes = image::to_bytes(&source);
    ctx.set_blob("buffer", bytes);
    Ok(())
}

// ---------------------------------------------------------------------------
// catalogue

fn build_catalogue() -> DashMap<&'static str, Arc<OperationDef>> {
    let image_t = types::image_type();
    let int_t = types::int_type();
    let bool_t = types::bool_type();
    let double_array_t = types::array_double_type();
    let image_array_t = types::array_image_type();
    let blob_t = types::blob_type();
    let format_t = types::band_format_type();
    let extend_t = types::extend_type();
    let angle_t = types::angle_type();
    let direction_t = types::direction_type();

    let arith_args = || {
        vec![
            arg("left", RI, image_t, "left-hand image"),
            arg("right", RI, image_t, "right-hand image"),
            arg("out", RO, image_t, "output image"),
        ]
    };

    let defs: Vec<OperationDef> = vec![
        OperationDef {
            name: "black",
            description: "make a black image",
            flags: 0,
            args: vec![
                arg("width", RI, int_t, "image width in pixels"),
                arg("height", RI, int_t, "image height in pixels"),
                arg("bands", OI, int_t, "number of bands"),
                arg("out", RO, image_t, "output image"),
            ],
            execute: black_exec,
        },
        OperationDef {
            name: "add",
            description: "add two images",
            flags: 0,
            args: arith_args(),
            execute: add_exec,
        },
        OperationDef {
            name: "subtract",
            description: "subtract two images",
            flags: 0,
            args: arith_args(),
            execute: subtract_exec,
        },
        OperationDef {
            name: "multiply",
            description: "multiply two images",
            flags: 0,
            args: arith_args(),
            execute: multiply_exec,
        },
        OperationDef {
            name: "divide",
            description: "divide two images",
            flags: 0,
            args: arith_args(),
            execute: divide_exec,
        },
        OperationDef {
            // kept for callers of the pre-catalogue entry point
            name: "im_add",
            description: "add two images (deprecated interface)",
            flags: OPERATION_DEPRECATED,
            args: vec![
                arg("left", RI, image_t, "left-hand image"),
                arg("right", RI, image_t, "right-hand image"),
                arg(
                    "mask",
                    RI.with(ArgumentFlags::DEPRECATED),
                    double_array_t,
                    "ignored",
                ),
                arg("out", RO, image_t, "output image"),
            ],
            execute: add_exec,
        },
        OperationDef {
            name: "linear",
            description: "calculate (a * in + b)",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "input image"),
                arg("a", OI, double_array_t, "multiply by this"),
                arg("b", OI, double_array_t, "add this"),
                arg("uchar", OI, bool_t, "output should be uchar"),
                arg("out", RO, image_t, "output image"),
            ],
            execute: linear_exec,
        },
        OperationDef {
            name: "invert",
            description: "invert an image",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "input image"),
                arg(
                    "gamma",
                    OI.with(ArgumentFlags::DEPRECATED),
                    double_array_t,
                    "ignored",
                ),
                arg("out", RO, image_t, "output image"),
            ],
            execute: invert_exec,
        },
        OperationDef {
            name: "cast",
            description: "cast an image to a band format",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "input image"),
                arg("format", RI, format_t, "format to cast to"),
                arg("out", RO, image_t, "output image"),
            ],
            execute: cast_exec,
        },
        OperationDef {
            name: "embed",
            description: "embed an image in a larger image",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "input image"),
                arg("x", RI, int_t, "left edge of input in output"),
                arg("y", RI, int_t, "top edge of input in output"),
                arg("width", RI, int_t, "output width in pixels"),
                arg("height", RI, int_t, "output height in pixels"),
                arg("extend", OI, extend_t, "how to generate the new pixels"),
                arg("background", OI, double_array_t, "background value"),
                arg("out", RO, image_t, "output image"),
            ],
            execute: embed_exec,
        },
        OperationDef {
            name: "flip",
            description: "flip an image",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "input image"),
                arg("direction", RI, direction_t, "direction to flip"),
                arg("out", RO, image_t, "output image"),
            ],
            execute: flip_exec,
        },
        OperationDef {
            name: "rot",
            description: "rotate an image by a fixed angle",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "input image"),
                arg("angle", RI, angle_t, "angle to rotate"),
                arg("out", RO, image_t, "output image"),
            ],
            execute: rot_exec,
        },
        OperationDef {
            name: "extract_band",
            description: "extract bands from an image",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "input image"),
                arg("band", RI, int_t, "first band to extract"),
                arg("n", OI, int_t, "number of bands to extract"),
                arg("out", RO, image_t, "output image"),
            ],
            execute: extract_band_exec,
        },
        OperationDef {
            name: "bandjoin",
            description: "bandwise join a set of images",
            flags: 0,
            args: vec![
                arg("in", RI, image_array_t, "input images"),
                arg("out", RO, image_t, "output image"),
            ],
            execute: bandjoin_exec,
        },
        OperationDef {
            name: "getpoint",
            description: "read a point from an image",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "input image"),
                arg("x", RI, int_t, "point to read"),
                arg("y", RI, int_t, "point to read"),
                arg("out-array", RO, double_array_t, "band values at the point"),
            ],
            execute: getpoint_exec,
        },
        OperationDef {
            name: "avg",
            description: "find image average",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "input image"),
                arg("out", RO, types::double_type(), "output value"),
            ],
            execute: avg_exec,
        },
        OperationDef {
            name: "min",
            description: "find image minimum",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "input image"),
                arg("out", RO, types::double_type(), "minimum value"),
                arg("x", OO, int_t, "horizontal position of minimum"),
                arg("y", OO, int_t, "vertical position of minimum"),
            ],
            execute: min_exec,
        },
        OperationDef {
            name: "max",
            description: "find image maximum",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "input image"),
                arg("out", RO, types::double_type(), "maximum value"),
                arg("x", OO, int_t, "horizontal position of maximum"),
                arg("y", OO, int_t, "vertical position of maximum"),
            ],
            execute: max_exec,
        },
        OperationDef {
            name: "draw_rect",
            description: "paint a rectangle on an image",
            flags: 0,
            args: vec![
                arg(
                    "image",
                    RI.with(ArgumentFlags::MODIFY),
                    image_t,
                    "image to draw on",
                ),
                arg("ink", RI, double_array_t, "color for pixels"),
                arg("left", RI, int_t, "rectangle left edge"),
                arg("top", RI, int_t, "rectangle top edge"),
                arg("width", RI, int_t, "rectangle width"),
                arg("height", RI, int_t, "rectangle height"),
                arg("fill", OI, bool_t, "draw a solid rectangle"),
            ],
            execute: draw_rect_exec,
        },
        OperationDef {
            name: "copy",
            description: "copy an image",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "input image"),
                arg("page-height", OI, int_t, "set page height metadata"),
                arg("out", RO, image_t, "output image"),
            ],
            execute: copy_exec,
        },
        OperationDef {
            name: "bufload",
            description: "load an image from a memory buffer",
            flags: 0,
            args: vec![
                arg("buffer", RI, blob_t, "buffer to load from"),
                arg("width", RI, int_t, "image width in pixels"),
                arg("height", RI, int_t, "image height in pixels"),
                arg("bands", OI, int_t, "number of bands"),
                arg("out", RO, image_t, "output image"),
            ],
            execute: bufload_exec,
        },
        OperationDef {
            name: "bufsave",
            description: "save an image to a memory buffer",
            flags: 0,
            args: vec![
                arg("in", RI, image_t, "image to save"),
                arg("buffer", RO, blob_t, "buffer to save to"),
            ],
            execute: bufsave_exec,
        },
    ];

    let registry = DashMap::with_capacity(defs.len());
    for def in defs {
        registry.insert(def.name, Arc::new(def));
    }
    registry
}
