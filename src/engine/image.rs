//! Image storage and evaluation kernels.
//!
//! Pixels are band-interleaved f64, either runtime-owned or borrowed from
//! a host byte buffer. Kernels operate on snapshots (see `heap::snapshot`)
//! so no heap lock is held while they run; larger images are evaluated in
//! row strips, in parallel above a size threshold, with a progress
//! callback and a kill switch checked between strips.

use super::error::{fail, EngineResult};
use super::heap::ObjectId;
use super::payload::Payload;
use super::types::TypeTag;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Values below this many elements are evaluated on the calling thread.
const PARALLEL_THRESHOLD: usize = 1 << 16;

/// Number of strips an evaluation is sliced into.
const EVAL_STRIPS: usize = 16;

/// Numeric storage format of one band element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandFormat {
    UChar,
    Char,
    UShort,
    Short,
    UInt,
    Int,
    Float,
    Double,
}

impl BandFormat {
    pub fn from_value(value: i32) -> Option<BandFormat> {
        match value {
            0 => Some(BandFormat::UChar),
            1 => Some(BandFormat::Char),
            2 => Some(BandFormat::UShort),
            3 => Some(BandFormat::Short),
            4 => Some(BandFormat::UInt),
            5 => Some(BandFormat::Int),
            6 => Some(BandFormat::Float),
            7 => Some(BandFormat::Double),
            _ => None,
        }
    }

    pub fn value(self) -> i32 {
        match self {
            BandFormat::UChar => 0,
            BandFormat::Char => 1,
            BandFormat::UShort => 2,
            BandFormat::Short => 3,
            BandFormat::UInt => 4,
            BandFormat::Int => 5,
            BandFormat::Float => 6,
            BandFormat::Double => 7,
        }
    }

    pub fn nick(self) -> &'static str {
        match self {
            BandFormat::UChar => "uchar",
            BandFormat::Char => "char",
            BandFormat::UShort => "ushort",
            BandFormat::Short => "short",
            BandFormat::UInt => "uint",
            BandFormat::Int => "int",
            BandFormat::Float => "float",
            BandFormat::Double => "double",
        }
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, BandFormat::UChar | BandFormat::UShort | BandFormat::UInt)
    }

    pub fn is_float(self) -> bool {
        matches!(self, BandFormat::Float | BandFormat::Double)
    }

    /// Largest representable band value.
    pub fn max(self) -> f64 {
        match self {
            BandFormat::UChar => 255.0,
            BandFormat::Char => 127.0,
            BandFormat::UShort => 65535.0,
            BandFormat::Short => 32767.0,
            BandFormat::UInt => u32::MAX as f64,
            BandFormat::Int => i32::MAX as f64,
            BandFormat::Float | BandFormat::Double => 1.0,
        }
    }

    fn min(self) -> f64 {
        match self {
            BandFormat::UChar | BandFormat::UShort | BandFormat::UInt => 0.0,
            BandFormat::Char => -128.0,
            BandFormat::Short => -32768.0,
            BandFormat::Int => i32::MIN as f64,
            BandFormat::Float | BandFormat::Double => f64::NEG_INFINITY,
        }
    }

    /// Bring a value into this format's representable range.
    pub fn clamp(self, value: f64) -> f64 {
        match self {
            BandFormat::Double => value,
            BandFormat::Float => value as f32 as f64,
            _ => value.round().clamp(self.min(), self.max()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extend {
    Black,
    Copy,
    White,
    Background,
}

impl Extend {
    pub fn from_value(value: i32) -> Option<Extend> {
        match value {
            0 => Some(Extend::Black),
            1 => Some(Extend::Copy),
            2 => Some(Extend::White),
            3 => Some(Extend::Background),
            _ => None,
        }
    }
}

/// Pixel storage: runtime-owned values or a borrowed host byte buffer.
#[derive(Debug, Clone)]
pub enum Pixels {
    Owned(Arc<Vec<f64>>),
    Borrowed(Arc<[u8]>),
}

impl Pixels {
    pub fn owned(values: Vec<f64>) -> Pixels {
        Pixels::Owned(Arc::new(values))
    }

    pub fn len(&self) -> usize {
        match self {
            Pixels::Owned(values) => values.len(),
            Pixels::Borrowed(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, index: usize) -> f64 {
        match self {
            Pixels::Owned(values) => values[index],
            Pixels::Borrowed(bytes) => bytes[index] as f64,
        }
    }

    /// Materialize as runtime-owned values.
    pub fn to_owned_vec(&self) -> Vec<f64> {
        match self {
            Pixels::Owned(values) => values.as_ref().clone(),
            Pixels::Borrowed(bytes) => bytes.iter().map(|b| *b as f64).collect(),
        }
    }

    /// Mutable access, converting borrowed storage to owned and unsharing
    /// snapshot-shared storage first.
    pub fn as_mut_vec(&mut self) -> &mut Vec<f64> {
        if let Pixels::Borrowed(_) = self {
            *self = Pixels::owned(self.to_owned_vec());
        }
        match self {
            Pixels::Owned(values) => Arc::make_mut(values),
            Pixels::Borrowed(_) => unreachable!("borrowed storage was just converted"),
        }
    }
}

/// One image: header, pixels and named metadata.
///
/// Metadata holds non-object payloads only; the restriction keeps
/// duplication free of reference-count traffic while a heap lock is held.
#[derive(Debug)]
pub struct ImageData {
    pub width: i32,
    pub height: i32,
    pub bands: i32,
    pub format: BandFormat,
    pub pixels: Pixels,
    pub meta: HashMap<String, (TypeTag, Payload)>,
}

impl ImageData {
    pub fn new_owned(
        width: i32,
        height: i32,
        bands: i32,
        format: BandFormat,
        values: Vec<f64>,
    ) -> ImageData {
        debug_assert_eq!(values.len(), (width * height * bands) as usize);
        ImageData {
            width,
            height,
            bands,
            format,
            pixels: Pixels::owned(values),
            meta: HashMap::new(),
        }
    }

    pub fn filled(width: i32, height: i32, bands: i32, format: BandFormat, value: f64) -> ImageData {
        let len = (width * height * bands) as usize;
        ImageData::new_owned(width, height, bands, format, vec![value; len])
    }

    /// Total band values (width * height * bands).
    pub fn values_len(&self) -> usize {
        (self.width * self.height * self.bands) as usize
    }

    #[inline]
    pub fn at(&self, x: i32, y: i32, band: i32) -> f64 {
        self.pixels
            .get(((y * self.width + x) * self.bands + band) as usize)
    }

    /// Cheap copy: pixel storage shared, metadata duplicated.
    pub fn snapshot(&self) -> ImageData {
        ImageData {
            width: self.width,
            height: self.height,
            bands: self.bands,
            format: self.format,
            pixels: self.pixels.clone(),
            meta: self
                .meta
                .iter()
                .map(|(k, (tag, payload))| (k.clone(), (*tag, payload.duplicate())))
                .collect(),
        }
    }

    /// Deep, independent copy with its own pixel storage.
    pub fn duplicate(&self) -> ImageData {
        let mut copy = self.snapshot();
        copy.pixels = Pixels::owned(self.pixels.to_owned_vec());
        copy
    }
}

// ---------------------------------------------------------------------------
// progress and cancellation

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalPhase {
    Pre,
    Eval,
    Post,
}

/// Evaluation progress, reported between strips.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub phase: EvalPhase,
    pub percent: i32,
    /// Band values the evaluation will touch in total.
    pub total: u64,
    /// Band values processed so far.
    pub processed: u64,
}

pub type ProgressFn = Box<dyn FnMut(&Progress) + Send>;

/// Per-object evaluation side channel: a progress handler and a kill
/// switch that may be flipped from the handler, or from any thread,
/// concurrently with evaluation.
pub struct EvalControl {
    kill: AtomicBool,
    handler: Mutex<Option<ProgressFn>>,
}

impl EvalControl {
    fn new(handler: ProgressFn) -> EvalControl {
        EvalControl {
            kill: AtomicBool::new(false),
            handler: Mutex::new(Some(handler)),
        }
    }

    pub fn set_kill(&self, flag: bool) {
        self.kill.store(flag, Ordering::SeqCst);
    }

    pub fn killed(&self) -> bool {
        self.kill.load(Ordering::SeqCst)
    }

    fn notify(&self, progress: &Progress) {
        if let Some(handler) = self.handler.lock().as_mut() {
            handler(progress);
        }
    }
}

static EVAL: Lazy<DashMap<ObjectId, Arc<EvalControl>>> = Lazy::new(DashMap::new);

/// Install a progress handler on an object.
pub fn set_progress_handler(id: ObjectId, handler: ProgressFn) {
    EVAL.insert(id, Arc::new(EvalControl::new(handler)));
}

/// Evaluation side channel for an object, if one is installed.
pub fn eval_control(id: ObjectId) -> Option<Arc<EvalControl>> {
    EVAL.get(&id).map(|ctrl| Arc::clone(ctrl.value()))
}

/// Flip the kill switch on an object's evaluations.
pub fn set_kill(id: ObjectId, flag: bool) {
    if let Some(ctrl) = EVAL.get(&id) {
        ctrl.set_kill(flag);
    }
}

/// Drop the side channel; called when the object is destroyed.
pub fn clear_eval(id: ObjectId) {
    EVAL.remove(&id);
}

/// Drive an evaluation strip by strip, reporting progress and honoring
/// the kill switch between strips.
fn walk_strips(
    ctrl: Option<&EvalControl>,
    height: usize,
    total: u64,
    mut strip: impl FnMut(Range<usize>),
) -> EngineResult<()> {
    let rows_per_strip = height.div_ceil(EVAL_STRIPS).max(1);
    let values_per_row = if height == 0 { 0 } else { total / height as u64 };

    if let Some(ctrl) = ctrl {
        ctrl.notify(&Progress {
            phase: EvalPhase::Pre,
            percent: 0,
            total,
            processed: 0,
        });
    }

    let mut row = 0usize;
    while row < height {
        if let Some(ctrl) = ctrl {
            if ctrl.killed() {
                return fail("evaluation killed");
            }
        }
        let end = (row + rows_per_strip).min(height);
        strip(row..end);
        row = end;
        if let Some(ctrl) = ctrl {
            let processed = row as u64 * values_per_row;
            ctrl.notify(&Progress {
                phase: EvalPhase::Eval,
                percent: if total == 0 { 100 } else { (processed * 100 / total) as i32 },
                total,
                processed,
            });
        }
    }

    if let Some(ctrl) = ctrl {
        if ctrl.killed() {
            return fail("evaluation killed");
        }
        ctrl.notify(&Progress {
            phase: EvalPhase::Post,
            percent: 100,
            total,
            processed: total,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// constructors

pub fn black(width: i32, height: i32, bands: i32) -> EngineResult<ImageData> {
    if width <= 0 || height <= 0 || bands <= 0 {
        return fail(format!(
            "black: bad dimensions {}x{} bands {}",
            width, height, bands
        ));
    }
    Ok(ImageData::filled(width, height, bands, BandFormat::UChar, 0.0))
}

pub fn from_matrix(width: i32, height: i32, values: &[f64]) -> EngineResult<ImageData> {
    if width <= 0 || height <= 0 || values.len() != (width * height) as usize {
        return fail("matrix: array does not match dimensions");
    }
    Ok(ImageData::new_owned(
        width,
        height,
        1,
        BandFormat::Double,
        values.to_vec(),
    ))
}

pub fn from_bytes(bytes: &[u8], width: i32, height: i32, bands: i32) -> EngineResult<ImageData> {
    if width <= 0 || height <= 0 || bands <= 0 {
        return fail("from_bytes: bad dimensions");
    }
    if bytes.len() != (width * height * bands) as usize {
        return fail(format!(
            "from_bytes: {} bytes do not fill {}x{} with {} bands",
            bytes.len(),
            width,
            height,
            bands
        ));
    }
    Ok(ImageData::new_owned(
        width,
        height,
        bands,
        BandFormat::UChar,
        bytes.iter().map(|b| *b as f64).collect(),
    ))
}

/// Wrap a host byte buffer without copying. The caller keeps the buffer
/// alive; lifetime tracking makes that contract explicit.
pub fn borrowed_from_bytes(
    bytes: Arc<[u8]>,
    width: i32,
    height: i32,
    bands: i32,
) -> EngineResult<ImageData> {
    if width <= 0 || height <= 0 || bands <= 0 {
        return fail("borrowed_from_bytes: bad dimensions");
    }
    if bytes.len() != (width * height * bands) as usize {
        return fail("borrowed_from_bytes: buffer does not match dimensions");
    }
    Ok(ImageData {
        width,
        height,
        bands,
        format: BandFormat::UChar,
        pixels: Pixels::Borrowed(bytes),
        meta: HashMap::new(),
    })
}

pub fn to_bytes(image: &ImageData) -> Vec<u8> {
    (0..image.values_len())
        .map(|i| image.pixels.get(i).round().clamp(0.0, 255.0) as u8)
        .collect()
}

// ---------------------------------------------------------------------------
// kernels

/// Deep copy walked strip by strip, so progress and kill apply.
pub fn copy(image: &ImageData, ctrl: Option<&EvalControl>) -> EngineResult<ImageData> {
    let len = image.values_len();
    let row = (image.width * image.bands) as usize;
    let mut out = vec![0.0f64; len];
    walk_strips(ctrl, image.height as usize, len as u64, |rows| {
        for index in rows.start * row..rows.end * row {
            out[index] = image.pixels.get(index);
        }
    })?;
    let mut copy = image.snapshot();
    copy.pixels = Pixels::owned(out);
    Ok(copy)
}

pub fn elementwise(
    left: &ImageData,
    right: &ImageData,
    ctrl: Option<&EvalControl>,
    op: fn(f64, f64) -> f64,
) -> EngineResult<ImageData> {
    if left.width != right.width || left.height != right.height || left.bands != right.bands {
        return fail(format!(
            "elementwise: images do not match, {}x{}x{} vs {}x{}x{}",
            left.width, left.height, left.bands, right.width, right.height, right.bands
        ));
    }
    let len = left.values_len();
    let row = (left.width * left.bands) as usize;
    let mut out = vec![0.0f64; len];
    walk_strips(ctrl, left.height as usize, len as u64, |rows| {
        let span = rows.start * row..rows.end * row;
        if span.len() >= PARALLEL_THRESHOLD {
            let base = span.start;
            out[span].par_chunks_mut(row).enumerate().for_each(|(i, chunk)| {
                let start = base + i * row;
                for (j, value) in chunk.iter_mut().enumerate() {
                    *value = op(left.pixels.get(start + j), right.pixels.get(start + j));
                }
            });
        } else {
            for index in span {
                out[index] = op(left.pixels.get(index), right.pixels.get(index));
            }
        }
    })?;
    Ok(ImageData::new_owned(
        left.width,
        left.height,
        left.bands,
        BandFormat::Double,
        out,
    ))
}

/// Per-band `a * x + b`. One-band images and one-element coefficient
/// arrays are broadcast to the widest band count involved.
pub fn linear(
    image: &ImageData,
    a: &[f64],
    b: &[f64],
    ctrl: Option<&EvalControl>,
) -> EngineResult<ImageData> {
    if a.is_empty() || b.is_empty() {
        return fail("linear: empty coefficient array");
    }
    let bands = image.bands as usize;
    let out_bands = bands.max(a.len()).max(b.len());
    let broadcastable = |n: usize| n == 1 || n == out_bands;
    if !broadcastable(bands) || !broadcastable(a.len()) || !broadcastable(b.len()) {
        return fail(format!(
            "linear: cannot broadcast {} bands with {} and {} coefficients",
            bands,
            a.len(),
            b.len()
        ));
    }

    let width = image.width as usize;
    let height = image.height as usize;
    let len = width * height * out_bands;
    let row = width * out_bands;
    let mut out = vec![0.0f64; len];
    walk_strips(ctrl, height, len as u64, |rows| {
        for y in rows {
            for x in 0..width {
                for band in 0..out_bands {
                    let source = image
                        .pixels
                        .get((y * width + x) * bands + if bands == 1 { 0 } else { band });
                    let mul = a[if a.len() == 1 { 0 } else { band }];
                    let add = b[if b.len() == 1 { 0 } else { band }];
                    out[y * row + x * out_bands + band] = mul * source + add;
                }
            }
        }
    })?;
    Ok(ImageData::new_owned(
        image.width,
        image.height,
        out_bands as i32,
        BandFormat::Double,
        out,
    ))
}

/// Photographic negative: `max - x` for unsigned formats, `-x` otherwise.
pub fn invert(image: &ImageData, ctrl: Option<&EvalControl>) -> EngineResult<ImageData> {
    let len = image.values_len();
    let row = (image.width * image.bands) as usize;
    let top = image.format.max();
    let unsigned = image.format.is_unsigned();
    let mut out = vec![0.0f64; len];
    walk_strips(ctrl, image.height as usize, len as u64, |rows| {
        for index in rows.start * row..rows.end * row {
            let value = image.pixels.get(index);
            out[index] = if unsigned { top - value } else { -value };
        }
    })?;
    Ok(ImageData::new_owned(
        image.width,
        image.height,
        image.bands,
        image.format,
        out,
    ))
}

pub fn cast(image: &ImageData, format: BandFormat) -> EngineResult<ImageData> {
    let values = (0..image.values_len())
        .map(|i| format.clamp(image.pixels.get(i)))
        .collect();
    Ok(ImageData::new_owned(
        image.width,
        image.height,
        image.bands,
        format,
        values,
    ))
}

pub fn embed(
    image: &ImageData,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    extend: Extend,
    background: &[f64],
) -> EngineResult<ImageData> {
    if width <= 0 || height <= 0 {
        return fail("embed: bad dimensions");
    }
    let bands = image.bands;
    let mut out = vec![0.0f64; (width * height * bands) as usize];
    for oy in 0..height {
        for ox in 0..width {
            let sx = ox - x;
            let sy = oy - y;
            let inside = sx >= 0 && sx < image.width && sy >= 0 && sy < image.height;
            for band in 0..bands {
                let value = if inside {
                    image.at(sx, sy, band)
                } else {
                    match extend {
                        Extend::Black => 0.0,
                        Extend::White => image.format.max(),
                        Extend::Background => {
                            if background.is_empty() {
                                0.0
                            } else {
                                background[band as usize % background.len()]
                            }
                        }
                        Extend::Copy => image.at(
                            sx.clamp(0, image.width - 1),
                            sy.clamp(0, image.height - 1),
                            band,
                        ),
                    }
                };
                out[((oy * width + ox) * bands + band) as usize] = value;
            }
        }
    }
    Ok(ImageData::new_owned(width, height, bands, image.format, out))
}

pub fn flip(image: &ImageData, horizontal: bool) -> EngineResult<ImageData> {
    let (w, h, bands) = (image.width, image.height, image.bands);
    let mut out = vec![0.0f64; image.values_len()];
    for y in 0..h {
        for x in 0..w {
            let (sx, sy) = if horizontal { (w - 1 - x, y) } else { (x, h - 1 - y) };
            for band in 0..bands {
                out[((y * w + x) * bands + band) as usize] = image.at(sx, sy, band);
            }
        }
    }
    Ok(ImageData::new_owned(w, h, bands, image.format, out))
}

/// Rotate by a fixed multiple of 90 degrees, clockwise.
pub fn rot(image: &ImageData, quarter_turns: i32) -> EngineResult<ImageData> {
    let (w, h, bands) = (image.width, image.height, image.bands);
    let (ow, oh) = if quarter_turns % 2 == 0 { (w, h) } else { (h, w) };
    let mut out = vec![0.0f64; image.values_len()];
    for y in 0..oh {
        for x in 0..ow {
            let (sx, sy) = match quarter_turns.rem_euclid(4) {
                0 => (x, y),
                1 => (y, h - 1 - x),
                2 => (w - 1 - x, h - 1 - y),
                _ => (w - 1 - y, x),
            };
            for band in 0..bands {
                out[((y * ow + x) * bands + band) as usize] = image.at(sx, sy, band);
            }
        }
    }
    Ok(ImageData::new_owned(ow, oh, bands, image.format, out))
}

pub fn extract_band(image: &ImageData, band: i32, n: i32) -> EngineResult<ImageData> {
    if band < 0 || n <= 0 || band + n > image.bands {
        return fail(format!(
            "extract_band: bands {}..{} out of range for {}-band image",
            band,
            band + n,
            image.bands
        ));
    }
    let mut out = Vec::with_capacity((image.width * image.height * n) as usize);
    for y in 0..image.height {
        for x in 0..image.width {
            for b in band..band + n {
                out.push(image.at(x, y, b));
            }
        }
    }
    Ok(ImageData::new_owned(
        image.width,
        image.height,
        n,
        image.format,
        out,
    ))
}

pub fn bandjoin(images: &[ImageData]) -> EngineResult<ImageData> {
    let Some(first) = images.first() else {
        return fail("bandjoin: no input images");
    };
    if images
        .iter()
        .any(|i| i.width != first.width || i.height != first.height)
    {
        return fail("bandjoin: images do not match in size");
    }
    let bands: i32 = images.iter().map(|i| i.bands).sum();
    let mut out = Vec::with_capacity((first.width * first.height * bands) as usize);
    for y in 0..first.height {
        for x in 0..first.width {
            for image in images {
                for band in 0..image.bands {
                    out.push(image.at(x, y, band));
                }
            }
        }
    }
    Ok(ImageData::new_owned(
        first.width,
        first.height,
        bands,
        first.format,
        out,
    ))
}

pub fn getpoint(image: &ImageData, x: i32, y: i32) -> EngineResult<Vec<f64>> {
    if x < 0 || x >= image.width || y < 0 || y >= image.height {
        return fail(format!(
            "getpoint: ({}, {}) outside {}x{}",
            x, y, image.width, image.height
        ));
    }
    Ok((0..image.bands).map(|band| image.at(x, y, band)).collect())
}

pub fn avg(image: &ImageData, ctrl: Option<&EvalControl>) -> EngineResult<f64> {
    let len = image.values_len();
    if len == 0 {
        return fail("avg: empty image");
    }
    let row = (image.width * image.bands) as usize;
    let mut sum = 0.0f64;
    walk_strips(ctrl, image.height as usize, len as u64, |rows| {
        for index in rows.start * row..rows.end * row {
            sum += image.pixels.get(index);
        }
    })?;
    Ok(sum / len as f64)
}

/// Extremes and the pixel coordinates of their first occurrence.
pub fn minmax(image: &ImageData) -> EngineResult<(f64, i32, i32, f64, i32, i32)> {
    if image.values_len() == 0 {
        return fail("minmax: empty image");
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (0, 0, 0, 0);
    for y in 0..image.height {
        for x in 0..image.width {
            for band in 0..image.bands {
                let value = image.at(x, y, band);
                if value < min {
                    min = value;
                    min_x = x;
                    min_y = y;
                }
                if value > max {
                    max = value;
                    max_x = x;
                    max_y = y;
                }
            }
        }
    }
    Ok((min, min_x, min_y, max, max_x, max_y))
}

/// Paint a rectangle, in place.
pub fn draw_rect(
    image: &mut ImageData,
    ink: &[f64],
    left: i32,
    top: i32,
    width: i32,
    height: i32,
    fill: bool,
) -> EngineResult<()> {
    if ink.is_empty() || (ink.len() != 1 && ink.len() != image.bands as usize) {
        return fail(format!(
            "draw_rect: {} ink values for {}-band image",
            ink.len(),
            image.bands
        ));
    }
    if width <= 0 || height <= 0 {
        return fail("draw_rect: bad rectangle");
    }
    let (iw, ih, bands, format) = (image.width, image.height, image.bands, image.format);
    let values = image.pixels.as_mut_vec();
    for y in top.max(0)..(top + height).min(ih) {
        for x in left.max(0)..(left + width).min(iw) {
            let border = y == top || y == top + height - 1 || x == left || x == left + width - 1;
            if !fill && !border {
                continue;
            }
            for band in 0..bands {
                let value = format.clamp(ink[if ink.len() == 1 { 0 } else { band as usize }]);
                values[((y * iw + x) * bands + band) as usize] = value;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: i32, height: i32) -> ImageData {
        let values = (0..width * height).map(|i| i as f64).collect();
        ImageData::new_owned(width, height, 1, BandFormat::Double, values)
    }

    #[test]
    fn test_black_is_zero_filled() {
        let image = black(4, 3, 2).unwrap();
        assert_eq!(image.values_len(), 24);
        assert_eq!(image.at(3, 2, 1), 0.0);
        assert_eq!(image.format, BandFormat::UChar);
    }

    #[test]
    fn test_black_rejects_bad_dimensions() {
        assert!(black(0, 3, 1).is_err());
        crate::engine::error::clear();
    }

    #[test]
    fn test_elementwise_add() {
        let a = ramp(3, 2);
        let b = ramp(3, 2);
        let sum = elementwise(&a, &b, None, |x, y| x + y).unwrap();
        assert_eq!(sum.at(2, 1, 0), 10.0);
    }

    #[test]
    fn test_elementwise_shape_mismatch() {
        let a = ramp(3, 2);
        let b = ramp(2, 3);
        assert!(elementwise(&a, &b, None, |x, y| x + y).is_err());
        crate::engine::error::clear();
    }

    #[test]
    fn test_linear_broadcasts_one_band() {
        let image = ramp(2, 1);
        let out = linear(&image, &[1.0, 2.0, 3.0], &[0.0], None).unwrap();
        assert_eq!(out.bands, 3);
        // pixel (1, 0) has source value 1.0
        assert_eq!(out.at(1, 0, 0), 1.0);
        assert_eq!(out.at(1, 0, 1), 2.0);
        assert_eq!(out.at(1, 0, 2), 3.0);
    }

    #[test]
    fn test_invert_uchar() {
        let image = cast(&ramp(2, 1), BandFormat::UChar).unwrap();
        let out = invert(&image, None).unwrap();
        assert_eq!(out.at(0, 0, 0), 255.0);
        assert_eq!(out.at(1, 0, 0), 254.0);
    }

    #[test]
    fn test_embed_copy_extends_edges() {
        let one = ImageData::filled(1, 1, 1, BandFormat::UChar, 7.0);
        let out = embed(&one, 0, 0, 3, 3, Extend::Copy, &[]).unwrap();
        assert_eq!(out.at(2, 2, 0), 7.0);
    }

    #[test]
    fn test_embed_background() {
        let one = ImageData::filled(1, 1, 1, BandFormat::UChar, 7.0);
        let out = embed(&one, 1, 1, 3, 3, Extend::Background, &[9.0]).unwrap();
        assert_eq!(out.at(0, 0, 0), 9.0);
        assert_eq!(out.at(1, 1, 0), 7.0);
    }

    #[test]
    fn test_rot90_dimensions_and_content() {
        let image = ramp(3, 2); // values 0..6, row-major
        let out = rot(&image, 1).unwrap();
        assert_eq!((out.width, out.height), (2, 3));
        // clockwise: top-right of the rotation is the original top-left
        assert_eq!(out.at(1, 0, 0), image.at(0, 0, 0));
        // bottom-left of the rotation is the original bottom-right
        assert_eq!(out.at(0, 2, 0), image.at(2, 1, 0));
    }

    #[test]
    fn test_flip_horizontal() {
        let image = ramp(3, 1);
        let out = flip(&image, true).unwrap();
        assert_eq!(out.at(0, 0, 0), 2.0);
        assert_eq!(out.at(2, 0, 0), 0.0);
    }

    #[test]
    fn test_bandjoin_and_extract() {
        let a = ramp(2, 2);
        let b = ramp(2, 2);
        let joined = bandjoin(&[a, b]).unwrap();
        assert_eq!(joined.bands, 2);
        let second = extract_band(&joined, 1, 1).unwrap();
        assert_eq!(second.at(1, 1, 0), 3.0);
    }

    #[test]
    fn test_minmax_positions() {
        let mut image = ramp(3, 3);
        image.pixels.as_mut_vec()[4] = -5.0; // (1, 1)
        let (min, min_x, min_y, max, max_x, max_y) = minmax(&image).unwrap();
        assert_eq!((min, min_x, min_y), (-5.0, 1, 1));
        assert_eq!((max, max_x, max_y), (8.0, 2, 2));
    }

    #[test]
    fn test_draw_rect_outline_only() {
        let mut image = ImageData::filled(4, 4, 1, BandFormat::UChar, 0.0);
        draw_rect(&mut image, &[9.0], 0, 0, 4, 4, false).unwrap();
        assert_eq!(image.at(0, 0, 0), 9.0);
        assert_eq!(image.at(1, 1, 0), 0.0);
    }

    #[test]
    fn test_walk_strips_kill() {
        let ctrl = EvalControl::new(Box::new(|_| {}));
        ctrl.set_kill(true);
        let result = walk_strips(Some(&ctrl), 10, 10, |_| {});
        assert!(result.is_err());
        crate::engine::error::clear();
    }

    #[test]
    fn test_walk_strips_progress_phases() {
        use std::sync::atomic::{AtomicI32, Ordering};
        use std::sync::Arc as StdArc;

        let first = StdArc::new(AtomicI32::new(-1));
        let last = StdArc::new(AtomicI32::new(-1));
        let (f, l) = (first.clone(), last.clone());
        let ctrl = EvalControl::new(Box::new(move |p: &Progress| {
            if p.phase == EvalPhase::Pre {
                f.store(p.percent, Ordering::SeqCst);
            }
            if p.phase == EvalPhase::Post {
                l.store(p.percent, Ordering::SeqCst);
            }
        }));
        walk_strips(Some(&ctrl), 64, 64, |_| {}).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(last.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_cast_clamps() {
        let image = ImageData::new_owned(2, 1, 1, BandFormat::Double, vec![-3.0, 300.0]);
        let out = cast(&image, BandFormat::UChar).unwrap();
        assert_eq!(out.at(0, 0, 0), 0.0);
        assert_eq!(out.at(1, 0, 0), 255.0);
    }
}
