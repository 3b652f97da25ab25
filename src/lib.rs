//! opix: call-by-name dispatch over an introspectable imaging runtime.
//!
//! The runtime exposes a catalogue of operations, each declaring its
//! parameters through a walkable argument table. This crate makes every
//! one of them callable from one generic entry point, with no
//! per-operation wrapper code. Three pieces do the work:
//!
//! - the tagged-value bridge ([`TaggedValue`]): typed conversion between
//!   host [`Value`]s and runtime payloads, with explicit ownership of
//!   arrays, reference-counted objects and blobs;
//! - the schema introspector ([`schema::get_schema`]): discovers an
//!   operation's argument contract at run time, once, and caches it;
//! - the dispatcher ([`call`]): binds host arguments to parameters,
//!   promotes bare constants to images, copies in-place arguments,
//!   executes, and extracts declared outputs.
//!
//! [`Image`] wraps runtime objects in RAII handles and layers
//! method-style sugar over the dispatcher:
//!
//! ```
//! let a = opix::Image::black(10, 10)?;
//! let sum = a.add(&a)?;
//! assert_eq!(sum.getpoint(0, 0)?, vec![0.0]);
//! # Ok::<(), opix::Error>(())
//! ```

pub mod bridge;
pub mod dispatch;
pub mod doc;
pub mod engine;
pub mod errors;
pub mod image;
pub mod lifetime;
pub mod logging;
pub mod schema;

pub use bridge::registry::{type_find, type_name};
pub use bridge::tagged::TaggedValue;
pub use bridge::value::Value;
pub use dispatch::{
    cache_drop_all, cache_set_max, call, call_full, AggregateResult, CallReturn,
};
pub use engine::types::{ArgumentFlags, Fundamental, TypeTag};
pub use errors::{Error, ErrorKind, Result};
pub use image::{EvalPhase, Image, Progress};
pub use lifetime::TrackedBuffer;
pub use logging::{init_logging, LogConfig, LogFormat, LogOutput};
pub use schema::{get_schema, ArgumentSpec, OperationSchema};
