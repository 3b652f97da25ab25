//! The imaging runtime.
//!
//! Everything under this module is the "foreign" side of the call
//! boundary: the type table, the refcounted object heap, the operation
//! catalogue with its walkable argument tables, transient operation
//! instances and the process-wide error buffer. The bridge, schema and
//! dispatch layers consume only the public surface here; nothing above
//! this module reaches into kernels or pixel storage directly.

pub mod error;
pub mod heap;
pub mod image;
pub mod instance;
pub mod ops;
pub mod payload;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use instance::Instance;
