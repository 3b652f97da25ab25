//! Process-wide runtime error buffer.
//!
//! The runtime reports failures through a single shared slot, like classic
//! C libraries: operations append text and return a failure marker, and
//! whoever surfaces the failure drains the slot read-then-clear. Later
//! failures overwrite earlier text, so the drain must happen immediately.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

static BUFFER: Lazy<Mutex<String>> = Lazy::new(|| Mutex::new(String::new()));

/// Marker for a failed runtime call; the text lives in the error buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineError;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Append a line to the error buffer.
pub fn set(message: impl AsRef<str>) {
    let mut buffer = BUFFER.lock();
    if !buffer.is_empty() {
        buffer.push('\n');
    }
    buffer.push_str(message.as_ref());
}

/// Append a message and return the failure marker in one step.
pub fn fail<T>(message: impl AsRef<str>) -> EngineResult<T> {
    set(message);
    Err(EngineError)
}

/// Drain the buffer: return its contents and clear it.
pub fn take() -> String {
    std::mem::take(&mut *BUFFER.lock())
}

/// Clear the buffer without reading it.
pub fn clear() {
    BUFFER.lock().clear();
}
