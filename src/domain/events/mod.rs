//! Log event model: types, validation, fingerprinting, queue encoding.

pub mod encoding;
pub mod fingerprint;
pub mod types;
pub mod validate;

pub use encoding::{EncodeError, QueuedEvent, decode, encode};
pub use fingerprint::error_fingerprint;
pub use types::{Importance, LogEvent, LogLevel, LogType, StoredLogEvent};
pub use validate::{ValidationError, validate_event};
