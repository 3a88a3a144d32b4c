//! Request authentication: credential gate middleware and context.

mod context;
mod middleware;

pub use context::AuthContext;
pub use middleware::{GateState, require_credential};
