//! Token value types and the session snapshot shared across components.

pub mod access;
pub mod secret;
pub mod session;

pub use access::*;
pub use secret::*;
pub use session::*;
