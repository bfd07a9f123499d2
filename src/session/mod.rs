//! HTTP sessions: the live-session store and the request router over it.

mod router;
mod store;

pub use router::{router, SessionRouter, INVALID_OR_MISSING_SESSION, NO_VALID_SESSION};
pub use store::{Session, SessionStore};
