//! Per-principal sessions over a locally mirrored snapshot.

pub mod manager;
mod refresh;
pub mod scope;
#[allow(clippy::module_inception)]
pub mod session;


pub use manager::{Login, SessionManager};
pub use scope::scope_key;
pub use session::{Session, SessionState};
