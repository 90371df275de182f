//! Data structures shared by the resolver and the capture loops.
mod session;

pub use session::*;
