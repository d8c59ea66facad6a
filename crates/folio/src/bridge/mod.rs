//! Bridges between the preview pipeline and the outside world.
//!
//! - `http` - browser-backed renderer, editor API and the session loop

pub mod http;
