//! Error handling for tmpl_mv

// Fatal errors from any stage (pattern, template, walk, collision) flow into this with type coercions.
// Per-file failures never reach it; they are recorded in `apply::Outcome` instead.
pub type Result<T> = core::result::Result<T, Error>;
pub type Error = Box<dyn std::error::Error>;
