// model = "claude-opus-4-5"
// created = "2026-01-30"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! Operations and the bookkeeping primitives they are identified and
//! tracked by.

pub mod op;
pub mod primitives;
