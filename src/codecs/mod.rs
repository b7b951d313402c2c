//! Ready-made codecs.
//!
//! The framework itself is wire-format agnostic; this module carries the
//! codecs shipped with the crate.
//!
//! - `line`: CRLF-or-LF delimited UTF-8 lines (used by the demo binary and
//!   the test suite)

pub mod line;
