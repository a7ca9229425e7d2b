//! Block encoding helpers
//!
//! Node blocks and the file header are laid out by hand with explicit offsets.
//! The cursors in this module keep that arithmetic in one place: every field
//! is little-endian, and reading past the end of a block is reported as
//! corrupt data instead of panicking.

pub mod cursor;

pub use cursor::{BlockReader, BlockWriter};
