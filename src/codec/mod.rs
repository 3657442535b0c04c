// src/codec/mod.rs
//! Wire-level primitives shared by the reader and the writer
//!
//! - **varint**: 7-bit continuation integers, fixed-width floats, booleans and text
//! - **offset**: bounded cursor over one length-prefixed record

pub mod offset;
pub mod varint;

pub use offset::Offset;
