//! Public entry points for foreign function interfaces.
//!
//! Handles are registry ids disguised as `void*`; they are never
//! dereferenced. Strings returned to callers go through [`strings`] so that
//! `singbox_free_string` only ever frees what this crate allocated.

pub mod ffi;
pub mod strings;
