//! Boxoffice Shared Types
//!
//! This crate provides types shared between:
//! - the boxoffice server
//! - offline test suites and tooling
//!
//! Everything here is plain data: money amounts, seat labels, and the
//! broadcast payloads that cross the wire. No I/O, no store handles.

pub mod label;
pub mod money;

pub use label::*;
pub use money::*;
