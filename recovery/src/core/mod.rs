//! Deterministic, pure logic of the recovery pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests. The
//! one exception is the read-only file read used to render an import patch
//! stub in [`decision`].

pub mod decision;
pub mod doctor;
pub mod doctor_state;
pub mod evidence;
pub mod gaps;
pub mod patch;
pub mod strategy;
pub mod types;
