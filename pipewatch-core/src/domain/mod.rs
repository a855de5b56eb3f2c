//! Core domain types
//!
//! Typed views over the backend's resource documents. Absence is modelled
//! with `Option` so that a resource which has not reported any status yet
//! can never be mistaken for a finished one.

pub mod condition;
pub mod diagnostics;
pub mod lifecycle;
pub mod resource;
pub mod step;
