//! Core types and service wiring for the zeromonos waste collection booking engine.

/// Time and token sources shared by the store and the service.
pub mod clock;
/// Booking lifecycle: the transition graph and the controller enforcing it.
pub mod lifecycle;
/// Domain models and identifiers shared by all adapters.
pub mod model;
/// Traits describing storage and catalog collaborators.
pub mod ports;
/// Operating-hours grid and slot availability.
pub mod schedule;
/// High-level service facade used by clients.
pub mod service;

pub use clock::*;
pub use lifecycle::*;
pub use model::*;
pub use ports::*;
pub use schedule::*;
pub use service::*;
