//! Time utilities and abstractions
//!
//! Provides the [`Clock`] trait with real ([`SystemClock`]) and mock
//! ([`MockClock`]) implementations. Engine components take a `Clock` type
//! parameter so tests can drive time explicitly instead of sleeping.

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};
