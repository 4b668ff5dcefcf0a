//! Progress & gamification engine for a learning platform.
//!
//! Turns discrete learner events (module viewed, quiz attempted, module
//! completed) into consistent aggregate state: enrollment completion
//! percentages, point balances, levels and working-day activity streaks.
//! Point awards are idempotent, module completion can be gated on a passed
//! quiz, and streaks follow a Monday-Friday calendar.
//!
//! The HTTP layer, auth, file storage and notification delivery live
//! elsewhere; this crate exposes the [`services::Engine`] facade plus the
//! [`store::Store`], [`notify::Notifier`] and [`clock::Clock`] seams those
//! collaborators plug into.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod notify;
pub mod services;
pub mod store;
pub mod telemetry;

pub use error::{AppError, AppResult};
pub use services::Engine;
