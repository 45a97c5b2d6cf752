//! combridge - bridge a screen-based terminal chat program to an external
//! messaging endpoint.
//!
//! The remote program (SDF's `com`) only speaks through a full-screen
//! terminal. combridge emulates that terminal, turns settled screen lines into
//! typed [`ChatEvent`]s, and types keystrokes on behalf of callers one command
//! at a time.
//!
//! ```text
//! remote bytes ─▶ Screen ─▶ LineTracker ─▶ Classifier ─▶ handlers ─▶ Outward
//!                                             │ cues
//! endpoint text ─▶ CommandRouter ─▶ BridgeHandle ─▶ SessionDriver ─▶ keystrokes
//! ```

pub mod bridge;
pub mod config;
pub mod core;
pub mod error;

pub use bridge::{Bridge, BridgeHandle, CommandRouter, EventHandler, Forwarder, Outward, Translator};
pub use config::Config;
pub use crate::core::classify::{ChatEvent, EventKind};
pub use error::{BridgeError, Result};
