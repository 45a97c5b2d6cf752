//! Core session components.
//!
//! This module contains everything between the raw byte stream and typed
//! chat events:
//!
//! - **term**: VT100/VT220 screen state and ANSI escape sequence parser
//! - **tracker**: finalized-line extraction from the screen's settle log
//! - **classify**: line grammar of the remote chat program
//! - **driver**: sans-I/O state machine serializing outbound keystrokes
//! - **session**: one remote session combining all of the above
//! - **transport**: duplex byte stream to the remote
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── Screen (cell grid + cursor + settle log)
//! │   └── VtParser (ANSI escape sequences)
//! ├── LineTracker (settle watermark)
//! ├── Classifier (patterns + listing sub-machine)
//! └── SessionDriver (SessionState + command queue)
//! ```

pub mod classify;
pub mod driver;
pub mod session;
pub mod term;
pub mod tracker;
pub mod transport;
