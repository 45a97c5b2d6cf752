//! The bridge between the remote chat session and the outward endpoint.
//!
//! - **engine**: the run loop owning the transport, plus cloneable handles
//! - **handler**: event handlers, including the outward forwarder
//! - **router**: endpoint text to bridge verbs
//! - **service**: translation and outward endpoint capabilities

pub mod engine;
pub mod handler;
pub mod router;
pub mod service;

pub use engine::{Bridge, BridgeHandle};
pub use handler::{format_event, EventHandler, Forwarder};
pub use router::CommandRouter;
pub use service::{CachedTranslator, ChannelOutward, Lang, NullOutward, Outward, Passthrough, Translator};
