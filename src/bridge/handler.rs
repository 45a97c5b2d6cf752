//! Event handlers and the outward forwarder.

use std::sync::Arc;

use async_trait::async_trait;

use super::service::{Lang, Outward, Translator};
use crate::core::classify::{ChatEvent, EventKind};

/// Receives events of the kinds it was registered for
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ChatEvent) -> anyhow::Result<()>;
}

/// Forwards chat to the outward endpoint, optionally translated to Chinese
pub struct Forwarder {
    outward: Arc<dyn Outward>,
    translator: Arc<dyn Translator>,
    translate_incoming: bool,
}

impl Forwarder {
    pub fn new(outward: Arc<dyn Outward>, translator: Arc<dyn Translator>) -> Self {
        Self {
            outward,
            translator,
            translate_incoming: false,
        }
    }

    pub fn translate_incoming(mut self, enabled: bool) -> Self {
        self.translate_incoming = enabled;
        self
    }

    /// Event kinds worth forwarding by default
    pub const KINDS: [EventKind; 3] = [EventKind::Chat, EventKind::Private, EventKind::Emote];
}

#[async_trait]
impl EventHandler for Forwarder {
    async fn handle(&self, event: &ChatEvent) -> anyhow::Result<()> {
        let translatable = matches!(event.kind, EventKind::Chat | EventKind::Private | EventKind::Emote);
        if !(self.translate_incoming && translatable) {
            return self.outward.send(&format_event(event)).await;
        }

        let mut translated = event.clone();
        match self.translator.translate(&event.content, Lang::En, Lang::Zh).await {
            Ok(text) => translated.content = text,
            Err(e) => tracing::warn!("forwarding untranslated: {}", e),
        }
        self.outward.send(&format_event(&translated)).await
    }
}

fn sender(event: &ChatEvent) -> String {
    match (&event.username, &event.host) {
        (Some(user), Some(host)) => format!("{}@{}", user, host),
        (Some(user), None) => user.clone(),
        _ => "?".to_string(),
    }
}

/// One-line rendering for the outward endpoint
pub fn format_event(event: &ChatEvent) -> String {
    match event.kind {
        EventKind::Chat => format!("💬 [{}] {}: {}", event.room, sender(event), event.content),
        EventKind::Private => format!("💌 [private] {}: {}", sender(event), event.content),
        EventKind::Emote => format!("✨ [{}] {} {}", event.room, sender(event), event.content),
        EventKind::System => format!("📢 [{}] {}", event.room, event.content),
        EventKind::RoomList | EventKind::WhoList | EventKind::IdleList => format!("📋 {}", event.content),
        EventKind::Unknown => event.raw.clone(),
    }
}
