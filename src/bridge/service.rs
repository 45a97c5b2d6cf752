//! Capabilities the bridge consumes: translation and the outward endpoint.
//!
//! Both are injected at construction. The defaults are no-ops, so a bridge
//! runs without any external service configured.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use crate::error::TranslateError;

/// Languages the bridge translates between
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lang {
    Zh,
    En,
}

impl Lang {
    pub fn code(self) -> &'static str {
        match self {
            Lang::Zh => "zh",
            Lang::En => "en",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, source: Lang, target: Lang) -> Result<String, TranslateError>;
}

/// Returns text unchanged
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

#[async_trait]
impl Translator for Passthrough {
    async fn translate(&self, text: &str, _source: Lang, _target: Lang) -> Result<String, TranslateError> {
        Ok(text.to_string())
    }
}

/// Memoizes another translator
pub struct CachedTranslator<T> {
    inner: T,
    cache: Mutex<HashMap<(String, Lang, Lang), String>>,
    capacity: usize,
}

impl<T: Translator> CachedTranslator<T> {
    pub fn new(inner: T) -> Self {
        Self::with_capacity(inner, 1024)
    }

    pub fn with_capacity(inner: T, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<T: Translator> Translator for CachedTranslator<T> {
    async fn translate(&self, text: &str, source: Lang, target: Lang) -> Result<String, TranslateError> {
        if source == target {
            return Ok(text.to_string());
        }
        let key = (text.to_string(), source, target);
        let hit = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key).cloned();
        if let Some(hit) = hit {
            return Ok(hit);
        }

        // Failures are not cached
        let translated = self.inner.translate(text, source, target).await?;

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= self.capacity {
            tracing::debug!("translation cache full ({} entries), clearing", cache.len());
            cache.clear();
        }
        cache.insert(key, translated.clone());
        Ok(translated)
    }
}

/// The external messaging endpoint
#[async_trait]
pub trait Outward: Send + Sync {
    async fn send(&self, text: &str) -> anyhow::Result<()>;
}

/// Logs and drops everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullOutward;

#[async_trait]
impl Outward for NullOutward {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        tracing::debug!("outward (dropped): {}", text);
        Ok(())
    }
}

/// Hands outward messages to a channel for the embedding application
#[derive(Clone, Debug)]
pub struct ChannelOutward {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelOutward {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Outward for ChannelOutward {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        self.tx
            .send(text.to_string())
            .map_err(|_| anyhow::anyhow!("outward receiver dropped"))
    }
}
