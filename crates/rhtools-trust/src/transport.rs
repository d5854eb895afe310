//! Publish/discover boundary
//!
//! The engine hands signed documents to a [`Transport`] and receives
//! discovered ones through a channel it owns. Nothing about trust depends on
//! publication: an unpublished signed declaration is just as valid locally.

use crate::declaration::{DeclarationDocument, TrustDeclaration};
use crate::error::{Result, TrustError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Transport acknowledgement of a publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    /// Event id assigned by the network
    pub event_id: String,
    /// Relays that accepted the document
    pub relays: Vec<String>,
}

/// External publish/subscribe network
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a signed document
    async fn publish(&self, document: &DeclarationDocument) -> Result<PublishAck>;

    /// Start delivering discovered documents into `sink`
    ///
    /// Delivery is fire-and-forget; the transport drops documents when the
    /// sink is full or closed.
    async fn on_discovered(&self, sink: mpsc::Sender<TrustDeclaration>) -> Result<()>;
}

/// In-process transport that records publishes and lets tests inject
/// discoveries
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    published: Mutex<Vec<DeclarationDocument>>,
    sinks: Mutex<Vec<mpsc::Sender<TrustDeclaration>>>,
    fail_publish: Mutex<Option<String>>,
}

impl LoopbackTransport {
    /// Empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents published so far
    pub fn published(&self) -> Vec<DeclarationDocument> {
        self.published.lock().clone()
    }

    /// Make subsequent publishes fail with `reason`, or succeed again with `None`
    pub fn fail_publishes(&self, reason: Option<String>) {
        *self.fail_publish.lock() = reason;
    }

    /// Deliver `declaration` to every subscriber; returns how many took it
    pub async fn discover(&self, declaration: TrustDeclaration) -> usize {
        let sinks = self.sinks.lock().clone();
        let mut delivered = 0;
        for sink in sinks {
            if sink.send(declaration.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn publish(&self, document: &DeclarationDocument) -> Result<PublishAck> {
        if let Some(reason) = self.fail_publish.lock().clone() {
            return Err(TrustError::transport(reason));
        }
        let mut published = self.published.lock();
        published.push(document.clone());
        Ok(PublishAck {
            event_id: format!("loopback-{}", published.len()),
            relays: vec!["loopback".to_string()],
        })
    }

    async fn on_discovered(&self, sink: mpsc::Sender<TrustDeclaration>) -> Result<()> {
        self.sinks.lock().push(sink);
        Ok(())
    }
}
