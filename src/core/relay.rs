//! Two streamers talking to each other through a shared key-value log.
//!
//! Each side writes its latest reply under its own name and reads the
//! partner's latest reply under theirs.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use crate::core::config::RelaySettings;
use crate::core::ports::{ConversationStore, StoreError};

pub struct DialogueRelay {
    store: Arc<dyn ConversationStore>,
    my_name: String,
    other_name: String,
    last_seen: Option<String>,
}

impl DialogueRelay {
    pub fn new(store: Arc<dyn ConversationStore>, settings: &RelaySettings) -> Self {
        Self {
            store,
            my_name: settings.my_name.clone(),
            other_name: settings.other_name.clone(),
            last_seen: None,
        }
    }

    pub fn my_name(&self) -> &str {
        &self.my_name
    }

    pub fn other_name(&self) -> &str {
        &self.other_name
    }

    pub async fn publish(&self, reply: &str) -> Result<(), StoreError> {
        self.store.put(&self.my_name, reply).await
    }

    /// The partner's latest message, if it changed since the last poll.
    pub async fn poll_partner(&mut self) -> Result<Option<String>, StoreError> {
        let Some(message) = self.store.get(&self.other_name).await? else {
            return Ok(None);
        };
        if message.trim().is_empty() || self.last_seen.as_deref() == Some(message.as_str()) {
            return Ok(None);
        }
        debug!("new message from {}", self.other_name);
        self.last_seen = Some(message.clone());
        Ok(Some(message))
    }
}

/// A `ConversationStore` held in process memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<FxHashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn put(&self, key: &str, message: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), message.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(store: &MemoryStore) -> (DialogueRelay, DialogueRelay) {
        let aoi = RelaySettings {
            my_name: "aoi".to_string(),
            other_name: "akane".to_string(),
            poll_interval_secs: 5,
        };
        let akane = RelaySettings {
            my_name: "akane".to_string(),
            other_name: "aoi".to_string(),
            poll_interval_secs: 5,
        };
        (
            DialogueRelay::new(Arc::new(store.clone()), &aoi),
            DialogueRelay::new(Arc::new(store.clone()), &akane),
        )
    }

    #[tokio::test]
    async fn partner_sees_published_reply_once() {
        let store = MemoryStore::new();
        let (aoi, mut akane) = pair(&store);

        assert_eq!(akane.poll_partner().await.unwrap(), None);
        aoi.publish("[happy] こんにちは。").await.unwrap();
        assert_eq!(
            akane.poll_partner().await.unwrap().as_deref(),
            Some("[happy] こんにちは。")
        );
        assert_eq!(akane.poll_partner().await.unwrap(), None);

        aoi.publish("[sad] またね。").await.unwrap();
        assert_eq!(
            akane.poll_partner().await.unwrap().as_deref(),
            Some("[sad] またね。")
        );
    }

    #[tokio::test]
    async fn own_messages_are_not_echoed() {
        let store = MemoryStore::new();
        let (mut aoi, _akane) = pair(&store);
        aoi.publish("hello").await.unwrap();
        assert_eq!(aoi.poll_partner().await.unwrap(), None);
    }

    #[tokio::test]
    async fn blank_messages_are_ignored() {
        let store = MemoryStore::new();
        let (aoi, mut akane) = pair(&store);
        aoi.publish("  ").await.unwrap();
        assert_eq!(akane.poll_partner().await.unwrap(), None);
    }
}
