use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::config::DefaultsConfig;

/// Per-chat configuration: the tracked callsign and the report interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub station: String,
    pub interval_seconds: u64,
}

/// In-memory map of chat id to settings. Chats that never changed anything
/// read the configured defaults; an entry is only created when a chat issues
/// /start or mutates a value. State lives for the process lifetime only.
pub struct SettingsStore {
    defaults: DefaultsConfig,
    chats: Mutex<HashMap<i64, ChatSettings>>,
}

impl SettingsStore {
    pub fn new(defaults: DefaultsConfig) -> Self {
        Self {
            defaults,
            chats: Mutex::new(HashMap::new()),
        }
    }

    fn default_settings(&self) -> ChatSettings {
        ChatSettings {
            station: self.defaults.station.clone(),
            interval_seconds: self.defaults.interval_seconds,
        }
    }

    /// Create the chat's entry with defaults if it has none, returning the
    /// effective settings. Used by /start.
    pub async fn ensure(&self, chat_id: i64) -> ChatSettings {
        let mut chats = self.chats.lock().await;
        chats
            .entry(chat_id)
            .or_insert_with(|| self.default_settings())
            .clone()
    }

    /// Effective settings for the chat without creating an entry.
    pub async fn snapshot(&self, chat_id: i64) -> ChatSettings {
        let chats = self.chats.lock().await;
        chats
            .get(&chat_id)
            .cloned()
            .unwrap_or_else(|| self.default_settings())
    }

    pub async fn station(&self, chat_id: i64) -> String {
        self.snapshot(chat_id).await.station
    }

    pub async fn set_station(&self, chat_id: i64, station: String) {
        let mut chats = self.chats.lock().await;
        let defaults = self.default_settings();
        chats.entry(chat_id).or_insert(defaults).station = station;
    }

    pub async fn interval(&self, chat_id: i64) -> u64 {
        self.snapshot(chat_id).await.interval_seconds
    }

    pub async fn set_interval(&self, chat_id: i64, interval_seconds: u64) {
        let mut chats = self.chats.lock().await;
        let defaults = self.default_settings();
        chats.entry(chat_id).or_insert(defaults).interval_seconds = interval_seconds;
    }
}
