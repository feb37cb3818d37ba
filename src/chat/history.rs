//! Per-chat history cache.
//!
//! A bounded ring buffer of recent turns per chat, with idle expiry.
//! The cache only answers when it can do so authoritatively: a miss, an
//! expired entry, or a window wider than the buffered suffix of a chat
//! with more history all return `None`, and the caller refills from the
//! turn store. Appends write through so the hot path stays off the
//! database once a chat is warm.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::HistoryConfig;
use crate::store::Turn;

struct ChatEntry {
    /// Oldest to newest, at most `capacity` turns.
    turns: VecDeque<Turn>,
    touched_at: Instant,
    /// Whether `turns` is the chat's entire history. Set by `fill`,
    /// cleared as soon as eviction drops an old turn.
    complete: bool,
}

pub struct HistoryCache {
    config: HistoryConfig,
    chats: Mutex<HashMap<Uuid, ChatEntry>>,
}

impl HistoryCache {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            chats: Mutex::new(HashMap::new()),
        }
    }

    /// Last `limit` turns, oldest first. `None` means the cache cannot
    /// answer authoritatively and the caller must go to the store.
    pub fn recent(&self, chat_id: Uuid, limit: usize) -> Option<Vec<Turn>> {
        let mut chats = self.chats.lock();
        match chats.get(&chat_id) {
            Some(entry) if entry.touched_at.elapsed() >= self.config.ttl() => {
                chats.remove(&chat_id);
                return None;
            }
            Some(_) => {}
            None => return None,
        }
        let entry = chats.get_mut(&chat_id)?;
        if limit > entry.turns.len() && !entry.complete {
            // The chat may have older turns beyond the buffer.
            return None;
        }
        entry.touched_at = Instant::now();
        let skip = entry.turns.len().saturating_sub(limit);
        Some(entry.turns.iter().skip(skip).cloned().collect())
    }

    /// Replaces a chat's buffer with `turns`, ordered oldest to newest.
    /// `complete` asserts the turns are the chat's whole history; it is
    /// dropped if trimming to capacity discards any.
    pub fn fill(&self, chat_id: Uuid, mut turns: Vec<Turn>, complete: bool) {
        let mut complete = complete;
        if turns.len() > self.config.capacity {
            let excess = turns.len() - self.config.capacity;
            turns.drain(..excess);
            complete = false;
        }
        self.chats.lock().insert(
            chat_id,
            ChatEntry {
                turns: VecDeque::from(turns),
                touched_at: Instant::now(),
                complete,
            },
        );
    }

    /// Write-through append. A chat the cache does not hold stays cold;
    /// the next read refills it from the store.
    pub fn append(&self, chat_id: Uuid, turn: Turn) {
        let mut chats = self.chats.lock();
        match chats.get(&chat_id) {
            Some(entry) if entry.touched_at.elapsed() >= self.config.ttl() => {
                chats.remove(&chat_id);
                return;
            }
            Some(_) => {}
            None => return,
        }
        if let Some(entry) = chats.get_mut(&chat_id) {
            entry.turns.push_back(turn);
            if entry.turns.len() > self.config.capacity {
                entry.turns.pop_front();
                entry.complete = false;
            }
            entry.touched_at = Instant::now();
        }
    }

    pub fn invalidate(&self, chat_id: Uuid) {
        self.chats.lock().remove(&chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::store::TurnRole;

    fn turn(chat_id: Uuid, content: &str) -> Turn {
        Turn {
            id: Uuid::new_v4(),
            chat_id,
            role: TurnRole::User,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    fn cache(capacity: usize, ttl_seconds: u64) -> HistoryCache {
        HistoryCache::new(HistoryConfig {
            window: 3,
            capacity,
            ttl_seconds,
        })
    }

    #[test]
    fn test_miss_then_fill_then_hit() {
        let cache = cache(8, 3600);
        let chat = Uuid::new_v4();
        assert!(cache.recent(chat, 2).is_none());

        cache.fill(chat, vec![turn(chat, "a"), turn(chat, "b"), turn(chat, "c")], true);
        let window = cache.recent(chat, 2).unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "b");
        assert_eq!(window[1].content, "c");
    }

    #[test]
    fn test_incomplete_buffer_declines_wider_window() {
        let cache = cache(8, 3600);
        let chat = Uuid::new_v4();
        cache.fill(chat, vec![turn(chat, "x"), turn(chat, "y")], false);
        assert!(cache.recent(chat, 3).is_none());
        assert_eq!(cache.recent(chat, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_complete_buffer_answers_wider_window() {
        let cache = cache(8, 3600);
        let chat = Uuid::new_v4();
        cache.fill(chat, vec![turn(chat, "only")], true);
        let window = cache.recent(chat, 5).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].content, "only");
    }

    #[test]
    fn test_append_evicts_oldest_at_capacity() {
        let cache = cache(3, 3600);
        let chat = Uuid::new_v4();
        cache.fill(chat, vec![turn(chat, "1"), turn(chat, "2"), turn(chat, "3")], true);
        cache.append(chat, turn(chat, "4"));

        let window = cache.recent(chat, 3).unwrap();
        assert_eq!(
            window.iter().map(|t| t.content.as_str()).collect::<Vec<_>>(),
            vec!["2", "3", "4"]
        );
        // Eviction dropped turn "1", so the buffer is no longer the whole
        // history and wider windows must refill from the store.
        assert!(cache.recent(chat, 4).is_none());
    }

    #[test]
    fn test_fill_trims_to_capacity_and_clears_complete() {
        let cache = cache(2, 3600);
        let chat = Uuid::new_v4();
        cache.fill(
            chat,
            vec![turn(chat, "a"), turn(chat, "b"), turn(chat, "c")],
            true,
        );
        let window = cache.recent(chat, 2).unwrap();
        assert_eq!(window[0].content, "b");
        assert_eq!(window[1].content, "c");
        assert!(cache.recent(chat, 3).is_none());
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache = cache(8, 0);
        let chat = Uuid::new_v4();
        cache.fill(chat, vec![turn(chat, "gone")], true);
        assert!(cache.recent(chat, 1).is_none());
    }

    #[test]
    fn test_append_to_cold_chat_is_noop() {
        let cache = cache(8, 3600);
        let chat = Uuid::new_v4();
        cache.append(chat, turn(chat, "ignored"));
        assert!(cache.recent(chat, 1).is_none());
    }

    #[test]
    fn test_invalidate_forces_refill() {
        let cache = cache(8, 3600);
        let chat = Uuid::new_v4();
        cache.fill(chat, vec![turn(chat, "a")], true);
        assert!(cache.recent(chat, 1).is_some());
        cache.invalidate(chat);
        assert!(cache.recent(chat, 1).is_none());
    }
}
