//! In-memory tracking of provider conversation state.
//!
//! The provider threads turns through its own conversation and message ids.
//! [`SessionTracker`] remembers the latest ids per client-visible conversation
//! id so a later request can be sent as a continuation. State lives for the
//! process lifetime only; a restart loses continuity.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Provider state remembered for one conversation id.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    /// Provider conversation id.
    pub cid: String,
    pub user_message_id: String,
    pub assistant_message_id: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub turn_count: u64,
}

/// Continuity inputs handed to the request translator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinuityHints {
    /// Client-visible id the exchange is tracked under. Empty for a fresh conversation.
    pub session_key: String,
    /// Provider conversation id to send. Empty starts a new provider conversation.
    pub conversation_id: String,
    /// Provider message id to thread the new turn under.
    pub parent_message_id: String,
}

/// Lock-guarded map from conversation id to [`SessionState`].
///
/// Reads share the lock, writes take it exclusively. Construct one per
/// process (or per test) and hand it around behind an `Arc`.
#[derive(Debug)]
pub struct SessionTracker {
    sessions: RwLock<HashMap<String, SessionState>>,
    continuous_cid: String,
}

impl SessionTracker {
    pub fn new(continuous_cid: impl Into<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            continuous_cid: continuous_cid.into(),
        }
    }

    /// The reserved id used for multi-turn requests that carry no explicit id.
    pub fn continuous_cid(&self) -> &str {
        &self.continuous_cid
    }

    pub fn is_continuous(&self, cid: &str) -> bool {
        cid == self.continuous_cid
    }

    /// Upsert the entry for `key`, bumping its activity time and turn count.
    pub fn save(&self, key: &str, cid: &str, user_msg_id: &str, assistant_msg_id: &str, model: &str) {
        self.save_at(key, cid, user_msg_id, assistant_msg_id, model, Utc::now());
    }

    fn save_at(
        &self,
        key: &str,
        cid: &str,
        user_msg_id: &str,
        assistant_msg_id: &str,
        model: &str,
        now: DateTime<Utc>,
    ) {
        let mut sessions = self.write();
        let state = sessions
            .entry(key.to_string())
            .or_insert_with(|| SessionState {
                cid: cid.to_string(),
                user_message_id: String::new(),
                assistant_message_id: String::new(),
                model: String::new(),
                created_at: now,
                last_activity: now,
                turn_count: 0,
            });
        state.cid = cid.to_string();
        state.user_message_id = user_msg_id.to_string();
        state.assistant_message_id = assistant_msg_id.to_string();
        state.model = model.to_string();
        state.last_activity = now;
        state.turn_count += 1;
    }

    pub fn get(&self, key: &str) -> Option<SessionState> {
        self.read().get(key).cloned()
    }

    /// Latest assistant message id for `key`, or an empty string when unknown.
    pub fn next_parent_message_id(&self, key: &str) -> String {
        self.read()
            .get(key)
            .map(|s| s.assistant_message_id.clone())
            .unwrap_or_default()
    }

    /// Remove every entry idle for longer than `max_age`. A zero `max_age` disables expiry.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        self.sweep_expired_at(max_age, Utc::now())
    }

    fn sweep_expired_at(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        if max_age.is_zero() {
            return 0;
        }
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };

        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, s| now.signed_duration_since(s.last_activity) <= max_age);
        before - sessions.len()
    }

    /// Work out which conversation a request continues.
    ///
    /// An explicit id wins. Without one, a request that already carries an
    /// assistant turn is stitched onto the reserved continuous id; otherwise
    /// the provider starts a new conversation.
    pub fn resolve(
        &self,
        explicit_cid: Option<&str>,
        explicit_parent: Option<&str>,
        has_assistant_turn: bool,
    ) -> ContinuityHints {
        let explicit_cid = explicit_cid.map(str::trim).filter(|c| !c.is_empty());
        let session_key = match explicit_cid {
            Some(cid) => cid.to_string(),
            None if has_assistant_turn => self.continuous_cid.clone(),
            None => String::new(),
        };

        if session_key.is_empty() {
            return ContinuityHints::default();
        }

        let tracked = self.get(&session_key);
        let conversation_id = match &tracked {
            Some(state) => state.cid.clone(),
            None if self.is_continuous(&session_key) => String::new(),
            None => session_key.clone(),
        };

        let parent_message_id = explicit_parent
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .or_else(|| tracked.map(|s| s.assistant_message_id))
            .unwrap_or_default();

        ContinuityHints {
            session_key,
            conversation_id,
            parent_message_id,
        }
    }

    /// Snapshot of every tracked session, keyed by conversation id.
    pub fn stats(&self) -> Vec<(String, SessionState)> {
        let mut out: Vec<_> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| b.1.last_activity.cmp(&a.1.last_activity));
        out
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionState>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionState>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SessionTracker {
        SessionTracker::new("continuous-conversation")
    }

    #[test]
    fn test_save_upserts_and_counts_turns() {
        let t = tracker();
        t.save("c1", "c1", "u1", "a1", "claude-4-sonnet-think");
        t.save("c1", "c1", "u2", "a2", "claude-4-sonnet-think");

        let state = t.get("c1").unwrap();
        assert_eq!(state.user_message_id, "u2");
        assert_eq!(state.assistant_message_id, "a2");
        assert_eq!(state.turn_count, 2);
        assert!(state.last_activity >= state.created_at);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_next_parent_message_id() {
        let t = tracker();
        assert_eq!(t.next_parent_message_id("missing"), "");
        t.save("c1", "c1", "u1", "a1", "m");
        assert_eq!(t.next_parent_message_id("c1"), "a1");
    }

    #[test]
    fn test_sweep_removes_only_idle_entries() {
        let t = tracker();
        let now = Utc::now();
        t.save_at("old", "old", "u", "a", "m", now - chrono::Duration::hours(3));
        t.save_at("fresh", "fresh", "u", "a", "m", now - chrono::Duration::minutes(5));

        let removed = t.sweep_expired_at(Duration::from_secs(2 * 60 * 60), now);
        assert_eq!(removed, 1);
        assert!(t.get("old").is_none());
        assert!(t.get("fresh").is_some());
    }

    #[test]
    fn test_sweep_with_zero_age_is_noop() {
        let t = tracker();
        let now = Utc::now();
        t.save_at("old", "old", "u", "a", "m", now - chrono::Duration::days(30));
        assert_eq!(t.sweep_expired_at(Duration::ZERO, now), 0);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_resolve_fresh_request_is_empty() {
        let t = tracker();
        assert_eq!(t.resolve(None, None, false), ContinuityHints::default());
        assert_eq!(t.resolve(Some("  "), None, false), ContinuityHints::default());
    }

    #[test]
    fn test_resolve_assistant_history_uses_reserved_id() {
        let t = tracker();
        let hints = t.resolve(None, None, true);
        assert_eq!(hints.session_key, "continuous-conversation");
        // Nothing tracked yet, so the provider starts a new conversation.
        assert_eq!(hints.conversation_id, "");
        assert_eq!(hints.parent_message_id, "");

        t.save("continuous-conversation", "prov-1", "u1", "a1", "m");
        let hints = t.resolve(None, None, true);
        assert_eq!(hints.conversation_id, "prov-1");
        assert_eq!(hints.parent_message_id, "a1");
    }

    #[test]
    fn test_resolve_explicit_id_and_parent() {
        let t = tracker();
        let hints = t.resolve(Some("c9"), None, true);
        assert_eq!(hints.session_key, "c9");
        assert_eq!(hints.conversation_id, "c9");
        assert_eq!(hints.parent_message_id, "");

        t.save("c9", "c9", "u1", "a1", "m");
        let hints = t.resolve(Some("c9"), Some("p-override"), false);
        assert_eq!(hints.parent_message_id, "p-override");
        let hints = t.resolve(Some("c9"), None, false);
        assert_eq!(hints.parent_message_id, "a1");
    }

    #[test]
    fn test_stats_snapshot() {
        let t = tracker();
        assert!(t.is_empty());
        t.save("a", "a", "u", "a1", "m");
        t.save("b", "b", "u", "b1", "m");
        let stats = t.stats();
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().any(|(k, s)| k == "b" && s.assistant_message_id == "b1"));
    }
}
