use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::booking::PendingBooking;

/// Sliding session lifetime. A pending booking that outlives this window is
/// gone, and the verify callback will report an expired session.
pub const SESSION_TTL_MINUTES: i64 = 30;

/// Per-visitor server-side state, keyed by the session cookie token.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    pub logged_in_phone: Option<String>,
    pub pending_booking: Option<PendingBooking>,
    pub last_booked_slots: Vec<String>,
    pub last_booked_phone: Option<String>,
}

struct SessionEntry {
    data: SessionData,
    expires_at: DateTime<Utc>,
}

/// In-memory session store with lazy expiry.
///
/// Every read refreshes the entry's deadline (sliding TTL); expired entries
/// are purged on access rather than by a background task.
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::minutes(SESSION_TTL_MINUTES))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a fresh session token.
    pub fn create(&self) -> String {
        let token = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        purge_expired(&mut sessions);
        sessions.insert(
            token.clone(),
            SessionEntry {
                data: SessionData::default(),
                expires_at: Utc::now() + self.ttl,
            },
        );
        debug!("Created session {}", token);
        token
    }

    /// Snapshot of a live session's data, refreshing its deadline.
    pub fn get(&self, token: &str) -> Option<SessionData> {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        purge_expired(&mut sessions);
        let entry = sessions.get_mut(token)?;
        entry.expires_at = Utc::now() + self.ttl;
        Some(entry.data.clone())
    }

    /// Mutate a live session in place. Returns false when the token is
    /// unknown or expired.
    pub fn update<F>(&self, token: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut SessionData),
    {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        purge_expired(&mut sessions);
        match sessions.get_mut(token) {
            Some(entry) => {
                mutate(&mut entry.data);
                entry.expires_at = Utc::now() + self.ttl;
                true
            }
            None => false,
        }
    }

    pub fn login(&self, token: &str, phone_number: &str) -> bool {
        self.update(token, |data| {
            data.logged_in_phone = Some(phone_number.to_string());
        })
    }

    /// Clear the session identity only; device bindings are untouched.
    pub fn logout(&self, token: &str) {
        if self.update(token, |data| data.logged_in_phone = None) {
            info!("Cleared session identity for {}", token);
        }
    }

    pub fn put_pending(&self, token: &str, pending: PendingBooking) -> bool {
        self.update(token, |data| data.pending_booking = Some(pending))
    }

    /// Peek at the session's pending booking without consuming it. The
    /// verify workflow decides per outcome whether to clear it.
    pub fn pending(&self, token: &str) -> Option<PendingBooking> {
        self.get(token).and_then(|data| data.pending_booking)
    }

    pub fn clear_pending(&self, token: &str) {
        self.update(token, |data| data.pending_booking = None);
    }

    pub fn set_last_booked(&self, token: &str, slots: Vec<String>, phone_number: &str) {
        let phone = phone_number.to_string();
        self.update(token, move |data| {
            data.last_booked_slots = slots;
            data.last_booked_phone = Some(phone);
        });
    }

    /// One-shot confirmation data: the first read consumes it.
    pub fn take_last_booked(&self, token: &str) -> Option<(Vec<String>, Option<String>)> {
        let mut taken = None;
        self.update(token, |data| {
            if !data.last_booked_slots.is_empty() {
                taken = Some((
                    std::mem::take(&mut data.last_booked_slots),
                    data.last_booked_phone.take(),
                ));
            }
        });
        taken
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn purge_expired(sessions: &mut HashMap<String, SessionEntry>) {
    let now = Utc::now();
    sessions.retain(|_, entry| entry.expires_at > now);
}

// Create a singleton session store
pub fn create_session_store() -> Arc<SessionStore> {
    Arc::new(SessionStore::new())
}
