use crate::prelude::*;
use std::time::UNIX_EPOCH;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Session {
    pub created_at: u64,
    pub expires_at: u64,
}

impl Session {
    fn new(ttl: u64) -> Self {
        let now = current_timestamp();
        Session {
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// Process-wide session table keyed by the `session_id` cookie value.
/// Entries are created from CGI `Set-Cookie` output and expire after the
/// server's `session_timeout`.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    last_cleanup: Option<Instant>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the session named by a `Set-Cookie` value; cookies that do
    /// not carry the session key are ignored.
    pub fn add_session(&mut self, set_cookie_value: &str, ttl: u64) {
        let cookies = Cookies::parse(set_cookie_value);
        if let Some(id) = cookies.get(SESSION_KEY) {
            debug!(session = %id, ttl, "session registered");
            self.sessions.insert(id.clone(), Session::new(ttl));
        }
    }

    /// True iff the key exists and has not expired. Expired entries are
    /// purged on access.
    pub fn is_session_available(&mut self, key: &str) -> bool {
        let now = current_timestamp();
        let expired = match self.sessions.get(key) {
            Some(session) => session.is_expired(now),
            None => return false,
        };
        if expired {
            self.sessions.remove(key);
            return false;
        }
        true
    }

    pub fn cleanup(&mut self) {
        let now = current_timestamp();
        self.sessions.retain(|_, s| !s.is_expired(now));
    }

    pub fn cleanup_if_due(&mut self) {
        let due = match self.last_cleanup {
            Some(at) => at.elapsed() > CLEANUP_INTERVAL,
            None => true,
        };
        if due {
            self.cleanup();
            self.last_cleanup = Some(Instant::now());
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Parsed `Cookie` header: `a=1; b=hello`.
#[derive(Debug, Clone, Default)]
pub struct Cookies {
    values: HashMap<String, String>,
}

impl Cookies {
    /// Splits on `;`, keeping only `name=value` pairs; `=` inside a value
    /// stays part of the value. Works for `Set-Cookie` values too, where
    /// attributes like `Path` just become entries.
    pub fn parse(header_value: &str) -> Self {
        let values = header_value
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Cookies { values }
    }

    pub fn get(&self, name: &str) -> Option<&String> {
        self.values.get(name)
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
