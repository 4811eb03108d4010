//! Credential verification and in-memory session tracking.
//!
//! Grounded in `original_source/src/modules/auth.py`'s `Authentication`
//! module: same default-admin seeding, same `(username, password_hash) ->
//! (user_id, is_admin)` lookup, and the same session-id-as-random-uuid-hex
//! scheme, minus the Python class's reliance on a module-global `Database`
//! singleton (this takes its [`Persistence`] explicitly instead).

use std::collections::HashMap;
use std::sync::Mutex;

use md5::{Digest, Md5};
use uuid::Uuid;

use crate::error::HubError;
use crate::persistence::Persistence;

pub struct Session {
    pub user_id: u64,
    pub is_admin: bool,
}

pub struct UserSummary {
    pub uid: u64,
    pub username: String,
    pub is_admin: bool,
}

/// `username: password` pairs are looked up case-insensitively on the
/// username only; the password hash is compared verbatim (spec.md §6: "the
/// core does not hash").
pub struct Authentication<'p, P: Persistence> {
    store: &'p P,
    sessions: Mutex<HashMap<String, Session>>,
}

impl<'p, P: Persistence> Authentication<'p, P> {
    pub fn new(store: &'p P) -> Self {
        Authentication { store, sessions: Mutex::new(HashMap::new()) }
    }

    /// Seeds a default administrator (`admin` / `md5("admin")`) if the
    /// `auth` table is empty. Idempotent.
    pub fn configure(&self) -> Result<(), HubError> {
        if self.store.list_users()?.iter().any(|u| u.is_admin) {
            return Ok(());
        }
        let hash = md5_hex("admin");
        self.store.insert_user("admin", &hash, true)?;
        log::info!("created default administrator user");
        Ok(())
    }

    /// Verifies `username`/`password_hash` and, on success, mints and
    /// records a new session, returning its token and admin flag.
    pub fn authenticate(&self, username: &str, password_hash: &str) -> Result<Option<(String, bool)>, HubError> {
        let user = self.store.find_user_by_name(&username.to_lowercase())?;
        let Some(user) = user else { return Ok(None) };
        if user.password_hash != password_hash {
            return Ok(None);
        }
        let session_id = Uuid::new_v4().simple().to_string();
        self.sessions.lock().unwrap().insert(session_id.clone(), Session { user_id: user.uid, is_admin: user.is_admin });
        Ok(Some((session_id, user.is_admin)))
    }

    pub fn session(&self, session_id: &str) -> Option<(u64, bool)> {
        self.sessions.lock().unwrap().get(session_id).map(|s| (s.user_id, s.is_admin))
    }

    pub fn drop_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    /// Administrators first, then alphabetically — matches the original's
    /// `ORDER BY administrator DESC, username ASC`.
    pub fn list_users(&self) -> Result<Vec<UserSummary>, HubError> {
        let mut users: Vec<UserSummary> = self
            .store
            .list_users()?
            .into_iter()
            .map(|u| UserSummary { uid: u.uid, username: u.username, is_admin: u.is_admin })
            .collect();
        users.sort_by(|a, b| b.is_admin.cmp(&a.is_admin).then_with(|| a.username.cmp(&b.username)));
        Ok(users)
    }

    /// Returns `Ok(false)` rather than an error when the username is
    /// already taken, matching the original's boolean-return convention.
    pub fn create_user(&self, username: &str, password_hash: &str, is_admin: bool) -> Result<bool, HubError> {
        let username = username.to_lowercase();
        if self.store.find_user_by_name(&username)?.is_some() {
            return Ok(false);
        }
        self.store.insert_user(&username, password_hash, is_admin)?;
        Ok(true)
    }

    pub fn edit_user(&self, uid: u64, username: &str, password_hash: &str) -> Result<bool, HubError> {
        let username = username.to_lowercase();
        if let Some(existing) = self.store.find_user_by_name(&username)? {
            if existing.uid != uid {
                return Ok(false);
            }
        }
        self.store.update_user(uid, Some(&username), Some(password_hash), None)?;
        Ok(true)
    }

    pub fn delete_user(&self, uid: u64) -> Result<(), HubError> {
        self.store.delete_user(uid)
    }
}

fn md5_hex(input: &str) -> String {
    let digest = Md5::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory_store::MemoryStore;

    #[test]
    fn configure_seeds_default_admin_once() {
        let store = MemoryStore::new();
        let auth = Authentication::new(&store);
        auth.configure().unwrap();
        auth.configure().unwrap();
        assert_eq!(store.list_users().unwrap().iter().filter(|u| u.is_admin).count(), 1);
    }

    #[test]
    fn authenticate_rejects_wrong_hash_and_mints_session_on_match() {
        let store = MemoryStore::new();
        let auth = Authentication::new(&store);
        auth.configure().unwrap();
        let admin_hash = md5_hex("admin");

        assert!(auth.authenticate("admin", "wrong").unwrap().is_none());

        let (session_id, is_admin) = auth.authenticate("admin", &admin_hash).unwrap().unwrap();
        assert!(is_admin);
        assert_eq!(session_id.len(), 32);
        assert!(auth.session(&session_id).is_some());
    }

    #[test]
    fn drop_session_invalidates_it() {
        let store = MemoryStore::new();
        let auth = Authentication::new(&store);
        auth.configure().unwrap();
        let (session_id, _) = auth.authenticate("admin", &md5_hex("admin")).unwrap().unwrap();
        auth.drop_session(&session_id);
        assert!(auth.session(&session_id).is_none());
    }

    #[test]
    fn create_user_rejects_duplicate_username() {
        let store = MemoryStore::new();
        let auth = Authentication::new(&store);
        assert!(auth.create_user("alice", "hash1", false).unwrap());
        assert!(!auth.create_user("Alice", "hash2", false).unwrap());
    }

    #[test]
    fn list_users_orders_admins_first_then_alphabetically() {
        let store = MemoryStore::new();
        let auth = Authentication::new(&store);
        auth.configure().unwrap();
        auth.create_user("zeta", "h", false).unwrap();
        auth.create_user("alice", "h", false).unwrap();
        let names: Vec<String> = auth.list_users().unwrap().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["admin".to_string(), "alice".to_string(), "zeta".to_string()]);
    }
}
