//! Session resolution
//!
//! Maps a bearer token to an [`Access`] value by reading the session record
//! from the cache. Handlers gate on the returned value instead of on state
//! attached to the request.

use crate::error::{NbError, Result};
use crate::storage::{Cache, Storage};
use crate::unix_now;
use nb_types::{
    Administrators, SessionRecord, SESSION_LIFETIME_SECS, SESSION_NAMESPACE,
    SESSION_RENEWAL_WINDOW_SECS,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// An authenticated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    /// Unix seconds
    pub expires_in: i64,
    pub is_administrator: bool,
}

/// What the caller of a request is allowed to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// No bearer token was sent
    Anonymous,
    /// A token was sent but no session matches it
    Unrecognized,
    /// The session matched but has expired
    Expired,
    User(Session),
    Administrator(Session),
}

impl Access {
    pub fn session(&self) -> Option<&Session> {
        match self {
            Access::User(session) | Access::Administrator(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    pub fn is_administrator(&self) -> bool {
        matches!(self, Access::Administrator(_))
    }

    pub fn require_login(&self) -> Result<&Session> {
        match self {
            Access::Anonymous => Err(NbError::MissingToken),
            Access::Unrecognized | Access::Expired => Err(NbError::NotLoggedIn),
            Access::User(session) | Access::Administrator(session) => Ok(session),
        }
    }

    pub fn require_administrator(&self) -> Result<&Session> {
        let session = self.require_login()?;
        if session.is_administrator {
            Ok(session)
        } else {
            Err(NbError::NoPermission {
                user_id: session.user_id.clone(),
            })
        }
    }
}

/// Token part of an `Authorization` header value: everything after the first
/// space. Missing or empty means no token.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let (_, token) = header?.split_once(' ')?;
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[derive(Clone)]
pub struct SessionResolver {
    storage: Storage,
    administrators: Arc<Administrators>,
}

impl SessionResolver {
    pub fn new(storage: Storage, administrators: Administrators) -> Self {
        Self {
            storage,
            administrators: Arc::new(administrators),
        }
    }

    fn entry(&self, token: &str) -> Result<Cache> {
        self.storage.cache().namespace(SESSION_NAMESPACE)?.key(token)
    }

    fn session_for(&self, token: &str, record: SessionRecord) -> Session {
        Session {
            session_id: token.to_string(),
            is_administrator: self.administrators.contains(&record.user_id),
            user_id: record.user_id,
            expires_in: record.expires_in,
        }
    }

    pub async fn resolve(&self, token: Option<&str>) -> Result<Access> {
        self.resolve_at(token, unix_now()).await
    }

    pub async fn resolve_at(&self, token: Option<&str>, now: i64) -> Result<Access> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(Access::Anonymous);
        };

        let entry = self.entry(token)?;
        let record = match entry.get_json::<SessionRecord>().await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(Access::Unrecognized),
            Err(NbError::Serialization(e)) => {
                warn!(error = %e, "Malformed session record");
                return Ok(Access::Unrecognized);
            }
            Err(e) => return Err(e),
        };

        if record.is_expired(now) {
            debug!(user_id = %record.user_id, "Session expired");
            if let Err(e) = entry.delete().await {
                warn!(user_id = %record.user_id, error = %e, "Failed to delete expired session");
            }
            return Ok(Access::Expired);
        }

        let session = self.session_for(token, record);
        if session.is_administrator {
            Ok(Access::Administrator(session))
        } else {
            Ok(Access::User(session))
        }
    }

    /// Store a new session for `user_id` under `token`
    pub async fn create(&self, token: &str, user_id: &str) -> Result<Session> {
        self.create_at(token, user_id, unix_now()).await
    }

    pub async fn create_at(&self, token: &str, user_id: &str, now: i64) -> Result<Session> {
        let record = SessionRecord::new(user_id, now + SESSION_LIFETIME_SECS);
        self.entry(token)?.save_json(&record).await?;
        Ok(self.session_for(token, record))
    }

    /// Push the expiry of `session` to ten days from now
    pub async fn renew(&self, session: &Session) -> Result<Session> {
        self.renew_at(session, unix_now()).await
    }

    pub async fn renew_at(&self, session: &Session, now: i64) -> Result<Session> {
        let record = SessionRecord::new(session.user_id.clone(), now + SESSION_LIFETIME_SECS);
        self.entry(&session.session_id)?.save_json(&record).await?;
        Ok(Session {
            expires_in: record.expires_in,
            ..session.clone()
        })
    }

    pub async fn revoke(&self, session: &Session) -> Result<()> {
        self.entry(&session.session_id)?.delete().await
    }

    pub fn needs_renewal(&self, session: &Session) -> bool {
        needs_renewal_at(session, unix_now())
    }
}

pub fn needs_renewal_at(session: &Session, now: i64) -> bool {
    session.expires_in <= now + SESSION_RENEWAL_WINDOW_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CacheBackend, RelationalBackend, Row, SqliteCache, SqliteDatabase};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Delegates to SQLite and counts deletions
    struct CountingCache {
        inner: SqliteCache,
        deletes: AtomicUsize,
        fail_deletes: bool,
    }

    #[async_trait]
    impl CacheBackend for CountingCache {
        fn kind(&self) -> &'static str {
            "counting"
        }

        async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
            self.inner.get(namespace, key).await
        }

        async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
            self.inner.set(namespace, key, value).await
        }

        async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.fail_deletes {
                return Err(NbError::Database("delete refused".to_string()));
            }
            self.inner.delete(namespace, key).await
        }

        async fn exists(&self, namespace: &str, key: &str) -> Result<bool> {
            self.inner.exists(namespace, key).await
        }
    }

    struct NoDatabase;

    #[async_trait]
    impl RelationalBackend for NoDatabase {
        fn kind(&self) -> &'static str {
            "none"
        }

        async fn execute_query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn execute_exec(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
            Ok(0)
        }

        async fn execute_script(&self, _sql: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn resolver(
        administrators: Administrators,
        fail_deletes: bool,
    ) -> (SessionResolver, Arc<CountingCache>) {
        let cache = Arc::new(CountingCache {
            inner: SqliteCache::connect_in_memory().await.unwrap(),
            deletes: AtomicUsize::new(0),
            fail_deletes,
        });
        let storage = Storage::new(Arc::new(NoDatabase), cache.clone());
        (SessionResolver::new(storage, administrators), cache)
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc.123")), Some("abc.123"));
        assert_eq!(bearer_token(Some("Bearer a b")), Some("a b"));
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(Some("Bearer")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[tokio::test]
    async fn test_anonymous_and_unknown() {
        let (resolver, _) = resolver(Administrators::default(), false).await;
        assert_eq!(resolver.resolve(None).await.unwrap(), Access::Anonymous);
        assert_eq!(
            resolver.resolve(Some("nope")).await.unwrap(),
            Access::Unrecognized
        );
    }

    #[tokio::test]
    async fn test_expired_session_deleted_once() {
        let (resolver, cache) = resolver(Administrators::default(), false).await;
        let now = 1_700_000_000;
        resolver
            .entry("tok")
            .unwrap()
            .save_json(&SessionRecord::new("42", now - 1))
            .await
            .unwrap();

        let access = resolver.resolve_at(Some("tok"), now).await.unwrap();
        assert_eq!(access, Access::Expired);
        assert!(!access.is_authenticated());
        assert_eq!(cache.deletes.load(Ordering::SeqCst), 1);

        // the record is gone now
        let access = resolver.resolve_at(Some("tok"), now).await.unwrap();
        assert_eq!(access, Access::Unrecognized);
        assert_eq!(cache.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_cleanup_is_not_surfaced() {
        let (resolver, cache) = resolver(Administrators::default(), true).await;
        let now = 1_700_000_000;
        resolver.create_at("tok", "42", now - SESSION_LIFETIME_SECS).await.unwrap();

        let access = resolver.resolve_at(Some("tok"), now).await.unwrap();
        assert_eq!(access, Access::Expired);
        assert_eq!(cache.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_administrator_flag() {
        let (resolver, _) =
            resolver(Administrators::List(vec!["7".to_string()]), false).await;
        resolver.create("admin", "7").await.unwrap();
        resolver.create("user", "8").await.unwrap();

        let admin = resolver.resolve(Some("admin")).await.unwrap();
        assert!(admin.is_administrator());
        assert!(admin.require_administrator().is_ok());

        let user = resolver.resolve(Some("user")).await.unwrap();
        assert!(matches!(user, Access::User(_)));
        assert!(matches!(
            user.require_administrator(),
            Err(NbError::NoPermission { user_id }) if user_id == "8"
        ));

        let (everyone, _) = self::resolver(Administrators::Flag(true), false).await;
        everyone.create("any", "99").await.unwrap();
        assert!(everyone.resolve(Some("any")).await.unwrap().is_administrator());
    }

    #[test]
    fn test_capability_gates() {
        assert!(matches!(Access::Anonymous.require_login(), Err(NbError::MissingToken)));
        assert!(matches!(Access::Expired.require_login(), Err(NbError::NotLoggedIn)));
        assert!(matches!(
            Access::Unrecognized.require_administrator(),
            Err(NbError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn test_login_renew_logout_lifecycle() {
        let (resolver, _) = resolver(Administrators::default(), false).await;
        let t0 = 1_700_000_000;

        let session = resolver.create_at("tok", "42", t0).await.unwrap();
        assert_eq!(session.expires_in, t0 + SESSION_LIFETIME_SECS);

        let found = resolver.resolve_at(Some("tok"), t0).await.unwrap();
        assert_eq!(found.session().unwrap().expires_in, t0 + SESSION_LIFETIME_SECS);
        assert!(!needs_renewal_at(found.session().unwrap(), t0));

        // one second before expiry
        let late = session.expires_in - 1;
        let found = resolver.resolve_at(Some("tok"), late).await.unwrap();
        let current = found.session().unwrap();
        assert!(needs_renewal_at(current, late));

        let renewed = resolver.renew_at(current, late).await.unwrap();
        assert_eq!(renewed.expires_in, late + SESSION_LIFETIME_SECS);
        let found = resolver.resolve_at(Some("tok"), late).await.unwrap();
        assert_eq!(found.session().unwrap().expires_in, late + SESSION_LIFETIME_SECS);

        resolver.revoke(&renewed).await.unwrap();
        assert_eq!(
            resolver.resolve_at(Some("tok"), late).await.unwrap(),
            Access::Unrecognized
        );
    }

    #[tokio::test]
    async fn test_malformed_record_is_unrecognized() {
        let (resolver, _) = resolver(Administrators::default(), false).await;
        resolver.entry("bad").unwrap().save("{not json").await.unwrap();
        assert_eq!(
            resolver.resolve(Some("bad")).await.unwrap(),
            Access::Unrecognized
        );
    }

    #[tokio::test]
    async fn test_file_backed_storage() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::connect(dir.path().join("db.sqlite").to_str().unwrap())
            .await
            .unwrap();
        let cache = SqliteCache::connect(dir.path().join("cache.sqlite").to_str().unwrap())
            .await
            .unwrap();
        let resolver = SessionResolver::new(
            Storage::new(Arc::new(db), Arc::new(cache)),
            Administrators::default(),
        );
        resolver.create("tok", "1").await.unwrap();
        assert!(resolver.resolve(Some("tok")).await.unwrap().is_authenticated());
    }
}
