//! Who is logged in.
//!
//! [`SessionStore`] is the single owner of the current [`Session`]. The
//! durable copy (token + user record in a [`KeyValueStore`]) is a mirror that
//! is rewritten on every mutation. The store subscribes to the transport's
//! invalidation signal so a rejected token drops the in-memory session too.

use crate::api::AuthApi;
use crate::error::{ApiError, ApiResult, Operation};
use crate::models::LoginRequest;
use crate::storage::{self, KeyValueStore, StorageResult, TOKEN_KEY, USER_KEY};
use crate::transport::{Invalidation, Transport};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{debug, info, warn};

/// The one role with access to admin-only commands
pub const ADMIN_ROLE: &str = "ROLE_ADMIN";

/// The persisted user record, stored next to the token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub username: String,
    pub full_name: String,
    /// Kept verbatim from the server
    pub role: String,
}

impl UserRecord {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.full_name.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: UserRecord,
    pub token: String,
    /// Advisory only; rehydrated sessions do not know it
    pub expires_in: Option<u64>,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.user.is_admin()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Authenticated(Session),
    Unauthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Loading,
    Authenticated,
    Unauthenticated,
}

impl SessionStatus {
    /// Authorization state has been determined one way or the other
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Unauthenticated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// `initialize()` finished
    Ready { authenticated: bool },
    LoggedIn(UserRecord),
    LoginFailed { message: String },
    LoggedOut,
    /// The server rejected the token; the session has been cleared
    Expired { path: String },
}

type SessionListener = Rc<dyn Fn(&SessionEvent)>;

struct Inner {
    state: RefCell<SessionState>,
    storage: Rc<dyn KeyValueStore>,
    listeners: RefCell<Vec<SessionListener>>,
}

impl Inner {
    fn set_state(&self, state: SessionState) {
        *self.state.borrow_mut() = state;
    }

    fn emit(&self, event: SessionEvent) {
        // No borrow of `state` is held here, listeners may read the store
        let listeners: Vec<SessionListener> = self.listeners.borrow().clone();
        for listener in listeners {
            listener(&event);
        }
    }

    fn force_clear(&self, invalidation: &Invalidation) {
        let was_authenticated = matches!(*self.state.borrow(), SessionState::Authenticated(_));
        if was_authenticated {
            self.set_state(SessionState::Unauthenticated);
            info!(path = %invalidation.path, "session rejected by server; cleared");
        } else {
            debug!(path = %invalidation.path, "session already clear");
        }
        self.emit(SessionEvent::Expired {
            path: invalidation.path.clone(),
        });
    }
}

pub struct SessionStore {
    inner: Rc<Inner>,
    transport: Rc<Transport>,
}

impl SessionStore {
    pub fn new(transport: Rc<Transport>, storage: Rc<dyn KeyValueStore>) -> Self {
        let inner = Rc::new(Inner {
            state: RefCell::new(SessionState::Uninitialized),
            storage,
            listeners: RefCell::new(Vec::new()),
        });

        let weak: Weak<Inner> = Rc::downgrade(&inner);
        transport.subscribe(move |invalidation| {
            if let Some(inner) = weak.upgrade() {
                inner.force_clear(invalidation);
            }
        });

        Self { inner, transport }
    }

    pub fn subscribe(&self, listener: impl Fn(&SessionEvent) + 'static) {
        self.inner.listeners.borrow_mut().push(Rc::new(listener));
    }

    pub fn status(&self) -> SessionStatus {
        match *self.inner.state.borrow() {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::Loading => SessionStatus::Loading,
            SessionState::Authenticated(_) => SessionStatus::Authenticated,
            SessionState::Unauthenticated => SessionStatus::Unauthenticated,
        }
    }

    pub fn session(&self) -> Option<Session> {
        match &*self.inner.state.borrow() {
            SessionState::Authenticated(session) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        match &*self.inner.state.borrow() {
            SessionState::Authenticated(session) => session.is_admin(),
            _ => false,
        }
    }

    /// Rehydrate from durable storage. Runs once; later calls are no-ops.
    pub fn initialize(&self) -> SessionStatus {
        if self.status() != SessionStatus::Uninitialized {
            return self.status();
        }
        self.inner.set_state(SessionState::Loading);

        let next = match self.rehydrate() {
            Ok(Some(session)) => {
                debug!(username = %session.user.username, "restored persisted session");
                SessionState::Authenticated(session)
            }
            Ok(None) => SessionState::Unauthenticated,
            Err(e) => {
                warn!(error = %e, "persisted session unreadable; starting logged out");
                if let Err(e) = storage::clear_session(self.inner.storage.as_ref()) {
                    warn!(error = %e, "failed to clear unreadable session");
                }
                SessionState::Unauthenticated
            }
        };

        let authenticated = matches!(next, SessionState::Authenticated(_));
        self.inner.set_state(next);
        self.inner.emit(SessionEvent::Ready { authenticated });
        self.status()
    }

    /// Both keys present and well-formed, or nothing. Partial state is removed.
    fn rehydrate(&self) -> StorageResult<Option<Session>> {
        let storage = self.inner.storage.as_ref();
        let raw_token = storage.get(TOKEN_KEY)?;
        let raw_user = storage.get(USER_KEY)?;
        if raw_token.is_none() && raw_user.is_none() {
            return Ok(None);
        }

        let token = raw_token.filter(|t| !t.is_empty());
        let user = raw_user
            .as_deref()
            .and_then(|raw| serde_json::from_str::<UserRecord>(raw).ok())
            .filter(UserRecord::is_complete);

        if let (Some(token), Some(user)) = (token, user) {
            return Ok(Some(Session {
                user,
                token,
                expires_in: None,
            }));
        }

        warn!("partial persisted session found; discarding it");
        storage::clear_session(storage)?;
        Ok(None)
    }

    /// Authenticate against the service. Prior state is untouched on failure.
    pub fn login(&self, username: &str, password: &str) -> ApiResult<Session> {
        let credentials = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };

        let result = AuthApi::new(&self.transport)
            .login(&credentials)
            .and_then(|resp| {
                if resp.token.is_empty() {
                    return Err(ApiError::IncompleteLogin("token"));
                }
                let session = Session {
                    user: UserRecord {
                        username: resp.username,
                        full_name: resp.full_name,
                        role: resp.role,
                    },
                    token: resp.token,
                    expires_in: resp.expires_in,
                };
                if !session.user.is_complete() {
                    return Err(ApiError::IncompleteLogin("user details"));
                }
                self.persist(&session)?;
                Ok(session)
            });

        match result {
            Ok(session) => {
                info!(username = %session.user.username, role = %session.user.role, "logged in");
                self.inner
                    .set_state(SessionState::Authenticated(session.clone()));
                self.inner.emit(SessionEvent::LoggedIn(session.user.clone()));
                Ok(session)
            }
            Err(e) => {
                let message = e.user_message(Operation::Login);
                warn!(username, error = %e, "login failed");
                self.inner.emit(SessionEvent::LoginFailed { message });
                Err(e)
            }
        }
    }

    /// Write token and user record; on a partial write, restore what was there
    fn persist(&self, session: &Session) -> ApiResult<()> {
        let storage = self.inner.storage.as_ref();
        let previous_token = storage.get(TOKEN_KEY).ok().flatten();
        let previous_user = storage.get(USER_KEY).ok().flatten();

        let user_json = serde_json::to_string(&session.user).map_err(|source| ApiError::Encode {
            path: USER_KEY.to_string(),
            source,
        })?;

        let written = storage
            .set(TOKEN_KEY, &session.token)
            .and_then(|_| storage.set(USER_KEY, &user_json));
        if let Err(e) = written {
            let restore = |key: &str, value: Option<String>| match value {
                Some(v) => storage.set(key, &v),
                None => storage.remove(key),
            };
            if let Err(restore_err) = restore(TOKEN_KEY, previous_token)
                .and_then(|_| restore(USER_KEY, previous_user))
            {
                warn!(error = %restore_err, "failed to restore previous session after write error");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Clear memory and storage. Succeeds when nobody was logged in.
    pub fn logout(&self) -> StorageResult<()> {
        let cleared = storage::clear_session(self.inner.storage.as_ref());
        let was = self.session().map(|s| s.user.username);
        self.inner.set_state(SessionState::Unauthenticated);
        if let Some(username) = was {
            info!(username = %username, "logged out");
        }
        self.inner.emit(SessionEvent::LoggedOut);
        cleared
    }
}
