//! The in-process record of who is logged in.
//!
//! A [`SessionContext`] is built once by `main`, restored from the
//! [`SessionStore`], and handed by reference to the router, the screens and
//! the shell. Only `init`, `login` and `logout` change it, and every change is
//! published synchronously to subscribers.

use crate::profile::{self, UserProfile};
use crate::store::SessionStore;
use crate::token;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub type SubscriptionId = u64;

type Listener = Rc<dyn Fn(&SessionEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// Explicit logout
    User,
    /// The API rejected the stored token
    Unauthorized,
    /// The session could not be persisted
    StorageFailure,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Unauthorized => "unauthorized",
            Self::StorageFailure => "storage_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A live session was found in storage at startup
    Restored(UserProfile),
    /// A stored session was discarded at startup
    Expired { reason: String },
    LoggedIn(UserProfile),
    LoggedOut { reason: LogoutReason },
}

pub struct SessionContext {
    store: SessionStore,
    leeway_secs: u64,
    current: RefCell<Option<UserProfile>>,
    initialized: Cell<bool>,
    listeners: RefCell<Vec<(SubscriptionId, Listener)>>,
    next_id: Cell<SubscriptionId>,
}

impl SessionContext {
    /// An empty context over `store`. Call [`init`](Self::init) before navigating.
    pub fn new(store: SessionStore, leeway_secs: u64) -> Self {
        Self {
            store,
            leeway_secs,
            current: RefCell::new(None),
            initialized: Cell::new(false),
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    /// Load the persisted session, keeping it only if its token is still live.
    ///
    /// Runs once; later calls are no-ops.
    pub fn init(&self, now: DateTime<Utc>) {
        if self.initialized.replace(true) {
            return;
        }

        let Some((token, profile)) = self.store.read() else {
            // Leftover half of a session, if any
            self.store.clear().ok();
            return;
        };

        let reason = match token::decode_expiry(&token) {
            Ok(_) if token::is_live_with_leeway(&token, now, self.leeway_secs) => {
                *self.current.borrow_mut() = Some(profile.clone());
                self.publish(&SessionEvent::Restored(profile));
                return;
            }
            Ok(_) => "expired".to_string(),
            Err(e) => format!("undecodable token: {}", e),
        };

        if let Err(e) = self.store.clear() {
            eprintln!("Warning: failed to clear stale session: {}", e);
        }
        *self.current.borrow_mut() = None;
        self.publish(&SessionEvent::Expired { reason });
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    /// Persist a new session and make it current.
    ///
    /// If storage fails, nothing is kept: the store is cleared, the context
    /// left empty, and the storage error returned.
    pub fn login(&self, token: &str, profile: UserProfile) -> Result<()> {
        self.initialized.set(true);
        match self.store.write(token, &profile) {
            Ok(()) => {
                *self.current.borrow_mut() = Some(profile.clone());
                self.publish(&SessionEvent::LoggedIn(profile));
                Ok(())
            }
            Err(e) => {
                self.store.clear().ok();
                let previous = self.current.borrow_mut().take();
                if previous.is_some() {
                    self.publish(&SessionEvent::LoggedOut {
                        reason: LogoutReason::StorageFailure,
                    });
                }
                Err(e)
            }
        }
    }

    pub fn logout(&self) {
        self.logout_with(LogoutReason::User);
    }

    /// Clear storage and context. Idempotent; only an actual change is published.
    pub fn logout_with(&self, reason: LogoutReason) {
        if let Err(e) = self.store.clear() {
            eprintln!("Warning: failed to clear stored session: {}", e);
        }
        let previous = self.current.borrow_mut().take();
        if previous.is_some() {
            self.publish(&SessionEvent::LoggedOut { reason });
        }
    }

    pub fn current(&self) -> Option<UserProfile> {
        self.current.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.borrow().is_some()
    }

    pub fn has_role(&self, tag: &str) -> bool {
        self.current
            .borrow()
            .as_ref()
            .is_some_and(|p| profile::has_role(p, tag))
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn subscribe(&self, listener: impl Fn(&SessionEvent) + 'static) -> SubscriptionId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    fn publish(&self, event: &SessionEvent) {
        // Snapshot so a listener may subscribe or unsubscribe while being notified
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}
