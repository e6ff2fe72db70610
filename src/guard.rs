//! Navigation guards.
//!
//! Each guard looks at the current profile (if any) and either lets the screen
//! render or names the path to redirect to. Guards on a route run in order and
//! the first redirect wins.

use crate::profile::UserProfile;

pub const LOGIN_PATH: &str = "/login";
pub const DEFAULT_LANDING: &str = "/";
pub const ADMIN_LANDING: &str = "/admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Someone must be logged in
    Authenticated,
    /// The user must hold ADMIN
    AdminOnly,
    /// The user must not hold ADMIN; admins are sent to their own landing
    NonAdmin,
    /// Only without a session (login, signup)
    GuestOnly,
}

/// Outcome of a guard check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Render,
    Redirect(&'static str),
}

impl Guard {
    pub fn check(&self, user: Option<&UserProfile>) -> Decision {
        let is_admin = user.is_some_and(|u| u.is_admin());
        match self {
            Guard::Authenticated if user.is_none() => Decision::Redirect(LOGIN_PATH),
            Guard::AdminOnly if !is_admin => Decision::Redirect(DEFAULT_LANDING),
            Guard::NonAdmin if is_admin => Decision::Redirect(ADMIN_LANDING),
            Guard::GuestOnly if user.is_some() => Decision::Redirect(DEFAULT_LANDING),
            _ => Decision::Render,
        }
    }

    /// Whether this guard may only appear after `Authenticated` in a chain
    pub fn requires_authentication(&self) -> bool {
        matches!(self, Guard::AdminOnly | Guard::NonAdmin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Guard::Authenticated => "authenticated",
            Guard::AdminOnly => "admin-only",
            Guard::NonAdmin => "non-admin",
            Guard::GuestOnly => "guest-only",
        }
    }
}

/// Run a chain of guards; the first redirect wins.
pub fn evaluate(guards: &[Guard], user: Option<&UserProfile>) -> Decision {
    for guard in guards {
        if let Decision::Redirect(to) = guard.check(user) {
            return Decision::Redirect(to);
        }
    }
    Decision::Render
}

/// Where an unknown path sends the user. Admin wins over any other role.
pub fn fallback(user: Option<&UserProfile>) -> &'static str {
    match user {
        None => LOGIN_PATH,
        Some(u) if u.is_admin() => ADMIN_LANDING,
        Some(_) => DEFAULT_LANDING,
    }
}
