//! Route table and navigation.
//!
//! A navigation request is resolved to the screen that will render, following
//! guard and fallback redirects. The decision is made before any screen runs.

use crate::guard::{self, Decision, Guard};
use crate::profile::UserProfile;
use crate::screens::Screen;
use anyhow::{anyhow, bail, Result};
use std::fmt;

const MAX_REDIRECTS: usize = 8;

/// A path plus its decoded query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Location {
    pub fn parse(target: &str) -> Self {
        let target = target.trim();
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (target, ""),
        };

        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (decode_component(k), decode_component(v))
            })
            .collect();

        Self {
            path: normalize_path(path),
            query,
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        for (i, (k, v)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(
                f,
                "{}{}={}",
                sep,
                urlencoding::encode(k),
                urlencoding::encode(v)
            )?;
        }
        Ok(())
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub path: &'static str,
    pub screen: Screen,
    pub guards: Vec<Guard>,
}

impl Route {
    fn new(path: &'static str, screen: Screen, guards: &[Guard]) -> Self {
        Self {
            path,
            screen,
            guards: guards.to_vec(),
        }
    }
}

/// Result of a navigation: the screen that renders and how we got there
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub screen: Screen,
    pub location: Location,
    /// Each hop as (from, to)
    pub redirects: Vec<(String, String)>,
}

pub struct Router {
    routes: Vec<Route>,
}

pub fn standard_routes() -> Vec<Route> {
    use Guard::*;
    let user = &[Authenticated, NonAdmin];
    let admin = &[Authenticated, AdminOnly];
    vec![
        Route::new("/login", Screen::Login, &[GuestOnly]),
        Route::new("/signup", Screen::Signup, &[GuestOnly]),
        Route::new("/", Screen::Dashboard, user),
        Route::new("/dashboard", Screen::Dashboard, user),
        Route::new("/add-course", Screen::AddCourse, user),
        Route::new("/subject-students", Screen::SubjectStudents, user),
        Route::new("/coordinator", Screen::Coordinator, user),
        Route::new("/admin", Screen::AdminDashboard, admin),
        Route::new("/admin/students", Screen::AdminStudents, admin),
        Route::new("/admin/teachers", Screen::AdminTeachers, admin),
        Route::new("/admin/data", Screen::AdminData, admin),
        Route::new("/admin/emails", Screen::AdminEmails, admin),
    ]
}

impl Router {
    /// Build a router, rejecting role guards that are not behind `Authenticated`
    pub fn new(routes: Vec<Route>) -> Result<Self> {
        for (i, route) in routes.iter().enumerate() {
            let mut authenticated = false;
            for guard in &route.guards {
                if *guard == Guard::Authenticated {
                    authenticated = true;
                } else if guard.requires_authentication() && !authenticated {
                    bail!(
                        "route {}: {} guard must follow the authenticated guard",
                        route.path,
                        guard.as_str()
                    );
                }
            }
            if routes[..i].iter().any(|r| r.path == route.path) {
                bail!("route {} is defined twice", route.path);
            }
        }
        Ok(Self { routes })
    }

    pub fn standard() -> Result<Self> {
        Self::new(standard_routes())
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn find(&self, path: &str) -> Option<&Route> {
        let path = normalize_path(path);
        self.routes.iter().find(|r| r.path == path)
    }

    /// Resolve `target` for the given user, following redirects to a screen.
    pub fn resolve(&self, target: &str, user: Option<&UserProfile>) -> Result<Resolved> {
        let mut location = Location::parse(target);
        let mut redirects = Vec::new();

        loop {
            let next = match self.find(&location.path) {
                Some(route) => match guard::evaluate(&route.guards, user) {
                    Decision::Render => {
                        return Ok(Resolved {
                            screen: route.screen,
                            location,
                            redirects,
                        })
                    }
                    Decision::Redirect(to) => to,
                },
                None => guard::fallback(user),
            };

            if redirects.len() >= MAX_REDIRECTS {
                return Err(anyhow!(
                    "too many redirects navigating to {} (last hop {} -> {})",
                    target,
                    location.path,
                    next
                ));
            }
            redirects.push((location.path.clone(), next.to_string()));
            location = Location::parse(next);
        }
    }
}
