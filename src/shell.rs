use crate::api::{ApiClient, ApiError, HttpTransport};
use crate::config::Config;
use crate::events::EventLog;
use crate::profile::UserProfile;
use crate::router::{Location, Router};
use crate::screens::{Outcome, Screen};
use crate::session::{LogoutReason, SessionContext, SessionEvent};
use crate::store::SessionStore;
use crate::token;
use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::{Cell, RefCell};
use std::io::Write;
use std::rc::Rc;

/// Source of typed input: the prompt loop, passwords and confirmations
pub trait LineInput {
    /// `None` on end of input
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;

    /// Record a command line in history, where the input keeps one
    fn remember(&mut self, _line: &str) {}
}

pub struct RustylineInput {
    editor: DefaultEditor,
}

impl RustylineInput {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineInput for RustylineInput {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Some(line)),
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(None),
            Err(e) => Err(anyhow!("Input error: {}", e)),
        }
    }

    fn remember(&mut self, line: &str) {
        self.editor.add_history_entry(line).ok();
    }
}

/// Everything a screen or command needs, owned by `main` and passed by reference
pub struct Context {
    pub config: Config,
    pub session: SessionContext,
    pub api: ApiClient,
    pub router: Router,
    pub events: Rc<RefCell<EventLog>>,
    pub location: RefCell<Location>,
    pub screen: Cell<Screen>,
    input: RefCell<Box<dyn LineInput>>,
    session_changed: Rc<Cell<bool>>,
}

impl Context {
    pub fn new(
        config: Config,
        store: SessionStore,
        transport: Box<dyn HttpTransport>,
        events: EventLog,
        input: Box<dyn LineInput>,
    ) -> Result<Self> {
        let session = SessionContext::new(store.clone(), config.token_leeway_secs);
        let api = ApiClient::new(&config.api_url, store, transport);
        let events = Rc::new(RefCell::new(events));
        let session_changed = Rc::new(Cell::new(false));

        let log = events.clone();
        session.subscribe(move |event| {
            let mut log = log.borrow_mut();
            let result = match event {
                SessionEvent::Restored(user) => log.session_restored(&user.id),
                SessionEvent::Expired { reason } => log.session_expired(reason),
                SessionEvent::LoggedIn(user) => log.login(&user.id, &user.role_tags()),
                SessionEvent::LoggedOut { reason } => log.logout(reason.as_str()),
            };
            if let Err(e) = result {
                eprintln!("Warning: failed to write event log: {}", e);
            }
        });
        let changed = session_changed.clone();
        session.subscribe(move |_| changed.set(true));

        Ok(Self {
            config,
            session,
            api,
            router: Router::standard()?,
            events,
            location: RefCell::new(Location::parse("/")),
            screen: Cell::new(Screen::Login),
            input: RefCell::new(input),
            session_changed,
        })
    }

    /// Restore the stored session. Must run before the first navigation.
    pub fn start(&self, now: DateTime<Utc>) {
        self.session.init(now);
        self.session_changed.set(false);
    }

    /// Resolve `target` through the guards and render whatever screen it lands on
    pub fn navigate(&self, target: &str, out: &mut dyn Write) -> Result<Screen> {
        if !self.session.is_initialized() {
            bail!("Session not restored yet");
        }
        let user = self.session.current();
        let resolved = self.router.resolve(target, user.as_ref())?;
        {
            let mut log = self.events.borrow_mut();
            for (from, to) in &resolved.redirects {
                log.redirect(from, to).ok();
            }
        }

        *self.location.borrow_mut() = resolved.location.clone();
        self.screen.set(resolved.screen);
        self.session_changed.set(false);

        writeln!(out, "== {} ({})", resolved.screen.title(), resolved.location)?;
        resolved.screen.render(self, &resolved.location, out)?;
        Ok(resolved.screen)
    }

    /// If the session changed since the last navigation, re-run the guards
    /// for the current location.
    pub fn sync_with_session(&self, out: &mut dyn Write) -> Result<()> {
        if self.session_changed.replace(false) {
            let target = self.location.borrow().to_string();
            self.navigate(&target, out)?;
        }
        Ok(())
    }

    /// Run an action on the current screen
    pub fn run_action(&self, args: &[String], out: &mut dyn Write) -> Result<()> {
        let location = self.location.borrow().clone();
        match self.screen.get().run(self, &location, args, out)? {
            Outcome::Stay => Ok(()),
            Outcome::Navigate(target) => self.navigate(&target, out).map(|_| ()),
        }
    }

    /// Make an API call; an authorization failure ends the session
    pub fn call<T>(&self, f: impl FnOnce(&ApiClient) -> Result<T, ApiError>) -> Result<T> {
        match f(&self.api) {
            Ok(value) => Ok(value),
            Err(e) => {
                let path = self.location.borrow().path.clone();
                self.events.borrow_mut().api_error(&path, e.status()).ok();
                if e.is_unauthorized() {
                    self.session.logout_with(LogoutReason::Unauthorized);
                    bail!("Your session has ended ({}). Please log in again.", e);
                }
                Err(e.into())
            }
        }
    }

    pub fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        match self.api.login(email, password) {
            Ok(resp) => {
                self.session.login(&resp.token, resp.user.clone())?;
                Ok(resp.user)
            }
            Err(e) => {
                self.events.borrow_mut().login_failed(e.status()).ok();
                match e {
                    ApiError::Unauthorized(_) | ApiError::Status(400..=499, _) => {
                        bail!("Invalid credentials!")
                    }
                    other => Err(other.into()),
                }
            }
        }
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    pub fn read_line(&self, prompt: &str) -> Result<Option<String>> {
        self.input.borrow_mut().read_line(prompt)
    }

    pub fn read_secret(&self, prompt: &str) -> Result<String> {
        if let Ok(password) = std::env::var("ACAD_PASSWORD") {
            return Ok(password);
        }
        self.read_line(prompt)?
            .ok_or_else(|| anyhow!("No password given"))
    }

    pub fn confirm(&self, prompt: &str) -> Result<bool> {
        let answer = self.read_line(prompt)?.unwrap_or_default();
        let answer = answer.trim().to_lowercase();
        Ok(answer == "y" || answer == "yes")
    }
}

pub fn run_repl(ctx: &Context) -> Result<()> {
    let mut out = std::io::stdout();
    println!("acad - type /help for commands, /exit to quit");

    if let Err(e) = ctx.navigate("/", &mut out) {
        eprintln!("Error: {}", e);
    }

    loop {
        if let Err(e) = ctx.sync_with_session(&mut out) {
            eprintln!("Error: {}", e);
        }

        let prompt = format!("{}> ", ctx.location.borrow().path);
        let Some(line) = ctx.read_line(&prompt)? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        ctx.input.borrow_mut().remember(line);

        if line.starts_with('/') {
            match handle_command(ctx, line, &mut out) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => eprintln!("Error: {}", e),
            }
            continue;
        }

        let args = match shell_words::split(line) {
            Ok(args) => args,
            Err(e) => {
                eprintln!("Error: {}", e);
                continue;
            }
        };
        if let Err(e) = ctx.run_action(&args, &mut out) {
            eprintln!("Error: {}", e);
        }
    }

    Ok(())
}

/// Handle a slash command. Returns true when the shell should exit.
pub fn handle_command(ctx: &Context, cmd: &str, out: &mut dyn Write) -> Result<bool> {
    let parts: Vec<&str> = cmd.splitn(2, ' ').collect();
    let rest = parts.get(1).map(|s| s.trim()).unwrap_or("");
    match parts[0] {
        "/exit" | "/quit" => return Ok(true),
        "/help" => {
            writeln!(out, "Commands:")?;
            writeln!(out, "  /exit            - quit")?;
            writeln!(out, "  /help            - show commands")?;
            writeln!(out, "  /whoami          - show the logged-in user")?;
            writeln!(out, "  /session         - show API, storage and token expiry")?;
            writeln!(out, "  /login <email>   - log in")?;
            writeln!(out, "  /logout          - log out")?;
            writeln!(out, "  /go <path>       - navigate (e.g. /go /admin/emails)")?;
            writeln!(out, "  /routes          - list screens and their guards")?;
            let screen = ctx.screen.get();
            writeln!(out, "{} actions:", screen.title())?;
            for (usage, what) in screen.actions() {
                writeln!(out, "  {:<44} - {}", usage, what)?;
            }
        }
        "/whoami" => whoami(ctx, out)?,
        "/session" => session_info(ctx, out)?,
        "/login" => {
            if let Some(user) = ctx.session.current() {
                writeln!(out, "Already logged in as {}. Use /logout first.", user.email)?;
                return Ok(false);
            }
            if rest.is_empty() {
                bail!("Usage: /login <email>");
            }
            let password = ctx.read_secret("Password: ")?;
            let user = ctx.login(rest, &password)?;
            writeln!(out, "Login successful! Welcome, {}.", user.name)?;
            ctx.navigate("/", out)?;
        }
        "/logout" => {
            ctx.logout();
            writeln!(out, "Logged out")?;
            ctx.navigate("/login", out)?;
        }
        "/go" => {
            if rest.is_empty() {
                bail!("Usage: /go <path>");
            }
            ctx.navigate(rest, out)?;
        }
        "/routes" => {
            for route in ctx.router.routes() {
                let guards: Vec<&str> = route.guards.iter().map(|g| g.as_str()).collect();
                writeln!(
                    out,
                    "  {:<18} {:<30} [{}]",
                    route.path,
                    route.screen.title(),
                    guards.join(", ")
                )?;
            }
        }
        other => writeln!(out, "Unknown command: {}", other)?,
    }
    Ok(false)
}

pub fn whoami(ctx: &Context, out: &mut dyn Write) -> Result<()> {
    match ctx.session.current() {
        Some(user) => {
            writeln!(out, "{} <{}> (id {})", user.name, user.email, user.id)?;
            writeln!(out, "Roles: {}", user.role_tags().join(", "))?;
        }
        None => writeln!(out, "Not logged in")?,
    }
    Ok(())
}

pub fn session_info(ctx: &Context, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "API: {}", ctx.config.api_url)?;
    writeln!(out, "Storage: {}", ctx.config.storage_path().display())?;
    match ctx.session.store().token() {
        Some(token) => match token::decode_expiry(&token) {
            Ok(secs) => match Utc.timestamp_millis_opt(token::expiry_millis(secs)).single() {
                Some(at) => writeln!(out, "Token expires: {}", at.to_rfc3339())?,
                None => writeln!(out, "Token expires: out of range ({}s)", secs)?,
            },
            Err(e) => writeln!(out, "Token: unreadable ({})", e)?,
        },
        None => writeln!(out, "Token: none")?,
    }
    Ok(())
}
