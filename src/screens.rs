//! Terminal screens, one per route.
//!
//! A screen renders once when navigated to and then accepts actions typed at
//! the prompt. Screens never decide who may see them; the router has already
//! done that by the time `render` runs.

use crate::api::{CsvUpload, SignupForm, SubmissionUpdate, TeacherUpdate};
use crate::profile::{ADMIN, CLASS_COORDINATOR, TEACHER};
use crate::router::Location;
use crate::shell::Context;
use anyhow::{anyhow, bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::io::Write;
use std::path::Path;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S+@\S+\.\S+$").unwrap());

const ASSIGNABLE_ROLES: &[&str] = &[TEACHER, CLASS_COORDINATOR, ADMIN];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Signup,
    Dashboard,
    AddCourse,
    SubjectStudents,
    Coordinator,
    AdminDashboard,
    AdminStudents,
    AdminTeachers,
    AdminData,
    AdminEmails,
}

/// What the shell should do after an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Stay,
    Navigate(String),
}

impl Screen {
    pub fn title(&self) -> &'static str {
        match self {
            Screen::Login => "Login",
            Screen::Signup => "Sign up",
            Screen::Dashboard => "Dashboard",
            Screen::AddCourse => "Add course",
            Screen::SubjectStudents => "Student submissions",
            Screen::Coordinator => "Coordinator responsibilities",
            Screen::AdminDashboard => "Admin dashboard",
            Screen::AdminStudents => "Student management",
            Screen::AdminTeachers => "Teacher management",
            Screen::AdminData => "Data management",
            Screen::AdminEmails => "Email management",
        }
    }

    /// (usage, description) for each action the screen accepts
    pub fn actions(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Screen::Login => &[
                ("login <email>", "log in (password is prompted)"),
                ("signup", "go to the signup screen"),
            ],
            Screen::Signup => &[
                ("signup <email> <name> <id>", "register (password is prompted)"),
                ("login", "go to the login screen"),
            ],
            Screen::Dashboard => &[
                ("students <subjectCode> <division>", "open a subject's submissions"),
                ("add-course", "go to the add course screen"),
                ("coordinator", "open coordinator responsibilities"),
            ],
            Screen::AddCourse => &[
                ("divisions <sem>", "divisions offered in a semester"),
                ("subjects <sem>", "subjects offered in a semester"),
                ("add <sem> <subject> <division>", "add a course (asks to confirm)"),
            ],
            Screen::SubjectStudents => &[
                ("list", "reload submissions"),
                (
                    "update <rollNo> <ut1> <ut2> <done|pending> [remark]",
                    "save one student's marks",
                ),
            ],
            Screen::Coordinator => &[
                ("list", "reload the cross-subject view"),
                ("finalize <rollNo> <true|false>", "set a student's finalized flag"),
            ],
            Screen::AdminDashboard => &[("open <students|teachers|data|emails>", "open a section")],
            Screen::AdminStudents => &[
                ("find <studentId>", "look up a student"),
                ("update <json>", "save a student record"),
                ("upload <csv>", "bulk import students"),
            ],
            Screen::AdminTeachers => &[
                ("find <teacherId>", "look up a teacher"),
                ("update <json>", "save a teacher record"),
                (
                    "roles <teacherId> <ROLE>... [--password]",
                    "replace a teacher's roles, optionally setting a new password",
                ),
            ],
            Screen::AdminData => &[
                ("upload <divisions|batches|subjects> <csv>", "bulk import"),
                ("assign <division> <teacherId>", "assign a class coordinator"),
            ],
            Screen::AdminEmails => &[
                ("allow <email>", "allow one email to sign up"),
                ("upload <csv>", "bulk import allowed emails"),
            ],
        }
    }

    pub fn render(&self, ctx: &Context, location: &Location, out: &mut dyn Write) -> Result<()> {
        match self {
            Screen::Login => {
                writeln!(out, "Log in with: login <email>")?;
                writeln!(out, "Don't have an account? Type: signup")?;
            }
            Screen::Signup => {
                writeln!(out, "Register with: signup <email> <name> <id>")?;
            }
            Screen::Dashboard => render_dashboard(ctx, out)?,
            Screen::AddCourse => {
                writeln!(out, "Semesters 3-8. Start with: divisions <sem>")?;
            }
            Screen::SubjectStudents => render_submissions(ctx, location, out)?,
            Screen::Coordinator => render_pivot(ctx, out)?,
            Screen::AdminDashboard => {
                let name = ctx.session.current().map(|u| u.name).unwrap_or_default();
                writeln!(out, "Welcome back, {}.", name)?;
                for (path, what) in [
                    ("/admin/students", "Upload CSV, find and update student information"),
                    ("/admin/teachers", "Find and update teacher information"),
                    ("/admin/data", "Upload divisions, batches, subjects and assign coordinators"),
                    ("/admin/emails", "Manage allowed email addresses"),
                ] {
                    writeln!(out, "  {:<16} {}", path, what)?;
                }
            }
            Screen::AdminStudents | Screen::AdminTeachers | Screen::AdminData | Screen::AdminEmails => {
                for (usage, what) in self.actions() {
                    writeln!(out, "  {:<44} {}", usage, what)?;
                }
            }
        }
        Ok(())
    }

    pub fn run(
        &self,
        ctx: &Context,
        location: &Location,
        args: &[String],
        out: &mut dyn Write,
    ) -> Result<Outcome> {
        let Some(action) = args.first() else {
            return Ok(Outcome::Stay);
        };
        let rest = &args[1..];

        match (self, action.as_str()) {
            (Screen::Login, "login") => {
                let email = arg(rest, 0, "email")?;
                let password = ctx.read_secret("Password: ")?;
                let user = ctx.login(email, &password)?;
                writeln!(out, "Login successful! Welcome, {}.", user.name)?;
                Ok(Outcome::Navigate("/".to_string()))
            }
            (Screen::Login, "signup") => Ok(Outcome::Navigate("/signup".to_string())),
            (Screen::Signup, "login") => Ok(Outcome::Navigate("/login".to_string())),
            (Screen::Signup, "signup") => {
                let mut form = SignupForm {
                    email: arg(rest, 0, "email")?.to_string(),
                    name: arg(rest, 1, "name")?.to_string(),
                    id: arg(rest, 2, "id")?.to_string(),
                    password: String::new(),
                };
                form.password = ctx.read_secret("Password: ")?;
                let errors = validate_signup(&form);
                if !errors.is_empty() {
                    bail!("Please fix the signup form: {}", errors.join("; "));
                }
                if let Err(e) = ctx.api.signup(&form) {
                    ctx.events.borrow_mut().api_error(&location.path, e.status()).ok();
                    bail!("Signup failed! ({})", e);
                }
                writeln!(out, "Signup successful! Please login.")?;
                Ok(Outcome::Navigate("/login".to_string()))
            }

            (Screen::Dashboard, "students") => {
                let code = arg(rest, 0, "subjectCode")?;
                let division = arg(rest, 1, "division")?;
                Ok(Outcome::Navigate(submissions_link(code, division)))
            }
            (Screen::Dashboard, "add-course") => Ok(Outcome::Navigate("/add-course".to_string())),
            (Screen::Dashboard, "coordinator") => {
                Ok(Outcome::Navigate("/coordinator".to_string()))
            }

            (Screen::AddCourse, "divisions") => {
                let sem = semester(arg(rest, 0, "sem")?)?;
                writeln!(out, "{}", divisions_for_semester(sem).join(", "))?;
                Ok(Outcome::Stay)
            }
            (Screen::AddCourse, "subjects") => {
                let sem = semester(arg(rest, 0, "sem")?)?;
                let subjects = ctx.call(|api| api.fetch_semester_subjects(sem))?;
                for s in &subjects {
                    writeln!(out, "  {}", display_value(s))?;
                }
                Ok(Outcome::Stay)
            }
            (Screen::AddCourse, "add") => {
                let sem = semester(arg(rest, 0, "sem")?)?;
                let subject = arg(rest, 1, "subject")?;
                let division = arg(rest, 2, "division")?;
                if !divisions_for_semester(sem).contains(&division) {
                    bail!(
                        "Division {} is not offered in semester {} (choose from {})",
                        division,
                        sem,
                        divisions_for_semester(sem).join(", ")
                    );
                }
                let prompt = format!(
                    "Add course? Semester: {} Division: {} Subject: {} [y/N]: ",
                    sem, division, subject
                );
                if !ctx.confirm(&prompt)? {
                    writeln!(out, "Cancelled")?;
                    return Ok(Outcome::Stay);
                }
                ctx.call(|api| api.add_course(subject, division))?;
                writeln!(out, "Course added successfully")?;
                Ok(Outcome::Navigate("/dashboard".to_string()))
            }

            (Screen::SubjectStudents, "list") => {
                render_submissions(ctx, location, out)?;
                Ok(Outcome::Stay)
            }
            (Screen::SubjectStudents, "update") => {
                let subject = location
                    .param("subjectId")
                    .ok_or_else(|| anyhow!("No subject selected"))?;
                let update = SubmissionUpdate {
                    student_id: arg(rest, 0, "rollNo")?.to_string(),
                    subject_id: subject
                        .parse()
                        .map_err(|_| anyhow!("Subject id '{}' is not numeric", subject))?,
                    ut1: number(arg(rest, 1, "ut1")?)?,
                    ut2: number(arg(rest, 2, "ut2")?)?,
                    status: match arg(rest, 3, "status")? {
                        "done" | "true" | "yes" => true,
                        "pending" | "false" | "no" => false,
                        other => bail!("Status must be done or pending, got '{}'", other),
                    },
                    remark: rest.get(4..).map(|r| r.join(" ")).unwrap_or_default(),
                };
                ctx.call(|api| api.update_submission(&update))?;
                writeln!(out, "Student updated!")?;
                Ok(Outcome::Stay)
            }

            (Screen::Coordinator, "list") => {
                render_pivot(ctx, out)?;
                Ok(Outcome::Stay)
            }
            (Screen::Coordinator, "finalize") => {
                let roll_no = arg(rest, 0, "rollNo")?;
                let finalized = flag(arg(rest, 1, "true|false")?)?;
                ctx.call(|api| api.set_finalized(roll_no, finalized))?;
                writeln!(out, "Finalized status updated")?;
                Ok(Outcome::Stay)
            }

            (Screen::AdminDashboard, "open") => {
                let section = arg(rest, 0, "section")?;
                match section {
                    "students" | "teachers" | "data" | "emails" => {
                        Ok(Outcome::Navigate(format!("/admin/{}", section)))
                    }
                    other => bail!("Unknown section: {}", other),
                }
            }

            (Screen::AdminStudents, "find") => {
                let id = arg(rest, 0, "studentId")?;
                let student = ctx.call(|api| api.find_student(id))?;
                writeln!(out, "{}", serde_json::to_string_pretty(&student)?)?;
                Ok(Outcome::Stay)
            }
            (Screen::AdminStudents, "update") => {
                let record = json_arg(rest)?;
                ctx.call(|api| api.update_student(&record))?;
                writeln!(out, "Student updated")?;
                Ok(Outcome::Stay)
            }
            (Screen::AdminStudents, "upload") => {
                upload(ctx, CsvUpload::Students, arg(rest, 0, "csv")?, out)
            }

            (Screen::AdminTeachers, "find") => {
                let id = arg(rest, 0, "teacherId")?;
                let teacher = ctx.call(|api| api.find_teacher(id))?;
                writeln!(out, "{}", serde_json::to_string_pretty(&teacher)?)?;
                Ok(Outcome::Stay)
            }
            (Screen::AdminTeachers, "update") => {
                let record = json_arg(rest)?;
                ctx.call(|api| api.update_teacher(&record))?;
                writeln!(out, "Teacher updated")?;
                Ok(Outcome::Stay)
            }
            (Screen::AdminTeachers, "roles") => {
                let id = arg(rest, 0, "teacherId")?;
                let set_password = rest[1..].iter().any(|a| a == "--password");
                let tags: Vec<&String> = rest[1..]
                    .iter()
                    .filter(|a| *a != "--password")
                    .collect();
                if tags.is_empty() {
                    bail!("Give at least one role: {}", ASSIGNABLE_ROLES.join(", "));
                }
                if let Some(bad) = tags.iter().find(|t| !ASSIGNABLE_ROLES.contains(&t.as_str())) {
                    bail!("Unknown role {} (choose from {})", bad, ASSIGNABLE_ROLES.join(", "));
                }
                let roles: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
                let password = if set_password {
                    let entered = ctx
                        .read_line(&format!("New password for {}: ", id))?
                        .unwrap_or_default();
                    Some(entered.trim().to_string()).filter(|p| !p.is_empty())
                } else {
                    None
                };

                let teacher = ctx.call(|api| api.find_teacher(id))?;
                if !teacher.is_object() {
                    bail!("Unexpected teacher record for {}", id);
                }
                let update = TeacherUpdate {
                    id: teacher
                        .get("id")
                        .cloned()
                        .unwrap_or_else(|| Value::String(id.to_string())),
                    name: text_field(&teacher, "name"),
                    email: text_field(&teacher, "email"),
                    roles,
                    password,
                };
                ctx.call(|api| api.save_teacher(&update))?;
                writeln!(out, "Roles for {} set to {}", id, update.roles.join(", "))?;
                Ok(Outcome::Stay)
            }

            (Screen::AdminData, "upload") => {
                let kind = match arg(rest, 0, "divisions|batches|subjects")? {
                    k @ ("divisions" | "batches" | "subjects") => CsvUpload::from_str(k),
                    _ => None,
                }
                .ok_or_else(|| anyhow!("Upload one of: divisions, batches, subjects"))?;
                upload(ctx, kind, arg(rest, 1, "csv")?, out)
            }
            (Screen::AdminData, "assign") => {
                let division = arg(rest, 0, "division")?;
                let teacher = arg(rest, 1, "teacherId")?;
                ctx.call(|api| api.assign_coordinator(division, teacher))?;
                writeln!(out, "Coordinator {} assigned to {}", teacher, division)?;
                Ok(Outcome::Stay)
            }

            (Screen::AdminEmails, "allow") => {
                let email = arg(rest, 0, "email")?;
                if !EMAIL_RE.is_match(email) {
                    bail!("Please enter a valid email");
                }
                ctx.call(|api| api.allow_email(email))?;
                writeln!(out, "{} may now sign up", email)?;
                Ok(Outcome::Stay)
            }
            (Screen::AdminEmails, "upload") => {
                upload(ctx, CsvUpload::AllowedEmails, arg(rest, 0, "csv")?, out)
            }

            (_, other) => {
                let known: Vec<&str> = self
                    .actions()
                    .iter()
                    .map(|(usage, _)| usage.split(' ').next().unwrap_or(usage))
                    .collect();
                bail!(
                    "Unknown action '{}' on {}. Available: {}",
                    other,
                    self.title(),
                    known.join(", ")
                )
            }
        }
    }
}

fn render_dashboard(ctx: &Context, out: &mut dyn Write) -> Result<()> {
    let name = ctx.session.current().map(|u| u.name).unwrap_or_default();
    writeln!(out, "Welcome, {}", name)?;

    let subjects = ctx.call(|api| api.fetch_subjects())?;
    writeln!(out, "Your subjects:")?;
    if subjects.is_empty() {
        writeln!(out, "  No subjects assigned.")?;
    }
    for a in &subjects {
        writeln!(
            out,
            "  {} ({}) | Division: {} | Semester: {}",
            a.subject.subject_name,
            a.subject.subject_code,
            a.division.division,
            a.subject
                .semester
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string())
        )?;
        writeln!(
            out,
            "    -> {}",
            submissions_link(&a.subject.subject_code, &a.division.division)
        )?;
    }

    if ctx.session.has_role(CLASS_COORDINATOR) {
        writeln!(out, "Coordinator responsibilities:")?;
        match ctx.call(|api| api.fetch_coordinator_division())? {
            Some(d) => writeln!(
                out,
                "  Division: {} | Year: {} | Semester: {}\n    -> /coordinator",
                d.division,
                d.year.as_ref().map(display_value).unwrap_or_else(|| "-".to_string()),
                d.semester
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string())
            )?,
            None => writeln!(out, "  No coordinator role assigned.")?,
        }
    }
    Ok(())
}

fn render_submissions(ctx: &Context, location: &Location, out: &mut dyn Write) -> Result<()> {
    let (Some(subject), Some(division)) =
        (location.param("subjectId"), location.param("divisionId"))
    else {
        writeln!(out, "Pick a subject from the dashboard first.")?;
        return Ok(());
    };

    let rows = ctx.call(|api| api.fetch_submissions(subject, division))?;
    writeln!(
        out,
        "{:<10} {:<24} {:>4} {:>4} {:<8} Remark",
        "Roll No", "Name", "UT1", "UT2", "Status"
    )?;
    for r in &rows {
        writeln!(
            out,
            "{:<10} {:<24} {:>4} {:>4} {:<8} {}",
            r.roll_no,
            r.name,
            r.ut1.map(|v| v.to_string()).unwrap_or_default(),
            r.ut2.map(|v| v.to_string()).unwrap_or_default(),
            if r.status { "done" } else { "pending" },
            r.remark.as_deref().unwrap_or("")
        )?;
    }
    Ok(())
}

fn render_pivot(ctx: &Context, out: &mut dyn Write) -> Result<()> {
    let rows = ctx.call(|api| api.fetch_pivot_submissions())?;
    let subjects: Vec<String> = rows
        .first()
        .map(|r| r.subject_statuses.keys().cloned().collect())
        .unwrap_or_default();

    write!(out, "{:<10} {:<24}", "Roll No", "Name")?;
    for s in &subjects {
        write!(out, " {:<10}", s)?;
    }
    writeln!(out, " Finalized")?;
    for r in &rows {
        write!(out, "{:<10} {:<24}", r.roll_no, r.name)?;
        for s in &subjects {
            let cell = r
                .subject_statuses
                .get(s)
                .map(display_value)
                .unwrap_or_else(|| "-".to_string());
            write!(out, " {:<10}", cell)?;
        }
        writeln!(out, " {}", if r.finalized { "yes" } else { "no" })?;
    }
    Ok(())
}

fn upload(ctx: &Context, kind: CsvUpload, file: &str, out: &mut dyn Write) -> Result<Outcome> {
    let result = ctx.call(|api| api.upload_csv(kind, Path::new(file)))?;
    if result.trim().is_empty() {
        writeln!(out, "Uploaded {}", file)?;
    } else {
        writeln!(out, "{}", result.trim())?;
    }
    Ok(Outcome::Stay)
}

pub fn submissions_link(subject_code: &str, division: &str) -> String {
    Location {
        path: "/subject-students".to_string(),
        query: vec![
            ("subjectId".to_string(), subject_code.to_string()),
            ("divisionId".to_string(), division.to_string()),
        ],
    }
    .to_string()
}

/// Divisions offered per semester
pub fn divisions_for_semester(sem: u8) -> Vec<&'static str> {
    match sem {
        3 | 4 => vec!["SE1", "SE2", "SE3", "SE4"],
        5 | 6 => vec!["TE1", "TE2", "TE3", "TE4"],
        7 | 8 => vec!["BE1", "BE2", "BE3", "BE4"],
        _ => Vec::new(),
    }
}

pub fn validate_signup(form: &SignupForm) -> Vec<String> {
    let mut errors = Vec::new();
    if form.name.trim().is_empty() {
        errors.push("Name is required".to_string());
    }
    if form.email.trim().is_empty() {
        errors.push("Email is required".to_string());
    } else if !EMAIL_RE.is_match(form.email.trim()) {
        errors.push("Please enter a valid email".to_string());
    }
    if form.id.trim().is_empty() {
        errors.push("ID is required".to_string());
    }
    if form.password.trim().is_empty() {
        errors.push("Password is required".to_string());
    } else if form.password.chars().count() < 6 {
        errors.push("Password must be at least 6 characters".to_string());
    }
    errors
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(|s| s.as_str())
        .ok_or_else(|| anyhow!("Missing argument <{}>", name))
}

fn json_arg(args: &[String]) -> Result<Value> {
    if args.is_empty() {
        bail!("Missing argument <json>");
    }
    let raw = args.join(" ");
    let value: Value = serde_json::from_str(&raw).map_err(|e| anyhow!("Invalid JSON: {}", e))?;
    if !value.is_object() {
        bail!("Expected a JSON object");
    }
    Ok(value)
}

fn semester(raw: &str) -> Result<u8> {
    match raw.parse::<u8>() {
        Ok(sem) if (3..=8).contains(&sem) => Ok(sem),
        _ => bail!("Semester must be between 3 and 8, got '{}'", raw),
    }
}

fn number(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| anyhow!("Expected a number, got '{}'", raw))
}

fn flag(raw: &str) -> Result<bool> {
    match raw {
        "true" | "yes" | "y" => Ok(true),
        "false" | "no" | "n" => Ok(false),
        other => bail!("Expected true or false, got '{}'", other),
    }
}

fn text_field(record: &Value, key: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(email: &str, name: &str, id: &str, password: &str) -> SignupForm {
        SignupForm {
            email: email.to_string(),
            name: name.to_string(),
            id: id.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_valid_signup() {
        assert!(validate_signup(&form("a@college.edu", "Asha", "S-1", "secret1")).is_empty());
    }

    #[test]
    fn test_signup_errors() {
        let errors = validate_signup(&form("not-an-email", "", " ", "12345"));
        assert_eq!(
            errors,
            vec![
                "Name is required",
                "Please enter a valid email",
                "ID is required",
                "Password must be at least 6 characters",
            ]
        );
        let errors = validate_signup(&form("", "A", "1", ""));
        assert!(errors.contains(&"Email is required".to_string()));
        assert!(errors.contains(&"Password is required".to_string()));
    }

    #[test]
    fn test_divisions_for_semester() {
        assert_eq!(divisions_for_semester(3), vec!["SE1", "SE2", "SE3", "SE4"]);
        assert_eq!(divisions_for_semester(6)[1], "TE2");
        assert_eq!(divisions_for_semester(8)[3], "BE4");
        assert!(divisions_for_semester(2).is_empty());
    }

    #[test]
    fn test_semester_bounds() {
        assert_eq!(semester("5").unwrap(), 5);
        assert!(semester("2").is_err());
        assert!(semester("9").is_err());
        assert!(semester("five").is_err());
    }

    #[test]
    fn test_submissions_link_encodes() {
        assert_eq!(
            submissions_link("CS 301", "TE2"),
            "/subject-students?subjectId=CS%20301&divisionId=TE2"
        );
        let loc = Location::parse(&submissions_link("CS 301", "TE2"));
        assert_eq!(loc.param("subjectId"), Some("CS 301"));
    }

    #[test]
    fn test_json_arg_rejects_non_objects() {
        let args: Vec<String> = vec!["[1,".to_string(), "2]".to_string()];
        assert!(json_arg(&args).is_err());
        let args: Vec<String> = vec![r#"{"id":"S-1","#.to_string(), r#""name":"A"}"#.to_string()];
        assert_eq!(json_arg(&args).unwrap()["name"], "A");
    }

    #[test]
    fn test_every_screen_lists_actions() {
        for screen in [
            Screen::Login,
            Screen::Signup,
            Screen::Dashboard,
            Screen::AddCourse,
            Screen::SubjectStudents,
            Screen::Coordinator,
            Screen::AdminDashboard,
            Screen::AdminStudents,
            Screen::AdminTeachers,
            Screen::AdminData,
            Screen::AdminEmails,
        ] {
            assert!(!screen.actions().is_empty(), "{:?}", screen);
        }
    }
}
