//! Thin client for the academic administration REST API.
//!
//! Every authenticated call reads the bearer token from the [`SessionStore`]
//! at the moment it is made. A 401/403 comes back as
//! [`ApiError::Unauthorized`]; deciding to log out is the caller's job.

use crate::profile::UserProfile;
use crate::store::SessionStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not authorized (HTTP {0})")]
    Unauthorized(u16),
    #[error("API error {0}: {1}")]
    Status(u16, String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("not logged in")]
    NoSession,
    #[error("{0}")]
    Input(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_) | ApiError::NoSession)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized(code) | ApiError::Status(code, _) => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    Bytes { content_type: String, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Trait for the HTTP layer to allow mocking
pub trait HttpTransport {
    /// Any status code is a successful send; only connection problems are errors
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut req = self.agent.request(request.method, &request.url);
        for (name, value) in &request.headers {
            req = req.set(name, value);
        }

        let resp = match &request.body {
            Body::Empty => req.call(),
            Body::Json(value) => req
                .set("Content-Type", "application/json")
                .send_json(value.clone()),
            Body::Bytes { content_type, data } => {
                req.set("Content-Type", content_type).send_bytes(data)
            }
        };

        match resp {
            Ok(r) => {
                let status = r.status();
                let body = r
                    .into_string()
                    .map_err(|e| ApiError::Transport(e.to_string()))?;
                Ok(HttpResponse { status, body })
            }
            Err(ureq::Error::Status(code, r)) => Ok(HttpResponse {
                status: code,
                body: r.into_string().unwrap_or_default(),
            }),
            Err(e) => Err(ApiError::Transport(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupForm {
    pub email: String,
    pub name: String,
    pub id: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    #[serde(default)]
    pub subject_name: String,
    #[serde(default)]
    pub subject_code: String,
    #[serde(default)]
    pub semester: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Division {
    #[serde(default)]
    pub division: String,
    #[serde(default)]
    pub year: Option<Value>,
    #[serde(default)]
    pub semester: Option<i64>,
}

/// A subject taught by the current teacher in one division
#[derive(Debug, Clone, Deserialize)]
pub struct TeachingAssignment {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub subject: Subject,
    #[serde(default)]
    pub division: Division,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRow {
    pub roll_no: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ut1: Option<i64>,
    #[serde(default)]
    pub ut2: Option<i64>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub status: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionUpdate {
    pub student_id: String,
    pub subject_id: i64,
    pub ut1: i64,
    pub ut2: i64,
    pub status: bool,
    pub remark: String,
}

/// Body of a teacher update. Roles are plain tags here, unlike the
/// `{roleType}` objects the lookup returns.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TeacherUpdate {
    pub id: Value,
    pub name: String,
    pub email: String,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// One student's row in the coordinator's cross-subject view
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotRow {
    pub roll_no: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subject_statuses: BTreeMap<String, Value>,
    #[serde(default)]
    pub finalized: bool,
}

/// Bulk CSV imports accepted by the admin endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvUpload {
    Students,
    AllowedEmails,
    Divisions,
    Batches,
    Subjects,
}

impl CsvUpload {
    pub fn endpoint(&self) -> &'static str {
        match self {
            CsvUpload::Students => "/api/admin/fill-student",
            CsvUpload::AllowedEmails => "/api/admin/upload-allowed-emails",
            CsvUpload::Divisions => "/api/admin/upload-divisions",
            CsvUpload::Batches => "/api/admin/upload-batches",
            CsvUpload::Subjects => "/api/admin/upload-subjects",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "students" => Some(Self::Students),
            "emails" | "allowed-emails" => Some(Self::AllowedEmails),
            "divisions" => Some(Self::Divisions),
            "batches" => Some(Self::Batches),
            "subjects" => Some(Self::Subjects),
            _ => None,
        }
    }
}

pub struct ApiClient {
    base_url: String,
    store: SessionStore,
    transport: Box<dyn HttpTransport>,
}

impl ApiClient {
    pub fn new(base_url: &str, store: SessionStore, transport: Box<dyn HttpTransport>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
            transport,
        }
    }

    /// `Authorization` header built from the token stored right now
    pub fn auth_header(&self) -> Result<(String, String), ApiError> {
        let token = self.store.token().ok_or(ApiError::NoSession)?;
        Ok(("Authorization".to_string(), format!("Bearer {}", token)))
    }

    fn request(
        &self,
        method: &'static str,
        path: &str,
        body: Body,
        authenticated: bool,
    ) -> Result<String, ApiError> {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if authenticated {
            headers.push(self.auth_header()?);
        }
        let request = HttpRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            headers,
            body,
        };

        let resp = self.transport.send(&request)?;
        match resp.status {
            200..=299 => Ok(resp.body),
            401 | 403 => Err(ApiError::Unauthorized(resp.status)),
            code => Err(ApiError::Status(code, resp.body)),
        }
    }

    fn json<T: DeserializeOwned>(
        &self,
        method: &'static str,
        path: &str,
        body: Body,
    ) -> Result<T, ApiError> {
        let text = self.request(method, path, body, true)?;
        parse_json(&text)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let body = Body::Json(json!({ "email": email, "password": password }));
        let text = self.request("POST", "/auth/login", body, false)?;
        parse_json(&text)
    }

    pub fn signup(&self, form: &SignupForm) -> Result<String, ApiError> {
        let body = Body::Json(serde_json::to_value(form).map_err(|e| ApiError::Input(e.to_string()))?);
        self.request("POST", "/auth/signup", body, false)
    }

    pub fn fetch_subjects(&self) -> Result<Vec<TeachingAssignment>, ApiError> {
        let text = self.request("GET", "/api/teacher", Body::Empty, true)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        parse_json(&text)
    }

    /// The division the current user coordinates, if any
    pub fn fetch_coordinator_division(&self) -> Result<Option<Division>, ApiError> {
        let text = self.request("GET", "/api/teacher/coordinator", Body::Empty, true)?;
        if text.trim().is_empty() || text.trim() == "null" {
            return Ok(None);
        }
        parse_json(&text).map(Some)
    }

    pub fn fetch_semester_subjects(&self, sem: u8) -> Result<Vec<Value>, ApiError> {
        self.json("POST", "/api/teacher/form/subs", Body::Json(json!({ "sem": sem })))
    }

    pub fn add_course(&self, subject: &str, division: &str) -> Result<String, ApiError> {
        let body = Body::Json(json!({ "sub": subject, "div": division }));
        self.request("POST", "/api/teacher/form", body, true)
    }

    pub fn fetch_submissions(
        &self,
        subject_id: &str,
        division_id: &str,
    ) -> Result<Vec<SubmissionRow>, ApiError> {
        let path = format!(
            "/api/teacher/students/submissions?subjectId={}&divisionId={}",
            urlencoding::encode(subject_id),
            urlencoding::encode(division_id)
        );
        self.json("GET", &path, Body::Empty)
    }

    pub fn update_submission(&self, update: &SubmissionUpdate) -> Result<String, ApiError> {
        let body = serde_json::to_value(update).map_err(|e| ApiError::Input(e.to_string()))?;
        self.request(
            "PUT",
            "/api/teacher/students/update-student",
            Body::Json(body),
            true,
        )
    }

    pub fn fetch_pivot_submissions(&self) -> Result<Vec<PivotRow>, ApiError> {
        self.json(
            "GET",
            "/api/teacher/students/pivot-submission",
            Body::Empty,
        )
    }

    pub fn set_finalized(&self, roll_no: &str, finalized: bool) -> Result<String, ApiError> {
        let path = format!(
            "/api/teacher/students/{}/finalize",
            urlencoding::encode(roll_no)
        );
        self.request(
            "PUT",
            &path,
            Body::Json(json!({ "finalized": finalized })),
            true,
        )
    }

    pub fn find_student(&self, student_id: &str) -> Result<Value, ApiError> {
        let path = format!(
            "/api/admin/find-student?studentId={}",
            urlencoding::encode(student_id)
        );
        self.json("GET", &path, Body::Empty)
    }

    pub fn update_student(&self, student: &Value) -> Result<String, ApiError> {
        self.request(
            "PUT",
            "/api/admin/update-student",
            Body::Json(student.clone()),
            true,
        )
    }

    pub fn find_teacher(&self, teacher_id: &str) -> Result<Value, ApiError> {
        let path = format!(
            "/api/admin/find-teacher?teacherId={}",
            urlencoding::encode(teacher_id)
        );
        self.json("GET", &path, Body::Empty)
    }

    pub fn update_teacher(&self, teacher: &Value) -> Result<String, ApiError> {
        self.request(
            "PUT",
            "/api/admin/update-teacher",
            Body::Json(teacher.clone()),
            true,
        )
    }

    pub fn save_teacher(&self, update: &TeacherUpdate) -> Result<String, ApiError> {
        let body = serde_json::to_value(update).map_err(|e| ApiError::Input(e.to_string()))?;
        self.update_teacher(&body)
    }

    pub fn allow_email(&self, email: &str) -> Result<String, ApiError> {
        let path = format!("/api/admin/allow-email?email={}", urlencoding::encode(email));
        self.request("POST", &path, Body::Json(json!({})), true)
    }

    pub fn assign_coordinator(&self, division: &str, teacher_id: &str) -> Result<String, ApiError> {
        let body = Body::Json(json!({ "division": division, "teacherId": teacher_id }));
        self.request("POST", "/api/admin/assign-coordinator", body, true)
    }

    /// Upload a CSV file as the multipart field `file`
    pub fn upload_csv(&self, kind: CsvUpload, path: &Path) -> Result<String, ApiError> {
        let data = std::fs::read(path)
            .map_err(|e| ApiError::Input(format!("{}: {}", path.display(), e)))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.csv".to_string());
        let boundary = format!("acad-{}", uuid::Uuid::new_v4().simple());
        let body = Body::Bytes {
            content_type: format!("multipart/form-data; boundary={}", boundary),
            data: multipart_file(&boundary, &filename, &data),
        };
        self.request("POST", kind.endpoint(), body, true)
    }
}

fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
    serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))
}

fn multipart_file(boundary: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let filename = filename.replace('"', "");
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: text/csv\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Replays canned responses and records every request
    #[derive(Clone, Default)]
    pub struct MockTransport {
        pub requests: Rc<RefCell<Vec<HttpRequest>>>,
        responses: Rc<RefCell<VecDeque<HttpResponse>>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, status: u16, body: &str) -> &Self {
            self.responses.borrow_mut().push_back(HttpResponse {
                status,
                body: body.to_string(),
            });
            self
        }

        pub fn last(&self) -> HttpRequest {
            self.requests.borrow().last().cloned().expect("no request sent")
        }
    }

    impl HttpTransport for MockTransport {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
            self.requests.borrow_mut().push(request.clone());
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| ApiError::Transport("connection refused".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;
    use crate::profile::{profile_with_roles, TEACHER};
    use tempfile::TempDir;

    fn client() -> (ApiClient, MockTransport, SessionStore) {
        let store = SessionStore::in_memory();
        let transport = MockTransport::new();
        let api = ApiClient::new(
            "http://api.test/",
            store.clone(),
            Box::new(transport.clone()),
        );
        (api, transport, store)
    }

    #[test]
    fn test_login_sends_no_bearer() {
        let (api, transport, _) = client();
        transport.respond(
            200,
            r#"{"token":"a.b.c","user":{"id":"T-1","name":"N","email":"n@x.edu","roles":[{"roleType":"TEACHER"}]}}"#,
        );

        let resp = api.login("n@x.edu", "secret").unwrap();
        assert_eq!(resp.token, "a.b.c");
        assert!(resp.user.has_role(TEACHER));

        let req = transport.last();
        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "http://api.test/auth/login");
        assert!(req.header("authorization").is_none());
        assert_eq!(
            req.body,
            Body::Json(json!({ "email": "n@x.edu", "password": "secret" }))
        );
    }

    #[test]
    fn test_bearer_reads_current_token() {
        let (api, transport, store) = client();
        transport.respond(200, "[]").respond(200, "[]");

        store.write("first.tok.en", &profile_with_roles(&[TEACHER])).unwrap();
        api.fetch_subjects().unwrap();
        assert_eq!(
            transport.last().header("Authorization"),
            Some("Bearer first.tok.en")
        );

        store.write("second.tok.en", &profile_with_roles(&[TEACHER])).unwrap();
        api.fetch_subjects().unwrap();
        assert_eq!(
            transport.last().header("Authorization"),
            Some("Bearer second.tok.en")
        );
    }

    #[test]
    fn test_no_session_is_unauthorized_without_sending() {
        let (api, transport, _) = client();
        let err = api.fetch_subjects().unwrap_err();
        assert!(err.is_unauthorized());
        assert!(transport.requests.borrow().is_empty());
    }

    #[test]
    fn test_status_mapping() {
        let (api, transport, store) = client();
        store.write("a.b.c", &profile_with_roles(&[TEACHER])).unwrap();
        transport
            .respond(401, "expired")
            .respond(403, "")
            .respond(500, "boom")
            .respond(200, "not json");

        let e = api.fetch_pivot_submissions().unwrap_err();
        assert!(matches!(e, ApiError::Unauthorized(401)));
        let e = api.fetch_pivot_submissions().unwrap_err();
        assert!(e.is_unauthorized());
        assert_eq!(e.status(), Some(403));
        let e = api.fetch_pivot_submissions().unwrap_err();
        assert!(!e.is_unauthorized());
        assert_eq!(e.to_string(), "API error 500: boom");
        let e = api.fetch_pivot_submissions().unwrap_err();
        assert!(matches!(e, ApiError::Decode(_)));
    }

    #[test]
    fn test_transport_failure() {
        let (api, _, store) = client();
        store.write("a.b.c", &profile_with_roles(&[TEACHER])).unwrap();
        let e = api.fetch_subjects().unwrap_err();
        assert!(matches!(e, ApiError::Transport(_)));
        assert_eq!(e.status(), None);
    }

    #[test]
    fn test_query_parameters_are_encoded() {
        let (api, transport, store) = client();
        store.write("a.b.c", &profile_with_roles(&[TEACHER])).unwrap();
        transport.respond(200, "[]").respond(200, "ok");

        api.fetch_submissions("CS 301", "TE&2").unwrap();
        assert_eq!(
            transport.last().url,
            "http://api.test/api/teacher/students/submissions?subjectId=CS%20301&divisionId=TE%262"
        );

        api.allow_email("new+user@college.edu").unwrap();
        assert_eq!(
            transport.last().url,
            "http://api.test/api/admin/allow-email?email=new%2Buser%40college.edu"
        );
    }

    #[test]
    fn test_submission_rows_and_update_shape() {
        let (api, transport, store) = client();
        store.write("a.b.c", &profile_with_roles(&[TEACHER])).unwrap();
        transport
            .respond(
                200,
                r#"[{"rollNo":"21","name":"Meera","ut1":18,"ut2":null,"remark":null,"status":false}]"#,
            )
            .respond(200, "");

        let rows = api.fetch_submissions("301", "TE2").unwrap();
        assert_eq!(rows[0].roll_no, "21");
        assert_eq!(rows[0].ut1, Some(18));
        assert_eq!(rows[0].ut2, None);

        api.update_submission(&SubmissionUpdate {
            student_id: "21".to_string(),
            subject_id: 301,
            ut1: 18,
            ut2: 20,
            status: true,
            remark: "ok".to_string(),
        })
        .unwrap();
        let req = transport.last();
        assert_eq!(req.method, "PUT");
        assert_eq!(
            req.body,
            Body::Json(json!({
                "studentId": "21", "subjectId": 301, "ut1": 18, "ut2": 20,
                "status": true, "remark": "ok"
            }))
        );
    }

    #[test]
    fn test_empty_coordinator_response_is_none() {
        let (api, transport, store) = client();
        store.write("a.b.c", &profile_with_roles(&[TEACHER])).unwrap();
        transport
            .respond(200, "")
            .respond(200, r#"{"division":"TE2","year":"TE","semester":5}"#);
        assert!(api.fetch_coordinator_division().unwrap().is_none());
        let div = api.fetch_coordinator_division().unwrap().unwrap();
        assert_eq!(div.division, "TE2");
        assert_eq!(div.semester, Some(5));
    }

    #[test]
    fn test_csv_upload_is_multipart() {
        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("divisions.csv");
        std::fs::write(&csv, "division,year\nTE2,TE\n").unwrap();

        let (api, transport, store) = client();
        store.write("a.b.c", &profile_with_roles(&[TEACHER])).unwrap();
        transport.respond(200, "uploaded");

        assert_eq!(api.upload_csv(CsvUpload::Divisions, &csv).unwrap(), "uploaded");
        let req = transport.last();
        assert_eq!(req.url, "http://api.test/api/admin/upload-divisions");
        match req.body {
            Body::Bytes { content_type, data } => {
                let boundary = content_type
                    .strip_prefix("multipart/form-data; boundary=")
                    .unwrap()
                    .to_string();
                let text = String::from_utf8(data).unwrap();
                assert!(text.starts_with(&format!("--{}\r\n", boundary)));
                assert!(text.contains("name=\"file\"; filename=\"divisions.csv\""));
                assert!(text.contains("TE2,TE\n"));
                assert!(text.ends_with(&format!("--{}--\r\n", boundary)));
            }
            other => panic!("expected multipart body, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_csv_is_input_error() {
        let (api, transport, store) = client();
        store.write("a.b.c", &profile_with_roles(&[TEACHER])).unwrap();
        let e = api
            .upload_csv(CsvUpload::Students, Path::new("/no/such/file.csv"))
            .unwrap_err();
        assert!(matches!(e, ApiError::Input(_)));
        assert!(transport.requests.borrow().is_empty());
    }

    #[test]
    fn test_csv_kind_names() {
        assert_eq!(CsvUpload::from_str("Batches"), Some(CsvUpload::Batches));
        assert_eq!(CsvUpload::from_str("emails"), Some(CsvUpload::AllowedEmails));
        assert_eq!(CsvUpload::from_str("grades"), None);
        assert_eq!(CsvUpload::Students.endpoint(), "/api/admin/fill-student");
    }
}
