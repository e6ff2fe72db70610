//! User profile as returned by the login endpoint and persisted with the session.

use serde::{Deserialize, Deserializer, Serialize};

pub const ADMIN: &str = "ADMIN";
pub const TEACHER: &str = "TEACHER";
pub const CLASS_COORDINATOR: &str = "CLASS_COORDINATOR";

/// One role held by a user. Tags outside the known set are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    pub role_type: String,
}

impl RoleAssignment {
    pub fn new(role_type: &str) -> Self {
        Self {
            role_type: role_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub roles: Vec<RoleAssignment>,
}

impl UserProfile {
    pub fn has_role(&self, tag: &str) -> bool {
        has_role(self, tag)
    }

    pub fn is_admin(&self) -> bool {
        has_role(self, ADMIN)
    }

    pub fn role_tags(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.role_type.as_str()).collect()
    }
}

/// Role membership is decided by the presence of a matching tag in the full set.
pub fn has_role(profile: &UserProfile, tag: &str) -> bool {
    profile.roles.iter().any(|r| r.role_type == tag)
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Int(n) => n.to_string(),
        Id::Float(n) => n.to_string(),
    })
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<RoleAssignment>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<RoleAssignment>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
pub(crate) fn profile_with_roles(tags: &[&str]) -> UserProfile {
    UserProfile {
        id: "T-100".to_string(),
        name: "Asha Rao".to_string(),
        email: "asha@college.edu".to_string(),
        roles: tags.iter().map(|t| RoleAssignment::new(t)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_has_role_checks_every_assignment() {
        let p = profile_with_roles(&[TEACHER, CLASS_COORDINATOR]);
        assert!(p.has_role(TEACHER));
        assert!(p.has_role(CLASS_COORDINATOR));
        assert!(!p.has_role(ADMIN));
        assert!(!p.is_admin());
    }

    #[test]
    fn test_admin_alongside_other_roles() {
        let p = profile_with_roles(&[TEACHER, ADMIN]);
        assert!(p.is_admin());
        assert!(has_role(&p, TEACHER));
    }

    #[test]
    fn test_role_match_is_exact() {
        let p = profile_with_roles(&["admin", "ADMINISTRATOR"]);
        assert!(!p.is_admin());
    }

    #[test]
    fn test_deserialize_login_shape() {
        let p: UserProfile = serde_json::from_value(json!({
            "id": "S-7",
            "name": "Ravi",
            "email": "ravi@college.edu",
            "roles": [{"roleType": "TEACHER"}, {"roleType": "LIBRARIAN"}],
            "department": "CS"
        }))
        .unwrap();
        assert_eq!(p.id, "S-7");
        assert_eq!(p.role_tags(), vec!["TEACHER", "LIBRARIAN"]);
    }

    #[test]
    fn test_numeric_id_and_null_roles() {
        let p: UserProfile = serde_json::from_value(json!({
            "id": 42,
            "name": "Ravi",
            "email": "ravi@college.edu",
            "roles": null
        }))
        .unwrap();
        assert_eq!(p.id, "42");
        assert!(p.roles.is_empty());
    }

    #[test]
    fn test_serializes_camel_case_role_type() {
        let p = profile_with_roles(&[ADMIN]);
        let value = serde_json::to_value(&p).unwrap();
        assert_eq!(value["roles"][0]["roleType"], "ADMIN");
    }
}
