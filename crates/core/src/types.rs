use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Free-form event metadata (interaction ids, ticket ids, flags).
pub type Metadata = HashMap<String, serde_json::Value>;

/// A known user of the platform, as seen by the user directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub email: String,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
        }
    }

    pub fn belongs_to(&self, domain_id: &str) -> bool {
        email_in_domain(&self.email, domain_id)
    }
}

/// Domain part of an email address, lowercased.
pub fn email_domain(email: &str) -> Option<String> {
    let (local, domain) = email.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some(domain.to_ascii_lowercase())
}

/// Domain membership is derived from the user's email address.
pub fn email_in_domain(email: &str, domain_id: &str) -> bool {
    email_domain(email)
        .map(|d| d == domain_id.to_ascii_lowercase())
        .unwrap_or(false)
}

/// Read a boolean flag from metadata, accepting both snake_case and the
/// camelCase spelling older clients send.
pub fn metadata_flag(metadata: &Metadata, key: &str) -> bool {
    let camel = snake_to_camel(key);
    metadata
        .get(key)
        .or_else(|| metadata.get(&camel))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_domain() {
        assert_eq!(email_domain("ana@Acme.cl"), Some("acme.cl".to_string()));
        assert_eq!(email_domain("no-at-sign"), None);
        assert_eq!(email_domain("@acme.cl"), None);
    }

    #[test]
    fn test_domain_membership() {
        let user = UserIdentity::new("u1", "ana@acme.cl");
        assert!(user.belongs_to("acme.cl"));
        assert!(user.belongs_to("ACME.CL"));
        assert!(!user.belongs_to("acme.com"));
        assert!(!UserIdentity::new("u2", "bob@sub.acme.cl").belongs_to("acme.cl"));
    }

    #[test]
    fn test_metadata_flag_spellings() {
        let mut metadata = Metadata::new();
        metadata.insert("aiAssisted".into(), serde_json::json!(true));
        assert!(metadata_flag(&metadata, "ai_assisted"));

        let mut metadata = Metadata::new();
        metadata.insert("ai_assisted".into(), serde_json::json!("yes"));
        assert!(!metadata_flag(&metadata, "ai_assisted"));
    }
}
