//! Request identity types populated by the server middleware.

use serde::{Deserialize, Serialize};

/// Rate-limit class of a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserClass {
    Anonymous,
    User,
    Premium,
}

/// Typed identity extracted from inbound request headers.
#[derive(Debug, Clone, Default)]
pub struct RequestUser {
    /// User id from X-User-Id, if present.
    pub id: Option<String>,
    /// User email from X-User-Email, if present.
    pub email: Option<String>,
    /// Whether the request authenticated with the shared API key.
    pub is_api_key: bool,
    /// Whether the user is on a premium plan.
    pub premium: bool,
    /// Client IP resolved from forwarded headers or the socket peer.
    pub client_ip: String,
}

impl RequestUser {
    /// Rate-limit class for this caller.
    pub fn class(&self) -> UserClass {
        match (&self.id, self.premium) {
            (Some(_), true) => UserClass::Premium,
            (Some(_), false) => UserClass::User,
            (None, _) => UserClass::Anonymous,
        }
    }

    /// Rate-limit identifier: `user:<id>` when authenticated, else
    /// `ip:<client_ip>`.
    pub fn rate_identifier(&self) -> String {
        match &self.id {
            Some(id) => format!("user:{}", id),
            None => format!("ip:{}", self.client_ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_prefers_user_id() {
        let user = RequestUser {
            id: Some("u-42".into()),
            client_ip: "10.0.0.1".into(),
            ..Default::default()
        };
        assert_eq!(user.rate_identifier(), "user:u-42");
        assert_eq!(user.class(), UserClass::User);
    }

    #[test]
    fn test_anonymous_falls_back_to_ip() {
        let user = RequestUser {
            client_ip: "203.0.113.9".into(),
            ..Default::default()
        };
        assert_eq!(user.rate_identifier(), "ip:203.0.113.9");
        assert_eq!(user.class(), UserClass::Anonymous);
    }
}
