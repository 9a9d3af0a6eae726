use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role carried by operator tokens. Anonymous submitters never hold a token;
/// they are identified only by their opaque device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Moderator,
    Admin,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::Moderator => write!(f, "moderator"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "moderator" => Ok(UserRole::Moderator),
            "admin" => Ok(UserRole::Admin),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(operator_id: Uuid, role: UserRole, duration_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: operator_id,
            role,
            iat: now,
            exp: now + duration_secs,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// An authenticated operator (moderator or admin).
#[derive(Debug, Clone)]
pub struct Operator {
    pub id: Uuid,
    pub role: UserRole,
}

impl From<Claims> for Operator {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("ADMIN".parse::<UserRole>(), Ok(UserRole::Admin));
        assert_eq!("moderator".parse::<UserRole>(), Ok(UserRole::Moderator));
        assert!("user".parse::<UserRole>().is_err());
    }

    #[test]
    fn fresh_claims_are_not_expired() {
        let claims = Claims::new(Uuid::new_v4(), UserRole::Admin, 3600);
        assert!(!claims.is_expired());
        assert!(claims.is_admin());
    }
}
