use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Customer,
    Consultant,
    Staff,
    Admin,
}

impl UserRole {
    /// Staff and admin bypass ownership checks and time-window guards.
    pub fn is_privileged(&self) -> bool {
        matches!(self, UserRole::Staff | UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UserRole::Customer => write!(f, "customer"),
            UserRole::Consultant => write!(f, "consultant"),
            UserRole::Staff => write!(f, "staff"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(UserRole::Customer),
            "consultant" => Ok(UserRole::Consultant),
            "staff" => Ok(UserRole::Staff),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Already-authenticated caller identity handed to every controller operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: UserRole,
    pub name: Option<String>,
}

impl Actor {
    pub fn new(user_id: Uuid, role: UserRole) -> Self {
        Self { user_id, role, name: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }

    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.role.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_staff_and_admin_are_privileged() {
        assert!(!UserRole::Customer.is_privileged());
        assert!(!UserRole::Consultant.is_privileged());
        assert!(UserRole::Staff.is_privileged());
        assert!(UserRole::Admin.is_privileged());
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Consultant".parse::<UserRole>(), Ok(UserRole::Consultant));
        assert!("doctor".parse::<UserRole>().is_err());
    }

    #[test]
    fn role_serializes_snake_case() {
        let json = serde_json::to_string(&UserRole::Staff).unwrap();
        assert_eq!(json, "\"staff\"");
    }
}
