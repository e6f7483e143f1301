//! Member roles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a user inside one organization.
///
/// Variants are declared from least to most privileged so the derived
/// ordering is the privilege ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only access
    Viewer,
    /// Can edit budget data
    Manager,
    /// Can manage the organization and its members
    Admin,
}

impl Role {
    /// Whether this role grants the permissions of `required`
    pub fn allows(self, required: Role) -> bool {
        self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Role::Admin > Role::Manager);
        assert!(Role::Manager > Role::Viewer);
        assert!(Role::Admin.allows(Role::Viewer));
        assert!(!Role::Viewer.allows(Role::Admin));
    }

    #[test]
    fn test_parse() {
        assert_eq!("Admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(" viewer ".parse::<Role>(), Ok(Role::Viewer));
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for role in [Role::Viewer, Role::Manager, Role::Admin] {
            assert_eq!(role.to_string().parse::<Role>(), Ok(role));
        }
    }
}
