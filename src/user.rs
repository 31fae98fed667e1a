/*!
Portal users and the roles they log in as.
*/
use serde::{Deserialize, Serialize};

use crate::error::PortalError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Manager,
    Agent,
    Analyst,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Manager, Role::Agent, Role::Analyst];
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Role::Manager => "Manager",
            Role::Agent   => "Agent",
            Role::Analyst => "Analyst",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Role {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Manager" => Ok(Role::Manager),
            "Agent"   => Ok(Role::Agent),
            "Analyst" => Ok(Role::Analyst),
            _ => Err(PortalError::UnknownRole(s.to_owned())),
        }
    }
}

/// Substrings searched for in a username, in priority order.
static ROLE_PATTERNS: &[(&str, Role)] = &[
    ("manager", Role::Manager),
    ("agent",   Role::Agent),
    ("analyst", Role::Analyst),
];

/**
Determine the `Role` a username logs in as.

The first pattern of `ROLE_PATTERNS` found anywhere in `uname`
(case-sensitive) wins, so `"manager_agent"` is a `Manager`.

There is no password here. Passwords are not part of deciding who gets
in; any password goes.
*/
pub fn classify(uname: &str) -> Result<Role, PortalError> {
    log::trace!("classify( {:?} ) called.", uname);

    ROLE_PATTERNS.iter()
        .find(|(pat, _)| uname.contains(pat))
        .map(|(_, role)| *role)
        .ok_or(PortalError::InvalidUsername)
}

/// What the session store holds for a logged-in client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub role: Role,
    #[serde(rename = "loggedIn")]
    pub logged_in: bool,
}

impl UserRecord {
    pub fn new(username: String, role: Role) -> Self {
        Self { username, role, logged_in: true }
    }
}
