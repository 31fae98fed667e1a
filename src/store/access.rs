/*!
Which database login, and which view, belongs to which `Role`.

Both answers come out of the same `RoleAccess` entry, so a role can never
be handed one role's credentials and another role's view.
*/
use std::collections::HashMap;

use serde::Deserialize;

use crate::error::PortalError;
use crate::user::Role;

#[derive(Clone, Deserialize, PartialEq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    /// `tokio_postgres` key=value connection string, minus user and password.
    pub connect_string: String,
}

// Hand-rolled so passwords stay out of the logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"********")
            .field("connect_string", &self.connect_string)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoleAccess {
    pub credentials: Credentials,
    pub view: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AccessTable {
    owner: String,
    entries: HashMap<Role, RoleAccess>,
}

impl AccessTable {
    /**
    Build a table of `entries` for views owned by schema `owner`.

    Fails if `owner` or any view name isn't a plain SQL identifier; those
    get spliced straight into the query text.
    */
    pub fn new(
        owner: String,
        entries: HashMap<Role, RoleAccess>
    ) -> Result<Self, String> {
        log::trace!("AccessTable::new( {:?}, [ {} entries ] ) called.", &owner, entries.len());

        if !is_identifier(&owner) {
            return Err(format!("{:?} is not a valid schema owner name.", &owner));
        }
        for (role, access) in entries.iter() {
            if !is_identifier(&access.view) {
                return Err(format!(
                    "{:?} is not a valid view name (role {}).",
                    &access.view, role
                ));
            }
        }

        Ok(Self { owner, entries })
    }

    pub fn owner(&self) -> &str { &self.owner }

    fn entry(&self, role: Role) -> Result<&RoleAccess, PortalError> {
        self.entries.get(&role)
            .ok_or_else(|| PortalError::UnknownRole(role.to_string()))
    }

    /// Database login credentials for `role`.
    pub fn resolve(&self, role: Role) -> Result<&Credentials, PortalError> {
        self.entry(role).map(|a| &a.credentials)
    }

    /// Name of the view `role` reads from.
    pub fn route_for(&self, role: Role) -> Result<&str, PortalError> {
        self.entry(role).map(|a| a.view.as_str())
    }

    /// Credentials and fully-qualified `SELECT` for `role`, from one entry.
    pub fn query_for(&self, role: Role) -> Result<(&Credentials, String), PortalError> {
        let access = self.entry(role)?;
        let query = format!("SELECT * FROM {}.{}", &self.owner, &access.view);
        Ok((&access.credentials, query))
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => { return false; },
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
