/*!
Structs to hold configuration data and global variables.
*/
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::{
    session::{MemoryStore, SessionStore},
    store::{
        access::{AccessTable, Credentials, RoleAccess},
        DataGateway, PgGateway,
    },
    user::Role,
};

const DEFAULT_CONNECT_STRING: &str = "host=localhost port=5432 dbname=xe connect_timeout=10";

#[derive(Deserialize)]
struct RoleFile {
    user: Option<String>,
    password: Option<String>,
    connect_string: Option<String>,
    view: Option<String>,
}

#[derive(Deserialize)]
struct ConfigFile {
    host: Option<String>,
    port: Option<u16>,
    owner: Option<String>,
    page_dir: Option<String>,
    roles: Option<HashMap<String, RoleFile>>,
}

#[derive(Debug)]
pub struct Cfg {
    pub addr: SocketAddr,
    /// Schema that owns every role's view.
    pub owner: String,
    /// Where `login.html` and `dashbord.html` live.
    pub page_dir: PathBuf,
    pub roles: HashMap<Role, RoleAccess>,
}

fn default_access(user: &str, password: &str, view: &str) -> RoleAccess {
    RoleAccess {
        credentials: Credentials {
            user: user.to_owned(),
            password: password.to_owned(),
            connect_string: DEFAULT_CONNECT_STRING.to_owned(),
        },
        view: view.to_owned(),
    }
}

impl std::default::Default for Cfg {
    fn default() -> Self {
        let roles: HashMap<Role, RoleAccess> = [
            (Role::Manager, default_access("manager_user", "Manager123", "club_manager_view")),
            (Role::Agent,   default_access("agent_user",   "Agent123",   "player_agent_view")),
            (Role::Analyst, default_access("analyst_user", "Analyst123", "match_analyst_view")),
        ].into_iter().collect();

        Self {
            addr: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                3002
            ),
            owner: "halimrm".to_owned(),
            page_dir: PathBuf::from("data"),
            roles,
        }
    }
}

impl Cfg {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let file_contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Unable to read config file: {}", &e))?;
        Cfg::from_toml(&file_contents)
    }

    /// Defaults, overridden by whatever the TOML text in `s` specifies.
    pub fn from_toml(s: &str) -> Result<Self, String> {
        let cf: ConfigFile = toml::from_str(s)
            .map_err(|e| format!("Unable to deserialize config file: {}", &e))?;

        let mut c = Self::default();

        if let Some(s) = cf.host {
            c.addr.set_ip(
                s.parse().map_err(|e| format!(
                    "Error parsing {:?} as IP address: {}",
                    &s, &e
                ))?
            );
        }
        if let Some(n) = cf.port {
            c.addr.set_port(n);
        }
        if let Some(s) = cf.owner {
            c.owner = s;
        }
        if let Some(s) = cf.page_dir {
            c.page_dir = PathBuf::from(s);
        }

        for (role_str, rf) in cf.roles.unwrap_or_default().into_iter() {
            let role: Role = role_str.parse()
                .map_err(|e| format!("In [roles] section: {}", &e))?;
            // Every role has a default entry, so this is always Some.
            if let Some(access) = c.roles.get_mut(&role) {
                if let Some(s) = rf.user {
                    access.credentials.user = s;
                }
                if let Some(s) = rf.password {
                    access.credentials.password = s;
                }
                if let Some(s) = rf.connect_string {
                    access.credentials.connect_string = s;
                }
                if let Some(s) = rf.view {
                    access.view = s;
                }
            }
        }

        c.access_table()?;
        Ok(c)
    }

    pub fn access_table(&self) -> Result<AccessTable, String> {
        AccessTable::new(self.owner.clone(), self.roles.clone())
    }
}

/**
This guy hauls around the state every handler needs, and is passed in an
`axum::Extension`.
*/
pub struct Glob {
    pub page_dir: PathBuf,
    pub sessions: Arc<dyn SessionStore>,
    pub gateway: Arc<dyn DataGateway>,
}

impl Glob {
    pub fn new(
        page_dir: PathBuf,
        sessions: Arc<dyn SessionStore>,
        gateway: Arc<dyn DataGateway>,
    ) -> Self {
        Self { page_dir, sessions, gateway }
    }
}

impl std::fmt::Debug for Glob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Glob")
            .field("page_dir", &self.page_dir)
            .finish_non_exhaustive()
    }
}

/// Global state for production: in-memory sessions, Postgres views.
pub fn load_configuration(cfg: &Cfg) -> Result<Arc<Glob>, String> {
    log::trace!("load_configuration( ... ) called.");

    let table = cfg.access_table()?;
    let gateway = PgGateway::new(table);

    let glob = Glob::new(
        cfg.page_dir.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(gateway),
    );

    Ok(Arc::new(glob))
}
