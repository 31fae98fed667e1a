/*!
Database interaction module.

Each role reads exactly one view, through its own database login. The
views are expected to exist already, owned by a single schema; the
portal never creates or alters anything:

```sql
CREATE VIEW halimrm.club_manager_view  AS ...;
CREATE VIEW halimrm.player_agent_view  AS ...;
CREATE VIEW halimrm.match_analyst_view AS ...;

GRANT USAGE ON SCHEMA halimrm TO manager_user, agent_user, analyst_user;
GRANT SELECT ON halimrm.club_manager_view  TO manager_user;
GRANT SELECT ON halimrm.player_agent_view  TO agent_user;
GRANT SELECT ON halimrm.match_analyst_view TO analyst_user;
```

Connections are not pooled. Every fetch opens one with the role's
credentials and closes it again before returning, whatever happened in
between.
*/
use std::fmt::Write;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};

use crate::error::PortalError;
use crate::user::Role;

pub mod access;
pub mod rows;

use access::{AccessTable, Credentials};
use rows::{normalize, ColumnMeta, Row};

/// Which step of a fetch went wrong.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Stage {
    Configure,
    Connect,
    Query,
    Normalize,
}

/**
Any failure to get rows out of a view.

`Display` is the underlying message only, since that goes to the client
verbatim; the `Stage` is for the logs.
*/
#[derive(Debug, PartialEq)]
pub struct DataAccessError {
    stage: Stage,
    message: String,
}

impl DataAccessError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self { stage, message: message.into() }
    }

    /// For `.map_err()`ing a driver error that happened during `stage`.
    fn postgres(stage: Stage) -> impl Fn(tokio_postgres::Error) -> Self {
        move |e| Self::new(stage, error_chain(&e))
    }

    pub fn stage(&self) -> Stage { self.stage }

    pub fn message(&self) -> &str { &self.message }
}

impl std::fmt::Display for DataAccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", &self.message)
    }
}

impl std::error::Error for DataAccessError {}

/**
`e`'s message followed by those of all its causes.

`tokio_postgres::Error` only shows its kind ("error connecting to
server"); what actually happened is down the `source()` chain.
*/
pub fn error_chain(e: &dyn std::error::Error) -> String {
    let mut s = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let _ = write!(&mut s, ": {}", cause);
        source = cause.source();
    }
    s
}

/// Where `/api/data` gets its rows.
#[async_trait]
pub trait DataGateway: Send + Sync {
    /// All rows of the view belonging to `role`.
    async fn fetch(&self, role: Role) -> Result<Vec<Row>, PortalError>;
}

pub struct PgGateway {
    table: AccessTable,
}

type ConnectionTask = JoinHandle<Result<(), tokio_postgres::Error>>;

impl PgGateway {
    pub fn new(table: AccessTable) -> Self {
        log::trace!("PgGateway::new( {:?} ) called.", &table);
        Self { table }
    }

    async fn connect(
        &self,
        creds: &Credentials
    ) -> Result<(Client, ConnectionTask), DataAccessError> {
        log::trace!("PgGateway::connect( {:?} ) called.", creds);

        let mut pg_cfg: tokio_postgres::Config = creds.connect_string.parse()
            .map_err(DataAccessError::postgres(Stage::Configure))?;
        pg_cfg.user(&creds.user).password(&creds.password);

        match pg_cfg.connect(NoTls).await {
            Ok((client, connection)) => {
                log::trace!("    ...connection successful.");
                let task = tokio::spawn(connection);
                Ok((client, task))
            },
            Err(e) => {
                let dberr = DataAccessError::postgres(Stage::Connect)(e);
                log::trace!("    ...connection failed: {:?}", &dberr);
                Err(dberr)
            },
        }
    }

    /// Close the connection and wait for its driver task to wind down.
    ///
    /// Anything that goes wrong here is only logged.
    async fn release(client: Client, task: ConnectionTask) {
        drop(client);
        match task.await {
            Ok(Ok(())) => { log::trace!("Connection closed."); },
            Ok(Err(e)) => {
                log::error!("Error closing connection: {}", &error_chain(&e));
            },
            Err(e) => {
                log::error!("Connection task failed to finish: {}", &e);
            },
        }
    }
}

/// Run `query` and normalize every record it returns.
async fn read_view(client: &Client, query: &str) -> Result<Vec<Row>, DataAccessError> {
    log::trace!("read_view( [ Client ], {:?} ) called.", query);

    let stmt = client.prepare(query).await
        .map_err(DataAccessError::postgres(Stage::Query))?;
    let columns: Vec<ColumnMeta> = stmt.columns().iter()
        .map(ColumnMeta::from_column)
        .collect();

    let messages = client.simple_query(query).await
        .map_err(DataAccessError::postgres(Stage::Query))?;

    let mut rows: Vec<Row> = Vec::new();
    for msg in messages.iter() {
        if let SimpleQueryMessage::Row(r) = msg {
            let values: Vec<Option<&str>> = (0..r.len())
                .map(|n| r.get(n))
                .collect();
            rows.push(normalize(&columns, &values)?);
        }
    }

    log::trace!("    ...read_view() returning {} rows.", rows.len());
    Ok(rows)
}

#[async_trait]
impl DataGateway for PgGateway {
    async fn fetch(&self, role: Role) -> Result<Vec<Row>, PortalError> {
        log::trace!("PgGateway::fetch( {} ) called.", &role);

        let (creds, query) = self.table.query_for(role)?;
        let (client, task) = self.connect(creds).await?;

        let res = read_view(&client, &query).await;
        PgGateway::release(client, task).await;

        match res {
            Ok(rows) => Ok(rows),
            Err(e) => {
                log::error!("Error reading view for {} ({:?}): {}", &role, e.stage(), &e);
                Err(e.into())
            },
        }
    }
}
