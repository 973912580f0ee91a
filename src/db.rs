use crate::{
    error::EngineError,
    model::{
        analyses::AnalysisNodeRole, Analysis, ControlPath, Edge, EdgeEndpoint, EdgeRole,
        EntityKind, FieldValue, Id, Network, Node, NodeCollection, Path as ResultPath,
        GENERIC_DATABASE_TYPE_ID,
    },
};
use futures_core::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{MigrateDatabase, Migration as SqlxMigration, MigrationSource, Migrator},
    pool::PoolOptions,
    query_builder::Separated,
    sqlite::{Sqlite, SqliteConnectOptions, SqliteRow},
    ConnectOptions, FromRow, Row,
};
use sqlx::{migrate::MigrationType, Pool, QueryBuilder};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    path::PathBuf,
    result::Result,
    str::FromStr,
};

/// <https://www.sqlite.org/limits.html#max_variable_number>
pub const SQLITE_LIMIT_VARIABLE_NUMBER: usize = 32766;

/// A single bindable column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Bool(bool),
}

impl SqlValue {
    fn push_to(self, qb: &mut QueryBuilder<'static, Sqlite>) {
        match self {
            SqlValue::Null => qb.push_bind(None::<String>),
            SqlValue::Text(value) => qb.push_bind(value),
            SqlValue::Integer(value) => qb.push_bind(value),
            SqlValue::Bool(value) => qb.push_bind(value),
        };
    }

    fn push_separated<Sep: Display>(self, b: &mut Separated<'_, 'static, Sqlite, Sep>) {
        match self {
            SqlValue::Null => b.push_bind(None::<String>),
            SqlValue::Text(value) => b.push_bind(value),
            SqlValue::Integer(value) => b.push_bind(value),
            SqlValue::Bool(value) => b.push_bind(value),
        };
    }
}

impl From<&Id> for SqlValue {
    fn from(value: &Id) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<Id> for SqlValue {
    fn from(value: Id) -> Self {
        SqlValue::Text(value.into())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map(SqlValue::Text).unwrap_or(SqlValue::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(value: Option<i64>) -> Self {
        value.map(SqlValue::Integer).unwrap_or(SqlValue::Null)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

#[derive(Debug)]
struct InsertGroup {
    table: &'static str,
    columns: Vec<&'static str>,
    rows: Vec<Vec<SqlValue>>,
}

/// Statements staged for one durable commit.
///
/// Free-form statements (updates, deletes) run first in staging order, then buffered rows are
/// written as multi-row inserts, one table at a time in order of first appearance, so parents
/// staged before their children are inserted before them.
pub struct Transaction {
    statements: Vec<QueryBuilder<'static, Sqlite>>,
    inserts: Vec<InsertGroup>,
    pub staged: usize,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Transaction {
        Transaction {
            statements: Vec::new(),
            inserts: Vec::new(),
            staged: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.inserts.is_empty()
    }

    /// Executes everything staged inside one store transaction and returns the number of rows the
    /// free-form statements affected. Nothing is written if any statement fails.
    pub async fn execute(&mut self, connection: &Pool<Sqlite>) -> Result<u64, EngineError> {
        if self.is_empty() {
            return Ok(0);
        }
        let mut tx = connection.begin().await?;
        let mut affected = 0;
        for mut qb in self.statements.drain(..) {
            let sql = qb.sql().to_string();
            let result = qb.build().execute(&mut *tx).await.map_err(|e| {
                tracing::error!(
                    "[Transaction.execute] SQL error processing statement '{}'\n\terror: {}",
                    sql,
                    e
                );
                e
            })?;
            affected += result.rows_affected();
        }

        for group in self.inserts.drain(..) {
            let rows_per_statement = (SQLITE_LIMIT_VARIABLE_NUMBER / group.columns.len().max(1)).max(1);
            let mut rows = group.rows.into_iter().peekable();
            while rows.peek().is_some() {
                let chunk = rows.by_ref().take(rows_per_statement).collect::<Vec<_>>();
                let mut qb = QueryBuilder::<Sqlite>::new(format!(
                    "INSERT INTO {} ({}) ",
                    group.table,
                    group.columns.join(", ")
                ));
                qb.push_values(chunk, |mut b, row| {
                    for value in row {
                        value.push_separated(&mut b);
                    }
                });
                let sql = qb.sql().to_string();
                qb.build().execute(&mut *tx).await.map_err(|e| {
                    tracing::error!(
                        "[Transaction.execute] SQL error inserting into {}: '{}'\n\terror: {}",
                        group.table,
                        sql,
                        e
                    );
                    e
                })?;
            }
        }
        tx.commit().await?;
        tracing::debug!("[Transaction] committed {} staged item(s)", self.staged);
        self.staged = 0;
        Ok(affected)
    }

    /// Stages a free-form statement.
    pub fn push(&mut self, qb: QueryBuilder<'static, Sqlite>) {
        self.statements.push(qb);
        self.staged += 1;
    }

    pub fn insert_row(&mut self, table: &'static str, columns: &[&'static str], row: Vec<SqlValue>) {
        match self
            .inserts
            .iter_mut()
            .find(|group| group.table == table && group.columns == columns)
        {
            Some(group) => group.rows.push(row),
            None => self.inserts.push(InsertGroup {
                table,
                columns: columns.to_vec(),
                rows: vec![row],
            }),
        }
        self.staged += 1;
    }

    /// Stages one join row per id, pairing each with the owning entity.
    pub fn link<'i>(
        &mut self,
        table: &'static str,
        owner: (&'static str, &Id),
        column: &'static str,
        ids: impl IntoIterator<Item = &'i Id>,
    ) {
        let (owner_column, owner_id) = owner;
        for id in ids {
            self.insert_row(table, &[owner_column, column], vec![owner_id.into(), id.into()]);
        }
    }

    pub fn update_row(&mut self, table: &'static str, id: &Id, values: Vec<(&'static str, SqlValue)>) {
        if values.is_empty() {
            return;
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!("UPDATE {table} SET "));
        for (idx, (column, value)) in values.into_iter().enumerate() {
            if idx > 0 {
                qb.push(", ");
            }
            qb.push(column).push(" = ");
            value.push_to(&mut qb);
        }
        qb.push(" WHERE id = ").push_bind(id.to_string());
        self.push(qb);
    }

    pub fn delete_where_in(&mut self, table: &'static str, column: &'static str, ids: &[Id]) {
        for window in ids.chunks(SQLITE_LIMIT_VARIABLE_NUMBER) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!("DELETE FROM {table} WHERE "));
            push_id_list(&mut qb, column, window);
            self.push(qb);
        }
    }
}

/// Pushes `column IN (?, ?, ...)`, or a false predicate when `ids` is empty. Callers keep `ids`
/// under [`SQLITE_LIMIT_VARIABLE_NUMBER`].
pub fn push_id_list<'args>(qb: &mut QueryBuilder<'args, Sqlite>, column: &str, ids: &[Id]) {
    if ids.is_empty() {
        qb.push("0");
        return;
    }
    qb.push(column).push(" IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");
}

#[derive(Debug, Clone)]
pub struct DbConnection(pub Pool<Sqlite>);

impl DbConnection {
    /// The subset of `ids` that currently exist as entities of `kind`.
    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn existing_ids(
        &self,
        kind: EntityKind,
        ids: &[Id],
    ) -> Result<BTreeSet<Id>, EngineError> {
        let mut found = BTreeSet::new();
        for window in ids.chunks(SQLITE_LIMIT_VARIABLE_NUMBER) {
            let mut qb =
                QueryBuilder::<Sqlite>::new(format!("SELECT id FROM {} WHERE ", kind.table()));
            push_id_list(&mut qb, "id", window);
            let rows = qb
                .build_query_scalar::<String>()
                .fetch_all(&self.0)
                .await
                .map_err(|e| {
                    tracing::error!(
                        "[DbConnection.existing_ids] SQL error looking up {} ids\n\terror: {}",
                        kind,
                        e
                    );
                    e
                })?;
            found.extend(rows.into_iter().map(Id::from));
        }
        Ok(found)
    }

    pub async fn count(&self, kind: EntityKind) -> Result<usize, EngineError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", kind.table()))
            .fetch_one(&self.0)
            .await?;
        Ok(count as usize)
    }

    pub async fn ids(&self, kind: EntityKind) -> Result<Vec<Id>, EngineError> {
        let rows: Vec<String> =
            sqlx::query_scalar(&format!("SELECT id FROM {} ORDER BY id", kind.table()))
                .fetch_all(&self.0)
                .await?;
        Ok(rows.into_iter().map(Id::from).collect())
    }

    /// Entity counts per kind.
    pub async fn stats(&self) -> Result<BTreeMap<EntityKind, usize>, EngineError> {
        let mut stats = BTreeMap::new();
        for kind in EntityKind::all() {
            stats.insert(kind, self.count(kind).await?);
        }
        Ok(stats)
    }

    /// Ids on the `column` side of a join table for one owner.
    pub async fn linked_ids(
        &self,
        table: &str,
        owner_column: &str,
        owner: &Id,
        column: &str,
    ) -> Result<BTreeSet<Id>, EngineError> {
        let rows: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT {column} FROM {table} WHERE {owner_column} = ?"
        ))
        .bind(owner.to_string())
        .fetch_all(&self.0)
        .await?;
        Ok(rows.into_iter().map(Id::from).collect())
    }

    /// One entity row, without its associations.
    pub async fn get_row<T>(&self, kind: EntityKind, id: &Id) -> Result<Option<T>, EngineError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let row = sqlx::query_as::<_, T>(&format!("SELECT * FROM {} WHERE id = ?", kind.table()))
            .bind(id.to_string())
            .fetch_optional(&self.0)
            .await?;
        Ok(row)
    }

    async fn field_values(&self, table: &str, owner_column: &str, owner: &Id) -> Result<Vec<FieldValue>, EngineError> {
        let rows = sqlx::query_as::<_, (String, String)>(&format!(
            "SELECT database_field_id, value FROM {table} WHERE {owner_column} = ? ORDER BY database_field_id"
        ))
        .bind(owner.to_string())
        .fetch_all(&self.0)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(field_id, value)| FieldValue {
                field_id: Id::from(field_id),
                value,
            })
            .collect())
    }

    pub async fn get_node(&self, id: &Id) -> Result<Option<Node>, EngineError> {
        let Some(mut node) = self.get_row::<Node>(EntityKind::Node, id).await? else {
            return Ok(None);
        };
        node.fields = self.field_values("node_fields", "node_id", id).await?;
        node.database_ids = self
            .linked_ids("database_nodes", "node_id", id, "database_id")
            .await?;
        Ok(Some(node))
    }

    pub async fn get_edge(&self, id: &Id) -> Result<Option<Edge>, EngineError> {
        let Some(mut edge) = self.get_row::<Edge>(EntityKind::Edge, id).await? else {
            return Ok(None);
        };
        let endpoints = sqlx::query_as::<_, (String, String)>(
            "SELECT node_id, role FROM edge_nodes WHERE edge_id = ? ORDER BY role DESC, node_id",
        )
        .bind(id.to_string())
        .fetch_all(&self.0)
        .await?;
        for (node_id, role) in endpoints {
            edge.endpoints.push(EdgeEndpoint {
                node_id: Id::from(node_id),
                role: EdgeRole::try_from(role.as_str())?,
            });
        }
        edge.fields = self.field_values("edge_fields", "edge_id", id).await?;
        edge.database_ids = self
            .linked_ids("database_edges", "edge_id", id, "database_id")
            .await?;
        Ok(Some(edge))
    }

    pub async fn get_node_collection(&self, id: &Id) -> Result<Option<NodeCollection>, EngineError> {
        let Some(mut collection) = self
            .get_row::<NodeCollection>(EntityKind::NodeCollection, id)
            .await?
        else {
            return Ok(None);
        };
        collection.node_ids = self
            .linked_ids("node_collection_nodes", "node_collection_id", id, "node_id")
            .await?;
        collection.database_ids = self
            .linked_ids("node_collection_databases", "node_collection_id", id, "database_id")
            .await?;
        Ok(Some(collection))
    }

    pub async fn get_network(&self, id: &Id) -> Result<Option<Network>, EngineError> {
        let Some(mut network) = self.get_row::<Network>(EntityKind::Network, id).await? else {
            return Ok(None);
        };
        network.user_ids = self.linked_ids("network_users", "network_id", id, "user_id").await?;
        network.database_ids = self
            .linked_ids("network_databases", "network_id", id, "database_id")
            .await?;
        network.node_ids = self.linked_ids("network_nodes", "network_id", id, "node_id").await?;
        network.edge_ids = self.linked_ids("network_edges", "network_id", id, "edge_id").await?;
        network.node_collection_ids = self
            .linked_ids("network_node_collections", "network_id", id, "node_collection_id")
            .await?;
        Ok(Some(network))
    }

    async fn roles(
        &self,
        table: &str,
        column: &str,
        analysis: &Id,
    ) -> Result<BTreeMap<Id, AnalysisNodeRole>, EngineError> {
        let rows = sqlx::query_as::<_, (String, String)>(&format!(
            "SELECT {column}, role FROM {table} WHERE analysis_id = ?"
        ))
        .bind(analysis.to_string())
        .fetch_all(&self.0)
        .await?;
        rows.into_iter()
            .map(|(id, role)| Ok((Id::from(id), AnalysisNodeRole::try_from(role.as_str())?)))
            .collect()
    }

    pub async fn get_analysis(&self, id: &Id) -> Result<Option<Analysis>, EngineError> {
        let Some(mut analysis) = self.get_row::<Analysis>(EntityKind::Analysis, id).await? else {
            return Ok(None);
        };
        analysis.user_ids = self.linked_ids("analysis_users", "analysis_id", id, "user_id").await?;
        analysis.network_ids = self
            .linked_ids("analysis_networks", "analysis_id", id, "network_id")
            .await?;
        analysis.edge_ids = self.linked_ids("analysis_edges", "analysis_id", id, "edge_id").await?;
        analysis.nodes = self.roles("analysis_nodes", "node_id", id).await?;
        analysis.node_collections = self
            .roles("analysis_node_collections", "node_collection_id", id)
            .await?;
        Ok(Some(analysis))
    }

    /// Control paths of one analysis with their paths, in creation order.
    pub async fn get_control_paths(&self, analysis_id: &Id) -> Result<Vec<ControlPath>, EngineError> {
        let mut control_paths = sqlx::query_as::<_, ControlPath>(
            "SELECT * FROM control_paths WHERE analysis_id = ? ORDER BY date_created, id",
        )
        .bind(analysis_id.to_string())
        .fetch_all(&self.0)
        .await?;
        for control_path in control_paths.iter_mut() {
            let mut paths = sqlx::query_as::<_, ResultPath>(
                "SELECT * FROM paths WHERE control_path_id = ? ORDER BY date_created, id",
            )
            .bind(control_path.id.to_string())
            .fetch_all(&self.0)
            .await?;
            for path in paths.iter_mut() {
                let nodes: Vec<String> = sqlx::query_scalar(
                    "SELECT node_id FROM path_nodes WHERE path_id = ? ORDER BY position",
                )
                .bind(path.id.to_string())
                .fetch_all(&self.0)
                .await?;
                path.node_ids = nodes.into_iter().map(Id::from).collect();
            }
            control_path.paths = paths;
        }
        Ok(control_paths)
    }
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

// Join tables cascade from both parents. Strong parent references (database type, database,
// analysis, control path) do not, so deleting a parent before its children fails loudly.
const SCHEMA_V1: &str = "\
CREATE TABLE database_types (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, description TEXT, date_created INTEGER NOT NULL); \
CREATE TABLE databases (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, description TEXT, url TEXT, is_public INTEGER NOT NULL DEFAULT 0, \
    database_type_id TEXT NOT NULL REFERENCES database_types(id), date_created INTEGER NOT NULL); \
CREATE TABLE database_fields (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, description TEXT, url TEXT, is_searchable INTEGER NOT NULL DEFAULT 0, \
    database_id TEXT NOT NULL REFERENCES databases(id), date_created INTEGER NOT NULL); \
CREATE INDEX database_type_idx ON databases(database_type_id); \
CREATE INDEX field_database_idx ON database_fields(database_id); \
CREATE TABLE users (id TEXT PRIMARY KEY NOT NULL, email TEXT NOT NULL, display_name TEXT, date_created INTEGER NOT NULL); \
CREATE TABLE roles (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, date_created INTEGER NOT NULL); \
CREATE TABLE user_roles (user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE, \
    role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE, PRIMARY KEY (user_id, role_id)); \
CREATE TABLE nodes (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, description TEXT, date_created INTEGER NOT NULL); \
CREATE TABLE node_fields (node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE, \
    database_field_id TEXT NOT NULL REFERENCES database_fields(id) ON DELETE CASCADE, value TEXT NOT NULL, \
    PRIMARY KEY (node_id, database_field_id)); \
CREATE INDEX node_field_idx ON node_fields(database_field_id); \
CREATE TABLE database_nodes (database_id TEXT NOT NULL REFERENCES databases(id) ON DELETE CASCADE, \
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE, PRIMARY KEY (database_id, node_id)); \
CREATE INDEX database_node_idx ON database_nodes(node_id); \
CREATE TABLE edges (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, description TEXT, date_created INTEGER NOT NULL); \
CREATE TABLE edge_nodes (edge_id TEXT NOT NULL REFERENCES edges(id) ON DELETE CASCADE, \
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE, role TEXT NOT NULL CHECK (role IN ('Source', 'Target')), \
    PRIMARY KEY (edge_id, node_id, role)); \
CREATE INDEX edge_node_idx ON edge_nodes(node_id); \
CREATE TABLE edge_fields (edge_id TEXT NOT NULL REFERENCES edges(id) ON DELETE CASCADE, \
    database_field_id TEXT NOT NULL REFERENCES database_fields(id) ON DELETE CASCADE, value TEXT NOT NULL, \
    PRIMARY KEY (edge_id, database_field_id)); \
CREATE INDEX edge_field_idx ON edge_fields(database_field_id); \
CREATE TABLE database_edges (database_id TEXT NOT NULL REFERENCES databases(id) ON DELETE CASCADE, \
    edge_id TEXT NOT NULL REFERENCES edges(id) ON DELETE CASCADE, PRIMARY KEY (database_id, edge_id)); \
CREATE INDEX database_edge_idx ON database_edges(edge_id); \
CREATE TABLE node_collections (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, description TEXT, date_created INTEGER NOT NULL); \
CREATE TABLE node_collection_nodes (node_collection_id TEXT NOT NULL REFERENCES node_collections(id) ON DELETE CASCADE, \
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE, PRIMARY KEY (node_collection_id, node_id)); \
CREATE TABLE node_collection_databases (node_collection_id TEXT NOT NULL REFERENCES node_collections(id) ON DELETE CASCADE, \
    database_id TEXT NOT NULL REFERENCES databases(id) ON DELETE CASCADE, PRIMARY KEY (node_collection_id, database_id)); \
CREATE INDEX node_collection_database_idx ON node_collection_databases(database_id); \
CREATE TABLE networks (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, description TEXT, algorithm TEXT, date_created INTEGER NOT NULL); \
CREATE TABLE network_users (network_id TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE, \
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE, PRIMARY KEY (network_id, user_id)); \
CREATE TABLE network_databases (network_id TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE, \
    database_id TEXT NOT NULL REFERENCES databases(id) ON DELETE CASCADE, PRIMARY KEY (network_id, database_id)); \
CREATE TABLE network_nodes (network_id TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE, \
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE, PRIMARY KEY (network_id, node_id)); \
CREATE INDEX network_node_idx ON network_nodes(node_id); \
CREATE TABLE network_edges (network_id TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE, \
    edge_id TEXT NOT NULL REFERENCES edges(id) ON DELETE CASCADE, PRIMARY KEY (network_id, edge_id)); \
CREATE INDEX network_edge_idx ON network_edges(edge_id); \
CREATE TABLE network_node_collections (network_id TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE, \
    node_collection_id TEXT NOT NULL REFERENCES node_collections(id) ON DELETE CASCADE, PRIMARY KEY (network_id, node_collection_id)); \
CREATE TABLE analyses (id TEXT PRIMARY KEY NOT NULL, name TEXT NOT NULL, description TEXT, algorithm TEXT NOT NULL, \
    parameters TEXT NOT NULL DEFAULT '{}', status TEXT NOT NULL, date_created INTEGER NOT NULL, date_started INTEGER, \
    date_ended INTEGER, log TEXT NOT NULL DEFAULT '[]'); \
CREATE TABLE analysis_users (analysis_id TEXT NOT NULL REFERENCES analyses(id) ON DELETE CASCADE, \
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE, PRIMARY KEY (analysis_id, user_id)); \
CREATE TABLE analysis_networks (analysis_id TEXT NOT NULL REFERENCES analyses(id) ON DELETE CASCADE, \
    network_id TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE, PRIMARY KEY (analysis_id, network_id)); \
CREATE INDEX analysis_network_idx ON analysis_networks(network_id); \
CREATE TABLE analysis_nodes (analysis_id TEXT NOT NULL REFERENCES analyses(id) ON DELETE CASCADE, \
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE, role TEXT NOT NULL CHECK (role IN ('None', 'Source', 'Target')), \
    PRIMARY KEY (analysis_id, node_id)); \
CREATE INDEX analysis_node_idx ON analysis_nodes(node_id); \
CREATE TABLE analysis_edges (analysis_id TEXT NOT NULL REFERENCES analyses(id) ON DELETE CASCADE, \
    edge_id TEXT NOT NULL REFERENCES edges(id) ON DELETE CASCADE, PRIMARY KEY (analysis_id, edge_id)); \
CREATE INDEX analysis_edge_idx ON analysis_edges(edge_id); \
CREATE TABLE analysis_node_collections (analysis_id TEXT NOT NULL REFERENCES analyses(id) ON DELETE CASCADE, \
    node_collection_id TEXT NOT NULL REFERENCES node_collections(id) ON DELETE CASCADE, \
    role TEXT NOT NULL CHECK (role IN ('None', 'Source', 'Target')), PRIMARY KEY (analysis_id, node_collection_id)); \
CREATE TABLE control_paths (id TEXT PRIMARY KEY NOT NULL, analysis_id TEXT NOT NULL REFERENCES analyses(id), \
    algorithm TEXT NOT NULL, date_created INTEGER NOT NULL); \
CREATE INDEX control_path_analysis_idx ON control_paths(analysis_id); \
CREATE TABLE paths (id TEXT PRIMARY KEY NOT NULL, control_path_id TEXT NOT NULL REFERENCES control_paths(id), date_created INTEGER NOT NULL); \
CREATE INDEX path_control_path_idx ON paths(control_path_id); \
CREATE TABLE path_nodes (path_id TEXT NOT NULL REFERENCES paths(id) ON DELETE CASCADE, \
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE, position INTEGER NOT NULL, PRIMARY KEY (path_id, position)); \
CREATE TABLE background_jobs (id TEXT PRIMARY KEY NOT NULL, operation TEXT NOT NULL, kind TEXT, payload TEXT NOT NULL, \
    date_created INTEGER NOT NULL); \
INSERT INTO database_types (id, name, description, date_created) \
    VALUES ('00000000-0000-0000-0000-000000000000', 'Generic', 'Databases of user-authored nodes and edges.', 0);";

pub async fn db_init(db_path: PathBuf) -> Result<Pool<Sqlite>, EngineError> {
    let fqdb = format!("sqlite:{}", db_path.display());
    tracing::debug!("Initializing network store db from file: {:?}", fqdb);
    if !Sqlite::database_exists(&fqdb).await.unwrap_or(false) {
        Sqlite::create_database(&fqdb).await?;
    }
    let options = SqliteConnectOptions::from_str(&fqdb)?
        .read_only(false)
        .foreign_keys(true)
        .disable_statement_logging()
        .create_if_missing(true);

    let pool = PoolOptions::<Sqlite>::new().connect_with(options).await?;

    let migrations = MigrationList(vec![Migration {
        version: 1,
        description: "create_network_store",
        sql: SCHEMA_V1,
        kind: MigrationType::ReversibleUp,
    }]);
    let migrator = Migrator::new(migrations.clone()).await?;
    migrator.run(&pool).await?;

    let generic: Option<String> = sqlx::query_scalar("SELECT name FROM database_types WHERE id = ?")
        .bind(GENERIC_DATABASE_TYPE_ID)
        .fetch_optional(&pool)
        .await?;
    let node_res = sqlx::query("SELECT COUNT(*) as ncount FROM nodes;")
        .fetch_one(&pool)
        .await?;
    let edge_res = sqlx::query("SELECT COUNT(*) as ecount FROM edges;")
        .fetch_one(&pool)
        .await?;
    tracing::info!(
        "DB Connection initialized.\n \
         \tGeneric database type:\t{:?} \n \
         \tNode count:\t{:?} \n \
         \tEdge count:\t{:?}",
        generic,
        node_res.get::<i64, usize>(0),
        edge_res.get::<i64, usize>(0)
    );

    Ok(pool)
}
