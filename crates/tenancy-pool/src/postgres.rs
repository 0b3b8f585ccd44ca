//! Postgres tenant connections over `sqlx`.
//!
//! Every tenant gets its own physical connection whose `search_path` is
//! pinned to the tenant schema, so repositories can issue unqualified
//! table names.
//!
//! ```text
//! PgTenantFactory::create(tenant)
//!   → connect (bounded by connect_timeout)
//!   → schema exists in information_schema.schemata?   no → close, SchemaMissing
//!   → SET search_path TO "<schema>"
//!   → SET statement_timeout (optional)
//!   → PgTenantConnection
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tenancy_core::{ConfigError, DatabaseSection, TenantId};

use crate::error::ConnectionError;
use crate::factory::TenantConnectionFactory;
use crate::handle::TenantConnection;

/// Base connection settings shared by every tenant.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    /// Schema name template, `{tenant}` is replaced by the tenant id.
    pub schema_template: String,
    pub application_name: Option<String>,
    pub connect_timeout: Duration,
    pub statement_timeout: Option<Duration>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("schema_template", &self.schema_template)
            .field("application_name", &self.application_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}

impl TryFrom<&DatabaseSection> for DatabaseConfig {
    type Error = ConfigError;

    fn try_from(section: &DatabaseSection) -> Result<Self, Self::Error> {
        Ok(Self {
            host: section.host.clone(),
            port: section.port,
            user: section.user.clone(),
            password: section.password.clone(),
            database: section.database.clone(),
            schema_template: section.schema_template.clone(),
            application_name: section.application_name.clone(),
            connect_timeout: section.connect_timeout()?,
            statement_timeout: section.statement_timeout()?,
        })
    }
}

impl DatabaseConfig {
    fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database);
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        if let Some(name) = &self.application_name {
            options = options.application_name(name);
        }
        options
    }

    fn connect_error(&self, reason: impl fmt::Display) -> ConnectionError {
        ConnectionError::Connect {
            host: self.host.clone(),
            port: self.port,
            reason: reason.to_string(),
        }
    }
}

/// Quote a Postgres identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A [`TenantConnectionFactory`] opening one `sqlx` Postgres connection per tenant.
#[derive(Debug, Clone)]
pub struct PgTenantFactory {
    config: DatabaseConfig,
}

impl PgTenantFactory {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Bind a freshly opened connection to the tenant schema.
    async fn scope_to_schema(
        &self,
        conn: &mut PgConnection,
        schema: &str,
    ) -> Result<(), ConnectionError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(schema)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| ConnectionError::Query(e.to_string()))?;

        if !exists {
            return Err(ConnectionError::SchemaMissing(schema.to_string()));
        }

        sqlx::query(&format!("SET search_path TO {}", quote_ident(schema)))
            .execute(&mut *conn)
            .await
            .map_err(|e| ConnectionError::Query(e.to_string()))?;

        if let Some(timeout) = self.config.statement_timeout {
            sqlx::query(&format!("SET statement_timeout = {}", timeout.as_millis()))
                .execute(&mut *conn)
                .await
                .map_err(|e| ConnectionError::Query(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl TenantConnectionFactory for PgTenantFactory {
    type Connection = PgTenantConnection;

    async fn create(&self, tenant: &TenantId) -> Result<PgTenantConnection, ConnectionError> {
        let schema = tenant.schema_name(&self.config.schema_template);
        let options = self.config.connect_options();

        let mut conn = match tokio::time::timeout(
            self.config.connect_timeout,
            PgConnection::connect_with(&options),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(self.config.connect_error(e)),
            Err(_) => return Err(ConnectionError::Timeout(self.config.connect_timeout)),
        };

        if let Err(e) = self.scope_to_schema(&mut conn, &schema).await {
            if let Err(close_err) = conn.close().await {
                tracing::warn!(
                    tenant = %tenant,
                    error = %close_err,
                    "failed to close connection after setup error"
                );
            }
            return Err(e);
        }

        tracing::debug!(
            tenant = %tenant,
            host = %self.config.host,
            port = self.config.port,
            schema = %schema,
            "opened tenant connection"
        );
        Ok(PgTenantConnection { conn, schema })
    }
}

/// A Postgres connection with `search_path` pinned to one tenant schema.
#[derive(Debug)]
pub struct PgTenantConnection {
    conn: PgConnection,
    schema: String,
}

impl PgTenantConnection {
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Ask the server which schema unqualified names currently resolve to.
    pub async fn current_schema(&mut self) -> Result<Option<String>, ConnectionError> {
        sqlx::query_scalar("SELECT current_schema()")
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| ConnectionError::Query(e.to_string()))
    }
}

impl AsMut<PgConnection> for PgTenantConnection {
    fn as_mut(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

#[async_trait]
impl TenantConnection for PgTenantConnection {
    async fn ping(&mut self) -> bool {
        self.conn.ping().await.is_ok()
    }

    async fn close(self) -> Result<(), ConnectionError> {
        self.conn
            .close()
            .await
            .map_err(|e| ConnectionError::Query(e.to_string()))
    }
}
