use anyhow::{Context, Result};
use async_trait::async_trait;
use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::ConnectOptions;
use tiberius::{AuthMethod, Config, EncryptionLevel};

use crate::config::DatabaseConfig;
use crate::extract::extractor::DatabaseExtractor;
use crate::insert::inserter::DatabaseInserter;

#[async_trait]
pub trait DatabaseConnection: Sized {
    async fn new(config: &DatabaseConfig, max_connections: u32) -> Result<Self>;
}

#[async_trait]
impl DatabaseConnection for DatabaseExtractor {
    async fn new(config: &DatabaseConfig, max_connections: u32) -> Result<Self> {
        let mut tiberius_config = Config::new();
        tiberius_config.host(&config.host);
        tiberius_config.port(config.port);
        tiberius_config.encryption(EncryptionLevel::NotSupported);
        tiberius_config.authentication(AuthMethod::sql_server(&config.username, &config.password));
        tiberius_config.database(&config.database);

        let mgr = ConnectionManager::new(tiberius_config);
        let pool = Pool::builder()
            .max_size(max_connections)
            .build(mgr)
            .await
            .context("Failed to connect to MSSQL server")?;

        Ok(DatabaseExtractor::new(pool))
    }
}

#[async_trait]
impl DatabaseConnection for DatabaseInserter {
    async fn new(config: &DatabaseConfig, max_connections: u32) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database)
            .disable_statement_logging()
            .clone();

        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to MySQL server")?;

        Ok(DatabaseInserter::new(pool))
    }
}

pub struct DatabaseConnectionFactory<C: DatabaseConnection> {
    config: DatabaseConfig,
    connection_type: std::marker::PhantomData<C>,
}

impl<C: DatabaseConnection> DatabaseConnectionFactory<C> {
    pub fn new(config: DatabaseConfig) -> Self {
        DatabaseConnectionFactory {
            config,
            connection_type: std::marker::PhantomData,
        }
    }

    /// Each table worker holds one source and one target connection, so
    /// pools are sized to the worker count.
    pub async fn create_connection(&self, max_connections: u32) -> Result<C> {
        info!(
            "Connecting to {}:{}/{}",
            self.config.host, self.config.port, self.config.database
        );
        C::new(&self.config, max_connections).await
    }
}
