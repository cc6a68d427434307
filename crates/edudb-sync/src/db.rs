//! Pooled PostgreSQL connections.
//!
//! Each endpoint gets its own deadpool, built from the endpoint config with
//! TLS selected by `ssl_mode`. A `SELECT 1` probe at build time turns a bad
//! endpoint into a connectivity error before any table work starts.

use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info, warn};

use crate::catalog::TableDescriptor;
use crate::config::EndpointConfig;
use crate::error::{Result, SyncError};
use crate::row::Row;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const COLUMNS_SQL: &str = "SELECT column_name::text, udt_name::text \
     FROM information_schema.columns \
     WHERE table_schema = 'public' AND table_name = $1 \
     ORDER BY ordinal_position";

/// Name and PostgreSQL type of one destination column.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub udt_name: String,
}

/// One endpoint's connection pool.
pub struct Db {
    pool: Pool,
    location: String,
}

impl Db {
    /// Build a pool for the endpoint and probe it.
    pub async fn connect(endpoint: &EndpointConfig, max_connections: usize) -> Result<Db> {
        let location = endpoint.location();

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&endpoint.host)
            .port(endpoint.port)
            .dbname(&endpoint.database)
            .user(&endpoint.user)
            .password(&endpoint.password)
            .application_name("edudb-sync")
            .connect_timeout(CONNECT_TIMEOUT);

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = match endpoint.ssl_mode.as_str() {
            "disable" => {
                warn!("TLS disabled for {}", location);
                Manager::from_config(pg_config, NoTls, manager_config)
            }
            mode => {
                let tls = MakeRustlsConnect::new(build_tls_config(mode)?);
                Manager::from_config(pg_config, tls, manager_config)
            }
        };

        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| SyncError::pool(e.to_string(), "building pool"))?;

        let client = pool
            .get()
            .await
            .map_err(|e| SyncError::connectivity(&location, e.to_string()))?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| SyncError::connectivity(&location, e.to_string()))?;
        info!("Connected to PostgreSQL: {}", location);

        Ok(Db { pool, location })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Checked-out connection; `context` names the operation for pool errors.
    pub async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e.to_string(), context))
    }

    /// Round-trip probe against the endpoint.
    pub async fn ping(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::connectivity(&self.location, e.to_string()))?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| SyncError::connectivity(&self.location, e.to_string()))?;
        Ok(())
    }

    /// Column names and types for a public-schema table, in ordinal order.
    /// Empty when the table does not exist.
    pub async fn load_columns(&self, table: &str) -> Result<Vec<ColumnMeta>> {
        let client = self.client(&format!("loading columns of {table}")).await?;
        let rows = client.query(COLUMNS_SQL, &[&table]).await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(ColumnMeta {
                name: row.try_get(0)?,
                udt_name: row.try_get(1)?,
            });
        }
        Ok(columns)
    }

    /// All rows of a table, ordered by primary key.
    pub async fn fetch_rows(&self, table: &TableDescriptor) -> Result<Vec<Row>> {
        let client = self.client(&format!("fetching {}", table.name)).await?;
        let sql = format!(
            "SELECT * FROM {} ORDER BY {}",
            quote_ident(table.name),
            quote_ident(table.primary_key)
        );
        let pg_rows = client.query(&sql, &[]).await?;
        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            let row =
                Row::from_pg(pg_row).map_err(|message| SyncError::read(table.name, message))?;
            rows.push(row);
        }
        debug!("Fetched {} rows from {}", rows.len(), table.name);
        Ok(rows)
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let client = self.client(&format!("counting {table}")).await?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.try_get(0)?)
    }

    /// Best-effort bump of the table's id sequence past the current maximum.
    /// Tables without a serial sequence are left alone.
    pub async fn reset_sequence(&self, table: &str, primary_key: &str) {
        let sql = sequence_reset_sql(table, primary_key);
        let client = match self.client(&format!("resetting sequence of {table}")).await {
            Ok(client) => client,
            Err(e) => {
                debug!("Sequence reset skipped for {}: {}", table, e);
                return;
            }
        };
        match client.query(&sql, &[]).await {
            Ok(_) => debug!("Sequence for {} reset", table),
            Err(e) => debug!("Sequence reset skipped for {}: {}", table, e),
        }
    }
}

/// `setval` statement aligning a table's serial sequence with its data.
///
/// `setval` is strict, so a table without a serial sequence yields NULL
/// instead of an error; an empty table parks the sequence at 1 un-advanced.
pub(crate) fn sequence_reset_sql(table: &str, primary_key: &str) -> String {
    let table_q = quote_ident(table);
    let pk_q = quote_ident(primary_key);
    format!(
        "SELECT setval(pg_get_serial_sequence('{table}', '{primary_key}'), \
         GREATEST((SELECT COALESCE(MAX({pk_q}), 0) FROM {table_q}), 1), \
         (SELECT COALESCE(MAX({pk_q}), 0) FROM {table_q}) > 0)"
    )
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn build_tls_config(ssl_mode: &str) -> Result<rustls::ClientConfig> {
    match ssl_mode {
        "require" => {
            warn!("TLS certificate verification disabled (ssl_mode=require)");
            Ok(rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth())
        }
        "verify-ca" | "verify-full" => {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Ok(rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth())
        }
        other => Err(SyncError::Config(format!("unsupported ssl_mode '{other}'"))),
    }
}

/// Accepts any server certificate. Used for `ssl_mode: require`, which asks
/// for an encrypted channel without identity checks.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}
