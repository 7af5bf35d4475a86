use anyhow::{Context, Result};
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

/// Environment variable consulted when a credential file has no password.
pub const PASSWORD_ENV: &str = "PGPASSWORD";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(alias = "dbname")]
    pub database: String,
    #[serde(alias = "user")]
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    #[serde(alias = "sslmode", default)]
    pub ssl_mode: SslMode,
    /// Skip certificate verification in prefer/require modes.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// PEM file with extra root certificates.
    #[serde(default)]
    pub ca_cert_path: Option<String>,
}

fn default_port() -> u16 {
    5432
}

/// SSL/TLS connection modes, matching libpq's `sslmode`.
///
/// - `Disable`: No SSL (unencrypted)
/// - `Prefer`: Try SSL first (default)
/// - `Require`: Require SSL but don't verify certificate
/// - `VerifyCa`: Require SSL and verify the server certificate is signed by a trusted CA
/// - `VerifyFull`: Like VerifyCa, but also verify the server hostname matches the certificate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl ConnectionConfig {
    pub fn connection_string(&self) -> String {
        let sslmode = match self.ssl_mode {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        };
        format!(
            "host={} port={} dbname={} user={} password={} sslmode={} connect_timeout=10",
            quote_conn_value(&self.host),
            self.port,
            quote_conn_value(&self.database),
            quote_conn_value(&self.username),
            quote_conn_value(&self.password),
            sslmode
        )
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }

    /// Fill in an empty password from `PGPASSWORD`, or prompt on the terminal.
    pub fn resolve_password(&mut self) -> Result<()> {
        if !self.password.is_empty() {
            return Ok(());
        }
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            self.password = password;
            return Ok(());
        }
        let prompt = format!("Password for {}: ", self.display_string());
        self.password = rpassword::read_password_from_tty(Some(&prompt))
            .context("Failed to read password")?;
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: String::from("Local PostgreSQL"),
            host: String::from("localhost"),
            port: 5432,
            database: String::from("postgres"),
            username: String::from("postgres"),
            password: String::new(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
        }
    }
}

/// A credential file: a TOML document with a `[credentials]` table.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub credentials: ConnectionConfig,
}

impl Credentials {
    pub fn parse(content: &str) -> Result<ConnectionConfig> {
        let file: Credentials = toml::from_str(content).context("Invalid credential file")?;
        Ok(file.credentials)
    }

    /// Read a credential file. The connection is named after the file stem
    /// unless the file names it.
    pub fn load(path: &Path) -> Result<ConnectionConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials: {}", path.display()))?;
        let mut config = Self::parse(&content)?;
        if config.name.is_empty() {
            config.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(config)
    }
}

/// Connect, spawning the connection task on the current runtime.
pub async fn create_client(config: &ConnectionConfig) -> Result<Client> {
    let conn_string = config.connection_string();
    debug!("Connecting to {}", config.display_string());

    let client = match config.ssl_mode {
        SslMode::Disable => connect_with(&conn_string, NoTls).await?,
        SslMode::Prefer | SslMode::Require => {
            let tls = build_tls_connector(config, false)?;
            connect_with(&conn_string, tls).await?
        }
        SslMode::VerifyCa | SslMode::VerifyFull => {
            let tls = build_tls_connector(config, true)?;
            connect_with(&conn_string, tls)
                .await
                .context("Failed to connect to PostgreSQL with certificate verification")?
        }
    };

    Ok(client)
}

async fn connect_with<T>(conn_string: &str, tls: T) -> Result<Client>
where
    T: tokio_postgres::tls::MakeTlsConnect<tokio_postgres::Socket>,
    T::Stream: Send + 'static,
{
    let (client, connection) =
        tokio::time::timeout(CONNECT_TIMEOUT, tokio_postgres::connect(conn_string, tls))
            .await
            .map_err(|_| anyhow::anyhow!("Connection timed out after 15s"))?
            .context("Failed to connect to PostgreSQL")?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("Connection error: {}", e);
        }
    });
    Ok(client)
}

/// Build a TLS connector; `strict_verify` ignores `accept_invalid_certs`.
fn build_tls_connector(config: &ConnectionConfig, strict_verify: bool) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !strict_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else if let Some(ca_path) = &config.ca_cert_path {
        let ca_data = std::fs::read(ca_path)
            .with_context(|| format!("Failed to read CA certificate file: {}", ca_path))?;
        add_ca_certificates(&mut builder, &ca_data)?;
    }

    let connector = builder.build().context("Failed to build TLS connector")?;

    Ok(MakeTlsConnector::new(connector))
}

fn add_ca_certificates(builder: &mut native_tls::TlsConnectorBuilder, pem: &[u8]) -> Result<()> {
    let pem = std::str::from_utf8(pem).context("CA certificate file is not valid UTF-8")?;
    let mut found = 0;
    for block in pem_blocks(pem) {
        let cert = native_tls::Certificate::from_pem(block.as_bytes())
            .context("Failed to parse certificate")?;
        builder.add_root_certificate(cert);
        found += 1;
    }
    if found == 0 {
        anyhow::bail!("No certificates found in CA file");
    }
    Ok(())
}

/// Split a bundle into its `BEGIN/END CERTIFICATE` blocks.
fn pem_blocks(pem: &str) -> Vec<&str> {
    const END: &str = "-----END CERTIFICATE-----";
    let mut blocks = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find("-----BEGIN CERTIFICATE-----") {
        let Some(end) = rest[start..].find(END) else {
            break;
        };
        let stop = start + end + END.len();
        blocks.push(&rest[start..stop]);
        rest = &rest[stop..];
    }
    blocks
}

/// Quote a value for use in a libpq key=value connection string.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}
