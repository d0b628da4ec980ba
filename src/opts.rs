//! Connection options.

use std::sync::Arc;
use std::time::Duration;

use no_panic::no_panic;
use url::Url;

use crate::error::Error;
use crate::value::{Decoder, Encoder, Formatter};

/// SSL connection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Don't use SSL.
    Disable,
    /// Try SSL, fall back to unencrypted if the server refuses.
    #[default]
    Prefer,
    /// Require SSL; treat the server's refusal as a fatal connect error.
    Require,
}

/// Connection options for PostgreSQL.
#[derive(Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `$PGHOST`, else `"localhost"`.
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`.
    pub port: u16,

    /// Username for authentication.
    ///
    /// Default: `$PGUSER`, else `$USER`, else `""`.
    pub user: String,

    /// Database name to use.
    ///
    /// Default: `None` (server interprets as same as `user`).
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `$PGPASSWORD`, else `None`.
    pub password: Option<String>,

    /// Application name to report to the server.
    pub application_name: Option<String>,

    /// SSL connection mode.
    pub ssl_mode: SslMode,

    /// Additional startup parameters sent verbatim.
    pub params: Vec<(String, String)>,

    /// Per-call deadline. `None` means the caller waits indefinitely for a
    /// reply; the connection itself is unaffected by a caller giving up (see
    /// the concurrency model notes).
    pub timeout: Option<Duration>,

    /// Column decoder. Defaults to [`crate::value::DefaultDecoder`].
    pub decoder: Arc<dyn Decoder>,

    /// Parameter encoder. Defaults to [`crate::value::DefaultEncoder`].
    pub encoder: Arc<dyn Encoder>,

    /// Per-column wire format chooser. Defaults to
    /// [`crate::value::DefaultFormatter`].
    pub formatter: Arc<dyn Formatter>,
}

impl std::fmt::Debug for Opts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opts")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("application_name", &self.application_name)
            .field("ssl_mode", &self.ssl_mode)
            .field("params", &self.params)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string()),
            port: 5432,
            user: std::env::var("PGUSER")
                .or_else(|_| std::env::var("USER"))
                .unwrap_or_default(),
            database: None,
            password: std::env::var("PGPASSWORD").ok(),
            application_name: None,
            ssl_mode: SslMode::Prefer,
            params: Vec::new(),
            timeout: None,
            decoder: Arc::new(crate::value::DefaultDecoder),
            encoder: Arc::new(crate::value::DefaultEncoder),
            formatter: Arc::new(crate::value::DefaultFormatter),
        }
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&param2=value2&..]`
    ///
    /// Supported query parameters:
    /// - `sslmode`: disable, prefer, require
    /// - `application_name`: application name
    /// - `timeout_ms`: per-call deadline in milliseconds
    #[no_panic]
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "pg"].contains(&url.scheme()) {
            return Err(Error::Argument(format!(
                "invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user: url.username().to_string(),
            password: url.password().map(ToString::to_string),
            database: url.path().strip_prefix('/').and_then(|s| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            }),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sslmode" => {
                    opts.ssl_mode = match value.as_ref() {
                        "disable" => SslMode::Disable,
                        "prefer" => SslMode::Prefer,
                        "require" => SslMode::Require,
                        _ => {
                            return Err(Error::Argument(format!(
                                "invalid sslmode: expected one of ['disable', 'prefer', 'require'], got {value}"
                            )));
                        }
                    };
                }
                "application_name" => {
                    opts.application_name = Some(value.to_string());
                }
                "timeout_ms" => {
                    let ms: u64 = value
                        .parse()
                        .map_err(|_| Error::Argument(format!("invalid timeout_ms: {value}")))?;
                    opts.timeout = Some(std::time::Duration::from_millis(ms));
                }
                _ => {
                    opts.params.push((key.to_string(), value.to_string()));
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    #[no_panic]
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::Argument(format!("invalid URL: {e}")))?;
        Self::try_from(&url)
    }
}
