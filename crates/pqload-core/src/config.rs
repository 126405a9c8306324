//! Relational-store connection parameters.
//!
//! The parameters are read from the process environment exactly once, at
//! startup, and handed to the loader as a [`DatabaseConfig`]. Nothing below
//! this point reads the environment.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::observability::Redacted;

/// Environment variable holding the database host.
pub const ENV_HOST: &str = "HOST";
/// Environment variable holding the database port.
pub const ENV_PORT: &str = "PORT";
/// Environment variable holding the database user.
pub const ENV_USER: &str = "rdsuser";
/// Environment variable holding the database password.
pub const ENV_PASSWORD: &str = "rdspassword";
/// Environment variable holding the database name.
pub const ENV_DBNAME: &str = "rdsdb";
/// Optional connect timeout in seconds.
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "PQLOAD_DB_CONNECT_TIMEOUT_SECS";

/// Connection parameters for the target database.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Database host name or address.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: Redacted<String>,
    /// Database name.
    pub dbname: String,
    /// Optional timeout for establishing the connection.
    pub connect_timeout: Option<Duration>,
}

impl DatabaseConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or empty,
    /// or if the port or timeout is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`DatabaseConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String> {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| Error::config(format!("missing environment variable {name}")))
        };

        let host = required(ENV_HOST)?;
        let port_raw = required(ENV_PORT)?;
        let port = parse_port(&port_raw)?;
        let user = required(ENV_USER)?;
        let password = required(ENV_PASSWORD)?;
        let dbname = required(ENV_DBNAME)?;

        let connect_timeout = match lookup(ENV_CONNECT_TIMEOUT_SECS) {
            Some(raw) if !raw.trim().is_empty() => {
                let secs: u64 = raw.trim().parse().map_err(|e| {
                    Error::config(format!(
                        "malformed {ENV_CONNECT_TIMEOUT_SECS} '{raw}': {e}"
                    ))
                })?;
                Some(Duration::from_secs(secs))
            }
            _ => None,
        };

        Ok(Self {
            host,
            port,
            user,
            password: Redacted::new(password),
            dbname,
            connect_timeout,
        })
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    let port: u16 = raw
        .trim()
        .parse()
        .map_err(|e| Error::config(format!("malformed {ENV_PORT} '{raw}': {e}")))?;
    if port == 0 {
        return Err(Error::config(format!("malformed {ENV_PORT} '{raw}': port must be non-zero")));
    }
    Ok(port)
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password)
            .field("dbname", &self.dbname)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl fmt::Display for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn complete() -> HashMap<String, String> {
        env(&[
            (ENV_HOST, "db.internal"),
            (ENV_PORT, "5432"),
            (ENV_USER, "loader"),
            (ENV_PASSWORD, "s3cret"),
            (ENV_DBNAME, "orders"),
        ])
    }

    #[test]
    fn reads_all_parameters() {
        let vars = complete();
        let config = DatabaseConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 5432);
        assert_eq!(config.user, "loader");
        assert_eq!(config.password.expose(), "s3cret");
        assert_eq!(config.dbname, "orders");
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.to_string(), "loader@db.internal:5432/orders");
    }

    #[test]
    fn missing_variable_is_config_error() {
        for name in [ENV_HOST, ENV_PORT, ENV_USER, ENV_PASSWORD, ENV_DBNAME] {
            let mut vars = complete();
            vars.remove(name);
            let err = DatabaseConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
            assert!(matches!(err, Error::Config { .. }), "{name}: {err}");
            assert!(err.to_string().contains(name));
        }
    }

    #[test]
    fn empty_variable_counts_as_missing() {
        let mut vars = complete();
        vars.insert(ENV_USER.into(), "  ".into());
        let err = DatabaseConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains(ENV_USER));
    }

    #[test]
    fn malformed_port_is_config_error() {
        for bad in ["abc", "70000", "-1", "0"] {
            let mut vars = complete();
            vars.insert(ENV_PORT.into(), bad.into());
            let err = DatabaseConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
            assert!(matches!(err, Error::Config { .. }), "port {bad}");
        }
    }

    #[test]
    fn connect_timeout_is_optional_but_validated() {
        let mut vars = complete();
        vars.insert(ENV_CONNECT_TIMEOUT_SECS.into(), "15".into());
        let config = DatabaseConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(15)));

        vars.insert(ENV_CONNECT_TIMEOUT_SECS.into(), "soon".into());
        assert!(DatabaseConfig::from_lookup(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn debug_output_redacts_password() {
        let vars = complete();
        let config = DatabaseConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
