//! PostgreSQL copy target.
//!
//! Rows are streamed with `COPY ... FROM STDIN` in text format inside an
//! explicit transaction. Text format lets the server coerce values into the
//! declared column types (e.g. `numeric` totals, `varchar` names).

use std::fmt::Write as _;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::SinkExt;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, CopyInSink, NoTls, Statement};

use pqload_core::{
    CopySession, CopyTarget, DatabaseConfig, Error, LoadStage, OrderRecord, Result, TargetTable,
};

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens sessions against a PostgreSQL database.
#[derive(Debug, Clone)]
pub struct PostgresTarget {
    config: DatabaseConfig,
}

impl PostgresTarget {
    /// Creates a target for the given connection parameters.
    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn client_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.config.host)
            .port(self.config.port)
            .user(&self.config.user)
            .password(self.config.password.expose())
            .dbname(&self.config.dbname)
            .application_name("pqload");
        if let Some(timeout) = self.config.connect_timeout {
            config.connect_timeout(timeout);
        }
        config
    }
}

#[async_trait]
impl CopyTarget for PostgresTarget {
    async fn connect(&self) -> Result<Box<dyn CopySession>> {
        let (client, connection) = self
            .client_config()
            .connect(NoTls)
            .await
            .map_err(|e| {
                Error::load_with_source(
                    LoadStage::Connect,
                    format!("cannot connect to {}", self.config),
                    e,
                )
            })?;

        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "postgres connection closed with error");
            }
        });

        tracing::debug!(database = %self.config, "connected");
        Ok(Box::new(PostgresSession {
            client,
            connection,
            in_transaction: false,
            statement: None,
            sink: None,
        }))
    }
}

/// One PostgreSQL connection.
pub struct PostgresSession {
    client: Client,
    connection: JoinHandle<()>,
    in_transaction: bool,
    statement: Option<Statement>,
    sink: Option<Pin<Box<CopyInSink<Bytes>>>>,
}

async fn execute(client: &Client, sql: &str, stage: LoadStage) -> Result<()> {
    client
        .batch_execute(sql)
        .await
        .map_err(|e| Error::load_with_source(stage, format!("{sql} failed"), e))
}

impl PostgresSession {
    fn sink(&mut self, stage: LoadStage) -> Result<&mut Pin<Box<CopyInSink<Bytes>>>> {
        self.sink
            .as_mut()
            .ok_or_else(|| Error::load(stage, "no copy stream is open"))
    }
}

#[async_trait]
impl CopySession for PostgresSession {
    async fn begin(&mut self) -> Result<()> {
        execute(&self.client, "BEGIN", LoadStage::Begin).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn prepare_copy(&mut self, table: &TargetTable) -> Result<()> {
        let sql = table.copy_statement();
        let statement = self.client.prepare(&sql).await.map_err(|e| {
            Error::load_with_source(LoadStage::Prepare, format!("cannot prepare '{sql}'"), e)
        })?;
        let sink = self.client.copy_in::<_, Bytes>(&statement).await.map_err(|e| {
            Error::load_with_source(LoadStage::Prepare, "cannot start copy stream", e)
        })?;
        self.statement = Some(statement);
        self.sink = Some(Box::pin(sink));
        Ok(())
    }

    async fn write_row(&mut self, row: &OrderRecord) -> Result<()> {
        let encoded = encode_copy_row(row);
        self.sink(LoadStage::WriteRow)?
            .feed(encoded)
            .await
            .map_err(|e| {
                Error::load_with_source(
                    LoadStage::WriteRow,
                    format!("cannot stream order {}", row.order_id),
                    e,
                )
            })
    }

    async fn finish_copy(&mut self) -> Result<u64> {
        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| Error::load(LoadStage::Finish, "no copy stream is open"))?;
        sink.as_mut()
            .finish()
            .await
            .map_err(|e| Error::load_with_source(LoadStage::Finish, "copy stream rejected", e))
    }

    async fn close_copy(&mut self) -> Result<()> {
        // Dropping the statement closes it server-side.
        match self.statement.take() {
            Some(statement) => {
                drop(statement);
                Ok(())
            }
            None => Err(Error::load(LoadStage::Close, "no prepared statement to close")),
        }
    }

    async fn commit(&mut self) -> Result<()> {
        execute(&self.client, "COMMIT", LoadStage::Commit).await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        // An unfinished sink aborts the copy when dropped.
        self.sink = None;
        self.statement = None;
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        execute(&self.client, "ROLLBACK", LoadStage::Rollback).await
    }

    async fn disconnect(self: Box<Self>) {
        let Self {
            client,
            mut connection,
            statement,
            sink,
            ..
        } = *self;
        drop(sink);
        drop(statement);
        drop(client);
        if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut connection)
            .await
            .is_err()
        {
            tracing::warn!("postgres connection did not close in time; aborting");
            connection.abort();
        }
    }
}

/// Encodes one record as a text-format `COPY` line.
#[must_use]
pub fn encode_copy_row(row: &OrderRecord) -> Bytes {
    let mut line = String::with_capacity(64);
    let _ = write!(line, "{}\t", row.order_id);
    push_escaped(&mut line, &row.first_name);
    line.push('\t');
    push_escaped(&mut line, &row.last_name);
    line.push('\t');
    push_escaped(&mut line, &row.email);
    let _ = write!(line, "\t{}\t", row.quantity);
    push_double(&mut line, row.order_total);
    line.push('\n');
    Bytes::from(line)
}

fn push_escaped(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
}

fn push_double(out: &mut String, value: f64) {
    if value.is_nan() {
        out.push_str("NaN");
    } else if value == f64::INFINITY {
        out.push_str("Infinity");
    } else if value == f64::NEG_INFINITY {
        out.push_str("-Infinity");
    } else {
        let _ = write!(out, "{value}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqload_test_utils::order;

    #[test]
    fn encodes_plain_row() {
        let line = encode_copy_row(&order(1, "A", "B", "a@x.com", 2, 9.99));
        assert_eq!(&line[..], b"1\tA\tB\ta@x.com\t2\t9.99\n");
    }

    #[test]
    fn escapes_control_characters() {
        let line = encode_copy_row(&order(7, "tab\there", "new\nline", "back\\slash\r", 0, 1.0));
        assert_eq!(
            std::str::from_utf8(&line).unwrap(),
            "7\ttab\\there\tnew\\nline\tback\\\\slash\\r\t0\t1\n"
        );
    }

    #[test]
    fn encodes_special_doubles() {
        let nan = encode_copy_row(&order(1, "a", "b", "c", 1, f64::NAN));
        assert!(nan.ends_with(b"\tNaN\n"));
        let inf = encode_copy_row(&order(1, "a", "b", "c", 1, f64::INFINITY));
        assert!(inf.ends_with(b"\tInfinity\n"));
        let neg = encode_copy_row(&order(1, "a", "b", "c", 1, f64::NEG_INFINITY));
        assert!(neg.ends_with(b"\t-Infinity\n"));
    }

    #[test]
    fn keeps_unicode_and_negative_values() {
        let line = encode_copy_row(&order(-5, "Zoë", "Ñandú", "z@x.com", -1, -0.5));
        assert_eq!(
            std::str::from_utf8(&line).unwrap(),
            "-5\tZoë\tÑandú\tz@x.com\t-1\t-0.5\n"
        );
    }

    #[test]
    fn client_config_carries_connection_parameters() {
        let config = DatabaseConfig::from_lookup(|name| match name {
            "HOST" => Some("db.internal".into()),
            "PORT" => Some("6543".into()),
            "rdsuser" => Some("loader".into()),
            "rdspassword" => Some("secret".into()),
            "rdsdb" => Some("orders".into()),
            "PQLOAD_DB_CONNECT_TIMEOUT_SECS" => Some("3".into()),
            _ => None,
        })
        .unwrap();

        let client = PostgresTarget::new(config).client_config();
        assert_eq!(client.get_ports(), &[6543]);
        assert_eq!(client.get_user(), Some("loader"));
        assert_eq!(client.get_dbname(), Some("orders"));
        assert_eq!(client.get_password(), Some(b"secret".as_slice()));
        assert_eq!(client.get_connect_timeout(), Some(&Duration::from_secs(3)));
    }
}
