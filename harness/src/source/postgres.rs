use config::shared::SourceConfig;
use pg_escape::quote_identifier;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::debug;

use crate::error::HarnessResult;
use crate::workload::{RowSource, RowSourceFactory, SourceRow, WorkerKey};

/// Opens a dedicated Postgres connection for every worker.
#[derive(Debug, Clone)]
pub struct PgRowSourceFactory {
    config: SourceConfig,
}

impl PgRowSourceFactory {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }
}

impl RowSourceFactory for PgRowSourceFactory {
    type Source = PgRowSource;

    async fn connect(&self, worker: WorkerKey) -> HarnessResult<PgRowSource> {
        let connection = PgConnection::connect_with(&self.config.connect_options()).await?;
        debug!(worker_kind = %worker.kind, worker_id = worker.id, "worker connected to source");

        Ok(PgRowSource {
            connection,
            table: quote_identifier(&self.config.table).into_owned(),
        })
    }
}

/// One worker's connection to the source table.
#[derive(Debug)]
pub struct PgRowSource {
    connection: PgConnection,
    /// Quoted table name.
    table: String,
}

impl RowSource for PgRowSource {
    async fn insert(&mut self, rows: &[SourceRow]) -> HarnessResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "insert into {} (pid, seq, name, address, ip, birth, company, phone) ",
            self.table
        ));
        builder.push_values(rows, |mut values, row| {
            values
                .push_bind(row.pid)
                .push_bind(row.seq)
                .push_bind(&row.name)
                .push_bind(&row.address)
                .push_bind(&row.ip)
                .push_bind(row.birth)
                .push_bind(&row.company)
                .push_bind(&row.phone);
        });

        builder.build().execute(&mut self.connection).await?;

        Ok(())
    }

    async fn row_count(&mut self) -> HarnessResult<u64> {
        let count: i64 = sqlx::query_scalar(&format!("select count(*) from {}", self.table))
            .fetch_one(&mut self.connection)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn select_sample(&mut self, limit: u64) -> HarnessResult<u64> {
        let pids: Vec<i64> = sqlx::query_scalar(&format!(
            "select pid from {} order by seq desc limit $1",
            self.table
        ))
        .bind(limit.min(i64::MAX as u64) as i64)
        .fetch_all(&mut self.connection)
        .await?;

        Ok(pids.len() as u64)
    }
}
