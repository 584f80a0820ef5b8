use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{Result, schema};

#[derive(Clone)]
pub struct Db {
	pub pool: PgPool,
}
impl Db {
	pub async fn connect(cfg: &unread_config::Postgres) -> Result<Self> {
		let pool =
			PgPoolOptions::new().max_connections(cfg.pool_max_conns).connect(&cfg.dsn).await?;

		Ok(Self { pool })
	}

	/// Creates the recipient table and the trigger that publishes its changes on `channel`.
	pub async fn ensure_schema(&self, channel: &str) -> Result<()> {
		let sql = schema::render_schema(channel);
		let lock_id: i64 = 4_310_527;
		// Advisory locks are held per connection. Use a single transaction so the lock is scoped to
		// one connection and automatically released when the transaction ends.
		let mut tx = self.pool.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(lock_id).execute(&mut *tx).await?;

		for statement in schema::split_statements(&sql) {
			sqlx::query(statement.as_str()).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		tracing::debug!(channel, "Recipient schema ensured.");

		Ok(())
	}
}
