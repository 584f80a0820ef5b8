//! Scratch Postgres databases for the recipient integration tests.
//!
//! Each [`ScratchDatabase`] lives in its own freshly created database with the recipient schema
//! and change trigger already installed, so tests only seed rows and assert.

mod error;

pub use error::{Error, Result};

use std::{env, str::FromStr};

use sqlx::{
	ConnectOptions, Connection,
	postgres::{PgConnectOptions, PgConnection},
};
use uuid::Uuid;

use unread_config::Postgres;
use unread_storage::{db::Db, queries};

pub const DSN_ENV: &str = "UNREAD_PG_DSN";

const POOL_MAX_CONNS: u32 = 4;

pub fn env_dsn() -> Option<String> {
	env::var(DSN_ENV).ok()
}

pub struct ScratchDatabase {
	name: String,
	dsn: String,
	channel: String,
	server: PgConnectOptions,
	db: Db,
	dropped: bool,
}
impl ScratchDatabase {
	/// Creates an empty database next to the one `base_dsn` points at and bootstraps the recipient
	/// schema with notifications published on `channel`.
	pub async fn create(base_dsn: &str, channel: &str) -> Result<Self> {
		let server = PgConnectOptions::from_str(base_dsn)
			.map_err(|err| Error::Message(format!("Failed to parse {DSN_ENV}: {err}.")))?;
		let name = format!("unread_scratch_{}", Uuid::new_v4().simple());

		run_on_server(&server, &format!(r#"CREATE DATABASE "{name}""#)).await?;

		let dsn = server.clone().database(&name).to_url_lossy().to_string();
		let db = Db::connect(&Postgres { dsn: dsn.clone(), pool_max_conns: POOL_MAX_CONNS }).await?;

		db.ensure_schema(channel).await?;

		Ok(Self { name, dsn, channel: channel.to_string(), server, db, dropped: false })
	}

	pub fn db(&self) -> &Db {
		&self.db
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn channel(&self) -> &str {
		&self.channel
	}

	/// Delivers `count` new unread messages to `recipient_id` and returns their message ids.
	pub async fn seed_unread(&self, recipient_id: Uuid, count: usize) -> Result<Vec<Uuid>> {
		let mut message_ids = Vec::with_capacity(count);

		for _ in 0..count {
			let message_id = Uuid::new_v4();

			queries::insert_recipient(&self.db, message_id, recipient_id).await?;
			message_ids.push(message_id);
		}

		Ok(message_ids)
	}

	/// Closes the pool and drops the database, terminating any listener still attached to it.
	pub async fn drop_database(mut self) -> Result<()> {
		self.db.pool.close().await;

		let sql = format!(r#"DROP DATABASE IF EXISTS "{}" WITH (FORCE)"#, self.name);

		run_on_server(&self.server, &sql).await?;

		self.dropped = true;

		Ok(())
	}
}
impl Drop for ScratchDatabase {
	fn drop(&mut self) {
		if !self.dropped {
			eprintln!(
				"Scratch database {} was not dropped; remove it with DROP DATABASE \"{}\".",
				self.name, self.name
			);
		}
	}
}

async fn run_on_server(server: &PgConnectOptions, sql: &str) -> Result<()> {
	let mut conn = PgConnection::connect_with(server)
		.await
		.map_err(|err| Error::Message(format!("Failed to connect to {DSN_ENV}: {err}.")))?;

	sqlx::query(sql)
		.execute(&mut conn)
		.await
		.map_err(|err| Error::Message(format!("Failed to run `{sql}`: {err}.")))?;

	conn.close().await.map_err(|err| Error::Message(format!("Failed to disconnect: {err}.")))?;

	Ok(())
}
