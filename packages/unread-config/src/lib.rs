mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Config, Feed, Postgres, Service, Storage, Viewer};

use std::{fs, path::Path};

/// The only relation the recipient trigger publishes and the count query reads.
pub const RECIPIENT_RELATION: &str = "message_recipients";

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}

	for (label, value) in [("feed.channel", &cfg.feed.channel), ("feed.relation", &cfg.feed.relation)]
	{
		if value.is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
		if !is_sql_identifier(value) {
			return Err(Error::Validation {
				message: format!(
					"{label} must be a lowercase SQL identifier made of a-z, 0-9, and underscores."
				),
			});
		}
	}

	if cfg.feed.relation != RECIPIENT_RELATION {
		return Err(Error::Validation {
			message: format!("feed.relation must be {RECIPIENT_RELATION}."),
		});
	}
	if cfg.feed.reconnect_backoff_ms == 0 {
		return Err(Error::Validation {
			message: "feed.reconnect_backoff_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.feed.max_backoff_ms < cfg.feed.reconnect_backoff_ms {
		return Err(Error::Validation {
			message: "feed.max_backoff_ms must be at least feed.reconnect_backoff_ms.".to_string(),
		});
	}
	if cfg.viewer.recipient_id.is_nil() {
		return Err(Error::Validation {
			message: "viewer.recipient_id must not be the nil UUID.".to_string(),
		});
	}

	Ok(())
}

/// Accepts identifiers that can be interpolated into `LISTEN` and trigger DDL unquoted.
pub fn is_sql_identifier(value: &str) -> bool {
	let mut chars = value.chars();

	match chars.next() {
		Some(first) if first.is_ascii_lowercase() || first == '_' => {},
		_ => return false,
	}

	value.len() <= 63
		&& chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn normalize(cfg: &mut Config) {
	cfg.feed.channel = cfg.feed.channel.trim().to_string();
	cfg.feed.relation = cfg.feed.relation.trim().to_string();
	cfg.service.log_level = cfg.service.log_level.trim().to_string();

	if cfg.service.log_level.is_empty() {
		cfg.service.log_level = "info".to_string();
	}
}
