use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	#[serde(default)]
	pub feed: Feed,
	pub viewer: Viewer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

/// Postgres `LISTEN/NOTIFY` settings for the recipient change feed.
#[derive(Debug, Clone, Deserialize)]
pub struct Feed {
	/// Notification channel the recipient trigger publishes on.
	#[serde(default = "default_channel")]
	pub channel: String,
	/// Relation whose row changes invalidate the unread count.
	#[serde(default = "default_relation")]
	pub relation: String,
	#[serde(default = "default_reconnect_backoff_ms")]
	pub reconnect_backoff_ms: u64,
	#[serde(default = "default_max_backoff_ms")]
	pub max_backoff_ms: u64,
}
impl Default for Feed {
	fn default() -> Self {
		Self {
			channel: default_channel(),
			relation: default_relation(),
			reconnect_backoff_ms: default_reconnect_backoff_ms(),
			max_backoff_ms: default_max_backoff_ms(),
		}
	}
}

/// The viewer whose unread messages are counted.
#[derive(Debug, Clone, Deserialize)]
pub struct Viewer {
	pub recipient_id: Uuid,
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_channel() -> String {
	"message_recipients_changed".to_string()
}

fn default_relation() -> String {
	crate::RECIPIENT_RELATION.to_string()
}

fn default_reconnect_backoff_ms() -> u64 {
	500
}

fn default_max_backoff_ms() -> u64 {
	30_000
}
