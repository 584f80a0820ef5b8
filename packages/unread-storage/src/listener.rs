use sqlx::postgres::PgListener;

use crate::{Result, db::Db};

/// A dedicated `LISTEN` connection on one notification channel.
pub struct ChannelListener {
	inner: PgListener,
	channel: String,
}
impl ChannelListener {
	pub async fn connect(db: &Db, channel: &str) -> Result<Self> {
		let mut inner = PgListener::connect_with(&db.pool).await?;

		inner.listen(channel).await?;

		tracing::debug!(channel, "Listening for notifications.");

		Ok(Self { inner, channel: channel.to_string() })
	}

	pub fn channel(&self) -> &str {
		&self.channel
	}

	/// Waits for the next notification payload.
	///
	/// Returns `Ok(None)` when the connection was lost. Notifications sent while disconnected are
	/// gone; the next call reconnects and re-issues `LISTEN`.
	pub async fn next_payload(&mut self) -> Result<Option<String>> {
		let notification = self.inner.try_recv().await?;

		Ok(notification.map(|notification| notification.payload().to_string()))
	}
}
