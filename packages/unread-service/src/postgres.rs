use std::time::Duration;

use tokio::{
	sync::mpsc::{self, error::TrySendError},
	time,
};
use uuid::Uuid;

use crate::{
	BoxFuture, ChangeEvent, ChangeFeed, ChangeOp, ChangeStream, CountSource, Error, EventFilter,
	Result,
};
use unread_storage::{db::Db, listener::ChannelListener, queries};

const FEED_BUFFER: usize = 64;

/// Counts unread deliveries for one recipient.
pub struct PgCountSource {
	db: Db,
	recipient_id: Uuid,
}
impl PgCountSource {
	pub fn new(db: Db, recipient_id: Uuid) -> Self {
		Self { db, recipient_id }
	}
}
impl CountSource for PgCountSource {
	fn count_unread(&self) -> BoxFuture<'_, Result<u64>> {
		Box::pin(async move { Ok(queries::count_unread(&self.db, self.recipient_id).await?) })
	}
}

/// Change feed backed by `LISTEN` on the channel the recipient trigger publishes to.
pub struct PgChangeFeed {
	db: Db,
	channel: String,
	base_backoff: Duration,
	max_backoff: Duration,
}
impl PgChangeFeed {
	pub fn new(db: Db, cfg: &unread_config::Feed) -> Self {
		Self {
			db,
			channel: cfg.channel.clone(),
			base_backoff: Duration::from_millis(cfg.reconnect_backoff_ms),
			max_backoff: Duration::from_millis(cfg.max_backoff_ms),
		}
	}
}
impl ChangeFeed for PgChangeFeed {
	fn subscribe<'a>(
		&'a self,
		relation: &'a str,
		filter: EventFilter,
	) -> BoxFuture<'a, Result<ChangeStream>> {
		Box::pin(async move {
			let listener = ChannelListener::connect(&self.db, &self.channel)
				.await
				.map_err(|err| Error::Subscription { message: err.to_string() })?;
			let (tx, rx) = mpsc::channel(FEED_BUFFER);
			let forwarder = Forwarder {
				db: self.db.clone(),
				relation: relation.to_string(),
				filter,
				tx,
				base_backoff: self.base_backoff,
				max_backoff: self.max_backoff,
			};

			tokio::spawn(forwarder.run(listener));

			Ok(rx)
		})
	}
}

struct Forwarder {
	db: Db,
	relation: String,
	filter: EventFilter,
	tx: mpsc::Sender<ChangeEvent>,
	base_backoff: Duration,
	max_backoff: Duration,
}
impl Forwarder {
	async fn run(self, mut listener: ChannelListener) {
		loop {
			let next = tokio::select! {
				_ = self.tx.closed() => break,
				next = listener.next_payload() => next,
			};

			match next {
				Ok(Some(payload)) => {
					let event = ChangeEvent::from_payload(&payload).unwrap_or_else(|| {
						tracing::debug!(%payload, "Unrecognized change payload.");

						ChangeEvent::new(self.relation.as_str(), ChangeOp::Unknown)
					});

					if event.relation != self.relation {
						tracing::trace!(
							subscribed = %self.relation,
							received = %event.relation,
							"Change event for another relation skipped."
						);

						continue;
					}
					if self.filter.matches(event.op) && !self.deliver(event) {
						break;
					}

					continue;
				},
				Ok(None) => {
					tracing::warn!(channel = listener.channel(), "Change feed connection lost.");
				},
				Err(err) => {
					tracing::warn!(
						channel = listener.channel(),
						error = %err,
						"Change feed receive failed."
					);
				},
			}

			let Some(reconnected) = self.reconnect(listener.channel().to_string()).await else {
				break;
			};

			listener = reconnected;

			if !self.deliver(ChangeEvent::resync(self.relation.as_str())) {
				break;
			}
		}

		tracing::debug!(relation = %self.relation, "Change feed forwarder stopped.");
	}

	/// Retries with exponential backoff until connected or the subscriber goes away.
	async fn reconnect(&self, channel: String) -> Option<ChannelListener> {
		let mut delay = self.base_backoff;

		loop {
			tokio::select! {
				_ = self.tx.closed() => return None,
				_ = time::sleep(delay) => {},
			}

			match ChannelListener::connect(&self.db, &channel).await {
				Ok(listener) => {
					tracing::info!(%channel, "Change feed reconnected.");

					return Some(listener);
				},
				Err(err) => {
					tracing::warn!(
						%channel,
						error = %err,
						delay_ms = delay.as_millis() as u64,
						"Change feed reconnect failed."
					);

					delay = delay.saturating_mul(2).min(self.max_backoff);
				},
			}
		}
	}

	/// A full buffer already holds an event that will trigger a refresh, so dropping is safe.
	fn deliver(&self, event: ChangeEvent) -> bool {
		match self.tx.try_send(event) {
			Ok(()) => true,
			Err(TrySendError::Full(_)) => {
				tracing::trace!(relation = %self.relation, "Change feed buffer full; event coalesced.");

				true
			},
			Err(TrySendError::Closed(_)) => false,
		}
	}
}
