use std::time::Duration;

use tokio::{signal, time};

use unread_service::{ChangeFeed, UnreadCount, UnreadCountService};

/// Re-reads the badge on every tick and logs when it changes, until Ctrl-C.
///
/// A failed subscription is not fatal: the badge keeps showing the last known count.
pub async fn watch(service: &UnreadCountService, feed: &dyn ChangeFeed, interval: Duration) {
	let subscription = match service.subscribe_to_changes(feed).await {
		Ok(subscription) => Some(subscription),
		Err(err) => {
			tracing::error!(error = %err, "Running without live updates.");

			None
		},
	};
	let mut ticker = time::interval(interval);
	let mut shown = None;

	ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = ticker.tick() => {},
			result = signal::ctrl_c() => {
				if let Err(err) = result {
					tracing::error!(error = %err, "Failed to listen for Ctrl-C.");
				}

				break;
			},
		}

		shown = render(service.get_count(), shown);
	}

	if let Some(subscription) = subscription {
		subscription.unsubscribe().await;
	}

	service.dispose();
}

fn render(count: UnreadCount, shown: Option<UnreadCount>) -> Option<UnreadCount> {
	if shown == Some(count) {
		return shown;
	}

	match count {
		UnreadCount::Loading => tracing::info!("Unread count loading."),
		UnreadCount::Ready(count) => tracing::info!(count, "Unread count changed."),
	}

	Some(count)
}
