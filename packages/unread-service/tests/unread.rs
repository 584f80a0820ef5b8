use std::{
	future::Future,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use tokio::{
	runtime::Handle,
	sync::{Mutex as AsyncMutex, mpsc},
	time,
};

use unread_service::{
	BoxFuture, ChangeEvent, ChangeFeed, ChangeOp, ChangeStream, CountSource, EntryState, Error,
	EventFilter, Result, UnreadCount, UnreadCountService,
};

const RELATION: &str = "message_recipients";

/// Count source whose fetches stay pending until the test scripts a response.
struct ScriptedSource {
	calls: AtomicUsize,
	responses: AsyncMutex<mpsc::UnboundedReceiver<Result<u64>>>,
}
impl CountSource for ScriptedSource {
	fn count_unread(&self) -> BoxFuture<'_, Result<u64>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			self.responses.lock().await.recv().await.unwrap_or_else(|| {
				Err(Error::DataSource { message: "Script exhausted.".to_string() })
			})
		})
	}
}

struct Script {
	source: Arc<ScriptedSource>,
	responses: mpsc::UnboundedSender<Result<u64>>,
}
impl Script {
	fn new() -> Self {
		let (responses, rx) = mpsc::unbounded_channel();
		let source =
			Arc::new(ScriptedSource { calls: AtomicUsize::new(0), responses: AsyncMutex::new(rx) });

		Self { source, responses }
	}

	fn calls(&self) -> usize {
		self.source.calls.load(Ordering::SeqCst)
	}

	fn respond(&self, count: u64) {
		self.responses.send(Ok(count)).expect("Source must be alive.");
	}

	fn fail(&self, message: &str) {
		self.responses
			.send(Err(Error::DataSource { message: message.to_string() }))
			.expect("Source must be alive.");
	}

	fn service(&self) -> UnreadCountService {
		UnreadCountService::new(self.source.clone(), RELATION, Handle::current())
	}
}

#[derive(Default)]
struct ManualFeed {
	sender: Mutex<Option<mpsc::Sender<ChangeEvent>>>,
	subscriptions: AtomicUsize,
	reject: bool,
}
impl ManualFeed {
	fn rejecting() -> Self {
		Self { reject: true, ..Self::default() }
	}

	/// Returns whether a live subscriber received the event.
	fn emit(&self, op: ChangeOp) -> bool {
		let sender = self.sender.lock().expect("Feed lock poisoned.").clone();

		match sender {
			Some(sender) => sender.try_send(ChangeEvent::new(RELATION, op)).is_ok(),
			None => false,
		}
	}

	fn close(&self) {
		self.sender.lock().expect("Feed lock poisoned.").take();
	}
}
impl ChangeFeed for ManualFeed {
	fn subscribe<'a>(
		&'a self,
		relation: &'a str,
		filter: EventFilter,
	) -> BoxFuture<'a, Result<ChangeStream>> {
		Box::pin(async move {
			assert_eq!(relation, RELATION);
			assert_eq!(filter, EventFilter::All);

			if self.reject {
				return Err(Error::Subscription { message: "Feed unavailable.".to_string() });
			}

			let (tx, rx) = mpsc::channel(16);

			self.subscriptions.fetch_add(1, Ordering::SeqCst);
			*self.sender.lock().expect("Feed lock poisoned.") = Some(tx);

			Ok(rx)
		})
	}
}

async fn eventually(mut condition: impl FnMut() -> bool) {
	time::timeout(Duration::from_secs(2), async {
		while !condition() {
			time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("Condition was not reached in time.");
}

/// Lets spawned tasks run long enough to show that nothing else happens.
async fn settle() {
	time::sleep(Duration::from_millis(50)).await;
}

async fn join<T>(future: impl Future<Output = T>) -> T {
	time::timeout(Duration::from_secs(2), future).await.expect("Future did not finish in time.")
}

async fn primed(script: &Script, service: &UnreadCountService, count: u64) {
	assert_eq!(service.get_count(), UnreadCount::Loading);

	script.respond(count);

	eventually(|| service.get_count() == UnreadCount::Ready(count)).await;
}

#[tokio::test]
async fn empty_entry_reports_loading_then_value() {
	let script = Script::new();
	let service = script.service();

	assert_eq!(service.state(), EntryState::Empty);
	assert_eq!(service.get_count(), UnreadCount::Loading);
	assert_eq!(service.state(), EntryState::Loading);

	eventually(|| script.calls() == 1).await;

	assert_eq!(service.get_count(), UnreadCount::Loading);

	script.respond(3);

	eventually(|| service.state() == EntryState::Fresh).await;

	assert_eq!(service.get_count(), UnreadCount::Ready(3));
	assert_eq!(service.get_count().value(), Some(3));

	settle().await;

	assert_eq!(script.calls(), 1, "Fresh reads must not fetch again.");
}

#[tokio::test]
async fn change_event_triggers_exactly_one_refresh() {
	let script = Script::new();
	let service = script.service();
	let feed = ManualFeed::default();
	let subscription =
		service.subscribe_to_changes(&feed).await.expect("Subscription should succeed.");

	assert!(subscription.is_active());
	assert_eq!(subscription.relation(), RELATION);
	assert_eq!(script.calls(), 0, "Subscribing to an empty entry must not fetch.");

	primed(&script, &service, 3).await;

	assert!(feed.emit(ChangeOp::Update));

	eventually(|| script.calls() == 2).await;

	assert_eq!(service.get_count(), UnreadCount::Ready(3));

	script.respond(5);

	eventually(|| service.get_count() == UnreadCount::Ready(5)).await;
	settle().await;

	assert_eq!(script.calls(), 2);

	drop(subscription);
}

#[tokio::test]
async fn back_to_back_refreshes_share_one_follow_up_fetch() {
	let script = Script::new();
	let service = script.service();

	assert_eq!(service.get_count(), UnreadCount::Loading);

	eventually(|| script.calls() == 1).await;

	let first = tokio::spawn({
		let service = service.clone();

		async move { service.refresh().await }
	});
	let second = tokio::spawn({
		let service = service.clone();

		async move { service.refresh().await }
	});

	settle().await;

	assert_eq!(script.calls(), 1, "Refreshes must not start a second concurrent fetch.");

	script.respond(3);

	eventually(|| script.calls() == 2).await;

	script.respond(4);

	assert_eq!(join(first).await.expect("Refresh task panicked."), Ok(4));
	assert_eq!(join(second).await.expect("Refresh task panicked."), Ok(4));

	settle().await;

	assert_eq!(script.calls(), 2);
	assert_eq!(service.get_count(), UnreadCount::Ready(4));
	assert_eq!(service.state(), EntryState::Fresh);
}

#[tokio::test]
async fn burst_of_events_ends_with_a_fetch_after_the_last_event() {
	let script = Script::new();
	let service = script.service();
	let feed = ManualFeed::default();
	let _subscription =
		service.subscribe_to_changes(&feed).await.expect("Subscription should succeed.");

	primed(&script, &service, 1).await;

	for op in [ChangeOp::Insert, ChangeOp::Update, ChangeOp::Delete, ChangeOp::Insert] {
		assert!(feed.emit(op));
	}

	eventually(|| script.calls() == 2).await;
	settle().await;

	assert_eq!(script.calls(), 2, "Events during a pending fetch must coalesce.");

	script.respond(2);

	eventually(|| script.calls() == 3).await;

	script.respond(6);

	eventually(|| service.get_count() == UnreadCount::Ready(6)).await;
	settle().await;

	assert_eq!(script.calls(), 3);
	assert_eq!(service.state(), EntryState::Fresh);
}

#[tokio::test]
async fn failed_fetch_keeps_previous_value_and_retries() {
	let script = Script::new();
	let service = script.service();

	primed(&script, &service, 3).await;

	script.fail("connection reset");

	let err = join(service.refresh()).await.expect_err("Expected refresh to fail.");

	assert_eq!(err, Error::DataSource { message: "connection reset".to_string() });
	assert_eq!(service.state(), EntryState::Error);
	assert_eq!(script.calls(), 2);

	script.respond(7);

	assert_eq!(service.get_count(), UnreadCount::Ready(3), "Reads must keep the last good value.");

	eventually(|| service.get_count() == UnreadCount::Ready(7)).await;

	assert_eq!(script.calls(), 3);
	assert_eq!(service.state(), EntryState::Fresh);
}

#[tokio::test]
async fn failed_first_fetch_keeps_loading_sentinel() {
	let script = Script::new();
	let service = script.service();

	script.fail("permission denied");

	assert_eq!(service.get_count(), UnreadCount::Loading);

	eventually(|| service.state() == EntryState::Error).await;

	script.respond(2);

	assert_eq!(service.get_count(), UnreadCount::Loading);

	eventually(|| service.get_count() == UnreadCount::Ready(2)).await;
}

#[tokio::test]
async fn refresh_after_success_returns_new_count() {
	let script = Script::new();
	let service = script.service();

	script.respond(9);

	assert_eq!(join(service.refresh()).await, Ok(9));
	assert_eq!(service.get_count(), UnreadCount::Ready(9));
	assert_eq!(script.calls(), 1);
}

#[tokio::test]
async fn disposed_service_ignores_change_events() {
	let script = Script::new();
	let service = script.service();
	let feed = ManualFeed::default();
	let subscription =
		service.subscribe_to_changes(&feed).await.expect("Subscription should succeed.");

	primed(&script, &service, 3).await;

	service.dispose();
	settle().await;

	assert!(!subscription.is_active());

	feed.emit(ChangeOp::Insert);
	settle().await;

	assert_eq!(script.calls(), 1, "No fetch may follow teardown.");
	assert_eq!(service.state(), EntryState::Disposed);
	assert_eq!(service.get_count(), UnreadCount::Ready(3));
	assert_eq!(join(service.refresh()).await, Err(Error::Disposed));

	let err = service
		.subscribe_to_changes(&feed)
		.await
		.expect_err("Expected subscribing after teardown to fail.");

	assert_eq!(err, Error::Disposed);
}

#[tokio::test]
async fn disposal_discards_in_flight_result() {
	let script = Script::new();
	let service = script.service();

	assert_eq!(service.get_count(), UnreadCount::Loading);

	eventually(|| script.calls() == 1).await;

	let waiter = tokio::spawn({
		let service = service.clone();

		async move { service.refresh().await }
	});

	settle().await;
	service.dispose();

	assert_eq!(join(waiter).await.expect("Refresh task panicked."), Err(Error::Disposed));

	script.respond(9);
	settle().await;

	assert_eq!(service.get_count(), UnreadCount::Loading);
	assert_eq!(service.state(), EntryState::Disposed);
	assert_eq!(script.calls(), 1);
}

#[tokio::test]
async fn unsubscribe_stops_refreshes() {
	let script = Script::new();
	let service = script.service();
	let feed = ManualFeed::default();
	let subscription =
		service.subscribe_to_changes(&feed).await.expect("Subscription should succeed.");

	primed(&script, &service, 4).await;

	join(subscription.unsubscribe()).await;

	assert!(!feed.emit(ChangeOp::Insert), "The stream must be released on unsubscribe.");

	settle().await;

	assert_eq!(script.calls(), 1);
	assert_eq!(service.state(), EntryState::Fresh);
}

#[tokio::test]
async fn subscribing_after_a_fetch_catches_up_once() {
	let script = Script::new();
	let service = script.service();
	let feed = ManualFeed::default();

	primed(&script, &service, 2).await;

	let _subscription =
		service.subscribe_to_changes(&feed).await.expect("Subscription should succeed.");

	eventually(|| script.calls() == 2).await;

	script.respond(5);

	eventually(|| service.get_count() == UnreadCount::Ready(5)).await;
	settle().await;

	assert_eq!(script.calls(), 2);
}

#[tokio::test]
async fn rejected_subscription_degrades_to_last_value() {
	let script = Script::new();
	let service = script.service();
	let feed = ManualFeed::rejecting();

	primed(&script, &service, 8).await;

	let err = service
		.subscribe_to_changes(&feed)
		.await
		.expect_err("Expected the subscription to be rejected.");

	assert!(matches!(err, Error::Subscription { .. }), "Unexpected error: {err}");
	assert_eq!(service.get_count(), UnreadCount::Ready(8));
	assert_eq!(service.state(), EntryState::Fresh);
	assert_eq!(feed.subscriptions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn closed_feed_keeps_serving_cached_value() {
	let script = Script::new();
	let service = script.service();
	let feed = ManualFeed::default();
	let subscription =
		service.subscribe_to_changes(&feed).await.expect("Subscription should succeed.");

	primed(&script, &service, 1).await;

	feed.close();

	eventually(|| !subscription.is_active()).await;

	assert_eq!(service.get_count(), UnreadCount::Ready(1));
	assert_eq!(service.state(), EntryState::Fresh);
	assert_eq!(script.calls(), 1);
}

#[tokio::test]
async fn at_most_one_fetch_is_in_flight() {
	struct GatedSource {
		active: AtomicUsize,
		peak: AtomicUsize,
		calls: AtomicUsize,
	}
	impl CountSource for GatedSource {
		fn count_unread(&self) -> BoxFuture<'_, Result<u64>> {
			Box::pin(async move {
				let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;

				self.peak.fetch_max(active, Ordering::SeqCst);

				time::sleep(Duration::from_millis(10)).await;

				self.active.fetch_sub(1, Ordering::SeqCst);

				Ok(self.calls.fetch_add(1, Ordering::SeqCst) as u64)
			})
		}
	}

	let source = Arc::new(GatedSource {
		active: AtomicUsize::new(0),
		peak: AtomicUsize::new(0),
		calls: AtomicUsize::new(0),
	});
	let service = UnreadCountService::new(source.clone(), RELATION, Handle::current());
	let feed = ManualFeed::default();
	let _subscription =
		service.subscribe_to_changes(&feed).await.expect("Subscription should succeed.");
	let mut refreshes = Vec::new();

	for round in 0..20 {
		service.get_count();
		feed.emit(ChangeOp::Update);

		if round % 4 == 0 {
			refreshes.push(tokio::spawn({
				let service = service.clone();

				async move { service.refresh().await }
			}));
		}

		time::sleep(Duration::from_millis(3)).await;
	}

	for refresh in refreshes {
		assert!(join(refresh).await.expect("Refresh task panicked.").is_ok());
	}

	eventually(|| service.state() == EntryState::Fresh).await;

	assert_eq!(source.peak.load(Ordering::SeqCst), 1);
	assert!(source.calls.load(Ordering::SeqCst) < 20, "Triggers must coalesce.");
}

#[tokio::test]
async fn panicking_source_releases_the_fetch_slot() {
	struct FlakySource {
		calls: AtomicUsize,
	}
	impl CountSource for FlakySource {
		fn count_unread(&self) -> BoxFuture<'_, Result<u64>> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst);

			Box::pin(async move {
				if call == 0 {
					panic!("Count source blew up.");
				}

				Ok(5)
			})
		}
	}

	let source = Arc::new(FlakySource { calls: AtomicUsize::new(0) });
	let service = UnreadCountService::new(source.clone(), RELATION, Handle::current());
	let err = join(service.refresh()).await.expect_err("Expected the aborted fetch to fail.");

	assert_eq!(err, Error::DataSource { message: "Unread count fetch aborted.".to_string() });
	assert_eq!(service.state(), EntryState::Error);
	assert_eq!(service.get_count(), UnreadCount::Loading);

	eventually(|| service.get_count() == UnreadCount::Ready(5)).await;

	assert_eq!(join(service.refresh()).await, Ok(5));
	assert_eq!(source.calls.load(Ordering::SeqCst), 3);
	assert_eq!(service.state(), EntryState::Fresh);
}
