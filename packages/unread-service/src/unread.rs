//! Read-through cache for the viewer's unread message count.
//!
//! The cached value is served synchronously. Fetches run on the runtime in the background and
//! at most one is in flight at a time; invalidations that arrive while a fetch is pending collapse
//! into a single follow-up fetch. Each started fetch gets a generation number and its outcome is
//! published on a watch channel, so a `refresh` caller waits for exactly the fetch that serves it.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::{
	runtime::Handle,
	sync::watch,
	task::{AbortHandle, JoinHandle},
};

use crate::{ChangeFeed, ChangeStream, CountSource, Error, EventFilter, Result};

pub const UNREAD_COUNT_KEY: &str = "unread-message-count";

const FETCH_ABORTED: &str = "Unread count fetch aborted.";

/// What presentation code gets back from [`UnreadCountService::get_count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadCount {
	/// Nothing has been fetched yet.
	Loading,
	Ready(u64),
}
impl UnreadCount {
	pub fn value(self) -> Option<u64> {
		match self {
			Self::Loading => None,
			Self::Ready(count) => Some(count),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
	Empty,
	Loading,
	Fresh,
	Stale,
	/// The last fetch failed. Retried on the next trigger like `Stale`.
	Error,
	Disposed,
}

#[derive(Debug, Clone)]
enum Signal {
	Idle,
	Settled { generation: u64, outcome: Result<u64> },
	Disposed,
}

#[derive(Default)]
struct CacheEntry {
	value: Option<u64>,
	stale: bool,
	failed: bool,
	in_flight: bool,
	rerun: bool,
	generation: u64,
	disposed: bool,
	subscriptions: Vec<AbortHandle>,
}
impl CacheEntry {
	fn state(&self) -> EntryState {
		if self.disposed {
			EntryState::Disposed
		} else if self.in_flight {
			EntryState::Loading
		} else if self.failed {
			EntryState::Error
		} else if self.value.is_none() {
			EntryState::Empty
		} else if self.stale {
			EntryState::Stale
		} else {
			EntryState::Fresh
		}
	}

	fn snapshot(&self) -> UnreadCount {
		self.value.map_or(UnreadCount::Loading, UnreadCount::Ready)
	}

	fn begin_fetch(&mut self) -> u64 {
		self.in_flight = true;
		self.generation += 1;

		self.generation
	}
}

struct Inner {
	source: Arc<dyn CountSource>,
	relation: String,
	runtime: Handle,
	entry: Mutex<CacheEntry>,
	settled: watch::Sender<Signal>,
}
impl Inner {
	fn lock_entry(&self) -> MutexGuard<'_, CacheEntry> {
		self.entry.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn spawn_fetch(self: &Arc<Self>, generation: u64) {
		let inner = Arc::clone(self);

		self.runtime.spawn(inner.run_fetches(generation));
	}

	async fn run_fetches(self: Arc<Self>, mut generation: u64) {
		loop {
			tracing::debug!(key = UNREAD_COUNT_KEY, generation, "Fetching unread count.");

			let mut guard = FetchGuard { inner: &*self, generation, armed: true };
			let outcome = self.source.count_unread().await;

			guard.armed = false;

			let next = {
				let mut entry = self.lock_entry();

				if entry.disposed {
					tracing::debug!(
						key = UNREAD_COUNT_KEY,
						generation,
						"Discarding fetch result for disposed entry."
					);

					return;
				}

				match &outcome {
					Ok(count) => {
						entry.value = Some(*count);
						entry.stale = entry.rerun;
						entry.failed = false;
					},
					Err(err) => {
						tracing::warn!(
							key = UNREAD_COUNT_KEY,
							generation,
							error = %err,
							"Unread count fetch failed."
						);

						entry.stale = true;
						entry.failed = true;
					},
				}

				self.settled.send_replace(Signal::Settled { generation, outcome });

				if entry.rerun {
					entry.rerun = false;

					Some(entry.begin_fetch())
				} else {
					entry.in_flight = false;

					None
				}
			};

			match next {
				Some(rerun) => generation = rerun,
				None => return,
			}
		}
	}
}

/// Releases the in-flight slot if a fetch never reaches its completion handler, e.g. when the
/// count source panics, so later triggers can fetch again and waiters are not left hanging.
struct FetchGuard<'a> {
	inner: &'a Inner,
	generation: u64,
	armed: bool,
}
impl Drop for FetchGuard<'_> {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}

		let mut entry = self.inner.lock_entry();

		if entry.disposed {
			return;
		}

		let served = if entry.rerun { self.generation + 1 } else { self.generation };

		entry.generation = served;
		entry.in_flight = false;
		entry.rerun = false;
		entry.stale = true;
		entry.failed = true;

		tracing::error!(
			key = UNREAD_COUNT_KEY,
			generation = self.generation,
			"Unread count fetch aborted before completing."
		);

		self.inner.settled.send_replace(Signal::Settled {
			generation: served,
			outcome: Err(Error::DataSource { message: FETCH_ABORTED.to_string() }),
		});
	}
}

/// Keeps one viewer's unread count cached and coherent with a change feed.
///
/// Cloning is cheap and every clone shares the same cache entry.
#[derive(Clone)]
pub struct UnreadCountService {
	inner: Arc<Inner>,
}
impl UnreadCountService {
	/// `relation` is the table whose changes invalidate the count. Fetches and subscription
	/// handlers are spawned on `runtime`.
	pub fn new(source: Arc<dyn CountSource>, relation: impl Into<String>, runtime: Handle) -> Self {
		let (settled, _) = watch::channel(Signal::Idle);
		let inner = Inner {
			source,
			relation: relation.into(),
			runtime,
			entry: Mutex::new(CacheEntry::default()),
			settled,
		};

		Self { inner: Arc::new(inner) }
	}

	pub fn relation(&self) -> &str {
		&self.inner.relation
	}

	pub fn state(&self) -> EntryState {
		self.inner.lock_entry().state()
	}

	/// Returns the cached count without waiting.
	///
	/// Starts a background fetch when the entry is empty or stale and nothing is in flight. Fetch
	/// errors never surface here; the last good value stays readable.
	pub fn get_count(&self) -> UnreadCount {
		let (snapshot, started) = {
			let mut entry = self.inner.lock_entry();
			let snapshot = entry.snapshot();
			let needs_fetch = !entry.disposed
				&& !entry.in_flight
				&& (entry.value.is_none() || entry.stale);

			(snapshot, needs_fetch.then(|| entry.begin_fetch()))
		};

		if let Some(generation) = started {
			self.inner.spawn_fetch(generation);
		}

		snapshot
	}

	/// Marks the entry stale and schedules a fetch without waiting for it.
	pub fn invalidate(&self) {
		if let Err(err) = self.schedule() {
			tracing::trace!(key = UNREAD_COUNT_KEY, error = %err, "Invalidation ignored.");
		}
	}

	/// Marks the entry stale and waits for the fetch that serves this request.
	///
	/// A refresh issued while a fetch is pending joins the single follow-up fetch instead of
	/// starting another one.
	pub async fn refresh(&self) -> Result<u64> {
		let mut settled = self.inner.settled.subscribe();
		let target = self.schedule()?;
		let signal = settled
			.wait_for(|signal| match signal {
				Signal::Idle => false,
				Signal::Settled { generation, .. } => *generation >= target,
				Signal::Disposed => true,
			})
			.await
			.map_err(|_| Error::Disposed)?;

		match &*signal {
			Signal::Settled { outcome, .. } => outcome.clone(),
			Signal::Idle | Signal::Disposed => Err(Error::Disposed),
		}
	}

	/// Subscribes to every change of the service's relation and invalidates on each event.
	///
	/// If a value is already cached or being fetched, the entry is invalidated once the feed is
	/// live, since changes made before the subscription started would otherwise be missed.
	pub async fn subscribe_to_changes(&self, feed: &dyn ChangeFeed) -> Result<Subscription> {
		if self.inner.lock_entry().disposed {
			return Err(Error::Disposed);
		}

		let stream = feed.subscribe(&self.inner.relation, EventFilter::All).await.map_err(|err| {
			tracing::warn!(
				relation = %self.inner.relation,
				error = %err,
				"Change feed subscription failed; serving last known value."
			);

			match err {
				Error::Subscription { .. } => err,
				other => Error::Subscription { message: other.to_string() },
			}
		})?;
		let weak = Arc::downgrade(&self.inner);
		let task = self.inner.runtime.spawn(handle_changes(weak, stream));
		let catch_up = {
			let mut entry = self.inner.lock_entry();

			if entry.disposed {
				task.abort();

				return Err(Error::Disposed);
			}

			entry.subscriptions.retain(|handle| !handle.is_finished());
			entry.subscriptions.push(task.abort_handle());

			entry.value.is_some() || entry.in_flight
		};

		if catch_up {
			self.invalidate();
		}

		tracing::info!(relation = %self.inner.relation, "Subscribed to change feed.");

		Ok(Subscription { relation: self.inner.relation.clone(), task: Some(task) })
	}

	/// Tears the entry down. Releases every subscription, discards any in-flight result, and
	/// fails pending `refresh` callers with [`Error::Disposed`].
	pub fn dispose(&self) {
		let subscriptions = {
			let mut entry = self.inner.lock_entry();

			if entry.disposed {
				return;
			}

			entry.disposed = true;
			entry.in_flight = false;
			entry.rerun = false;

			std::mem::take(&mut entry.subscriptions)
		};

		for subscription in subscriptions {
			subscription.abort();
		}

		self.inner.settled.send_replace(Signal::Disposed);

		tracing::info!(key = UNREAD_COUNT_KEY, "Unread count service disposed.");
	}

	/// Returns the generation the caller should wait for.
	fn schedule(&self) -> Result<u64> {
		let (target, start) = {
			let mut entry = self.inner.lock_entry();

			if entry.disposed {
				return Err(Error::Disposed);
			}

			entry.stale = true;

			if entry.in_flight {
				entry.rerun = true;

				(entry.generation + 1, false)
			} else {
				(entry.begin_fetch(), true)
			}
		};

		if start {
			self.inner.spawn_fetch(target);
		}

		Ok(target)
	}
}

async fn handle_changes(inner: Weak<Inner>, mut stream: ChangeStream) {
	while let Some(event) = stream.recv().await {
		let Some(inner) = inner.upgrade() else {
			return;
		};

		tracing::trace!(relation = %event.relation, op = ?event.op, "Change event received.");

		let service = UnreadCountService { inner };

		if service.schedule().is_err() {
			return;
		}
	}

	tracing::warn!("Change feed closed; serving last known value.");
}

/// A live change feed subscription. Released on [`Subscription::unsubscribe`] or drop.
#[derive(Debug)]
pub struct Subscription {
	relation: String,
	task: Option<JoinHandle<()>>,
}
impl Subscription {
	pub fn relation(&self) -> &str {
		&self.relation
	}

	pub fn is_active(&self) -> bool {
		self.task.as_ref().is_some_and(|task| !task.is_finished())
	}

	/// Releases the feed and waits until its handler has stopped, so no refresh fires afterwards.
	pub async fn unsubscribe(mut self) {
		if let Some(task) = self.task.take() {
			task.abort();

			let _ = task.await;
		}

		tracing::debug!(relation = %self.relation, "Unsubscribed from change feed.");
	}
}
impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(task) = self.task.take() {
			task.abort();
		}
	}
}
