pub mod feed;
pub mod postgres;
pub mod unread;

mod error;

pub use error::{Error, Result};
pub use feed::{ChangeEvent, ChangeOp, ChangeStream, EventFilter};
pub use postgres::{PgChangeFeed, PgCountSource};
pub use unread::{EntryState, Subscription, UNREAD_COUNT_KEY, UnreadCount, UnreadCountService};

use std::{future::Future, pin::Pin};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Runs the viewer-scoped unread count query.
pub trait CountSource
where
	Self: Send + Sync,
{
	fn count_unread(&self) -> BoxFuture<'_, Result<u64>>;
}

/// Delivers change notifications for a relation until the returned stream is dropped.
pub trait ChangeFeed
where
	Self: Send + Sync,
{
	fn subscribe<'a>(
		&'a self,
		relation: &'a str,
		filter: EventFilter,
	) -> BoxFuture<'a, Result<ChangeStream>>;
}
