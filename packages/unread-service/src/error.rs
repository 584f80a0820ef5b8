pub type Result<T, E = Error> = std::result::Result<T, E>;

/// `Clone` so one fetch outcome can be handed to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	#[error("Data source error: {message}")]
	DataSource { message: String },
	#[error("Subscription error: {message}")]
	Subscription { message: String },
	#[error("Unread count service has been disposed.")]
	Disposed,
}
impl From<unread_storage::Error> for Error {
	fn from(err: unread_storage::Error) -> Self {
		Self::DataSource { message: err.to_string() }
	}
}
