use serde::Deserialize;
use tokio::sync::mpsc;

/// Receiving half of a change feed subscription. Dropping it unsubscribes.
pub type ChangeStream = mpsc::Receiver<ChangeEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOp {
	Insert,
	Update,
	Delete,
	Truncate,
	/// Emitted by a feed after it reconnects; changes may have been missed.
	#[serde(skip)]
	Resync,
	#[serde(other)]
	Unknown,
}

/// Notification that some row of `relation` changed. Carries no viewer scope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeEvent {
	pub relation: String,
	pub op: ChangeOp,
}
impl ChangeEvent {
	pub fn new(relation: impl Into<String>, op: ChangeOp) -> Self {
		Self { relation: relation.into(), op }
	}

	pub fn resync(relation: impl Into<String>) -> Self {
		Self::new(relation, ChangeOp::Resync)
	}

	/// Parses the JSON payload published by the recipient trigger.
	pub fn from_payload(payload: &str) -> Option<Self> {
		serde_json::from_str(payload).ok()
	}
}

/// Which operations a subscription wants. `All` is the `*` filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EventFilter {
	#[default]
	All,
	Only(Vec<ChangeOp>),
}
impl EventFilter {
	/// `Resync` and `Unknown` always pass since they may hide any operation.
	pub fn matches(&self, op: ChangeOp) -> bool {
		match self {
			Self::All => true,
			Self::Only(ops) =>
				matches!(op, ChangeOp::Resync | ChangeOp::Unknown) || ops.contains(&op),
		}
	}
}
