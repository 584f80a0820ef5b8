use time::OffsetDateTime;
use uuid::Uuid;

/// One message delivered to one recipient, with its read state.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRecipient {
	pub message_recipient_id: Uuid,
	pub message_id: Uuid,
	pub recipient_id: Uuid,
	pub is_read: bool,
	pub created_at: OffsetDateTime,
	pub read_at: Option<OffsetDateTime>,
}
