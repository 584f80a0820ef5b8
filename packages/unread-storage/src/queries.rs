use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, db::Db, models::MessageRecipient};

/// Counts messages addressed to `recipient_id` that have not been read.
pub async fn count_unread(db: &Db, recipient_id: Uuid) -> Result<u64> {
	let count: i64 = sqlx::query_scalar(
		"\
SELECT count(*)
FROM message_recipients
WHERE recipient_id = $1
	AND is_read = false",
	)
	.bind(recipient_id)
	.fetch_one(&db.pool)
	.await?;

	u64::try_from(count)
		.map_err(|_| Error::InvalidArgument(format!("Unread count {count} is negative.")))
}

pub async fn insert_recipient(
	db: &Db,
	message_id: Uuid,
	recipient_id: Uuid,
) -> Result<MessageRecipient> {
	let row = sqlx::query_as::<_, MessageRecipient>(
		"\
INSERT INTO message_recipients (message_recipient_id, message_id, recipient_id)
VALUES ($1, $2, $3)
RETURNING
	message_recipient_id,
	message_id,
	recipient_id,
	is_read,
	created_at,
	read_at",
	)
	.bind(Uuid::new_v4())
	.bind(message_id)
	.bind(recipient_id)
	.fetch_one(&db.pool)
	.await?;

	Ok(row)
}

/// Marks one delivery as read. Returns `false` when it was already read.
pub async fn mark_read(
	db: &Db,
	recipient_id: Uuid,
	message_id: Uuid,
	now: OffsetDateTime,
) -> Result<bool> {
	let is_read: Option<bool> = sqlx::query_scalar(
		"\
SELECT is_read
FROM message_recipients
WHERE recipient_id = $1
	AND message_id = $2",
	)
	.bind(recipient_id)
	.bind(message_id)
	.fetch_optional(&db.pool)
	.await?;

	match is_read {
		None => Err(Error::NotFound(format!(
			"Message {message_id} has no delivery for recipient {recipient_id}."
		))),
		Some(true) => Ok(false),
		Some(false) => {
			let result = sqlx::query(
				"\
UPDATE message_recipients
SET is_read = true, read_at = $3
WHERE recipient_id = $1
	AND message_id = $2
	AND is_read = false",
			)
			.bind(recipient_id)
			.bind(message_id)
			.bind(now)
			.execute(&db.pool)
			.await?;

			Ok(result.rows_affected() > 0)
		},
	}
}

/// Marks every unread delivery for `recipient_id` as read and returns how many changed.
pub async fn mark_all_read(db: &Db, recipient_id: Uuid, now: OffsetDateTime) -> Result<u64> {
	let result = sqlx::query(
		"\
UPDATE message_recipients
SET is_read = true, read_at = $2
WHERE recipient_id = $1
	AND is_read = false",
	)
	.bind(recipient_id)
	.bind(now)
	.execute(&db.pool)
	.await?;

	Ok(result.rows_affected())
}

pub async fn delete_recipient(db: &Db, message_recipient_id: Uuid) -> Result<()> {
	let result = sqlx::query("DELETE FROM message_recipients WHERE message_recipient_id = $1")
		.bind(message_recipient_id)
		.execute(&db.pool)
		.await?;

	if result.rows_affected() == 0 {
		return Err(Error::NotFound(format!("Message recipient {message_recipient_id}.")));
	}

	Ok(())
}

/// Lists unread deliveries for `recipient_id`, newest first.
pub async fn list_unread(db: &Db, recipient_id: Uuid, limit: u32) -> Result<Vec<MessageRecipient>> {
	if limit == 0 {
		return Err(Error::InvalidArgument("limit must be greater than zero.".to_string()));
	}

	let rows = sqlx::query_as::<_, MessageRecipient>(
		"\
SELECT
	message_recipient_id,
	message_id,
	recipient_id,
	is_read,
	created_at,
	read_at
FROM message_recipients
WHERE recipient_id = $1
	AND is_read = false
ORDER BY created_at DESC, message_recipient_id
LIMIT $2",
	)
	.bind(recipient_id)
	.bind(i64::from(limit))
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}
