//! `SQLite` durable sink.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::session::core::config::StorageConfig;
use crate::session::core::errors::{SessionError, SessionResult};
use crate::session::core::ids::{ConversationId, SessionId};
use crate::session::core::message::{Message, Role};
use crate::session::engine::summary::SessionSummary;
use crate::session::sink::{DurableSink, SinkFuture};

/// Stored message row before decoding.
type MessageRow = (i64, String, String, String, Option<String>);

/// `SQLite` implementation of the durable sink.
///
/// Messages live in one row per `(conversation_id, sequence)`; summaries are
/// stored as JSON keyed by session id.
pub struct SqliteSink {
    conn: Connection,
    message_table: String,
    summary_table: String,
}

impl SqliteSink {
    /// Open the database and create the tables if needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> SessionResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        let message_table = config.message_table.clone();
        let summary_table = config.summary_table.clone();
        let (messages, summaries) = (message_table.clone(), summary_table.clone());

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {messages} (
                    conversation_id TEXT NOT NULL,
                    sequence INTEGER NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    ts TEXT NOT NULL,
                    metadata TEXT,
                    PRIMARY KEY (conversation_id, sequence)
                );
                CREATE TABLE IF NOT EXISTS {summaries} (
                    session_id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    started_at INTEGER NOT NULL,
                    ended_at INTEGER NOT NULL,
                    payload TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{summaries}_conversation
                    ON {summaries} (conversation_id);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            message_table,
            summary_table,
        })
    }

    /// Load a stored summary.
    ///
    /// # Errors
    /// Returns an error if storage access fails or the payload is corrupt.
    pub async fn load_summary(&self, session_id: &SessionId) -> SessionResult<Option<SessionSummary>> {
        let table = self.summary_table.clone();
        let session = session_id.to_string();
        let payload = self
            .conn
            .call(move |conn| {
                let payload = conn
                    .query_row(
                        &format!("SELECT payload FROM {table} WHERE session_id = ?1"),
                        rusqlite::params![session],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(payload)
            })
            .await?;

        payload
            .map(|payload| serde_json::from_str(&payload).map_err(SessionError::from))
            .transpose()
    }
}

fn encode_row(message: &Message) -> SessionResult<MessageRow> {
    let sequence = i64::try_from(message.sequence)
        .map_err(|_| SessionError::Sink(format!("sequence {} out of range", message.sequence)))?;
    Ok((
        sequence,
        message.role.to_string(),
        message.content.clone(),
        message.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
        message.metadata.as_ref().map(serde_json::to_string).transpose()?,
    ))
}

fn decode_row((sequence, role, content, ts, metadata): MessageRow) -> SessionResult<Message> {
    let sequence = u64::try_from(sequence)
        .map_err(|_| SessionError::Sink(format!("invalid sequence {sequence}")))?;
    let role = Role::from_str(&role).map_err(|err| SessionError::Sink(format!("invalid role: {err}")))?;
    let timestamp = DateTime::parse_from_rfc3339(&ts)
        .map_err(|err| SessionError::Sink(format!("invalid timestamp: {err}")))?
        .with_timezone(&Utc);
    let metadata = metadata
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|err| SessionError::Sink(format!("invalid metadata: {err}")))?;
    Ok(Message::new(role, content, timestamp, sequence).with_metadata(metadata))
}

impl DurableSink for SqliteSink {
    fn write_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        message: &'a Message,
    ) -> SinkFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let table = self.message_table.clone();
            let conversation = conversation_id.to_string();
            let (sequence, role, content, ts, metadata) = encode_row(message)?;
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT OR IGNORE INTO {table}
                            (conversation_id, sequence, role, content, ts, metadata)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                        ),
                        rusqlite::params![conversation, sequence, role, content, ts, metadata],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn write_summary<'a>(
        &'a self,
        summary: &'a SessionSummary,
    ) -> SinkFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let message_table = self.message_table.clone();
            let summary_table = self.summary_table.clone();
            let session = summary.session_id.to_string();
            let conversation = summary.conversation_id.to_string();
            let started_at = summary.started_at.timestamp_millis();
            let ended_at = summary.ended_at.timestamp_millis();
            let payload = serde_json::to_string(summary)?;
            let rows = summary
                .messages
                .iter()
                .map(encode_row)
                .collect::<SessionResult<Vec<_>>>()?;
            let row_count = rows.len();

            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    {
                        let mut stmt = tx.prepare(&format!(
                            "INSERT OR IGNORE INTO {message_table}
                            (conversation_id, sequence, role, content, ts, metadata)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                        ))?;
                        for (sequence, role, content, ts, metadata) in rows {
                            stmt.execute(rusqlite::params![
                                conversation,
                                sequence,
                                role,
                                content,
                                ts,
                                metadata
                            ])?;
                        }
                        tx.execute(
                            &format!(
                                "INSERT OR REPLACE INTO {summary_table}
                                (session_id, conversation_id, started_at, ended_at, payload)
                                VALUES (?1, ?2, ?3, ?4, ?5)"
                            ),
                            rusqlite::params![session, conversation, started_at, ended_at, payload],
                        )?;
                    }
                    tx.commit()?;
                    Ok(())
                })
                .await?;

            debug!(
                session_id = %summary.session_id,
                messages = row_count,
                "Stored session summary"
            );
            Ok(())
        })
    }

    fn read_recent_messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        limit: usize,
    ) -> SinkFuture<'a, SessionResult<Vec<Message>>> {
        Box::pin(async move {
            let table = self.message_table.clone();
            let conversation = conversation_id.to_string();
            let limit = i64::try_from(limit)
                .map_err(|_| SessionError::InvalidConfig("limit exceeds i64".to_string()))?;
            let mut rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT sequence, role, content, ts, metadata
                         FROM {table}
                         WHERE conversation_id = ?1
                         ORDER BY sequence DESC
                         LIMIT ?2"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![conversation, limit], |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                        })?
                        .collect::<Result<Vec<MessageRow>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            rows.reverse();
            rows.into_iter().map(decode_row).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::core::context::SessionContext;
    use crate::session::core::errors::SessionWarnings;
    use crate::session::state::participants::ParticipantSnapshot;

    async fn sink() -> SqliteSink {
        let config = StorageConfig {
            sqlite_path: ":memory:".into(),
            ..StorageConfig::default()
        };
        SqliteSink::new(&config).await.unwrap()
    }

    fn message(sequence: u64, content: &str) -> Message {
        Message::new(Role::Assistant, content, Utc::now(), sequence)
    }

    #[tokio::test]
    async fn test_duplicate_sequence_keeps_first_row() {
        let sink = sink().await;
        let cid = ConversationId::new("c1");
        sink.write_message(&cid, &message(1, "original")).await.unwrap();
        sink.write_message(&cid, &message(1, "redelivered")).await.unwrap();

        let recent = sink.read_recent_messages(&cid, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "original");
        assert_eq!(recent[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_read_recent_orders_by_sequence() {
        let sink = sink().await;
        let cid = ConversationId::new("c1");
        for seq in [4, 2, 1, 3] {
            sink.write_message(&cid, &message(seq, &format!("m{seq}"))).await.unwrap();
        }
        let recent = sink.read_recent_messages(&cid, 3).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_metadata_is_stored_with_message() {
        let sink = sink().await;
        let cid = ConversationId::new("c1");
        let tagged = message(1, "hi").with_metadata(Some(serde_json::json!({"lang": "en"})));
        sink.write_message(&cid, &tagged).await.unwrap();
        sink.write_message(&cid, &message(2, "plain")).await.unwrap();

        let recent = sink.read_recent_messages(&cid, 10).await.unwrap();
        assert_eq!(recent[0].metadata, Some(serde_json::json!({"lang": "en"})));
        assert_eq!(recent[1].metadata, None);
    }

    #[tokio::test]
    async fn test_summary_round_trip() {
        let sink = sink().await;
        let start = Utc::now();
        let mut context = SessionContext::new(SessionId::new("s1"), ConversationId::new("c1"), start);
        context.mark_ended(start);
        let summary = SessionSummary::build(
            &context,
            vec![message(1, "hi"), message(2, "hello")],
            ParticipantSnapshot::new(),
            2,
            SessionWarnings::new(),
        );

        sink.write_summary(&summary).await.unwrap();

        let stored = sink.load_summary(&SessionId::new("s1")).await.unwrap().unwrap();
        assert_eq!(stored.messages, summary.messages);
        let recent = sink
            .read_recent_messages(&ConversationId::new("c1"), 50)
            .await
            .unwrap();
        assert_eq!(recent, summary.messages);
        assert!(sink.load_summary(&SessionId::new("other")).await.unwrap().is_none());
    }
}
