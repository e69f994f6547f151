//! Offline snapshot storage repository.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::model::{Delivery, Email, EmailId, MailboxId, Participants, SyncCursor};
use crate::Result;

/// A persisted sync position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCursor {
    /// Mailbox the cursor belongs to.
    pub mailbox_id: MailboxId,
    /// Last applied provider cursor.
    pub cursor: SyncCursor,
    /// When the sync that produced it completed.
    pub last_synced_at: DateTime<Utc>,
}

/// Repository persisting the local store and sync cursors between sessions.
#[derive(Debug, Clone)]
pub struct SnapshotRepository {
    pool: SqlitePool,
}

impl SnapshotRepository {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS emails (
                id TEXT PRIMARY KEY NOT NULL,
                thread_id TEXT,
                subject TEXT NOT NULL DEFAULT '',
                body_html TEXT NOT NULL DEFAULT '',
                snippet TEXT NOT NULL DEFAULT '',
                participants_json TEXT NOT NULL DEFAULT '{}',
                sent_at TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                labels_json TEXT NOT NULL DEFAULT '[]'
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sync_cursors (
                mailbox_id TEXT PRIMARY KEY NOT NULL,
                cursor TEXT NOT NULL,
                last_synced_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_emails_sent_at
            ON emails(sent_at DESC, id)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist emails, replacing stored copies with the same ID.
    ///
    /// Provisional (unconfirmed) sends are skipped; they never outlive the
    /// session that created them.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query or serialization fails.
    pub async fn save_emails(&self, emails: &[Email]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for email in emails.iter().filter(|e| e.delivery == Delivery::Delivered) {
            sqlx::query(
                r"
                INSERT INTO emails
                    (id, thread_id, subject, body_html, snippet, participants_json,
                     sent_at, is_read, is_starred, labels_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    thread_id = excluded.thread_id,
                    subject = excluded.subject,
                    body_html = excluded.body_html,
                    snippet = excluded.snippet,
                    participants_json = excluded.participants_json,
                    sent_at = excluded.sent_at,
                    is_read = excluded.is_read,
                    is_starred = excluded.is_starred,
                    labels_json = excluded.labels_json
                ",
            )
            .bind(email.id.as_str())
            .bind(&email.thread_id)
            .bind(&email.subject)
            .bind(&email.body_html)
            .bind(&email.snippet)
            .bind(serde_json::to_string(&email.participants)?)
            .bind(email.sent_at.to_rfc3339())
            .bind(email.is_read)
            .bind(email.is_starred)
            .bind(serde_json::to_string(&email.labels)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove persisted emails.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_emails(&self, ids: &[EmailId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query(r"DELETE FROM emails WHERE id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Load every persisted email.
    ///
    /// Rows that fail to decode are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn load_emails(&self) -> Result<Vec<Email>> {
        let rows = sqlx::query(
            r"
            SELECT id, thread_id, subject, body_html, snippet, participants_json,
                   sent_at, is_read, is_starred, labels_json
            FROM emails
            ORDER BY sent_at DESC, id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(email_from_row).collect())
    }

    /// Record the cursor of a completed sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn save_cursor(
        &self,
        mailbox_id: &MailboxId,
        cursor: &SyncCursor,
        synced_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO sync_cursors (mailbox_id, cursor, last_synced_at)
            VALUES (?, ?, ?)
            ON CONFLICT(mailbox_id) DO UPDATE SET
                cursor = excluded.cursor,
                last_synced_at = excluded.last_synced_at
            ",
        )
        .bind(mailbox_id.as_str())
        .bind(cursor.as_str())
        .bind(synced_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get every stored cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn load_cursors(&self) -> Result<Vec<StoredCursor>> {
        let rows = sqlx::query(r"SELECT mailbox_id, cursor, last_synced_at FROM sync_cursors")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(cursor_from_row).collect())
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn email_from_row(row: &SqliteRow) -> Option<Email> {
    let sent_at = parse_timestamp(&row.get::<String, _>("sent_at"))?;
    let participants: Participants =
        serde_json::from_str(&row.get::<String, _>("participants_json")).ok()?;
    let labels = serde_json::from_str(&row.get::<String, _>("labels_json")).ok()?;

    Some(Email {
        id: EmailId::new(row.get::<String, _>("id")),
        thread_id: row.get("thread_id"),
        subject: row.get("subject"),
        body_html: row.get("body_html"),
        snippet: row.get("snippet"),
        participants,
        sent_at,
        is_read: row.get::<bool, _>("is_read"),
        is_starred: row.get::<bool, _>("is_starred"),
        labels,
        delivery: Delivery::Delivered,
    })
}

fn cursor_from_row(row: &SqliteRow) -> Option<StoredCursor> {
    Some(StoredCursor {
        mailbox_id: MailboxId::new(row.get::<String, _>("mailbox_id")),
        cursor: SyncCursor::new(row.get::<String, _>("cursor")),
        last_synced_at: parse_timestamp(&row.get::<String, _>("last_synced_at"))?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Email {
        let mut email = Email::new("m1", "Quarterly report", Utc::now())
            .in_thread("t1")
            .sent_by("alice@example.com")
            .to("bob@example.com")
            .with_body("<p>Numbers attached</p>")
            .starred(true);
        email.labels.insert("INBOX".to_string());
        email
    }

    #[tokio::test]
    async fn test_save_and_load_emails() {
        let repo = SnapshotRepository::in_memory().await.unwrap();
        let email = sample();

        repo.save_emails(std::slice::from_ref(&email)).await.unwrap();

        let loaded = repo.load_emails().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, email.id);
        assert_eq!(loaded[0].thread_id.as_deref(), Some("t1"));
        assert_eq!(loaded[0].participants, email.participants);
        assert_eq!(loaded[0].snippet, "Numbers attached");
        assert!(loaded[0].is_starred);
        assert!(loaded[0].labels.contains("INBOX"));
    }

    #[tokio::test]
    async fn test_save_overwrites_and_skips_pending() {
        let repo = SnapshotRepository::in_memory().await.unwrap();
        let mut email = sample();
        repo.save_emails(std::slice::from_ref(&email)).await.unwrap();

        email.is_read = true;
        let mut pending = Email::new("local-1", "Draft", Utc::now());
        pending.delivery = Delivery::Pending;
        repo.save_emails(&[email, pending]).await.unwrap();

        let loaded = repo.load_emails().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].is_read);
    }

    #[tokio::test]
    async fn test_delete_emails() {
        let repo = SnapshotRepository::in_memory().await.unwrap();
        repo.save_emails(&[sample()]).await.unwrap();
        repo.delete_emails(&[EmailId::from("m1")]).await.unwrap();
        assert!(repo.load_emails().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cursor_round_trip() {
        let repo = SnapshotRepository::in_memory().await.unwrap();
        let inbox = MailboxId::new("INBOX");
        assert!(repo.load_cursors().await.unwrap().is_empty());

        repo.save_cursor(&inbox, &SyncCursor::new("c1"), Utc::now())
            .await
            .unwrap();
        repo.save_cursor(&inbox, &SyncCursor::new("c2"), Utc::now())
            .await
            .unwrap();

        let stored = repo.load_cursors().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].mailbox_id, inbox);
        assert_eq!(stored[0].cursor, SyncCursor::new("c2"));
    }
}
