//! SQLite message broker
//!
//! Every named queue lives in one `messages` table. A receive claims the
//! oldest visible row inside an immediate transaction, stamps it with a
//! fresh lease id and pushes `visible_at` forward by the lease duration;
//! that transaction is the only mutual exclusion between consumers, in
//! this process or any other process sharing the database file.

use super::traits::{Message, MessageChannel, QueueError, QueueResult};
use crate::pipeline::CancellationToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Broker-wide delivery settings
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// How long a received message stays invisible to other consumers
    pub lease: Duration,
    /// A message delivered this many times without being settled is
    /// dead-lettered by the broker instead of being delivered again
    pub max_deliveries: u32,
    /// How often a waiting `receive` re-checks the table
    pub receive_poll: Duration,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(60),
            max_deliveries: 10,
            receive_poll: Duration::from_millis(250),
        }
    }
}

/// A message parked in the dead-letter side channel.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: String,
    pub queue: String,
    pub body: String,
    pub reason: String,
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Active and dead-lettered message counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    /// Visible or leased messages
    pub active: usize,
    /// Of `active`, those currently under lease
    pub leased: usize,
    pub dead_lettered: usize,
}

/// A claimed row before its body is decoded.
#[derive(Debug)]
struct RawMessage {
    id: String,
    lease_id: String,
    delivery_count: u32,
    enqueued_at: DateTime<Utc>,
    body: String,
}

/// SQLite-backed broker hosting any number of named queues.
pub struct SqliteBroker {
    conn: Mutex<Connection>,
    options: BrokerOptions,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SqliteBroker {
    fn init_schema(conn: &Connection) -> QueueResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                queue TEXT NOT NULL,
                body TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                visible_at INTEGER NOT NULL,
                lease_id TEXT,
                delivery_count INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL DEFAULT 'active',
                dead_letter_reason TEXT,
                dead_lettered_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_messages_ready
                ON messages(queue, state, visible_at);

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn from_connection(conn: Connection, options: BrokerOptions) -> QueueResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            options,
        })
    }

    /// Open or create a broker database at the given path
    pub fn open(path: impl AsRef<Path>, options: BrokerOptions) -> QueueResult<Self> {
        Self::from_connection(Connection::open(path)?, options)
    }

    /// In-memory broker (useful for testing)
    pub fn open_in_memory(options: BrokerOptions) -> QueueResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, options)
    }

    /// A typed handle on one named queue.
    pub fn queue<T>(self: &Arc<Self>, name: impl Into<String>) -> SqliteQueue<T> {
        SqliteQueue {
            broker: Arc::clone(self),
            name: name.into(),
            _body: PhantomData,
        }
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| QueueError::Unavailable("broker connection poisoned".to_string()))
    }

    fn enqueue(&self, queue: &str, bodies: &[String]) -> QueueResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let enqueued_at = Utc::now().to_rfc3339();
        let visible_at = now_millis();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages (id, queue, body, enqueued_at, visible_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for body in bodies {
                stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    queue,
                    body,
                    enqueued_at,
                    visible_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Lease the oldest visible message, dead-lettering any candidate that
    /// has already used up its deliveries.
    fn try_claim(&self, queue: &str) -> QueueResult<Option<RawMessage>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_millis();

        let claimed = loop {
            let candidate = tx
                .query_row(
                    "SELECT id, delivery_count, enqueued_at, body FROM messages
                     WHERE queue = ?1 AND state = 'active' AND visible_at <= ?2
                     ORDER BY seq LIMIT 1",
                    params![queue, now],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, u32>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, delivery_count, enqueued_at, body)) = candidate else {
                break None;
            };

            if delivery_count >= self.options.max_deliveries {
                warn!(
                    queue,
                    message_id = %id,
                    delivery_count,
                    "max deliveries exceeded, dead-lettering"
                );
                tx.execute(
                    "UPDATE messages
                     SET state = 'dead', lease_id = NULL,
                         dead_letter_reason = ?1, dead_lettered_at = ?2
                     WHERE id = ?3",
                    params![
                        format!("max deliveries ({}) exceeded", self.options.max_deliveries),
                        Utc::now().to_rfc3339(),
                        id
                    ],
                )?;
                continue;
            }

            let lease_id = Uuid::new_v4().to_string();
            let lease_ms = i64::try_from(self.options.lease.as_millis()).unwrap_or(i64::MAX);
            tx.execute(
                "UPDATE messages
                 SET lease_id = ?1, visible_at = ?2, delivery_count = delivery_count + 1
                 WHERE id = ?3",
                params![lease_id, now.saturating_add(lease_ms), id],
            )?;

            break Some(RawMessage {
                id,
                lease_id,
                delivery_count: delivery_count + 1,
                enqueued_at: parse_time(&enqueued_at),
                body,
            });
        };

        tx.commit()?;
        Ok(claimed)
    }

    fn settle_complete(&self, queue: &str, id: &str, lease_id: &str) -> QueueResult<()> {
        let conn = self.lock()?;
        let n = conn.execute(
            "DELETE FROM messages
             WHERE queue = ?1 AND id = ?2 AND lease_id = ?3 AND state = 'active'",
            params![queue, id, lease_id],
        )?;
        if n == 0 {
            return Err(QueueError::LeaseLost(id.to_string()));
        }
        Ok(())
    }

    fn settle_dead_letter(&self, queue: &str, id: &str, lease_id: &str, reason: &str) -> QueueResult<()> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE messages
             SET state = 'dead', lease_id = NULL,
                 dead_letter_reason = ?1, dead_lettered_at = ?2
             WHERE queue = ?3 AND id = ?4 AND lease_id = ?5 AND state = 'active'",
            params![reason, Utc::now().to_rfc3339(), queue, id, lease_id],
        )?;
        if n == 0 {
            return Err(QueueError::LeaseLost(id.to_string()));
        }
        Ok(())
    }

    // === Dead-letter management ===

    /// Dead-lettered messages of a queue, oldest first
    pub fn dead_letters(&self, queue: &str) -> QueueResult<Vec<DeadLetter>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, queue, body, COALESCE(dead_letter_reason, ''), delivery_count,
                    enqueued_at, COALESCE(dead_lettered_at, enqueued_at)
             FROM messages WHERE queue = ?1 AND state = 'dead' ORDER BY seq",
        )?;
        let letters = stmt
            .query_map(params![queue], |row| {
                Ok(DeadLetter {
                    id: row.get(0)?,
                    queue: row.get(1)?,
                    body: row.get(2)?,
                    reason: row.get(3)?,
                    delivery_count: row.get(4)?,
                    enqueued_at: parse_time(&row.get::<_, String>(5)?),
                    dead_lettered_at: parse_time(&row.get::<_, String>(6)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(letters)
    }

    /// Return a dead letter to the active queue with a fresh delivery count.
    /// This is the manual replay path for failed work.
    pub fn requeue_dead_letter(&self, queue: &str, id: &str) -> QueueResult<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE messages
             SET state = 'active', visible_at = ?1, delivery_count = 0,
                 dead_letter_reason = NULL, dead_lettered_at = NULL
             WHERE queue = ?2 AND id = ?3 AND state = 'dead'",
            params![now_millis(), queue, id],
        )?;
        Ok(n > 0)
    }

    /// Permanently discard every dead letter of a queue
    pub fn purge_dead_letters(&self, queue: &str) -> QueueResult<usize> {
        let conn = self.lock()?;
        let n = conn.execute(
            "DELETE FROM messages WHERE queue = ?1 AND state = 'dead'",
            params![queue],
        )?;
        Ok(n)
    }

    pub fn depth(&self, queue: &str) -> QueueResult<QueueDepth> {
        let conn = self.lock()?;
        let (active, leased, dead): (i64, i64, i64) = conn.query_row(
            "SELECT
                COALESCE(SUM(state = 'active'), 0),
                COALESCE(SUM(state = 'active' AND lease_id IS NOT NULL AND visible_at > ?2), 0),
                COALESCE(SUM(state = 'dead'), 0)
             FROM messages WHERE queue = ?1",
            params![queue, now_millis()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(QueueDepth {
            active: active as usize,
            leased: leased as usize,
            dead_lettered: dead as usize,
        })
    }
}

/// A typed view of one queue on a [`SqliteBroker`].
pub struct SqliteQueue<T> {
    broker: Arc<SqliteBroker>,
    name: String,
    _body: PhantomData<fn() -> T>,
}

impl<T> SqliteQueue<T> {
    pub fn broker(&self) -> &Arc<SqliteBroker> {
        &self.broker
    }
}

impl<T> Clone for SqliteQueue<T> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            name: self.name.clone(),
            _body: PhantomData,
        }
    }
}

#[async_trait]
impl<T> MessageChannel<T> for SqliteQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, timeout: Duration, cancel: &CancellationToken) -> QueueResult<Option<Message<T>>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            if let Some(raw) = self.broker.try_claim(&self.name)? {
                match serde_json::from_str::<T>(&raw.body) {
                    Ok(body) => {
                        return Ok(Some(Message {
                            id: raw.id,
                            lease_id: raw.lease_id,
                            delivery_count: raw.delivery_count,
                            enqueued_at: raw.enqueued_at,
                            body,
                        }));
                    }
                    Err(e) => {
                        warn!(queue = %self.name, message_id = %raw.id, error = %e, "undecodable message body");
                        self.broker.settle_dead_letter(
                            &self.name,
                            &raw.id,
                            &raw.lease_id,
                            &format!("undecodable body: {}", e),
                        )?;
                        continue;
                    }
                }
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = self.broker.options.receive_poll.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }

    async fn send(&self, body: &T) -> QueueResult<()> {
        let encoded = serde_json::to_string(body)?;
        self.broker.enqueue(&self.name, &[encoded])
    }

    async fn send_batch(&self, bodies: &[T]) -> QueueResult<()> {
        if bodies.is_empty() {
            return Ok(());
        }
        let encoded = bodies
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        self.broker.enqueue(&self.name, &encoded)
    }

    async fn complete(&self, message: &Message<T>) -> QueueResult<()> {
        self.broker.settle_complete(&self.name, &message.id, &message.lease_id)
    }

    async fn dead_letter(&self, message: &Message<T>, reason: &str) -> QueueResult<()> {
        self.broker
            .settle_dead_letter(&self.name, &message.id, &message.lease_id, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Job {
        n: u32,
    }

    fn broker(lease: Duration) -> Arc<SqliteBroker> {
        Arc::new(
            SqliteBroker::open_in_memory(BrokerOptions {
                lease,
                max_deliveries: 3,
                receive_poll: Duration::from_millis(5),
            })
            .unwrap(),
        )
    }

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn empty_queue_times_out_with_none() {
        let q: SqliteQueue<Job> = broker(Duration::from_secs(30)).queue("jobs");
        let got = q.receive(SHORT, &CancellationToken::new()).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn cancelled_receive_returns_none() {
        let q: SqliteQueue<Job> = broker(Duration::from_secs(30)).queue("jobs");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let got = q.receive(Duration::from_secs(30), &cancel).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn leased_message_is_invisible_until_completed() {
        let q: SqliteQueue<Job> = broker(Duration::from_secs(30)).queue("jobs");
        let cancel = CancellationToken::new();
        q.send(&Job { n: 1 }).await.unwrap();

        let msg = q.receive(SHORT, &cancel).await.unwrap().unwrap();
        assert_eq!(msg.body, Job { n: 1 });
        assert_eq!(msg.delivery_count, 1);
        assert!(q.receive(SHORT, &cancel).await.unwrap().is_none());

        q.complete(&msg).await.unwrap();
        let depth = q.broker().depth("jobs").unwrap();
        assert_eq!(depth, QueueDepth::default());
    }

    #[tokio::test]
    async fn oversized_lease_saturates_instead_of_wrapping() {
        let q: SqliteQueue<Job> = broker(Duration::MAX).queue("jobs");
        let cancel = CancellationToken::new();
        q.send(&Job { n: 1 }).await.unwrap();

        let msg = q.receive(SHORT, &cancel).await.unwrap().unwrap();
        assert!(q.receive(SHORT, &cancel).await.unwrap().is_none());
        assert_eq!(q.broker().depth("jobs").unwrap().leased, 1);
        q.complete(&msg).await.unwrap();
    }

    #[tokio::test]
    async fn expired_lease_redelivers_and_invalidates_old_lease() {
        let q: SqliteQueue<Job> = broker(Duration::from_millis(30)).queue("jobs");
        let cancel = CancellationToken::new();
        q.send(&Job { n: 7 }).await.unwrap();

        let first = q.receive(SHORT, &cancel).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = q.receive(SHORT, &cancel).await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.delivery_count, 2);
        assert!(second.is_redelivery());

        let err = q.complete(&first).await.unwrap_err();
        assert!(matches!(err, QueueError::LeaseLost(_)));
        q.complete(&second).await.unwrap();
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let q: SqliteQueue<Job> = broker(Duration::from_secs(30)).queue("jobs");
        let cancel = CancellationToken::new();
        q.send_batch(&[Job { n: 1 }, Job { n: 2 }, Job { n: 3 }]).await.unwrap();

        let mut seen = Vec::new();
        while let Some(msg) = q.receive(SHORT, &cancel).await.unwrap() {
            seen.push(msg.body.n);
            q.complete(&msg).await.unwrap();
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn queues_are_isolated_by_name() {
        let b = broker(Duration::from_secs(30));
        let a: SqliteQueue<Job> = b.queue("a");
        let other: SqliteQueue<Job> = b.queue("b");
        a.send(&Job { n: 1 }).await.unwrap();

        assert!(other.receive(SHORT, &CancellationToken::new()).await.unwrap().is_none());
        assert_eq!(b.depth("a").unwrap().active, 1);
    }

    #[tokio::test]
    async fn dead_letter_moves_message_aside_and_requeue_replays_it() {
        let q: SqliteQueue<Job> = broker(Duration::from_secs(30)).queue("jobs");
        let cancel = CancellationToken::new();
        q.send(&Job { n: 4 }).await.unwrap();

        let msg = q.receive(SHORT, &cancel).await.unwrap().unwrap();
        q.dead_letter(&msg, "adapter failed").await.unwrap();
        assert!(q.receive(SHORT, &cancel).await.unwrap().is_none());

        let letters = q.broker().dead_letters("jobs").unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, "adapter failed");
        assert_eq!(letters[0].id, msg.id);

        assert!(q.broker().requeue_dead_letter("jobs", &msg.id).unwrap());
        let replayed = q.receive(SHORT, &cancel).await.unwrap().unwrap();
        assert_eq!(replayed.body, Job { n: 4 });
        assert_eq!(replayed.delivery_count, 1);
    }

    #[tokio::test]
    async fn poison_message_is_dead_lettered_after_max_deliveries() {
        let q: SqliteQueue<Job> = broker(Duration::from_millis(10)).queue("jobs");
        let cancel = CancellationToken::new();
        q.send(&Job { n: 9 }).await.unwrap();

        for _ in 0..3 {
            assert!(q.receive(SHORT, &cancel).await.unwrap().is_some());
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(q.receive(SHORT, &cancel).await.unwrap().is_none());

        let letters = q.broker().dead_letters("jobs").unwrap();
        assert_eq!(letters.len(), 1);
        assert!(letters[0].reason.contains("max deliveries"));
    }

    #[tokio::test]
    async fn undecodable_body_is_dead_lettered() {
        let b = broker(Duration::from_secs(30));
        let raw: SqliteQueue<String> = b.queue("jobs");
        let typed: SqliteQueue<Job> = b.queue("jobs");
        raw.send(&"not a job".to_string()).await.unwrap();
        typed.send(&Job { n: 2 }).await.unwrap();

        let msg = typed.receive(SHORT, &CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(msg.body, Job { n: 2 });

        let letters = b.dead_letters("jobs").unwrap();
        assert_eq!(letters.len(), 1);
        assert!(letters[0].reason.starts_with("undecodable body"));
    }

    #[tokio::test]
    async fn purge_discards_dead_letters() {
        let q: SqliteQueue<Job> = broker(Duration::from_secs(30)).queue("jobs");
        q.send(&Job { n: 1 }).await.unwrap();
        let msg = q.receive(SHORT, &CancellationToken::new()).await.unwrap().unwrap();
        q.dead_letter(&msg, "bad").await.unwrap();

        assert_eq!(q.broker().purge_dead_letters("jobs").unwrap(), 1);
        assert_eq!(q.broker().depth("jobs").unwrap().dead_lettered, 0);
    }
}
