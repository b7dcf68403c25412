//! Redis Streams job queue backend.
//!
//! One stream per topic, all read through a single consumer group. A claim
//! first sweeps entries whose consumer went quiet past the visibility
//! window (XAUTOCLAIM), then falls back to a blocking read of new entries
//! (XREADGROUP). Acks are XACK; a nack simply leaves the entry pending so
//! the next sweep redelivers it.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};

use crate::error::QueueError;

use super::{Delivery, Job, JobQueue, Topic};

const CONSUMER_GROUP: &str = "tilery";
const CLAIM_BLOCK_MS: usize = 1000;

/// Job queue backed by Redis Streams.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    visibility: Duration,
}

impl RedisJobQueue {
    /// Connect to Redis and create the consumer group on every topic
    /// stream (MKSTREAM makes this idempotent).
    pub async fn connect(redis_url: &str, visibility: Duration) -> Result<Self, QueueError> {
        let client = Client::open(redis_url)
            .map_err(|e| QueueError::Connection(format!("redis open failed: {}", e)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(format!("redis connect failed: {}", e)))?;

        for topic in Topic::ALL {
            // BUSYGROUP on re-creation is expected and ignored.
            let _: Result<(), _> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(topic.as_str())
                .arg(CONSUMER_GROUP)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;
        }

        Ok(Self { conn, visibility })
    }

    async fn times_delivered(&self, topic: Topic, entry_id: &str) -> Result<u32, QueueError> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingCountReply = conn
            .xpending_count(topic.as_str(), CONSUMER_GROUP, entry_id, entry_id, 1)
            .await
            .map_err(|e| QueueError::Backend(format!("XPENDING failed: {}", e)))?;

        Ok(reply
            .ids
            .first()
            .map(|p| p.times_delivered as u32)
            .unwrap_or(1))
    }

    fn parse_entry(entry: &StreamId) -> Result<Job, QueueError> {
        let data = entry
            .map
            .get("data")
            .ok_or_else(|| QueueError::Payload(format!("entry {} has no data field", entry.id)))?;

        let bytes: Vec<u8> = redis::from_redis_value(data)
            .map_err(|e| QueueError::Payload(format!("entry {} unreadable: {}", entry.id, e)))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| QueueError::Payload(format!("entry {} bad payload: {}", entry.id, e)))
    }

    /// Reclaim one entry whose previous consumer exceeded the visibility
    /// window.
    async fn claim_stale(
        &self,
        topic: Topic,
        consumer: &str,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn.clone();
        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(topic.as_str())
            .arg(CONSUMER_GROUP)
            .arg(consumer)
            .arg(self.visibility.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Backend(format!("XAUTOCLAIM failed: {}", e)))?;

        let Some(entry) = reply.claimed.first() else {
            return Ok(None);
        };

        let job = match Self::parse_entry(entry) {
            Ok(job) => job,
            Err(e) => {
                // A poison entry would otherwise be reclaimed forever.
                let _: Result<(), _> = conn
                    .xack(topic.as_str(), CONSUMER_GROUP, &[&entry.id])
                    .await;
                return Err(e);
            }
        };

        let attempt = self.times_delivered(topic, &entry.id).await?;

        Ok(Some(Delivery {
            job,
            token: entry.id.clone(),
            attempt,
        }))
    }

    /// Blocking read of the next new entry on a topic.
    async fn claim_new(
        &self,
        topic: Topic,
        consumer: &str,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(CONSUMER_GROUP, consumer)
            .count(1)
            .block(CLAIM_BLOCK_MS);

        let reply: StreamReadReply = conn
            .xread_options(&[topic.as_str()], &[">"], &opts)
            .await
            .map_err(|e| QueueError::Backend(format!("XREADGROUP failed: {}", e)))?;

        for stream in reply.keys {
            if let Some(entry) = stream.ids.first() {
                let job = match Self::parse_entry(entry) {
                    Ok(job) => job,
                    Err(e) => {
                        let _: Result<(), _> = conn
                            .xack(topic.as_str(), CONSUMER_GROUP, &[&entry.id])
                            .await;
                        return Err(e);
                    }
                };
                return Ok(Some(Delivery {
                    job,
                    token: entry.id.clone(),
                    attempt: 1,
                }));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)
            .map_err(|e| QueueError::Payload(format!("serialize failed: {}", e)))?;

        let mut conn = self.conn.clone();
        let _entry_id: String = redis::cmd("XADD")
            .arg(job.topic().as_str())
            .arg("*")
            .arg("data")
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Backend(format!("XADD failed: {}", e)))?;

        Ok(())
    }

    async fn claim(&self, topic: Topic, consumer: &str) -> Result<Option<Delivery>, QueueError> {
        if let Some(delivery) = self.claim_stale(topic, consumer).await? {
            return Ok(Some(delivery));
        }
        self.claim_new(topic, consumer).await
    }

    async fn ack(&self, topic: Topic, token: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(topic.as_str(), CONSUMER_GROUP, &[token])
            .await
            .map_err(|e| QueueError::Backend(format!("XACK failed: {}", e)))?;
        Ok(())
    }

    async fn nack(&self, _topic: Topic, _token: &str) -> Result<(), QueueError> {
        // The entry stays in the pending list; XAUTOCLAIM hands it to the
        // next consumer once the visibility window elapses.
        Ok(())
    }
}
