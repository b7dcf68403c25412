//! In-memory job queue for the local backend and for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::QueueError;

use super::{Delivery, Job, JobQueue, Topic};

/// How long `claim` waits for a job before returning `None`.
const CLAIM_POLL_TIMEOUT: Duration = Duration::from_millis(200);

struct QueuedJob {
    job: Job,
    attempt: u32,
}

struct InFlight {
    job: Job,
    attempt: u32,
    deadline: Instant,
}

#[derive(Default)]
struct TopicState {
    ready: VecDeque<QueuedJob>,
    in_flight: HashMap<String, InFlight>,
}

struct QueueState {
    topics: HashMap<Topic, TopicState>,
    next_token: u64,
}

/// Process-local queue with visibility-timeout redelivery semantics.
///
/// Claimed jobs move to an in-flight table with a deadline; a later claim
/// sweeps expired entries back to the ready list with an incremented
/// attempt counter, matching what the Redis backend does with pending
/// entries.
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    visibility: Duration,
}

impl MemoryJobQueue {
    pub fn new(visibility: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                topics: HashMap::new(),
                next_token: 0,
            }),
            notify: Notify::new(),
            visibility,
        }
    }

    /// Number of jobs immediately claimable on a topic.
    pub fn ready_depth(&self, topic: Topic) -> usize {
        let state = self.state.lock().unwrap();
        state
            .topics
            .get(&topic)
            .map(|t| t.ready.len())
            .unwrap_or(0)
    }

    /// Number of claimed but unsettled jobs on a topic.
    pub fn in_flight_depth(&self, topic: Topic) -> usize {
        let state = self.state.lock().unwrap();
        state
            .topics
            .get(&topic)
            .map(|t| t.in_flight.len())
            .unwrap_or(0)
    }

    fn try_claim(&self, topic: Topic) -> Option<Delivery> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        let topic_state = state.topics.entry(topic).or_default();

        // Sweep expired in-flight entries back to ready.
        let expired: Vec<String> = topic_state
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired {
            if let Some(entry) = topic_state.in_flight.remove(&token) {
                topic_state.ready.push_back(QueuedJob {
                    job: entry.job,
                    attempt: entry.attempt,
                });
            }
        }

        let queued = topic_state.ready.pop_front()?;
        let attempt = queued.attempt + 1;
        let job = queued.job;

        state.next_token += 1;
        let token = state.next_token.to_string();

        let topic_state = state.topics.entry(topic).or_default();
        topic_state.in_flight.insert(
            token.clone(),
            InFlight {
                job: job.clone(),
                attempt,
                deadline: now + self.visibility,
            },
        );

        Some(Delivery {
            job,
            token,
            attempt,
        })
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().unwrap();
            state
                .topics
                .entry(job.topic())
                .or_default()
                .ready
                .push_back(QueuedJob {
                    job: job.clone(),
                    attempt: 0,
                });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn claim(&self, topic: Topic, _consumer: &str) -> Result<Option<Delivery>, QueueError> {
        if let Some(delivery) = self.try_claim(topic) {
            return Ok(Some(delivery));
        }

        // Wait for an enqueue or give up after the poll window. Expired
        // in-flight jobs are only noticed on the next call, which is fine
        // because the runtime claims in a loop.
        let notified = self.notify.notified();
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(CLAIM_POLL_TIMEOUT) => {}
        }

        Ok(self.try_claim(topic))
    }

    async fn ack(&self, topic: Topic, token: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if let Some(topic_state) = state.topics.get_mut(&topic) {
            topic_state.in_flight.remove(token);
        }
        Ok(())
    }

    async fn nack(&self, topic: Topic, token: &str) -> Result<(), QueueError> {
        let entry = {
            let mut state = self.state.lock().unwrap();
            state
                .topics
                .get_mut(&topic)
                .and_then(|t| t.in_flight.remove(token))
        };
        if let Some(entry) = entry {
            let mut state = self.state.lock().unwrap();
            state
                .topics
                .entry(topic)
                .or_default()
                .ready
                .push_back(QueuedJob {
                    job: entry.job,
                    attempt: entry.attempt,
                });
            self.notify.notify_waiters();
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
