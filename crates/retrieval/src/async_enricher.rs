//! AsyncEnricher (spec §5)
//!
//! Fire-and-forget background worker pool: the request handler enqueues a
//! conversation snapshot after responding, a fixed pool of workers
//! generates a summary via the LLM and writes it into ConversationMemory
//! for the next turn's QueryRewriter/ConversationAnalyzer to consume. The
//! queue is a bounded ring buffer: when it's full, enqueue evicts the
//! oldest pending job (not the incoming one) and counts the eviction —
//! never blocks the request path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use ragbridge_core::traits::LlmClient;

use crate::conversation_memory::ConversationMemory;

pub struct EnrichmentJob {
    pub session_id: String,
    pub user_turn: String,
    pub assistant_turn: String,
}

struct Queue {
    jobs: Mutex<VecDeque<EnrichmentJob>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

pub struct AsyncEnricher {
    queue: Arc<Queue>,
    dropped: Arc<AtomicU64>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl AsyncEnricher {
    pub fn spawn(workers: usize, queue_capacity: usize, llm: Arc<dyn LlmClient>, memory: Arc<ConversationMemory>, deadline: Duration) -> Self {
        let queue = Arc::new(Queue {
            jobs: Mutex::new(VecDeque::with_capacity(queue_capacity.max(1))),
            capacity: queue_capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let dropped = Arc::new(AtomicU64::new(0));

        let handles = (0..workers)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let llm = Arc::clone(&llm);
                let memory = Arc::clone(&memory);
                tokio::spawn(async move {
                    loop {
                        let job = loop {
                            let popped = {
                                let mut jobs = queue.jobs.lock();
                                jobs.pop_front()
                            };
                            if let Some(job) = popped {
                                break Some(job);
                            }
                            if queue.closed.load(Ordering::Acquire) {
                                break None;
                            }
                            queue.notify.notified().await;
                        };
                        let Some(job) = job else { break };
                        let prompt = ragbridge_llm::summary_prompt(&job.user_turn, &job.assistant_turn);
                        match llm.complete(&prompt, 256, None, deadline).await {
                            Ok(summary) => memory.set_summary(&job.session_id, summary),
                            Err(e) => tracing::warn!(session_id = %job.session_id, error = %e, "async enrichment failed"),
                        }
                    }
                })
            })
            .collect();

        Self { queue, dropped, handles }
    }

    /// Enqueue a snapshot; never blocks the caller. If the queue is full,
    /// the oldest pending job is evicted to make room and the drop
    /// counter is incremented; the incoming job is always accepted.
    pub fn enqueue(&self, job: EnrichmentJob) -> bool {
        let mut jobs = self.queue.jobs.lock();
        let evicted = if jobs.len() >= self.queue.capacity {
            jobs.pop_front()
        } else {
            None
        };
        jobs.push_back(job);
        drop(jobs);
        self.queue.notify.notify_one();
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        evicted.is_none()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn shutdown(self) {
        self.queue.closed.store(true, Ordering::Release);
        self.queue.notify.notify_waiters();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragbridge_core::error::Result;

    struct FakeLlm;
    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn complete(&self, _prompt: &str, _max_tokens: usize, _stop: Option<&[String]>, _deadline: Duration) -> Result<String> {
            Ok("summary".to_string())
        }
    }

    #[tokio::test]
    async fn enqueued_job_produces_a_summary() {
        let memory = Arc::new(ConversationMemory::new(900, 64));
        let enricher = AsyncEnricher::spawn(1, 8, Arc::new(FakeLlm), Arc::clone(&memory), Duration::from_millis(500));

        let accepted = enricher.enqueue(EnrichmentJob {
            session_id: "s1".to_string(),
            user_turn: "hello".to_string(),
            assistant_turn: "hi".to_string(),
        });
        assert!(accepted);

        memory.record_turn("s1", &[]);
        for _ in 0..50 {
            if memory.get("s1").and_then(|e| e.summary).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(memory.get("s1").unwrap().summary, Some("summary".to_string()));
        enricher.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_increments_drop_counter() {
        let memory = Arc::new(ConversationMemory::new(900, 64));
        // Zero workers draining means the single-slot queue fills immediately.
        let enricher = AsyncEnricher::spawn(0, 1, Arc::new(FakeLlm), memory, Duration::from_millis(500));
        enricher.enqueue(EnrichmentJob { session_id: "s1".to_string(), user_turn: String::new(), assistant_turn: String::new() });
        let second = enricher.enqueue(EnrichmentJob { session_id: "s1".to_string(), user_turn: String::new(), assistant_turn: String::new() });
        assert!(!second);
        assert_eq!(enricher.dropped_count(), 1);
        enricher.shutdown().await;
    }
}
