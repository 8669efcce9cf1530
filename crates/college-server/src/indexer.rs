//! Background indexing of freshly created datasets.
//!
//! [`Indexer::submit`] detaches the work from the request that triggered it.
//! The only lasting effects of a job are the `indexed_at` write on success
//! and log output; each finished job is also announced on a broadcast
//! channel so callers (tests, mostly) can observe completion.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::rag::IndexingService;
use crate::store::Store;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct IndexJob {
    pub dataset_id: Uuid,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { chunks: u32 },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEvent {
    pub dataset_id: Uuid,
    pub outcome: IndexOutcome,
}

#[derive(Clone)]
pub struct Indexer {
    service: Arc<dyn IndexingService>,
    store: Store,
    events: broadcast::Sender<IndexEvent>,
}

impl Indexer {
    pub fn new(service: Arc<dyn IndexingService>, store: Store) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            service,
            store,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    /// Spawn the job and return immediately. Failures are logged and leave
    /// the dataset un-indexed; there is no retry.
    pub fn submit(&self, job: IndexJob) {
        let this = self.clone();
        tokio::spawn(async move {
            let dataset_id = job.dataset_id;
            let outcome = this.run(job).await;
            // No subscribers is the normal production case.
            let _ = this.events.send(IndexEvent {
                dataset_id,
                outcome,
            });
        });
    }

    async fn run(&self, job: IndexJob) -> IndexOutcome {
        let chunks = match self.service.index(job.dataset_id, &job.title, &job.text).await {
            Ok(chunks) => chunks,
            Err(e) => {
                error!(dataset_id = %job.dataset_id, error = %e, "failed to index dataset");
                return IndexOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let dataset_id = job.dataset_id;
        let now = Utc::now();
        match self
            .store
            .call(move |db| db.mark_dataset_indexed(dataset_id, now))
            .await
        {
            Ok(true) => {
                info!(%dataset_id, chunks, "dataset indexed successfully");
                IndexOutcome::Indexed { chunks }
            }
            Ok(false) => {
                warn!(%dataset_id, "indexed dataset no longer exists");
                IndexOutcome::Failed {
                    reason: "dataset row missing".to_string(),
                }
            }
            Err(e) => {
                error!(%dataset_id, error = %e, "failed to record indexed_at");
                IndexOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
