//! The serialized write queue.
//!
//! Every mutating store operation is funneled through one dedicated writer
//! thread per cache instance that owns the write [`Database`] connection.
//! Submitted jobs execute strictly in submission order, one at a time, which
//! linearizes mutations without per-row locking.  Readers use independent
//! read-only connections (see [`crate::ChatCache::reader`]) and observe a
//! committed write as soon as its job completes.
//!
//! After a job succeeds, the change events it marked are broadcast to all
//! subscribers -- the read-side notification signal.

use std::fmt;

use tokio::sync::{broadcast, mpsc, oneshot};

use parley_store::{Database, StoreError};

/// The entity table a change event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EntityKind {
    Channel,
    User,
    Member,
    Message,
    MessageAction,
}

/// A committed change, keyed by entity kind and natural id.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChangeEvent {
    pub kind: EntityKind,
    pub id: String,
}

/// Write access handed to a queued job: the write database plus a buffer of
/// change events that are broadcast only if the job succeeds.
pub struct WriteBatch<'a> {
    db: &'a Database,
    changes: Vec<ChangeEvent>,
}

impl<'a> WriteBatch<'a> {
    /// The write-side database handle.
    pub fn db(&self) -> &'a Database {
        self.db
    }

    /// Record a change notification to publish once this job commits.
    pub fn mark(&mut self, kind: EntityKind, id: impl Into<String>) {
        self.changes.push(ChangeEvent { kind, id: id.into() });
    }
}

type Job = Box<dyn FnOnce(&mut WriteBatch<'_>) -> bool + Send>;

/// Handle to the writer thread.  Cheap to clone; the thread exits when the
/// last handle is dropped and all pending jobs have drained.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<Job>,
    events: broadcast::Sender<ChangeEvent>,
}

impl fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteQueue").finish_non_exhaustive()
    }
}

impl WriteQueue {
    /// Take ownership of the write database and spawn the writer thread.
    pub fn spawn(db: Database, event_capacity: usize) -> Result<Self, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(event_capacity.max(1));

        let thread_events = events.clone();
        std::thread::Builder::new()
            .name("parley-write".into())
            .spawn(move || run_loop(db, rx, thread_events))?;

        Ok(Self { tx, events })
    }

    /// Submit a unit of work and await its result.
    ///
    /// Jobs run in submission order; the returned future resolves once the
    /// job's transaction has committed or failed.
    pub async fn run<R, F>(&self, job: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut WriteBatch<'_>) -> Result<R, StoreError> + Send + 'static,
    {
        let rx = self.submit(job)?;
        rx.await.map_err(|_| StoreError::QueueClosed)?
    }

    /// Submit a unit of work and block the calling thread until it completes.
    ///
    /// For callers that must observe the result before proceeding outside an
    /// async context.  Never call this from the writer thread itself.
    pub fn run_blocking<R, F>(&self, job: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut WriteBatch<'_>) -> Result<R, StoreError> + Send + 'static,
    {
        let rx = self.submit(job)?;
        rx.blocking_recv().map_err(|_| StoreError::QueueClosed)?
    }

    /// Submit a unit of work without waiting for it; a failure is delivered
    /// to `on_err` on the writer thread.
    pub fn run_detached<F>(&self, job: F, on_err: impl FnOnce(StoreError) + Send + 'static)
    where
        F: FnOnce(&mut WriteBatch<'_>) -> Result<(), StoreError> + Send + 'static,
    {
        let boxed: Job = Box::new(move |batch| match job(batch) {
            Ok(()) => true,
            Err(e) => {
                on_err(e);
                false
            }
        });
        if self.tx.send(boxed).is_err() {
            tracing::warn!("dropping detached job: write queue closed");
        }
    }

    /// Subscribe to committed-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    fn submit<R, F>(&self, job: F) -> Result<oneshot::Receiver<Result<R, StoreError>>, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut WriteBatch<'_>) -> Result<R, StoreError> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let boxed: Job = Box::new(move |batch| {
            let result = job(batch);
            let ok = result.is_ok();
            // The caller may have gone away; the job's effects stand anyway.
            let _ = reply.send(result);
            ok
        });
        self.tx.send(boxed).map_err(|_| StoreError::QueueClosed)?;
        Ok(rx)
    }
}

fn run_loop(
    db: Database,
    mut rx: mpsc::UnboundedReceiver<Job>,
    events: broadcast::Sender<ChangeEvent>,
) {
    while let Some(job) = rx.blocking_recv() {
        let mut batch = WriteBatch { db: &db, changes: Vec::new() };
        let committed = job(&mut batch);
        if committed {
            for event in batch.changes {
                // No subscribers is fine.
                let _ = events.send(event);
            }
        }
    }
    tracing::debug!("write queue thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_store::Channel;

    fn open_queue() -> (tempfile::TempDir, WriteQueue) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let queue = WriteQueue::spawn(db, 16).unwrap();
        (dir, queue)
    }

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let (_dir, queue) = open_queue();

        // Each job appends to the same channel's name; order is observable.
        for i in 0..5 {
            queue
                .run(move |batch| {
                    let prev = batch
                        .db()
                        .get_channel("c1")
                        .map(|c| c.name.unwrap_or_default())
                        .unwrap_or_default();
                    let mut ch = Channel::stub("c1");
                    ch.name = Some(format!("{prev}{i}"));
                    batch.db().upsert_channel(&ch)?;
                    Ok(())
                })
                .await
                .unwrap();
        }

        let name = queue
            .run(|batch| Ok(batch.db().get_channel("c1")?.name))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("01234"));
    }

    #[tokio::test]
    async fn committed_jobs_broadcast_marked_changes() {
        let (_dir, queue) = open_queue();
        let mut events = queue.subscribe();

        queue
            .run(|batch| {
                batch.db().upsert_channel(&Channel::stub("c1"))?;
                batch.mark(EntityKind::Channel, "c1");
                Ok(())
            })
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event, ChangeEvent { kind: EntityKind::Channel, id: "c1".into() });
    }

    #[tokio::test]
    async fn failed_jobs_do_not_broadcast() {
        let (_dir, queue) = open_queue();
        let mut events = queue.subscribe();

        let result = queue
            .run(|batch| -> Result<(), StoreError> {
                batch.mark(EntityKind::Channel, "ghost");
                Err(StoreError::NotFound)
            })
            .await;
        assert!(result.is_err());

        // A subsequent committed job's event arrives first.
        queue
            .run(|batch| {
                batch.db().upsert_channel(&Channel::stub("c2"))?;
                batch.mark(EntityKind::Channel, "c2");
                Ok(())
            })
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.id, "c2");
    }

    #[test]
    fn blocking_submission_observes_the_result() {
        let (_dir, queue) = open_queue();

        let stored = queue
            .run_blocking(|batch| batch.db().upsert_channel(&Channel::stub("c1")))
            .unwrap();
        assert_eq!(stored.id, "c1");
    }
}
