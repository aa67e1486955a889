//! Worker pool seam
//!
//! Expired callbacks beyond the first of a sweep are handed to a
//! fire-and-forget pool so a slow callback cannot stall the driver thread.

/// A boxed unit of work dispatched by the queue.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget executor for expired timer callbacks.
///
/// `enqueue` may be called while the queue lock is held; implementations
/// must only hand the job off, never run it on the calling thread.
pub trait WorkerPool: Send + Sync + 'static {
    fn enqueue(&self, job: Job);
}

/// Dispatches jobs on the rayon global pool.
pub struct RayonPool;

impl WorkerPool for RayonPool {
    fn enqueue(&self, job: Job) {
        rayon::spawn(move || job());
    }
}
