mod admission;
pub mod error;
mod http;
mod pool;
mod protocol;
mod session;
mod socket;
#[cfg(test)]
mod testing;

use crate::error::Result;
pub use crate::admission::{Admission, Permit};
pub use crate::http::{router, serve as serve_http};
pub use crate::pool::WorkerPool;
pub use crate::protocol::{Reply, read_name};
pub use crate::session::Session;
pub use crate::socket::{bind, serve as serve_socket};
use std::future::Future;
use std::sync::Arc;

/// The upload pipeline shared by every front end: `workers` uploads run at
/// once, up to `queue` more wait their turn, and anything beyond that is
/// turned away immediately.
pub struct Ingestor {
    admission: Admission,
    pool: WorkerPool,
    session: Session,
}
impl Ingestor {
    /// Must be called from within a tokio runtime; the workers start here.
    pub fn new(workers: usize, queue: usize, session: Session) -> Self {
        Self { admission: Admission::new(workers, queue), pool: WorkerPool::new(workers, queue), session }
    }

    pub fn try_admit(&self) -> Result<Permit> {
        self.admission.try_admit()
    }

    pub async fn dispatch<F>(&self, permit: Permit, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pool.dispatch(permit, task).await
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn available(&self) -> usize {
        self.admission.available()
    }

    pub fn capacity(&self) -> usize {
        self.admission.capacity()
    }

    /// Finish everything already admitted, then stop the workers.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

pub type IngestHandle = Arc<Ingestor>;
