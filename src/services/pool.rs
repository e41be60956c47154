//! A pool of reusable store connections.
//!
//! Handles are built lazily by a factory and go back to the pool when the
//! borrowed [`PooledConnection`] is dropped, whether or not the borrower
//! succeeded. Recycling does no health check and nothing is evicted: a handle
//! whose session went bad is fixed by the next borrower calling
//! `authenticate`.

use crate::services::store::{StoreError, StoreResult};
use deadpool::managed::{self, BuildError, Metrics, Object, Pool, RecycleResult};
use std::{convert::Infallible, fmt};
use tracing::trace;

/// Upper bound on live connections. Large enough that it is never reached by
/// a single gateway; borrowers beyond it wait for a release.
pub const DEFAULT_MAX_SIZE: usize = 1024;

type Factory<C> = dyn Fn() -> C + Send + Sync;

/// Builds connections for the pool and accepts every one back unchanged.
pub struct StoreManager<C> {
    factory: Box<Factory<C>>,
}

impl<C: Send> managed::Manager for StoreManager<C> {
    type Type = C;
    type Error = Infallible;

    async fn create(&self) -> Result<C, Infallible> {
        trace!("pool creating connection");
        Ok((self.factory)())
    }

    async fn recycle(&self, _conn: &mut C, _metrics: &Metrics) -> RecycleResult<Infallible> {
        Ok(())
    }
}

/// A borrowed connection. Returns itself to the pool on drop.
pub type PooledConnection<C> = Object<StoreManager<C>>;

/// Cloneable handle to a shared pool of `C` connections.
pub struct ConnectionPool<C: Send> {
    inner: Pool<StoreManager<C>>,
}

impl<C: Send> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Send> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("idle", &self.idle_count())
            .field("outstanding", &self.outstanding())
            .field("created", &self.created())
            .finish()
    }
}

impl<C: Send + 'static> ConnectionPool<C> {
    /// Create an empty pool that builds connections with `factory`.
    pub fn new<F>(factory: F) -> Result<Self, BuildError>
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self::with_max_size(factory, DEFAULT_MAX_SIZE)
    }

    pub fn with_max_size<F>(factory: F, max_size: usize) -> Result<Self, BuildError>
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        let manager = StoreManager {
            factory: Box::new(factory),
        };
        let inner = Pool::builder(manager).max_size(max_size).build()?;
        Ok(Self { inner })
    }

    /// Borrow an idle connection, or build a new one if none is idle.
    pub async fn acquire(&self) -> StoreResult<PooledConnection<C>> {
        self.inner
            .get()
            .await
            .map_err(|err| StoreError::Pool(err.to_string()))
    }

    /// Return a borrowed connection. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection<C>) {
        drop(conn);
    }
}

impl<C: Send> ConnectionPool<C> {
    /// Connections currently sitting in the pool.
    pub fn idle_count(&self) -> usize {
        self.inner.status().available
    }

    /// Connections currently borrowed and not yet returned.
    pub fn outstanding(&self) -> usize {
        let status = self.inner.status();
        status.size.saturating_sub(status.available)
    }

    /// Connections built over the pool's lifetime. Nothing is evicted, so
    /// this is also the number of live connections.
    pub fn created(&self) -> usize {
        self.inner.status().size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[derive(Debug)]
    struct Handle {
        id: usize,
    }

    fn counting_pool() -> ConnectionPool<Handle> {
        let next = Arc::new(AtomicUsize::new(0));
        ConnectionPool::new(move || Handle {
            id: next.fetch_add(1, Ordering::SeqCst),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn reuses_released_connections() {
        let pool = counting_pool();

        let first = pool.acquire().await.unwrap();
        let id = first.id;
        assert_eq!(pool.outstanding(), 1);
        pool.release(first);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle_count(), 1);

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id, id);
        assert_eq!(pool.created(), 1);
    }

    #[tokio::test]
    async fn builds_new_connections_when_all_are_borrowed() {
        let pool = counting_pool();
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(pool.outstanding(), 2);
        assert_eq!(pool.created(), 2);

        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn guard_gives_mutable_access() {
        let pool = counting_pool();
        let mut conn = pool.acquire().await.unwrap();
        conn.id = 42;
        drop(conn);
        assert_eq!(pool.acquire().await.unwrap().id, 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_borrows_do_not_leak() {
        let pool = counting_pool();

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let conn = pool.acquire().await.unwrap();
                    tokio::task::yield_now().await;
                    if i % 3 == 0 {
                        panic!("borrower {} failed while holding {:?}", i, conn.id);
                    }
                })
            })
            .collect();
        for task in tasks {
            let _ = task.await;
        }

        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle_count(), pool.created());
    }

    #[tokio::test]
    async fn borrowers_past_the_limit_wait_for_a_release() {
        let pool = ConnectionPool::with_max_size(|| Handle { id: 0 }, 1).unwrap();
        let held = pool.acquire().await.unwrap();

        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|conn| conn.id) })
        };
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        drop(held);
        assert_eq!(waiting.await.unwrap().unwrap(), 0);
        assert_eq!(pool.created(), 1);
    }
}
