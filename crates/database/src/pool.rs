//! The bounded connection pool.
//!
//! A semaphore with `max_connections` permits bounds how many connections are
//! lent out at once; every lent connection holds one permit until it is
//! released. All accounting (idle set, counters, physical size) sits behind a
//! single mutex in [`PoolShared`]. The background health monitor goes through
//! the same permits and the same mutex as foreground callers.

use crate::adapters::DatabaseAdapter;
use crate::connection::ManagedConnection;
use crate::error::PoolError;
use configuration::PoolSettings;
use core_types::PoolStatus;
use sqlx::{AnyConnection, Connection};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;

struct IdleConnection {
    conn: AnyConnection,
    idle_since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleConnection>,
    /// Physical connections owned by the pool, lent or idle, including ones
    /// currently being opened.
    size: u32,
    active: u32,
    waiting: u32,
    peak_active: u32,
    total_acquired: u64,
    total_released: u64,
    failed_acquires: u64,
    total_acquire_time: Duration,
    evicted: u64,
    closed: bool,
}

pub(crate) struct PoolShared {
    pub(crate) adapter: Arc<dyn DatabaseAdapter>,
    connection_string: String,
    settings: PoolSettings,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Accounting updates are single assignments; a poisoned guard is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens and initializes a new physical connection. The caller must have
    /// reserved a slot in `size` beforehand.
    async fn open_connection(&self) -> Result<AnyConnection, PoolError> {
        let mut conn = match tokio::time::timeout(
            self.settings.connection_timeout(),
            AnyConnection::connect(&self.connection_string),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(PoolError::Connect(e)),
            Err(_) => return Err(PoolError::Connect(sqlx::Error::PoolTimedOut)),
        };
        self.adapter
            .initialize_engine(&mut conn)
            .await
            .map_err(PoolError::EngineInit)?;
        Ok(conn)
    }

    /// Takes a connection back from a caller.
    ///
    /// Healthy connections rejoin the idle set; anything else is removed from
    /// the pool and handed back to be closed. The caller's permit must be
    /// dropped after this returns so a waiter never wakes to an empty idle set.
    pub(crate) fn check_in(&self, conn: AnyConnection, healthy: bool) -> Option<AnyConnection> {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        state.total_released += 1;
        if healthy && !state.closed {
            state.idle.push_back(IdleConnection {
                conn,
                idle_since: Instant::now(),
            });
            None
        } else {
            state.size = state.size.saturating_sub(1);
            Some(conn)
        }
    }

    fn record_failure(&self) {
        self.lock().failed_acquires += 1;
    }

    /// Pings idle connections, evicts broken or expired ones and refills the
    /// pool to `min_connections`.
    async fn run_health_check(&self) {
        let candidates = self.lock().idle.len();
        let mut evicted = 0u32;

        for _ in 0..candidates {
            // A free permit means no caller is starved by the check.
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                break;
            };
            let Some(mut idle) = self.lock().idle.pop_front() else {
                break;
            };

            let expired = idle.idle_since.elapsed() >= self.settings.idle_timeout();
            let above_min = self.lock().size > self.settings.min_connections;
            let healthy = if expired && above_min {
                false
            } else {
                match idle.conn.ping().await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(error = %e, "Idle connection failed its health check.");
                        false
                    }
                }
            };

            if healthy {
                self.lock().idle.push_back(idle);
            } else {
                {
                    let mut state = self.lock();
                    state.size = state.size.saturating_sub(1);
                    state.evicted += 1;
                }
                evicted += 1;
                if let Err(e) = idle.conn.close().await {
                    tracing::debug!(error = %e, "Error while closing an evicted connection.");
                }
            }
            drop(permit);
        }

        if evicted > 0 {
            tracing::info!(evicted, "Health monitor evicted idle connections.");
        }
        self.refill().await;
    }

    async fn refill(&self) {
        loop {
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                return;
            };
            let reservation = {
                let mut state = self.lock();
                if state.closed || state.size >= self.settings.min_connections {
                    return;
                }
                state.size += 1;
                SizeReservation::new(self)
            };
            match self.open_connection().await {
                Ok(conn) => {
                    reservation.keep();
                    self.lock().idle.push_back(IdleConnection {
                        conn,
                        idle_since: Instant::now(),
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not replace an evicted connection.");
                    return;
                }
            }
            drop(permit);
        }
    }
}

/// Decrements `waiting` however the wait ends, including cancellation.
struct WaitingGuard<'a>(&'a PoolShared);

impl<'a> WaitingGuard<'a> {
    fn new(shared: &'a PoolShared) -> Self {
        shared.lock().waiting += 1;
        Self(shared)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.waiting = state.waiting.saturating_sub(1);
    }
}

/// A slot in `size` taken for a connection still being opened. Dropping it
/// without [`keep`](Self::keep), on failure or cancellation, gives the slot back.
struct SizeReservation<'a> {
    shared: &'a PoolShared,
    kept: bool,
}

impl<'a> SizeReservation<'a> {
    /// Wraps a slot the caller already added to `size`.
    fn new(shared: &'a PoolShared) -> Self {
        Self { shared, kept: false }
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for SizeReservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            let mut state = self.shared.lock();
            state.size = state.size.saturating_sub(1);
        }
    }
}

/// A bounded set of live connections to one database.
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
    shutdown: watch::Sender<bool>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("engine", &self.shared.adapter.engine())
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionPool {
    /// Connects, initializes the engine and warms the pool up to
    /// `min_connections`, then starts the health monitor.
    ///
    /// Failing to reach the database at all is `PoolError::Initialization`
    /// and is not retried.
    pub async fn create(
        adapter: Arc<dyn DatabaseAdapter>,
        connection_string: &str,
        settings: PoolSettings,
    ) -> Result<Self, PoolError> {
        sqlx::any::install_default_drivers();
        let engine = adapter.engine();

        let shared = Arc::new(PoolShared {
            adapter,
            connection_string: connection_string.to_string(),
            semaphore: Arc::new(Semaphore::new(settings.max_connections as usize)),
            settings,
            state: Mutex::new(PoolState::default()),
        });

        shared.lock().size = 1;
        let first = match shared.open_connection().await {
            Ok(conn) => conn,
            Err(PoolError::Connect(source)) => {
                return Err(PoolError::Initialization { engine, source });
            }
            Err(other) => return Err(other),
        };
        shared.lock().idle.push_back(IdleConnection {
            conn: first,
            idle_since: Instant::now(),
        });

        while shared.lock().size < shared.settings.min_connections {
            shared.lock().size += 1;
            match shared.open_connection().await {
                Ok(conn) => shared.lock().idle.push_back(IdleConnection {
                    conn,
                    idle_since: Instant::now(),
                }),
                Err(e) => {
                    shared.lock().size -= 1;
                    Self::without_monitor(shared).close().await;
                    return Err(e);
                }
            }
        }

        let pool = Self::without_monitor(shared);
        pool.start_monitor();
        tracing::info!(
            engine = %engine,
            min = pool.shared.settings.min_connections,
            max = pool.shared.settings.max_connections,
            "Connection pool ready."
        );
        Ok(pool)
    }

    fn without_monitor(shared: Arc<PoolShared>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared,
            shutdown,
            monitor: Mutex::new(None),
        }
    }

    fn start_monitor(&self) {
        let interval = self.shared.settings.health_check_interval();
        let shared: Weak<PoolShared> = Arc::downgrade(&self.shared);
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                let Some(shared) = shared.upgrade() else { break };
                shared.run_health_check().await;
            }
            tracing::debug!("Pool health monitor stopped.");
        });
        *self.monitor.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
    }

    /// Waits up to `connection_timeout` for a connection.
    ///
    /// Returns an idle connection when one exists, otherwise opens a new one.
    /// A timeout is counted as a failed acquisition and leaves no reservation
    /// behind.
    pub async fn acquire(&self) -> Result<ManagedConnection, PoolError> {
        self.acquire_timeout(self.shared.settings.connection_timeout()).await
    }

    /// Like [`acquire`](Self::acquire), with `timeout` bounding the whole
    /// acquisition: waiting for a permit and opening a new connection alike.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<ManagedConnection, PoolError> {
        let started = Instant::now();

        let (conn, permit) = match tokio::time::timeout(timeout, self.checkout()).await {
            Ok(Ok(checked_out)) => checked_out,
            Ok(Err(PoolError::Closed)) => return Err(PoolError::Closed),
            Ok(Err(PoolError::Connect(sqlx::Error::PoolTimedOut))) | Err(_) => {
                self.shared.record_failure();
                let waited = started.elapsed();
                tracing::warn!(waited_ms = waited.as_millis() as u64, "Connection acquire timed out.");
                return Err(PoolError::AcquireTimeout { waited });
            }
            Ok(Err(e)) => {
                self.shared.record_failure();
                return Err(e);
            }
        };

        let elapsed = started.elapsed();
        {
            let mut state = self.shared.lock();
            state.active += 1;
            state.peak_active = state.peak_active.max(state.active);
            state.total_acquired += 1;
            state.total_acquire_time += elapsed;
        }
        Ok(ManagedConnection::new(conn, permit, self.shared.clone()))
    }

    async fn checkout(&self) -> Result<(AnyConnection, OwnedSemaphorePermit), PoolError> {
        let permit = {
            let _waiting = WaitingGuard::new(&self.shared);
            self.shared
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PoolError::Closed)?
        };

        let reservation = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(idle) = state.idle.pop_back() {
                return Ok((idle.conn, permit));
            }
            state.size += 1;
            SizeReservation::new(&self.shared)
        };

        let conn = self.shared.open_connection().await?;
        reservation.keep();
        Ok((conn, permit))
    }

    /// Returns `conn` to the pool. Releasing twice is a no-op.
    pub async fn release(&self, conn: &mut ManagedConnection) {
        conn.release().await;
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        let avg_acquire_time_ms = if state.total_acquired == 0 {
            0.0
        } else {
            state.total_acquire_time.as_secs_f64() * 1_000.0 / state.total_acquired as f64
        };
        PoolStatus {
            active: state.active,
            idle: state.idle.len() as u32,
            size: state.size,
            waiting: state.waiting,
            min_connections: self.shared.settings.min_connections,
            max_connections: self.shared.settings.max_connections,
            total_acquired: state.total_acquired,
            total_released: state.total_released,
            failed_acquires: state.failed_acquires,
            avg_acquire_time_ms,
            peak_active: state.peak_active,
            evicted: state.evicted,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn DatabaseAdapter> {
        &self.shared.adapter
    }

    /// Runs one health-monitor pass immediately.
    pub async fn check_health(&self) {
        self.shared.run_health_check().await;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Stops the health monitor, fails pending and future acquisitions and
    /// closes every idle connection. Lent connections are closed when they
    /// are released.
    pub async fn close(&self) {
        let idle: Vec<IdleConnection> = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<IdleConnection> = state.idle.drain(..).collect();
            state.size = state.size.saturating_sub(idle.len() as u32);
            idle
        };
        self.shared.semaphore.close();
        self.shutdown.send_replace(true);

        for entry in idle {
            if let Err(e) = entry.conn.close().await {
                tracing::debug!(error = %e, "Error while closing an idle connection.");
            }
        }

        let handle = self.monitor.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
        tracing::info!("Connection pool closed.");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.monitor.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SqliteAdapter;
    use tempfile::TempDir;

    async fn pool(dir: &TempDir, min_connections: u32) -> ConnectionPool {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("pool.db").display());
        let settings = PoolSettings {
            min_connections,
            max_connections: 4,
            connection_timeout_seconds: 5,
            ..PoolSettings::default()
        };
        ConnectionPool::create(Arc::new(SqliteAdapter), &url, settings).await.unwrap()
    }

    #[tokio::test]
    async fn health_check_refills_to_min() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir, 2).await;
        assert_eq!(pool.status().size, 2);

        // Lose one idle connection the way an eviction would.
        let lost = {
            let mut state = pool.shared.lock();
            state.size -= 1;
            state.idle.pop_front().unwrap()
        };
        lost.conn.close().await.unwrap();
        assert_eq!(pool.status().size, 1);

        pool.check_health().await;
        let status = pool.status();
        assert_eq!(status.size, 2);
        assert_eq!(status.idle, 2);
        pool.close().await;
    }

    #[tokio::test]
    async fn a_failed_open_gives_back_its_reservation() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir, 1).await;
        let mut held = pool.acquire().await.unwrap();

        std::fs::remove_dir_all(dir.path()).unwrap();
        assert!(pool.acquire_timeout(Duration::from_secs(5)).await.is_err());

        let status = pool.status();
        assert_eq!(status.size, 1);
        assert_eq!(status.failed_acquires, 1);
        held.release().await;
        pool.close().await;
    }
}
