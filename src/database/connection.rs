use crate::error::ConnectionError;
use rusqlite::Connection;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of the execution context a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    /// An OS thread (the default for `get_connection`)
    Thread(ThreadId),
    /// A worker-pool slot that may hop between threads
    Worker(usize),
}

impl ContextKey {
    pub fn current() -> Self {
        ContextKey::Thread(std::thread::current().id())
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread(id) => write!(f, "thread {:?}", id),
            Self::Worker(slot) => write!(f, "worker slot {}", slot),
        }
    }
}

struct ConnectionSlot {
    id: u64,
    key: ContextKey,
    closed: AtomicBool,
    conn: Mutex<Option<Connection>>,
}

/// Shared handle to one open SQLite connection.
///
/// Clones refer to the same connection. Once the manager closes it, every
/// clone reports `ConnectionError::Closed` instead of touching a dead handle.
#[derive(Clone)]
pub struct DbConnection {
    inner: Arc<ConnectionSlot>,
}

impl DbConnection {
    pub(crate) fn new(key: ContextKey, conn: Connection) -> Self {
        Self {
            inner: Arc::new(ConnectionSlot {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                key,
                closed: AtomicBool::new(false),
                conn: Mutex::new(Some(conn)),
            }),
        }
    }

    /// Process-unique serial number of the underlying connection
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn key(&self) -> ContextKey {
        self.inner.key
    }

    /// True when both handles refer to the same underlying connection.
    pub fn same_as(&self, other: &DbConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Run `f` against the live connection.
    ///
    /// The connection stays locked for the duration of `f`; closing it from
    /// inside `f` on the same thread deadlocks.
    pub fn with<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<ConnectionError>,
    {
        let guard = lock_unpoisoned(&self.inner.conn);
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(ConnectionError::Closed.into()),
        }
    }

    /// Like [`DbConnection::with`], for operations that need `&mut Connection`
    /// such as transactions.
    pub fn with_mut<T, E>(&self, f: impl FnOnce(&mut Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<ConnectionError>,
    {
        let mut guard = lock_unpoisoned(&self.inner.conn);
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(ConnectionError::Closed.into()),
        }
    }

    /// Release the underlying handle. The slot is emptied even when SQLite
    /// reports an error; the handle is then dropped, which finalizes it.
    pub(crate) fn close(&self) -> Result<(), ConnectionError> {
        self.inner.closed.store(true, Ordering::Release);
        let taken = lock_unpoisoned(&self.inner.conn).take();
        match taken {
            Some(conn) => conn.close().map_err(|(_conn, e)| ConnectionError::Close(e)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnection")
            .field("id", &self.id())
            .field("key", &self.key())
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
