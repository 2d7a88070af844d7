use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::database::schema::{PRAGMAS, SCHEMA};
use crate::error::{Result, ScopeError};

/// Owns the single connection to the tag database.
///
/// Built unopened with [`Store::new`]; nothing can read or write until
/// [`Store::init`] succeeds. All access goes through the inner mutex, so the
/// store can be shared by reference across threads.
pub struct Store {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

/// Locked access to the open connection.
pub struct Handle<'a> {
    guard: MutexGuard<'a, Option<Connection>>,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the database file and applies the schema. Safe to call any number
    /// of times: only the first successful call opens a connection.
    pub fn init(&self) -> Result<()> {
        let mut slot = self.lock();
        if slot.is_some() {
            debug!("Store already initialized at {:?}", self.path);
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&self.path)?;
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened tag database at {:?}", self.path);

        *slot = Some(conn);
        Ok(())
    }

    pub fn handle(&self) -> Result<Handle<'_>> {
        let guard = self.lock();
        if guard.is_none() {
            return Err(ScopeError::StoreNotInitialized);
        }
        Ok(Handle { guard })
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    /// Releases the connection. A no-op on a store that was never opened.
    pub fn close(&self) -> Result<()> {
        if let Some(conn) = self.lock().take() {
            conn.close().map_err(|(_, e)| ScopeError::Database(e))?;
            debug!("Closed tag database at {:?}", self.path);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // A panic while holding the lock cannot leave the connection half-written;
        // SQLite transactions roll back on drop.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Deref for Handle<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self.guard.as_ref() {
            Some(conn) => conn,
            None => unreachable!("handle is only built over an open connection"),
        }
    }
}

impl DerefMut for Handle<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        match self.guard.as_mut() {
            Some(conn) => conn,
            None => unreachable!("handle is only built over an open connection"),
        }
    }
}
