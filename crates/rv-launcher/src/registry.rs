//! Registry of live SSH tunnels
//!
//! Tunnels are keyed by local port. The registry exclusively owns every
//! forwarding process it holds: removing a record hands the process back
//! to the caller, who is expected to close it.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

use crate::process::ManagedChild;

/// A live tunnel and the process that carries it
pub struct TunnelRecord {
    /// Local listening port, unique within the registry
    pub local_port: u16,
    /// `user@host:port` the tunnel forwards to
    pub remote_endpoint: String,
    /// Session the tunnel was opened for
    pub session_name: String,
    /// Forwarding process
    pub child: Box<dyn ManagedChild>,
}

impl TunnelRecord {
    /// Describe this tunnel without the process handle
    pub fn info(&self) -> TunnelInfo {
        TunnelInfo {
            local_port: self.local_port,
            remote_endpoint: self.remote_endpoint.clone(),
            session_name: self.session_name.clone(),
            pid: self.child.id(),
        }
    }

    /// Terminate the forwarding process
    pub fn close(mut self) {
        tracing::info!(
            " Closing SSH tunnel for port {}, {} on {}",
            self.local_port,
            self.session_name,
            self.remote_endpoint
        );
        if let Err(e) = self.child.kill() {
            tracing::debug!("Tunnel process on port {} already gone: {}", self.local_port, e);
        }
    }
}

impl std::fmt::Debug for TunnelRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelRecord")
            .field("local_port", &self.local_port)
            .field("remote_endpoint", &self.remote_endpoint)
            .field("session_name", &self.session_name)
            .field("pid", &self.child.id())
            .finish()
    }
}

/// Snapshot of a tunnel for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInfo {
    pub local_port: u16,
    pub remote_endpoint: String,
    pub session_name: String,
    pub pid: Option<u32>,
}

/// Result of claiming a session name before opening its tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// A live tunnel on this port already serves the name
    Existing(u16),
    /// Another caller is opening a tunnel for the name
    Pending,
    /// The caller holds the name until it calls `release_claim`
    Claimed,
    /// The registry has been drained for shutdown
    Closed,
}

struct Inner {
    next_port: u16,
    records: BTreeMap<u16, TunnelRecord>,
    pending: HashSet<String>,
    closed: bool,
}

/// Tunnel records keyed by local port, plus the port search cursor
pub struct TunnelRegistry {
    base: u16,
    inner: Mutex<Inner>,
}

impl TunnelRegistry {
    /// Create an empty registry whose port search starts at `base`
    pub fn new(base: u16) -> Self {
        Self {
            base,
            inner: Mutex::new(Inner {
                next_port: base,
                records: BTreeMap::new(),
                pending: HashSet::new(),
                closed: false,
            }),
        }
    }

    /// First port of the search range
    pub fn base_port(&self) -> u16 {
        self.base
    }

    /// Hand out the next candidate port and advance the cursor.
    ///
    /// Two callers never receive the same candidate until the cursor is
    /// reset.
    pub fn reserve_next_port(&self) -> u16 {
        let mut inner = self.inner.lock();
        let port = inner.next_port;
        inner.next_port = inner.next_port.checked_add(1).unwrap_or(self.base);
        port
    }

    /// Rewind the search cursor to the base port
    pub fn reset_cursor(&self) {
        self.inner.lock().next_port = self.base;
    }

    /// Reserve `session_name` for one opener.
    ///
    /// The lookup and the reservation happen under one lock, so at most one
    /// caller at a time gets [`Claim::Claimed`] for a name.
    pub fn claim_session(&self, session_name: &str) -> Claim {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Claim::Closed;
        }
        if let Some(record) = inner.records.values().find(|r| r.session_name == session_name) {
            return Claim::Existing(record.local_port);
        }
        if inner.pending.contains(session_name) {
            return Claim::Pending;
        }
        inner.pending.insert(session_name.to_string());
        Claim::Claimed
    }

    /// Give up a claim taken with `claim_session`
    pub fn release_claim(&self, session_name: &str) {
        self.inner.lock().pending.remove(session_name);
    }

    /// Store a new record.
    ///
    /// A record for an already registered port, or any record once the
    /// registry is drained, is handed back unchanged.
    pub fn record(&self, record: TunnelRecord) -> Result<(), TunnelRecord> {
        let mut inner = self.inner.lock();
        if inner.closed || inner.records.contains_key(&record.local_port) {
            return Err(record);
        }
        tracing::debug!(
            "Registered tunnel {} -> {} ({})",
            record.local_port,
            record.remote_endpoint,
            record.session_name
        );
        inner.records.insert(record.local_port, record);
        Ok(())
    }

    /// Local port of the tunnel opened for `session_name`, if any
    pub fn find_by_session_name(&self, session_name: &str) -> Option<u16> {
        self.inner
            .lock()
            .records
            .values()
            .find(|r| r.session_name == session_name)
            .map(|r| r.local_port)
    }

    /// Remove and return the record for `local_port`
    pub fn release(&self, local_port: u16) -> Option<TunnelRecord> {
        self.inner.lock().records.remove(&local_port)
    }

    /// Remove and return every record and refuse new ones from now on
    pub fn drain(&self) -> Vec<TunnelRecord> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        std::mem::take(&mut inner.records).into_values().collect()
    }

    /// Whether `drain` has run
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Whether `local_port` is registered
    pub fn contains(&self, local_port: u16) -> bool {
        self.inner.lock().records.contains_key(&local_port)
    }

    /// Snapshot of all tunnels ordered by local port
    pub fn list(&self) -> Vec<TunnelInfo> {
        self.inner.lock().records.values().map(TunnelRecord::info).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }
}
