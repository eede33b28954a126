//! Response correlator: matches each request to its response across threads
//!
//! Producers `put` (key, value) pairs onto one bounded FIFO channel. A
//! consumer calling `take(key)` first checks a side table of pairs other
//! consumers already popped; failing that it pops pairs off the channel,
//! keeping its own and parking everyone else's in the side table.
//!
//! Keys are identity tokens ([`Ticket`]): two logically equal requests get
//! distinct tickets and never receive each other's responses.
//!
//! A consumer that gives up waiting calls `abandon(key)`. Producers share the
//! abandoned set and drop such responses instead of sending them, so they never
//! occupy channel capacity; one already queued is purged on the next pop.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::CorrelatorError;

/// Identity token correlating one submitted command with its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(Uuid);

impl Ticket {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for Ticket {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Create a correlator with room for `capacity` undelivered responses
pub fn response_channel<K, V>(capacity: usize) -> (Responder<K, V>, ResponseCorrelator<K, V>)
where
    K: Eq + Hash + fmt::Debug,
{
    debug!(capacity, "response_channel: called");
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let abandoned = Arc::new(Mutex::new(HashSet::new()));
    let correlator = ResponseCorrelator {
        inner: Arc::new(Inner {
            rx,
            taken: Mutex::new(HashMap::new()),
            abandoned: Arc::clone(&abandoned),
        }),
    };
    (Responder { tx, abandoned }, correlator)
}

/// Producer side
///
/// When every responder has been dropped, waiting consumers observe
/// [`CorrelatorError::Closed`] once the channel is drained.
pub struct Responder<K, V> {
    tx: Sender<(K, V)>,
    abandoned: Arc<Mutex<HashSet<K>>>,
}

impl<K, V> Clone for Responder<K, V> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            abandoned: Arc::clone(&self.abandoned),
        }
    }
}

impl<K, V> Responder<K, V>
where
    K: Eq + Hash + fmt::Debug,
{
    /// Append a (key, value) pair, blocking while the channel is full
    ///
    /// A pair whose key was abandoned is dropped without touching the channel.
    pub fn put(&self, key: K, value: V) -> Result<(), CorrelatorError> {
        if self.abandoned.lock().remove(&key) {
            trace!(?key, "Responder::put: dropping abandoned response");
            return Ok(());
        }
        self.tx.send((key, value)).map_err(|_| CorrelatorError::Closed)
    }
}

struct Inner<K, V> {
    rx: Receiver<(K, V)>,
    /// Popped but not yet claimed. Also serializes consumers: whoever holds
    /// this lock is the only one popping the channel.
    taken: Mutex<HashMap<K, V>>,
    /// Keys whose consumer stopped waiting, shared with every [`Responder`].
    /// Lock order: `taken` before `abandoned`; producers only take `abandoned`.
    abandoned: Arc<Mutex<HashSet<K>>>,
}

/// Consumer side; cheap to clone
pub struct ResponseCorrelator<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for ResponseCorrelator<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> ResponseCorrelator<K, V>
where
    K: Eq + Hash + fmt::Debug,
{
    /// Block until the response for `key` arrives
    pub fn take(&self, key: &K) -> Result<V, CorrelatorError> {
        trace!(?key, "ResponseCorrelator::take: called");
        let mut taken = self.inner.taken.lock();
        self.purge_abandoned(&mut taken);
        if let Some(value) = taken.remove(key) {
            return Ok(value);
        }
        // Pop until ours comes off; park anyone else's.
        loop {
            match self.inner.rx.recv() {
                Ok((k, v)) if &k == key => return Ok(v),
                Ok((k, v)) => self.park(&mut taken, k, v),
                Err(_) => return Err(CorrelatorError::Closed),
            }
        }
    }

    /// Like [`take`](Self::take) but gives up after `timeout`
    ///
    /// Giving up abandons `key`: a response that arrives later is discarded.
    pub fn take_timeout(&self, key: &K, timeout: Duration) -> Result<V, CorrelatorError>
    where
        K: Clone,
    {
        trace!(?key, ?timeout, "ResponseCorrelator::take_timeout: called");
        let deadline = Instant::now() + timeout;
        let Some(mut taken) = self.inner.taken.try_lock_until(deadline) else {
            self.abandon(key.clone());
            return Err(CorrelatorError::Timeout(timeout));
        };
        self.purge_abandoned(&mut taken);
        if let Some(value) = taken.remove(key) {
            return Ok(value);
        }
        loop {
            match self.inner.rx.recv_deadline(deadline) {
                Ok((k, v)) if &k == key => return Ok(v),
                Ok((k, v)) => self.park(&mut taken, k, v),
                Err(RecvTimeoutError::Timeout) => {
                    // We hold `taken`, so the response is not parked yet.
                    self.inner.abandoned.lock().insert(key.clone());
                    debug!(?key, "ResponseCorrelator::take_timeout: abandoned");
                    return Err(CorrelatorError::Timeout(timeout));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(CorrelatorError::Closed),
            }
        }
    }

    /// Stop waiting for `key`; its response is dropped whenever it shows up
    pub fn abandon(&self, key: K) {
        debug!(?key, "ResponseCorrelator::abandon: called");
        match self.inner.taken.try_lock() {
            Some(mut taken) => {
                if taken.remove(&key).is_some() {
                    return;
                }
                // Free the channel; ours may already be queued.
                while let Ok((k, v)) = self.inner.rx.try_recv() {
                    if k == key {
                        trace!(?key, "ResponseCorrelator::abandon: dropping queued response");
                        return;
                    }
                    self.park(&mut taken, k, v);
                }
                self.inner.abandoned.lock().insert(key);
            }
            // Another consumer is popping; it will purge on its next pass.
            None => {
                self.inner.abandoned.lock().insert(key);
            }
        }
    }

    /// Responses popped off the channel but not yet claimed
    pub fn unclaimed(&self) -> usize {
        self.inner.taken.lock().len()
    }

    /// Keys abandoned whose response has not yet been seen
    pub fn abandoned(&self) -> usize {
        self.inner.abandoned.lock().len()
    }

    fn park(&self, taken: &mut HashMap<K, V>, key: K, value: V) {
        if self.inner.abandoned.lock().remove(&key) {
            trace!(?key, "ResponseCorrelator::park: dropping abandoned response");
            return;
        }
        taken.insert(key, value);
    }

    fn purge_abandoned(&self, taken: &mut HashMap<K, V>) {
        let mut abandoned = self.inner.abandoned.lock();
        if !abandoned.is_empty() {
            abandoned.retain(|k| taken.remove(k).is_none());
        }
    }
}
