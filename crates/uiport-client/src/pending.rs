//! Request correlation table.
//!
//! Every action that expects a result gets a uid from a per-client counter.
//! The entry lives until the matching ACTION_RESULT arrives, the caller gives
//! up, or the client tears down; whichever happens first consumes it.

use crate::ClientError;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;

pub(crate) type Reply = Result<Value, ClientError>;

#[derive(Debug)]
pub(crate) struct PendingTable {
    next_uid: u64,
    entries: HashMap<u64, oneshot::Sender<Reply>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            next_uid: 1,
            entries: HashMap::new(),
        }
    }

    /// Allocate a uid and the receiver its reply will arrive on.
    ///
    /// The counter wraps; uids still pending are skipped.
    pub(crate) fn register(&mut self) -> (u64, oneshot::Receiver<Reply>) {
        let uid = loop {
            let uid = self.next_uid;
            self.next_uid = self.next_uid.wrapping_add(1);
            if !self.entries.contains_key(&uid) {
                break uid;
            }
        };
        let (tx, rx) = oneshot::channel();
        self.entries.insert(uid, tx);
        (uid, rx)
    }

    /// Complete the request `uid`. Returns false if nothing was waiting.
    pub(crate) fn resolve(&mut self, uid: u64, reply: Reply) -> bool {
        match self.entries.remove(&uid) {
            Some(tx) => {
                // The caller may have stopped waiting; that is not an error.
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Forget `uid` without replying.
    pub(crate) fn cancel(&mut self, uid: u64) -> bool {
        self.entries.remove(&uid).is_some()
    }

    /// Reject every pending request.
    pub(crate) fn fail_all(&mut self, error: impl Fn() -> ClientError) {
        for (_, tx) in self.entries.drain() {
            let _ = tx.send(Err(error()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
