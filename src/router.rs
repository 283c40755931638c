//! Cross-connection message routing.
//!
//! The session registry records which connection id owns an account;
//! this router owns the actual channel to each connection task.
//! Messages are sealed by the receiving task with its own send cipher,
//! so only opcode and payload travel here.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use tokio::sync::{
    RwLock,
    mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};

use service::routing::{CloseReason, Reply};

/// What a connection task receives from its peers.
pub enum Outbound {
    Message(Reply),
    /// Another task (or the router itself) wants this connection gone.
    Shutdown(CloseReason),
}

struct Entry {
    sender: UnboundedSender<Outbound>,
    pending: Arc<AtomicUsize>,
}

/// Per-message framing overhead counted against the write budget.
const MESSAGE_OVERHEAD: usize = codec::frame::HEADER_SIZE * 2;

#[derive(Default)]
pub struct Router {
    entries: RwLock<HashMap<u64, Entry>>,
    next_id: AtomicU64,
}

impl Router {
    /// Allocate a connection id and its outbound channel. The returned
    /// counter tracks queued-but-unwritten bytes; the connection task
    /// decrements it as it drains.
    pub async fn register(&self) -> (u64, UnboundedReceiver<Outbound>, Arc<AtomicUsize>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        self.entries.write().await.insert(
            id,
            Entry {
                sender,
                pending: pending.clone(),
            },
        );

        (id, receiver, pending)
    }

    /// Queue a message for a connection. A receiver that has fallen
    /// more than `max_pending` bytes behind is told to shut down
    /// instead of buffering without bound.
    pub async fn send(&self, id: u64, reply: Reply, max_pending: usize) {
        let mut stale = false;

        {
            let entries = self.entries.read().await;
            let Some(entry) = entries.get(&id) else {
                return;
            };

            let cost = reply.payload.len() + MESSAGE_OVERHEAD;
            let queued = entry.pending.fetch_add(cost, Ordering::Relaxed) + cost;

            let outbound = if queued > max_pending {
                log::warn!("write queue overflow: connection={id}, queued={queued}");
                Outbound::Shutdown(CloseReason::WriteOverflow)
            } else {
                Outbound::Message(reply)
            };

            if entry.sender.send(outbound).is_err() {
                stale = true;
            }
        }

        if stale {
            self.remove(id).await;
        }
    }

    /// Ask a connection to close; used when a newer login evicts it.
    pub async fn shutdown(&self, id: u64, reason: CloseReason) {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(&id) {
            let _ = entry.sender.send(Outbound::Shutdown(reason));
        }
    }

    pub async fn remove(&self, id: u64) {
        self.entries.write().await.remove(&id);
    }
}
