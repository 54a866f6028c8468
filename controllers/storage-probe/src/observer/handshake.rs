//! Flush rendezvous between object deletion and the checker loop.
//!
//! A requester enqueues an acknowledgement slot and waits on it. The checker
//! runs one pass per slot it receives and acknowledges afterwards, so the
//! requester resumes only once that pass is complete. Closing the listener
//! drops queued slots, which wakes their requesters with [`FlushError::Closed`].

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlushError {
    #[error("observer is shut down")]
    Closed,
}

/// Create a connected requester/listener pair with a single pending slot
pub fn flush_channel() -> (FlushRequester, FlushListener) {
    let (tx, rx) = mpsc::channel(1);
    (FlushRequester { tx }, FlushListener { rx })
}

#[derive(Debug, Clone)]
pub struct FlushRequester {
    tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl FlushRequester {
    /// Ask for one checker pass and wait until it has completed
    pub async fn request(&self) -> Result<(), FlushError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(ack_tx).await.map_err(|_| FlushError::Closed)?;
        ack_rx.await.map_err(|_| FlushError::Closed)
    }
}

#[derive(Debug)]
pub struct FlushListener {
    rx: mpsc::Receiver<oneshot::Sender<()>>,
}

/// A pending flush request; acknowledge it after the pass ran
#[derive(Debug)]
pub struct FlushTicket {
    ack: oneshot::Sender<()>,
}

impl FlushTicket {
    pub fn acknowledge(self) {
        // The requester may have been cancelled while waiting
        let _ = self.ack.send(());
    }
}

impl FlushListener {
    pub async fn recv(&mut self) -> Option<FlushTicket> {
        self.rx.recv().await.map(|ack| FlushTicket { ack })
    }

    /// Refuse new requests and release everyone still waiting
    pub fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}
