use std::time::Duration;

use stratus_domain::{HarvestMode, MachineId};
use tokio::sync::mpsc;

/// A pull-style change stream.
///
/// Watchers are lazy: nothing is computed until `changes` is awaited. The
/// first delivery after creation is a snapshot of current state; later
/// deliveries describe changes in the order the backing store observed them.
/// `None` means the stream is closed, which consumers treat as fatal.
#[derive(Debug)]
pub struct Watcher<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Watcher<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx }
    }

    /// A connected sender/watcher pair.
    pub fn channel() -> (mpsc::UnboundedSender<T>, Watcher<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Watcher::new(rx))
    }

    /// The next delivery, or `None` once the stream is closed.
    pub async fn changes(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Cancel the stream. Dropping the watcher has the same effect; this
    /// spelling exists for call sites that want to be explicit.
    pub fn stop(self) {}
}

/// Batches of machine ids whose records changed.
pub type MachineWatcher = Watcher<Vec<MachineId>>;

/// Harvest-mode changes; the first delivery is the current mode.
pub type HarvestWatcher = Watcher<HarvestMode>;

/// Periodic nudges to re-examine machines with transient provisioning errors.
pub type RetryWatcher = Watcher<()>;

/// A retry watcher ticking at a fixed period. The backing task exits when the
/// watcher is dropped.
pub fn retry_ticker(period: Duration) -> RetryWatcher {
    let (tx, watcher) = Watcher::channel();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    watcher
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order() {
        let (tx, mut w) = Watcher::channel();
        tx.send(vec![MachineId::new("0")]).unwrap();
        tx.send(vec![MachineId::new("1"), MachineId::new("2")]).unwrap();

        assert_eq!(w.changes().await.unwrap(), vec![MachineId::new("0")]);
        assert_eq!(
            w.changes().await.unwrap(),
            vec![MachineId::new("1"), MachineId::new("2")]
        );
    }

    #[tokio::test]
    async fn closes_when_sender_dropped() {
        let (tx, mut w) = Watcher::<()>::channel();
        drop(tx);
        assert!(w.changes().await.is_none());
    }

    #[tokio::test]
    async fn ticker_fires_repeatedly() {
        let mut ticker = retry_ticker(Duration::from_millis(5));
        ticker.changes().await.unwrap();
        ticker.changes().await.unwrap();
    }
}
