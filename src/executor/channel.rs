//! Control-signal channels used by the executor.

use tokio::sync::watch;

/// Broadcast channel for run state changes and cancellation signals.
/// Receivers always observe the latest value; late subscribers see the
/// current state immediately.
#[derive(Clone)]
pub struct WatchChannel<T> {
    pub tx: watch::Sender<T>,
    pub rx: watch::Receiver<T>,
}

impl<T: Clone> WatchChannel<T> {
    pub fn new(initial_value: T) -> Self {
        let (tx, rx) = watch::channel(initial_value);
        Self { tx, rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watch_channel_broadcast() {
        let channel = WatchChannel::new(0u32);
        let mut rx = channel.rx.clone();
        channel.tx.send(7).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 7);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_current_value() {
        let channel = WatchChannel::new(false);
        channel.tx.send(true).unwrap();
        let rx = channel.tx.subscribe();
        assert!(*rx.borrow());
    }
}
