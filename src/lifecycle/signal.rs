//! One-shot closed signal.

use tokio::sync::watch;

/// Fire side of a node's closed signal.
///
/// The signal can fire at most once. Checking and firing happen in a single
/// step on the channel, so two racing callers can never both observe that
/// they fired it.
#[derive(Debug)]
pub struct ClosedSignal {
    tx: watch::Sender<bool>,
}

impl ClosedSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// A waiter for this signal.
    pub fn subscribe(&self) -> Closed {
        Closed {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ClosedSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of a closed signal. Cheap to clone; every clone observes the
/// same firing.
#[derive(Debug, Clone)]
pub struct Closed {
    rx: watch::Receiver<bool>,
}

impl Closed {
    pub fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the signal fires.
    ///
    /// Returns immediately if it already fired, and also if the owning node
    /// was dropped without firing.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fires_once() {
        let signal = ClosedSignal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn test_late_waiter_sees_firing() {
        let signal = ClosedSignal::new();
        signal.fire();

        let closed = signal.subscribe();
        assert!(closed.is_closed());
        tokio::time::timeout(Duration::from_millis(100), closed.wait())
            .await
            .expect("waiter should return immediately");
    }

    #[tokio::test]
    async fn test_all_waiters_wake() {
        let signal = ClosedSignal::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| tokio::spawn(signal.subscribe().wait()))
            .collect();

        signal.fire();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter timed out")
                .unwrap();
        }
    }
}
