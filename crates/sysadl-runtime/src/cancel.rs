use tokio::sync::watch;

/// Owner side of a cancellation signal. One per scenario execution or scene
/// attempt.
#[derive(Debug)]
pub(crate) struct Cancellation {
    sender: watch::Sender<bool>,
}

impl Cancellation {
    pub(crate) fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self { sender }
    }

    pub(crate) fn token(&self) -> CancelToken {
        CancelToken {
            receiver: self.sender.subscribe(),
        }
    }

    pub(crate) fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub(crate) fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancelled, or once the owner is gone.
    pub(crate) async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}
