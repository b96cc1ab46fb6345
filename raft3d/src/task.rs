use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// A spawned loop plus the channel used to ask it to stop.
///
/// The loop receives a `watch::Receiver<bool>` and is expected to race every
/// sleep against it (see [`pause`]), so stopping never waits out a full
/// interval.
pub(crate) struct BackgroundTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub(crate) fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(shutdown_rx));
        Self {
            name,
            shutdown,
            handle,
        }
    }

    /// Signals the loop and waits for it to exit.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            warn!(task = self.name, error = ?err, "background task ended abnormally");
        }
    }
}

/// Sleeps for `duration` unless shutdown is requested first.
///
/// Returns `true` when the caller should exit its loop.
pub(crate) async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        // A dropped sender also means nobody is left to keep us running.
        _ = shutdown.changed() => true,
    }
}
