use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use sourcebook_core::Position;
use sourcebook_events::Recorded;

use super::Subscription;
use crate::event_store::StorageStrategy;

/// Pause after a failed pull or handler call before trying again.
const ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// Handle to control and join a background subscription worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<Position>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// Cancellation happens between pulls and between handler retries, so
    /// this may wait up to one timebox. Returns the position of the last
    /// record the handler accepted (`None` if the worker thread panicked); a
    /// new subscription started there resumes without gap or duplicate.
    pub fn shutdown(mut self) -> Option<Position> {
        let _ = self.shutdown.send(());
        self.join.take().and_then(|j| j.join().ok())
    }
}

/// Runs a [`Subscription`] on a dedicated thread.
///
/// - `handler` is called once per record, in position order
/// - a failing record is retried after a backoff until the handler accepts
///   it or shutdown is requested; later records wait behind it
/// - handlers must be idempotent since a resumed subscription may see records again
#[derive(Debug)]
pub struct SubscriptionWorker;

impl SubscriptionWorker {
    pub fn spawn<S, H, E>(
        name: impl Into<String>,
        subscription: Subscription<S>,
        mut handler: H,
    ) -> std::io::Result<WorkerHandle>
    where
        S: StorageStrategy + 'static,
        H: FnMut(&Recorded) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&name, subscription, shutdown_rx, &mut handler))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

/// Sleep for the backoff; `true` if shutdown was requested meanwhile.
fn backoff(shutdown_rx: &mpsc::Receiver<()>) -> bool {
    match shutdown_rx.recv_timeout(ERROR_BACKOFF) {
        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => true,
        Err(mpsc::RecvTimeoutError::Timeout) => false,
    }
}

fn worker_loop<S, H, E>(
    name: &str,
    mut subscription: Subscription<S>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &mut H,
) -> Position
where
    S: StorageStrategy,
    H: FnMut(&Recorded) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let mut handled = subscription.last_position();
    info!(worker = name, start = %handled, "subscription worker started");

    'pull: loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        match subscription.next() {
            Some(Ok(batch)) => {
                for record in &batch {
                    let mut attempt = 1u32;
                    while let Err(err) = handler(record) {
                        warn!(worker = name, position = %record.position, attempt, error = ?err, "subscription handler failed");
                        if backoff(&shutdown_rx) {
                            break 'pull;
                        }
                        attempt += 1;
                    }
                    handled = record.position;
                }
            }
            Some(Err(err)) => {
                warn!(worker = name, error = %err, "subscription pull failed");
                if backoff(&shutdown_rx) {
                    break;
                }
            }
            None => break,
        }
    }

    info!(worker = name, last = %handled, "subscription worker stopped");
    handled
}
