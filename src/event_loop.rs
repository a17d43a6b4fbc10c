// Generic consumer loop over a broadcast receiver.
// Handler failures are logged and counted; only a closed channel or the
// shutdown flag ends the loop. Lagged receivers skip ahead with a warning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub async fn run_event_loop<T, F, Fut>(
    mut receiver: broadcast::Receiver<T>,
    shutdown: Arc<AtomicBool>,
    module: &str,
    event: &str,
    mut handler: F,
) where
    T: Clone,
    F: FnMut(T) -> Fut,
    Fut: std::future::Future<Output = Result<(), anyhow::Error>>,
{
    info!("{module}: consuming {event} events");
    let mut handled: u64 = 0;
    let mut handler_errors: u64 = 0;

    while !shutdown.load(Ordering::Relaxed) {
        let item = match receiver.recv().await {
            Ok(item) => item,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "{module}: {event} receiver lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        handled += 1;
        if let Err(e) = handler(item).await {
            handler_errors += 1;
            warn!(error = %e, errors = handler_errors, "{module}: {event} handler failed");
        }
    }

    info!(handled, errors = handler_errors, "{module}: {event} consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn handler_errors_do_not_stop_the_loop() {
        let (tx, rx) = broadcast::channel::<u32>(8);
        let shutdown = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(Mutex::new(Vec::new()));

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();
        drop(tx);

        let sink = seen.clone();
        run_event_loop(rx, shutdown, "TEST", "number", move |n| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(n);
                if n == 2 {
                    anyhow::bail!("transient failure");
                }
                Ok(())
            }
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn closed_channel_ends_the_consumer() {
        let (tx, rx) = broadcast::channel::<u32>(8);
        drop(tx);

        // Completes rather than hangs once every sender is gone.
        run_event_loop(rx, Arc::new(AtomicBool::new(false)), "TEST", "number", |_| async {
            Ok(())
        })
        .await;
    }
}
