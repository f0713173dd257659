use crate::Result;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as shutdown too.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Runs the task produced by `spawn_task` until shutdown, starting a fresh
/// one after `restart_delay` whenever it panics, is cancelled or returns.
///
/// Returns how many times the task was restarted.
pub async fn supervise<F, Fut>(
    name: &str,
    restart_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut spawn_task: F,
) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut restarts = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }

        let mut handle = tokio::spawn(spawn_task());
        let exit = tokio::select! {
            exit = &mut handle => exit,
            _ = wait_for_shutdown(&mut shutdown) => {
                handle.abort();
                let _ = handle.await;
                break;
            }
        };

        match exit {
            Ok(Ok(())) => tracing::warn!("Supervised task returned. task={}", name),
            Ok(Err(error)) => tracing::error!("Supervised task failed. task={} error={}", name, error),
            Err(error) if error.is_panic() => tracing::error!("Supervised task panicked. task={}", name),
            Err(_) => tracing::warn!("Supervised task cancelled. task={}", name),
        }

        restarts += 1;
        tracing::info!(
            "Respawning supervised task. task={} restarts={} delay={:?}",
            name,
            restarts,
            restart_delay
        );
        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {}
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }

    tracing::info!("Supervisor stopped. task={} restarts={}", name, restarts);
    restarts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DagError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_respawns_after_panic_and_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let counter = attempts.clone();
        let supervisor = tokio::spawn(async move {
            supervise("test", Duration::from_millis(5), shutdown_rx, move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    match attempt {
                        0 => panic!("cycle blew up"),
                        1 => Err::<(), DagError>(DagError::Internal("cycle failed".to_string())),
                        _ => {
                            std::future::pending::<()>().await;
                            Ok(())
                        }
                    }
                }
            })
            .await
        });

        for _ in 0..200 {
            if attempts.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        shutdown_tx.send(true).unwrap();
        assert_eq!(supervisor.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_no_start_after_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        let restarts = supervise("test", Duration::from_millis(5), shutdown_rx, || async {
            Ok::<(), DagError>(())
        })
        .await;
        assert_eq!(restarts, 0);
    }
}
