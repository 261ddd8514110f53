//! プロセス終了シグナルで pool を止める hook
//!
//! The hook is part of process shutdown, not a replacement for it: once the
//! pool has been stopped the process exits with `128 + signo`, the status a
//! shell reports for a process killed by that signal.

use std::future::Future;
use std::sync::Arc;

use super::WorkerPool;
use crate::domain::LifecycleState;

const SIGINT: i32 = 2;
#[cfg(unix)]
const SIGTERM: i32 = 15;

/// Spawn a listener on the pool runtime that stops the pool on SIGINT /
/// SIGTERM (ctrl-c elsewhere) and then exits the process.
///
/// The listener only holds a weak reference and is not tracked as background
/// work, so it neither keeps the pool alive nor blocks a graceful drain.
pub(super) fn install(pool: &WorkerPool) {
    install_with(
        pool,
        wait_for_termination(),
        |state| tracing::info!(%state, "termination signal: pool state"),
        |signo| std::process::exit(128 + signo),
    );
}

/// `trigger` resolves to the signal number that asked for termination, or
/// `None` if no signal can arrive. `on_transition` sees the pool state before
/// and after the stop; `finish` runs last, on the stopping thread.
pub(super) fn install_with<F, C, X>(pool: &WorkerPool, trigger: F, on_transition: C, finish: X)
where
    F: Future<Output = Option<i32>> + Send + 'static,
    C: Fn(LifecycleState) + Send + Sync + 'static,
    X: FnOnce(i32) + Send + 'static,
{
    let weak = Arc::downgrade(&pool.inner);
    pool.inner.handle.spawn(async move {
        let Some(signo) = trigger.await else {
            return;
        };
        let Some(inner) = weak.upgrade() else {
            finish(signo);
            return;
        };
        let pool = WorkerPool { inner };
        // stop はブロックするので blocking スレッドで
        let stopping = tokio::task::spawn_blocking(move || {
            pool.signal_terminate(Some(&on_transition));
            drop(pool);
            finish(signo);
        });
        drop(stopping);
    });
}

#[cfg(unix)]
async fn wait_for_termination() -> Option<i32> {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(err), _) | (_, Err(err)) => {
            tracing::warn!(error = %err, "failed to register termination signals");
            return None;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM");
            Some(SIGTERM)
        }
        _ = sigint.recv() => {
            tracing::info!("received SIGINT");
            Some(SIGINT)
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> Option<i32> {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("received ctrl-c");
            Some(SIGINT)
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to register ctrl-c handler");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, PoolStrategy};
    use std::sync::{Mutex, mpsc};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn pool() -> WorkerPool {
        WorkerPool::new(&PoolConfig::new(PoolStrategy::PerTask, 1)).unwrap()
    }

    #[test]
    fn signal_stops_pool_then_finishes_with_signo() {
        let pool = pool();
        let (fire, fired) = oneshot::channel::<i32>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel::<i32>();

        let record = Arc::clone(&seen);
        install_with(
            &pool,
            async move { fired.await.ok() },
            move |state| record.lock().unwrap().push(state),
            move |signo| {
                let _ = done_tx.send(signo);
            },
        );
        let handle = pool.submit(|| 5).unwrap();
        assert_eq!(pool.state(), LifecycleState::Active);

        fire.send(SIGINT).unwrap();
        let signo = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(signo, SIGINT);
        assert_eq!(pool.state(), LifecycleState::Inactive);
        assert_eq!(handle.wait().unwrap(), 5);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![LifecycleState::Active, LifecycleState::Inactive]
        );
    }

    #[test]
    fn no_signal_source_leaves_pool_alone() {
        let pool = pool();
        let (done_tx, done_rx) = mpsc::channel::<i32>();
        install_with(
            &pool,
            async { None },
            |_| {},
            move |signo| {
                let _ = done_tx.send(signo);
            },
        );

        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(pool.state(), LifecycleState::Active);
        assert_eq!(pool.counts().background, 0);
        pool.stop(Duration::from_millis(100), false).unwrap();
    }
}
