use std::future::Future;
use std::pin::Pin;

use cfg_if::cfg_if;
use futures::{future::Shared, FutureExt};
use tokio::select;
use tokio::sync::oneshot;
use tracing::info;

cfg_if! {
    if #[cfg(windows)] {
        use tokio::signal::windows::*;

        async fn raw_shutdown_signal() {
            let mut ctrl_c = ctrl_c().expect("Failed to attach Ctrl_C shutdown signal (windows)");
            let mut ctrl_close = ctrl_close().expect("Failed to attach Ctrl_close shutdown signal (windows)");
            let mut ctrl_shutdown = ctrl_shutdown().expect("Failed to attach Ctrl_shutdown shutdown signal (windows)");
            select! {
                _ = ctrl_c.recv() => (),
                _ = ctrl_close.recv() => (),
                _ = ctrl_shutdown.recv() => (),
            }
        }
    } else if #[cfg(unix)] {
        use tokio::signal::unix::*;

        async fn unix_shutdown_signal(signal_kind: SignalKind) {
            let mut signal = signal(signal_kind).expect("Failed to listen to unix shutdown signal");
            signal.recv().await;
        }

        // cron and systemd stop a run with SIGTERM, an operator with SIGINT.
        async fn raw_shutdown_signal() {
            select! {
                _ = unix_shutdown_signal(SignalKind::interrupt()) => (),
                _ = unix_shutdown_signal(SignalKind::terminate()) => (),
                _ = unix_shutdown_signal(SignalKind::hangup()) => (),
            };
        }
    } else {
        compile_error!("Your OS does not support shutdown signal ! Are you targeting wasm ?");
    }
}

/// A cloneable future that resolves once the process has been asked to stop.
pub type ShutdownSignal = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

/// Resolves on SIGINT, SIGTERM or SIGHUP (Ctrl-C family on windows).
pub fn shutdown_signal() -> ShutdownSignal {
    async {
        raw_shutdown_signal().await;
        info!("Shutdown signal detected, finishing the current print job");
    }
    .boxed()
    .shared()
}

/// Handle firing a signal created by [`manual_shutdown`].
#[derive(Debug)]
pub struct ShutdownTrigger(oneshot::Sender<()>);

impl ShutdownTrigger {
    pub fn trigger(self) {
        // The receiving side only disappears together with every signal clone.
        let _ = self.0.send(());
    }
}

/// A signal driven by code instead of the OS, for embedding and tests.
///
/// Dropping the trigger without firing it leaves the signal pending forever.
pub fn manual_shutdown() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = oneshot::channel::<()>();
    let signal = async move {
        if rx.await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
    .boxed()
    .shared();
    (ShutdownTrigger(tx), signal)
}

/// Whether `signal` has already resolved, without waiting for it.
pub fn has_fired(signal: &ShutdownSignal) -> bool {
    signal.clone().now_or_never().is_some()
}
