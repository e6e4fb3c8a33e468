//! Graceful shutdown utilities
//!
//! Long-running tools (for example `econfctl watch`) park on
//! [`wait_for_shutdown`] and tear down their `Interface` afterwards.

use std::fmt;

use tracing::warn;

/// Which signal ended the wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Ctrl+C (SIGINT)
    Interrupt,
    /// SIGTERM (Unix only)
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix)
///
/// If the SIGTERM handler cannot be installed only Ctrl+C is honoured.
///
/// # Example
///
/// ```ignore
/// let signal = common::shutdown::wait_for_shutdown().await;
/// info!("{} received, shutting down", signal);
/// interface.shutdown().await?;
/// ```
pub async fn wait_for_shutdown() -> ShutdownSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}), only Ctrl+C will stop", e);
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
            _ = async {
                match term_signal {
                    Some(mut sig) => { sig.recv().await; },
                    None => std::future::pending::<()>().await,
                }
            } => ShutdownSignal::Terminate,
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler failed: {}", e);
        }
        ShutdownSignal::Interrupt
    }
}
