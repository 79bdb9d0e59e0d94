//! Bounded error channel from the coordinator to the process owner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::FleetError;

/// Creates a bounded error channel.
///
/// `capacity` must be non-zero.
pub fn error_channel(capacity: usize) -> (ErrorReporter, mpsc::Receiver<FleetError>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        ErrorReporter {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

/// Sending half of the error channel.
///
/// Reporting never blocks: when the channel is full the error is logged,
/// dropped and counted.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<FleetError>,
    dropped: Arc<AtomicU64>,
}

impl ErrorReporter {
    /// Reports an error to the process owner.
    pub fn report(&self, err: FleetError) {
        error!(error = %err, "Fleet error");
        match self.tx.try_send(err) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "Error channel full, dropping error");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Error channel closed");
            }
        }
    }

    /// Reports every error in `errs`.
    pub fn report_all(&self, errs: impl IntoIterator<Item = FleetError>) {
        for err in errs {
            self.report(err);
        }
    }

    /// Number of errors dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
