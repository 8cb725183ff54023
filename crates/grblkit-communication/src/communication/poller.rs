//! Status poller thread
//!
//! Writes the real-time `?` byte at a configurable interval so the
//! firmware keeps reporting its state. `?` is a real-time character:
//! grbl answers from an interrupt and the byte never counts against the
//! receive buffer.

use crate::communication::Endpoint;
use crate::firmware::grbl::RT_STATUS_QUERY;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use grblkit_core::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) struct StatusPoller {
    shutdown_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StatusPoller {
    pub(crate) fn spawn(
        name: &str,
        endpoint: Arc<dyn Endpoint>,
        interval_ms: Arc<AtomicU64>,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(format!("{}-poller", name))
            .spawn(move || {
                loop {
                    // Re-read every cycle so interval changes take
                    // effect without a restart.
                    let interval =
                        Duration::from_millis(interval_ms.load(Ordering::Relaxed).max(10));
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = endpoint.write(&[RT_STATUS_QUERY]) {
                                tracing::debug!("Status poll write failed: {}", e);
                                break;
                            }
                        }
                        _ => break,
                    }
                }
                tracing::debug!("Polling has been stopped");
            })?;

        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
