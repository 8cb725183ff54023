//! Dry-run endpoint
//!
//! Stands in for real hardware: data lines are recorded instead of
//! transmitted and `ok` acknowledgements are synthesized at a fixed
//! cadence, so streaming jobs run with flow control, event emission and
//! completion exactly as they would against a device. Canned responses
//! for `?`, `$$`, `$#`, `$G` and soft-reset keep the state mirror alive.

use crate::communication::{Endpoint, SENTINEL_LINE};
use crate::firmware::grbl::{RT_CYCLE_START, RT_FEED_HOLD, RT_SOFT_RESET, RT_STATUS_QUERY};
use crossbeam_channel::{unbounded, Receiver, Sender};
use grblkit_core::{Result, TransportError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const SIM_BOOT_LINE: &str = "Grbl 1.1f ['$' for help]";
const SIM_STATUS_LINE: &str = "<Idle|MPos:0.000,0.000,0.000|FS:0.0,0>";

/// Simulated transport used for dry runs and tests
pub struct SimulatedEndpoint {
    inbound_tx: Sender<String>,
    inbound_rx: Receiver<String>,
    pending_acks: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    ack_thread: Mutex<Option<JoinHandle<()>>>,
    ack_interval: Duration,
    writes: Mutex<Vec<String>>,
}

impl SimulatedEndpoint {
    /// Create a simulated endpoint acknowledging one line per interval
    pub fn new(ack_interval: Duration) -> Self {
        let (inbound_tx, inbound_rx) = unbounded();
        Self {
            inbound_tx,
            inbound_rx,
            pending_acks: Arc::new(AtomicUsize::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            ack_thread: Mutex::new(None),
            ack_interval,
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Push a raw response line, as if the firmware had sent it
    pub fn feed(&self, line: &str) {
        let _ = self.inbound_tx.send(line.to_string());
    }

    /// Everything written to the endpoint so far, in write order
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    /// Forget the recorded writes
    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    fn respond(&self, line: &str) {
        match line {
            "$$" => {
                for setting in [
                    "$0=10 (step pulse, usec)",
                    "$1=25 (step idle delay, msec)",
                    "$130=200.000 (x max travel, mm)",
                    "$131=200.000 (y max travel, mm)",
                    "$132=200.000 (z max travel, mm)",
                ] {
                    self.feed(setting);
                }
            }
            "$#" => {
                for name in ["G54", "G55", "G56", "G57", "G58", "G59", "G28", "G30", "G92"] {
                    self.feed(&format!("[{}:0.000,0.000,0.000]", name));
                }
                self.feed("[TLO:0.000]");
                self.feed("[PRB:0.000,0.000,0.000:0]");
            }
            "$G" => {
                self.feed("[G0 G54 G17 G21 G90 G94 M0 M5 M9 T0 F0. S0.]");
            }
            _ => {}
        }
        self.pending_acks.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for SimulatedEndpoint {
    fn default() -> Self {
        Self::new(Duration::from_millis(5))
    }
}

impl Endpoint for SimulatedEndpoint {
    fn open(&self) -> Result<()> {
        self.stop.store(false, Ordering::SeqCst);
        let stop = self.stop.clone();
        let pending = self.pending_acks.clone();
        let tx = self.inbound_tx.clone();
        let interval = self.ack_interval;

        let handle = thread::Builder::new()
            .name("sim-acks".to_string())
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    if pending.load(Ordering::SeqCst) > 0 {
                        pending.fetch_sub(1, Ordering::SeqCst);
                        let _ = tx.send("ok".to_string());
                    }
                    thread::sleep(interval);
                }
            })?;
        *self.ack_thread.lock() = Some(handle);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.ack_thread.lock().take() {
            let _ = handle.join();
        }
        let _ = self.inbound_tx.send(SENTINEL_LINE.to_string());
        Ok(())
    }

    fn read_line(&self) -> Result<String> {
        self.inbound_rx
            .recv()
            .map_err(|_| TransportError::Disconnected.into())
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let text = String::from_utf8_lossy(data).into_owned();
        self.writes.lock().push(text.clone());

        match data {
            [RT_STATUS_QUERY] => self.feed(SIM_STATUS_LINE),
            [RT_FEED_HOLD] | [RT_CYCLE_START] => {}
            [RT_SOFT_RESET] => {
                self.pending_acks.store(0, Ordering::SeqCst);
                self.feed(SIM_BOOT_LINE);
            }
            _ => {
                for line in text.lines() {
                    self.respond(line);
                }
            }
        }
        Ok(data.len())
    }

    fn unblock_reader(&self) {
        let _ = self.inbound_tx.send(SENTINEL_LINE.to_string());
    }

    fn description(&self) -> String {
        "simulated grbl".to_string()
    }
}
