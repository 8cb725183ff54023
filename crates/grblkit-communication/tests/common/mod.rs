//! Shared test support: a scripted mock endpoint and an event recorder.

use crossbeam_channel::{unbounded, Receiver, Sender};
use grblkit_communication::communication::SENTINEL_LINE;
use grblkit_communication::Endpoint;
use grblkit_core::{Result, StreamerEvent, TransportError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Endpoint driven entirely by the test: writes are recorded, inbound
/// lines are fed by hand.
pub struct MockEndpoint {
    inbound_tx: Sender<String>,
    inbound_rx: Receiver<String>,
    writes: Mutex<Vec<String>>,
}

impl MockEndpoint {
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = unbounded();
        Arc::new(Self {
            inbound_tx,
            inbound_rx,
            writes: Mutex::new(Vec::new()),
        })
    }

    /// Feed one firmware response line
    pub fn feed(&self, line: &str) {
        let _ = self.inbound_tx.send(line.to_string());
    }

    /// All writes so far, in order
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    /// Writes excluding real-time bytes, i.e. the buffered data lines
    pub fn data_writes(&self) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter(|w| !matches!(w.as_str(), "?" | "!" | "~" | "\u{18}"))
            .collect()
    }
}

impl Endpoint for MockEndpoint {
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn read_line(&self) -> Result<String> {
        self.inbound_rx
            .recv()
            .map_err(|_| TransportError::Disconnected.into())
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        self.writes
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(data).into_owned());
        Ok(data.len())
    }

    fn unblock_reader(&self) {
        let _ = self.inbound_tx.send(SENTINEL_LINE.to_string());
    }

    fn description(&self) -> String {
        "mock".to_string()
    }
}

/// Recorded event stream with polling assertions
#[derive(Clone)]
pub struct EventLog {
    events: Arc<Mutex<Vec<StreamerEvent>>>,
}

impl EventLog {
    pub fn new() -> (Self, impl FnMut(StreamerEvent) + Send + 'static) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = Self {
            events: events.clone(),
        };
        let callback = move |event: StreamerEvent| {
            events.lock().unwrap().push(event);
        };
        (log, callback)
    }

    pub fn snapshot(&self) -> Vec<StreamerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.snapshot().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| **n == name).count()
    }

    /// Block until the predicate holds over the event list
    pub fn wait_until(&self, pred: impl Fn(&[StreamerEvent]) -> bool) -> bool {
        wait_for(|| pred(&self.events.lock().unwrap()))
    }

    pub fn wait_for_event(&self, name: &'static str) -> bool {
        self.wait_until(|events| events.iter().any(|e| e.name() == name))
    }
}

/// Poll a condition for up to two seconds
pub fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
