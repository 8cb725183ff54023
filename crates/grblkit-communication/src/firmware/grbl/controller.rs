//! The grbl streamer orchestrator
//!
//! [`GrblStreamer`] owns the component lifecycle: it opens the
//! endpoint, runs the three worker threads (line reader, status poller,
//! event dispatcher) and exposes the public command surface. All
//! events funnel through one channel into the dispatcher thread, which
//! parses inbound lines, maintains the state mirror, drives the flow
//! controller on acknowledgements and invokes the embedder callback —
//! strictly one event at a time.

use crate::communication::poller::StatusPoller;
use crate::communication::reader::LineReader;
use crate::communication::{
    ConnectionParams, Endpoint, Message, SerialEndpoint, SimulatedEndpoint,
};
use crate::firmware::grbl::error_decoder::{describe_alarm, describe_error};
use crate::firmware::grbl::response_parser::{classify, GrblResponse};
use crate::firmware::grbl::status_parser::FullStatus;
use crate::firmware::grbl::streamer::{FlowController, FlowState, StreamingMode};
use crate::firmware::grbl::{RT_CYCLE_START, RT_FEED_HOLD, RT_SOFT_RESET, RX_BUFFER_SIZE};
use crossbeam_channel::{unbounded, Receiver, Sender};
use grblkit_core::{
    Error, MachineMode, MachineState, Result, Setting, StreamError, StreamerEvent,
};
use grblkit_parser::{GcodePreprocessor, Preprocessor};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// The embedder's event callback. Invoked serially from the dispatcher
/// thread; it must not block for long.
pub type EventCallback = Box<dyn FnMut(StreamerEvent) + Send + 'static>;

/// Streamer configuration
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Informal instance name, used in logs and thread names
    pub name: String,
    /// Firmware receive buffer capacity in bytes
    pub rx_buffer_size: usize,
    /// Status poll interval in milliseconds; the grbl wiki recommends
    /// no less than 200
    pub poll_interval_ms: u64,
    /// Wait for pending lines to drain on disconnect instead of
    /// discarding them
    pub drain_on_disconnect: bool,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            name: "grbl".to_string(),
            rx_buffer_size: RX_BUFFER_SIZE,
            poll_interval_ms: 200,
            drain_on_disconnect: false,
        }
    }
}

// Everything the flow engine touches under one lock, so embedder calls
// and acknowledgement handling serialize against each other.
struct StreamCore {
    flow: FlowController,
    preprocessor: Box<dyn Preprocessor>,
    /// A `$#` query is outstanding; the next `[PRB:...]` line ends a
    /// hash dump rather than reporting a probe
    hash_query_active: bool,
}

struct Inner {
    config: StreamerConfig,
    endpoint: RwLock<Option<Arc<dyn Endpoint>>>,
    core: Mutex<StreamCore>,
    machine: RwLock<MachineState>,
    tx: Mutex<Option<Sender<Message>>>,
    callback: Mutex<Option<EventCallback>>,
    booted: AtomicBool,
    poll_interval_ms: Arc<AtomicU64>,
}

impl Inner {
    fn endpoint(&self) -> Result<Arc<dyn Endpoint>> {
        self.endpoint
            .read()
            .clone()
            .ok_or_else(|| StreamError::NotConnected.into())
    }

    fn sender(&self) -> Option<Sender<Message>> {
        self.tx.lock().clone()
    }

    fn emit(&self, event: StreamerEvent) {
        if let Some(tx) = self.sender() {
            let _ = tx.send(Message::Event(event));
        }
    }
}

fn emit_fn(tx: &Option<Sender<Message>>) -> impl FnMut(StreamerEvent) + '_ {
    move |event| {
        if let Some(tx) = tx {
            let _ = tx.send(Message::Event(event));
        }
    }
}

// Dispatcher-thread-local history for deriving state-change, feed-change
// and movement/standstill events from raw status reports.
#[derive(Default)]
struct StatusWatch {
    last_mode: Option<MachineMode>,
    last_mpos: grblkit_core::Position,
    last_wpos: grblkit_core::Position,
    last_feed: Option<f64>,
    standstill_count: u32,
    is_standstill: bool,
}

/// One instance drives one physically connected grbl controller.
pub struct GrblStreamer {
    inner: Arc<Inner>,
    reader: Option<LineReader>,
    poller: Option<StatusPoller>,
    dispatcher: Option<JoinHandle<EventCallback>>,
}

impl GrblStreamer {
    /// Create a streamer with default configuration
    pub fn new(callback: impl FnMut(StreamerEvent) + Send + 'static) -> Self {
        Self::with_config(StreamerConfig::default(), callback)
    }

    /// Create a streamer with explicit configuration
    pub fn with_config(
        config: StreamerConfig,
        callback: impl FnMut(StreamerEvent) + Send + 'static,
    ) -> Self {
        let rx_buffer_size = config.rx_buffer_size;
        let poll_interval_ms = Arc::new(AtomicU64::new(config.poll_interval_ms));
        Self {
            inner: Arc::new(Inner {
                config,
                endpoint: RwLock::new(None),
                core: Mutex::new(StreamCore {
                    flow: FlowController::new(rx_buffer_size),
                    preprocessor: Box::new(GcodePreprocessor::new()),
                    hash_query_active: false,
                }),
                machine: RwLock::new(MachineState::default()),
                tx: Mutex::new(None),
                callback: Mutex::new(Some(Box::new(callback))),
                booted: AtomicBool::new(false),
                poll_interval_ms,
            }),
            reader: None,
            poller: None,
            dispatcher: None,
        }
    }

    /// Replace the default preprocessor with a custom pipeline
    pub fn with_preprocessor(self, preprocessor: Box<dyn Preprocessor>) -> Self {
        self.inner.core.lock().preprocessor = preprocessor;
        self
    }

    /// Open a serial device and start the session. The firmware is
    /// soft-reset to provoke the boot handshake, which in turn triggers
    /// the settings, hash-state and parser-state downloads.
    pub fn connect(&mut self, port: &str, baud_rate: u32) -> Result<()> {
        let endpoint = Arc::new(SerialEndpoint::new(ConnectionParams::new(port, baud_rate)));
        self.attach(endpoint)
    }

    /// Start a dry-run session against a simulated device. The returned
    /// endpoint handle exposes the recorded wire traffic.
    pub fn connect_simulated(&mut self) -> Result<Arc<SimulatedEndpoint>> {
        let endpoint = Arc::new(SimulatedEndpoint::default());
        self.attach(endpoint.clone())?;
        Ok(endpoint)
    }

    /// Start a session over a caller-supplied transport
    pub fn connect_endpoint(&mut self, endpoint: Arc<dyn Endpoint>) -> Result<()> {
        self.attach(endpoint)
    }

    fn attach(&mut self, endpoint: Arc<dyn Endpoint>) -> Result<()> {
        if self.inner.endpoint.read().is_some() {
            return Err(StreamError::AlreadyConnected.into());
        }
        endpoint.open()?;

        let Some(callback) = self.inner.callback.lock().take() else {
            let _ = endpoint.close();
            return Err(Error::other("event callback unavailable"));
        };

        // The endpoint must be visible before the reader starts: a real
        // device can greet us with its boot banner right away.
        let (tx, rx) = unbounded();
        *self.inner.tx.lock() = Some(tx.clone());
        *self.inner.endpoint.write() = Some(endpoint.clone());

        self.dispatcher = Some(spawn_dispatcher(self.inner.clone(), rx, callback)?);
        self.reader = Some(LineReader::spawn(
            &self.inner.config.name,
            endpoint.clone(),
            tx,
        )?);

        tracing::info!(
            "{}: session started on {}",
            self.inner.config.name,
            endpoint.description()
        );
        self.inner.emit(StreamerEvent::Log(format!(
            "Session started on {}",
            endpoint.description()
        )));

        // provoke the boot banner; everything else follows from it
        self.soft_reset()
    }

    /// Orderly shutdown: stop polling, drain or discard pending lines,
    /// unblock and join the worker threads, close the port.
    pub fn disconnect(&mut self) -> Result<()> {
        let Some(endpoint) = self.inner.endpoint.read().clone() else {
            return Ok(());
        };
        self.poll_stop();

        if self.inner.config.drain_on_disconnect {
            self.wait_for_drain(Duration::from_secs(5));
        } else {
            self.inner.core.lock().flow.discard_pending();
        }

        if let Some(tx) = self.inner.tx.lock().take() {
            let _ = tx.send(Message::Event(StreamerEvent::Disconnected));
            let _ = tx.send(Message::Shutdown);
        }

        endpoint.unblock_reader();
        if let Some(mut reader) = self.reader.take() {
            reader.join();
        }
        if let Some(handle) = self.dispatcher.take() {
            if let Ok(callback) = handle.join() {
                *self.inner.callback.lock() = Some(callback);
            }
        }

        let _ = endpoint.close();
        *self.inner.endpoint.write() = None;
        self.inner.booted.store(false, Ordering::SeqCst);
        tracing::info!("{}: disconnected", self.inner.config.name);
        Ok(())
    }

    fn wait_for_drain(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let core = self.inner.core.lock();
                if core.flow.inflight_len() == 0 && core.flow.queued_len() == 0 {
                    return;
                }
            }
            if Instant::now() >= deadline {
                tracing::warn!("Drain timed out, discarding remaining lines");
                return;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    /// Start periodic `?` status polling
    pub fn poll_start(&mut self) -> Result<()> {
        let endpoint = self.inner.endpoint()?;
        if self.poller.is_some() {
            tracing::debug!("Polling thread already running");
            return Ok(());
        }
        self.poller = Some(StatusPoller::spawn(
            &self.inner.config.name,
            endpoint,
            self.inner.poll_interval_ms.clone(),
        )?);
        self.inner
            .emit(StreamerEvent::Log("Polling started".to_string()));
        Ok(())
    }

    /// Stop status polling
    pub fn poll_stop(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
    }

    /// Change the status poll interval; takes effect within one cycle
    pub fn set_poll_interval(&self, interval: Duration) {
        self.inner
            .poll_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    /// Append G-Code to the stream queue and run the job
    pub fn stream(&self, source: &str) -> Result<()> {
        self.enqueue(source)?;
        self.job_run()
    }

    /// Alias of [`stream`](Self::stream), kept for embedders used to
    /// the classic API
    pub fn send_with_queue(&self, source: &str) -> Result<()> {
        self.stream(source)
    }

    /// Append G-Code to the stream queue without starting it
    pub fn enqueue(&self, source: &str) -> Result<()> {
        let tx = self.inner.sender();
        let mut emit = emit_fn(&tx);
        let mut core = self.inner.core.lock();
        if core.flow.is_job_drained() {
            // the previous job is done; numbering restarts at one
            core.flow.clear_job(&mut emit);
            core.preprocessor.job_reset();
        }
        let StreamCore {
            flow, preprocessor, ..
        } = &mut *core;
        flow.load(source, preprocessor.as_mut(), &mut emit)?;
        Ok(())
    }

    /// Start streaming the queued job
    pub fn job_run(&self) -> Result<()> {
        let endpoint = self.inner.endpoint()?;
        let tx = self.inner.sender();
        let mut emit = emit_fn(&tx);
        let mut core = self.inner.core.lock();
        if !core.flow.start(&mut emit) {
            return Ok(());
        }
        let StreamCore {
            flow, preprocessor, ..
        } = &mut *core;
        flow.pump(endpoint.as_ref(), preprocessor.as_mut(), &mut emit)
    }

    /// Clear the queue and reset job bookkeeping
    pub fn job_new(&self) -> Result<()> {
        let tx = self.inner.sender();
        let mut emit = emit_fn(&tx);
        let mut core = self.inner.core.lock();
        core.flow.clear_job(&mut emit);
        core.preprocessor.job_reset();
        let vars = core.preprocessor.vars().clone();
        emit(StreamerEvent::VarsChange(vars));
        Ok(())
    }

    /// Load a G-Code file into a fresh queue. Refused while a job is
    /// still running.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        if self.inner.core.lock().flow.is_job_active() {
            return Err(Error::other(
                "job must be finished before loading a file",
            ));
        }
        let contents = std::fs::read_to_string(path.as_ref())?;
        self.job_new()?;
        self.enqueue(&contents)
    }

    /// Send one line ahead of the stream queue. The line still counts
    /// against the receive buffer and never interleaves with a line
    /// already on the wire. Refused in Alarm and Hold modes.
    pub fn send_immediately(&self, line: &str) -> Result<()> {
        let endpoint = self.inner.endpoint()?;
        let mode = self.inner.machine.read().mode;
        if matches!(mode, MachineMode::Alarm | MachineMode::Hold) {
            tracing::warn!("Grbl is in {} mode; not sending '{}'", mode, line);
            return Err(StreamError::RefusedInMode {
                mode: mode.to_string(),
                line: line.to_string(),
            }
            .into());
        }
        if line.contains("$#") {
            // PRB lines answer both $# and probe cycles; only the
            // scheduled-query path attributes them correctly
            return self.request_hash_state();
        }

        let tx = self.inner.sender();
        let mut emit = emit_fn(&tx);
        let mut core = self.inner.core.lock();
        let StreamCore {
            flow, preprocessor, ..
        } = &mut *core;
        let tidy = preprocessor.tidy(line);
        let processed = preprocessor
            .process(&tidy)
            .map_err(|e| Error::other(e.to_string()))?;
        for out in processed {
            flow.push_priority(out)?;
        }
        flow.pump(endpoint.as_ref(), preprocessor.as_mut(), &mut emit)
    }

    /// Feed hold: send the real-time `!` byte and stop dispatching
    pub fn pause(&self) -> Result<()> {
        self.write_realtime(RT_FEED_HOLD)?;
        self.inner.core.lock().flow.pause();
        Ok(())
    }

    /// Cycle start: send the real-time `~` byte and continue
    /// dispatching from the exact next queue position
    pub fn resume(&self) -> Result<()> {
        self.write_realtime(RT_CYCLE_START)?;
        let endpoint = self.inner.endpoint()?;
        let tx = self.inner.sender();
        let mut emit = emit_fn(&tx);
        let mut core = self.inner.core.lock();
        core.flow.resume();
        let StreamCore {
            flow, preprocessor, ..
        } = &mut *core;
        flow.pump(endpoint.as_ref(), preprocessor.as_mut(), &mut emit)
    }

    /// Stash the unsent remainder of the job; in-flight lines drain
    /// naturally. Resume later with [`unstash`](Self::unstash).
    pub fn halt(&self) -> Result<()> {
        let tx = self.inner.sender();
        let mut emit = emit_fn(&tx);
        self.inner.core.lock().flow.halt(&mut emit);
        Ok(())
    }

    /// Restore a stashed job and continue streaming it
    pub fn unstash(&self) -> Result<()> {
        let endpoint = self.inner.endpoint()?;
        let tx = self.inner.sender();
        let mut emit = emit_fn(&tx);
        let mut core = self.inner.core.lock();
        if !core.flow.unstash(&mut emit) {
            return Ok(());
        }
        let StreamCore {
            flow, preprocessor, ..
        } = &mut *core;
        flow.pump(endpoint.as_ref(), preprocessor.as_mut(), &mut emit)
    }

    /// Soft-reset the firmware (Ctrl-X). All queues and the in-flight
    /// log are flushed; a `Boot` event follows once the firmware is
    /// back.
    pub fn soft_reset(&self) -> Result<()> {
        let endpoint = self.inner.endpoint()?;
        {
            let mut core = self.inner.core.lock();
            core.flow.flush_all();
            core.preprocessor.reset();
            core.hash_query_active = false;
        }
        endpoint.write(&[RT_SOFT_RESET])?;
        tracing::info!("{}: soft reset", self.inner.config.name);
        Ok(())
    }

    /// Clear an alarm lock (`$X`)
    pub fn kill_alarm(&self) -> Result<()> {
        self.push_query("$X")
    }

    /// Start the homing cycle (`$H`)
    pub fn homing(&self) -> Result<()> {
        self.push_query("$H")
    }

    /// Request the EEPROM settings (`$$`); completion is announced via
    /// `SettingsDownloaded`
    pub fn request_settings(&self) -> Result<()> {
        self.push_query("$$")
    }

    /// Request the coordinate-system offsets (`$#`); the full table is
    /// announced via `HashStateUpdate` once `[PRB:...]` arrives
    pub fn request_hash_state(&self) -> Result<()> {
        if self.inner.machine.read().mode == MachineMode::Hold {
            tracing::info!("$# is not answered in Hold mode, request ignored");
            return Ok(());
        }
        self.inner.core.lock().hash_query_active = true;
        self.push_query("$#")
    }

    /// Request the modal parser state (`$G`)
    pub fn request_parser_state(&self) -> Result<()> {
        self.push_query("$G")
    }

    /// Select the streaming discipline; can be changed mid-stream
    pub fn set_streaming_mode(&self, mode: StreamingMode) {
        let tx = self.inner.sender();
        let mut emit = emit_fn(&tx);
        self.inner.core.lock().flow.set_mode(mode, &mut emit);
    }

    /// Enable or disable dynamic feed override
    pub fn set_feed_override(&self, enabled: bool) {
        self.inner.core.lock().preprocessor.set_feed_override(enabled);
    }

    /// Set the feed applied while feed override is enabled, units/min
    pub fn request_feed(&self, feed: f64) {
        self.inner.core.lock().preprocessor.request_feed(feed);
    }

    /// Define a `#n` variable substitution value
    pub fn set_var(&self, name: &str, value: &str) {
        self.inner.core.lock().preprocessor.set_var(name, value);
    }

    /// Snapshot of the mirrored firmware state
    pub fn machine_state(&self) -> MachineState {
        self.inner.machine.read().clone()
    }

    /// True once the firmware's boot banner has been seen
    pub fn is_connected(&self) -> bool {
        self.inner.booted.load(Ordering::SeqCst)
    }

    /// Unacknowledged bytes counted against the receive buffer
    pub fn buffer_fill(&self) -> usize {
        self.inner.core.lock().flow.buffer_fill()
    }

    /// Lines sent but not yet acknowledged
    pub fn inflight_count(&self) -> usize {
        self.inner.core.lock().flow.inflight_len()
    }

    /// Lines waiting in the stream and priority queues
    pub fn queued_count(&self) -> usize {
        self.inner.core.lock().flow.queued_len()
    }

    /// Current flow-control state
    pub fn flow_state(&self) -> FlowState {
        self.inner.core.lock().flow.state()
    }

    /// Current streaming discipline
    pub fn streaming_mode(&self) -> StreamingMode {
        self.inner.core.lock().flow.mode()
    }

    fn push_query(&self, query: &str) -> Result<()> {
        let endpoint = self.inner.endpoint()?;
        let tx = self.inner.sender();
        let mut emit = emit_fn(&tx);
        let mut core = self.inner.core.lock();
        core.flow.push_priority(query.to_string())?;
        let StreamCore {
            flow, preprocessor, ..
        } = &mut *core;
        flow.pump(endpoint.as_ref(), preprocessor.as_mut(), &mut emit)
    }

    fn write_realtime(&self, byte: u8) -> Result<()> {
        let endpoint = self.inner.endpoint()?;
        endpoint.write(&[byte])?;
        self.inner.emit(StreamerEvent::Write(
            String::from_utf8_lossy(&[byte]).into_owned(),
        ));
        Ok(())
    }
}

impl Drop for GrblStreamer {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

fn spawn_dispatcher(
    inner: Arc<Inner>,
    rx: Receiver<Message>,
    mut callback: EventCallback,
) -> Result<JoinHandle<EventCallback>> {
    let handle = std::thread::Builder::new()
        .name(format!("{}-dispatch", inner.config.name))
        .spawn(move || {
            let mut watch = StatusWatch::default();
            while let Ok(message) = rx.recv() {
                match message {
                    Message::Shutdown => break,
                    Message::Event(event) => callback(event),
                    Message::ConnectionLost => {
                        inner.booted.store(false, Ordering::SeqCst);
                        callback(StreamerEvent::Disconnected);
                        break;
                    }
                    Message::Line(line) => {
                        if !line.is_empty() {
                            handle_line(&inner, &line, &mut watch);
                        }
                    }
                }
            }
            callback
        })?;
    Ok(handle)
}

fn handle_line(inner: &Arc<Inner>, line: &str, watch: &mut StatusWatch) {
    let tx = inner.sender();
    let mut emit = emit_fn(&tx);

    match classify(line) {
        GrblResponse::Ok => {
            let endpoint = inner.endpoint.read().clone();
            let mut core = inner.core.lock();
            let popped = core.flow.ack(false, &mut emit);
            inner.machine.write().rx_fill_percent = core.flow.rx_fill_percent();

            // the ok that acknowledges `$$` marks the download complete
            if popped.as_ref().is_some_and(|entry| entry.text == "$$") {
                emit(StreamerEvent::SettingsDownloaded(
                    inner.machine.read().settings.clone(),
                ));
            }

            if let Some(endpoint) = endpoint {
                let StreamCore {
                    flow, preprocessor, ..
                } = &mut *core;
                if let Err(e) = flow.pump(endpoint.as_ref(), preprocessor.as_mut(), &mut emit) {
                    tracing::error!("Dispatch after acknowledgement failed: {}", e);
                    emit(StreamerEvent::Log(format!("Dispatch failed: {}", e)));
                }
            }
        }

        GrblResponse::Error { code } => {
            let endpoint = inner.endpoint.read().clone();
            let mut core = inner.core.lock();
            let popped = core.flow.ack(true, &mut emit);
            inner.machine.write().rx_fill_percent = core.flow.rx_fill_percent();

            let (index, text) = match &popped {
                Some(entry) => (entry.nr, entry.text.clone()),
                None => (None, String::new()),
            };
            tracing::error!("Firmware error '{}' for line {:?} '{}'", code, index, text);
            emit(StreamerEvent::Error {
                index,
                line: text,
                message: describe_error(&code),
                code,
            });

            // streaming continues; stopping on errors is the embedder's call
            if let Some(endpoint) = endpoint {
                let StreamCore {
                    flow, preprocessor, ..
                } = &mut *core;
                if let Err(e) = flow.pump(endpoint.as_ref(), preprocessor.as_mut(), &mut emit) {
                    tracing::error!("Dispatch after error failed: {}", e);
                }
            }
        }

        GrblResponse::Alarm { code } => {
            // the firmware stops answering `?` in some alarm states, so
            // mirror the mode right away
            let (mode, machine_pos, work_pos) = {
                let mut machine = inner.machine.write();
                machine.mode = MachineMode::Alarm;
                (
                    machine.mode,
                    machine.machine_position,
                    machine.working_position,
                )
            };
            emit(StreamerEvent::StateUpdate {
                mode,
                machine_pos,
                work_pos,
            });
            emit(StreamerEvent::Read(line.to_string()));
            tracing::error!("Firmware alarm '{}'", code);
            emit(StreamerEvent::Alarm {
                message: describe_alarm(&code),
                code,
            });
            watch.last_mode = Some(MachineMode::Alarm);
        }

        GrblResponse::Boot { version } => {
            emit(StreamerEvent::Read(line.to_string()));
            {
                let mut core = inner.core.lock();
                core.flow.on_boot();
                core.preprocessor.reset();
                core.hash_query_active = false;
            }
            inner.machine.write().reset();
            *watch = StatusWatch::default();
            inner.booted.store(true, Ordering::SeqCst);

            tracing::info!("{}: Grbl {} booted", inner.config.name, version);
            emit(StreamerEvent::Log(format!("Grbl {} booted", version)));
            emit(StreamerEvent::Boot);
            emit(StreamerEvent::ProgressPercent(0));
            emit(StreamerEvent::RxBufferPercent(0));

            // the firmware state is fresh: re-download settings, offsets
            // and the modal parser state
            let endpoint = inner.endpoint.read().clone();
            let mut core = inner.core.lock();
            core.hash_query_active = true;
            let _ = core.flow.push_priority("$$".to_string());
            let _ = core.flow.push_priority("$#".to_string());
            let _ = core.flow.push_priority("$G".to_string());
            if let Some(endpoint) = endpoint {
                let StreamCore {
                    flow, preprocessor, ..
                } = &mut *core;
                if let Err(e) = flow.pump(endpoint.as_ref(), preprocessor.as_mut(), &mut emit) {
                    tracing::error!("Post-boot query dispatch failed: {}", e);
                }
            }
        }

        GrblResponse::Status(status) => update_status(inner, status, watch, &mut emit),

        GrblResponse::Setting {
            number,
            value,
            comment,
        } => {
            inner
                .machine
                .write()
                .settings
                .insert(number, Setting::new(value, comment));
            emit(StreamerEvent::Read(line.to_string()));
        }

        GrblResponse::HashEntry { prefix, values } => {
            inner
                .machine
                .write()
                .hash_offsets
                .insert(prefix.clone(), values.clone());
            emit(StreamerEvent::Read(line.to_string()));

            // PRB is the terminal line of a hash dump; outside of one it
            // reports a probe cycle
            if prefix == "PRB" {
                let hash_query = std::mem::take(&mut inner.core.lock().hash_query_active);
                if hash_query {
                    emit(StreamerEvent::HashStateUpdate(
                        inner.machine.read().hash_offsets.clone(),
                    ));
                } else {
                    emit(StreamerEvent::Probe(values));
                }
            }
        }

        GrblResponse::ParserState { modes } => {
            inner.machine.write().parser_modes = modes.clone();
            emit(StreamerEvent::Read(line.to_string()));
            emit(StreamerEvent::GcodeParserStateUpdate(modes));
        }

        GrblResponse::Unknown { line } => {
            tracing::debug!("{}: unclassified line: {}", inner.config.name, line);
            emit(StreamerEvent::Read(line));
        }
    }
}

fn update_status(
    inner: &Inner,
    status: FullStatus,
    watch: &mut StatusWatch,
    emit: &mut impl FnMut(StreamerEvent),
) {
    let mode = MachineMode::from_report(&status.mode);
    let rx_fill_percent = inner.core.lock().flow.rx_fill_percent();
    let (machine_pos, work_pos) = {
        let mut machine = inner.machine.write();
        machine.mode = mode;
        if let Some(p) = status.machine_pos {
            machine.machine_position = p;
        }
        if let Some(p) = status.work_pos {
            machine.working_position = p;
        }
        if let Some(f) = status.feed_rate {
            machine.feed_rate = f;
        }
        machine.rx_fill_percent = rx_fill_percent;
        (machine.machine_position, machine.working_position)
    };

    if watch.last_mode != Some(mode)
        || watch.last_mpos != machine_pos
        || watch.last_wpos != work_pos
    {
        emit(StreamerEvent::StateUpdate {
            mode,
            machine_pos,
            work_pos,
        });
    }

    if let Some(feed) = status.feed_rate {
        if watch.last_feed.is_some() && watch.last_feed != Some(feed) {
            emit(StreamerEvent::FeedChange(feed));
        }
        watch.last_feed = Some(feed);
    }

    // Movement watchdog: ten unchanged reports mean standstill
    if machine_pos != watch.last_mpos {
        if watch.is_standstill {
            watch.standstill_count = 0;
            watch.is_standstill = false;
            emit(StreamerEvent::Movement);
        }
    } else {
        watch.standstill_count += 1;
    }
    if !watch.is_standstill && watch.standstill_count > 10 {
        watch.is_standstill = true;
        emit(StreamerEvent::Standstill);
    }

    // A Run -> Idle edge can be the last signal that a job finished
    if watch.last_mode == Some(MachineMode::Run) && mode == MachineMode::Idle {
        inner.core.lock().flow.finish_if_drained(emit);
    }

    watch.last_mode = Some(mode);
    watch.last_mpos = machine_pos;
    watch.last_wpos = work_pos;
}
