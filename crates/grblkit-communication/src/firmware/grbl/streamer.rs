//! Streaming flow control
//!
//! Keeps grbl's 128-byte receive buffer as full as possible without
//! ever overflowing it. The controller owns the stream queue, the
//! priority queue, the in-flight log and the fill counter; every `ok`
//! or `error` releases the byte cost of the oldest unacknowledged line
//! and triggers the next send opportunity.
//!
//! Two disciplines:
//! - **Incremental**: one line in flight at a time. Required for `$`
//!   EEPROM writes, useful for debugging.
//! - **Character-counting**: lines are sent while the cumulative
//!   unacknowledged byte count stays within the buffer capacity.

use crate::communication::Endpoint;
use grblkit_core::{Result, StreamError, StreamerEvent};
use grblkit_parser::{PreprocessError, Preprocessor};
use std::collections::VecDeque;
use std::fmt;

/// Flow-control discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingMode {
    /// Wait for an acknowledgement after every line
    Incremental,
    /// Keep the receive buffer as full as possible
    #[default]
    CharacterCounting,
}

impl fmt::Display for StreamingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incremental => write!(f, "incremental"),
            Self::CharacterCounting => write!(f, "character-counting"),
        }
    }
}

/// Streaming engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    /// No job running
    #[default]
    Idle,
    /// Dispatching lines from the stream queue
    Streaming,
    /// Feed hold; nothing is dispatched
    Paused,
    /// Job halted, remainder stashed
    Halted,
    /// Stream queue empty, in-flight log still draining
    Draining,
}

#[derive(Debug, Clone)]
struct PendingLine {
    nr: usize,
    text: String,
    /// Preprocessing already ran (expansion results pushed back to the
    /// queue head must not be processed twice)
    processed: bool,
}

/// One transmitted but unacknowledged line
#[derive(Debug, Clone)]
pub(crate) struct InflightLine {
    /// Job line number; `None` for priority traffic
    pub(crate) nr: Option<usize>,
    /// Transmitted text, newline excluded
    pub(crate) text: String,
    cost: usize,
}

#[derive(Debug, Clone)]
struct Stash {
    pending: VecDeque<PendingLine>,
    total_lines: usize,
    acked_nr: usize,
    job_active: bool,
}

pub(crate) struct FlowController {
    capacity: usize,
    mode: StreamingMode,
    state: FlowState,
    pending: VecDeque<PendingLine>,
    priority: VecDeque<String>,
    /// Next stream line, already preprocessed, parked until it fits
    current: Option<PendingLine>,
    inflight: VecDeque<InflightLine>,
    /// Sum of in-flight byte costs; invariant: `fill <= capacity`
    fill: usize,
    total_lines: usize,
    acked_nr: usize,
    job_active: bool,
    /// Drain the in-flight log before the next send (set when switching
    /// to incremental mid-stream)
    wait_empty: bool,
    stash: Option<Stash>,
}

type Emit<'a> = &'a mut dyn FnMut(StreamerEvent);

impl FlowController {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            mode: StreamingMode::default(),
            state: FlowState::default(),
            pending: VecDeque::new(),
            priority: VecDeque::new(),
            current: None,
            inflight: VecDeque::new(),
            fill: 0,
            total_lines: 0,
            acked_nr: 0,
            job_active: false,
            wait_empty: false,
            stash: None,
        }
    }

    /// Tidy the source lines and append them to the stream queue.
    ///
    /// Empty lines are kept: the firmware acknowledges them, and line
    /// numbers must keep matching the source.
    pub(crate) fn load(
        &mut self,
        source: &str,
        pre: &mut dyn Preprocessor,
        emit: Emit,
    ) -> Result<usize> {
        let mut added = 0;
        for raw in source.lines() {
            let tidy = pre.tidy(raw);
            if tidy.len() + 1 > self.capacity {
                return Err(StreamError::LineTooLong {
                    length: tidy.len() + 1,
                    capacity: self.capacity,
                }
                .into());
            }
            pre.find_vars(&tidy);
            self.total_lines += 1;
            self.pending.push_back(PendingLine {
                nr: self.total_lines,
                text: tidy,
                processed: false,
            });
            added += 1;
        }
        emit(StreamerEvent::BufsizeChange(self.total_lines));
        emit(StreamerEvent::VarsChange(pre.vars().clone()));
        Ok(added)
    }

    /// Start (or continue) streaming the queue. Returns false when
    /// there is nothing to stream.
    pub(crate) fn start(&mut self, emit: Emit) -> bool {
        if self.pending.is_empty() && self.current.is_none() {
            emit(StreamerEvent::Log("Nothing in the buffer".to_string()));
            return false;
        }
        self.job_active = true;
        self.state = FlowState::Streaming;
        emit(StreamerEvent::ProgressPercent(self.progress_percent()));
        true
    }

    /// Queue a line ahead of the stream queue. Bounded by the same
    /// receive-buffer capacity as everything else.
    pub(crate) fn push_priority(&mut self, line: String) -> Result<()> {
        if line.len() + 1 > self.capacity {
            return Err(StreamError::LineTooLong {
                length: line.len() + 1,
                capacity: self.capacity,
            }
            .into());
        }
        self.priority.push_back(line);
        Ok(())
    }

    /// Dispatch as many lines as the discipline and the buffer allow.
    pub(crate) fn pump(
        &mut self,
        endpoint: &dyn Endpoint,
        pre: &mut dyn Preprocessor,
        emit: Emit,
    ) -> Result<()> {
        if self.state == FlowState::Paused {
            return Ok(());
        }

        loop {
            if self.wait_empty && !self.inflight.is_empty() {
                break;
            }
            if self.mode == StreamingMode::Incremental && !self.inflight.is_empty() {
                break;
            }

            // Priority lines jump the stream queue but never interleave
            // with a line already committed to the in-flight log.
            if let Some(head) = self.priority.front() {
                if self.fill + head.len() + 1 > self.capacity {
                    break;
                }
                if let Some(line) = self.priority.pop_front() {
                    self.transmit(None, line, endpoint, emit)?;
                }
                continue;
            }

            if self.state != FlowState::Streaming {
                break;
            }

            if self.current.is_none() {
                self.advance(pre, emit)?;
            }
            match self.current.take() {
                Some(cur) => {
                    if self.fill + cur.text.len() + 1 > self.capacity {
                        self.current = Some(cur);
                        break;
                    }
                    self.transmit(Some(cur.nr), cur.text, endpoint, emit)?;
                }
                None => break,
            }
        }

        self.refresh_state(emit);
        Ok(())
    }

    /// Release the oldest in-flight line after an `ok` or `error:`.
    ///
    /// Returns the released entry so the caller can correlate error
    /// responses and query completions.
    pub(crate) fn ack(&mut self, is_error: bool, emit: Emit) -> Option<InflightLine> {
        let popped = self.inflight.pop_front();
        match &popped {
            Some(entry) => {
                self.fill = self.fill.saturating_sub(entry.cost);
                if let Some(nr) = entry.nr {
                    if nr > self.acked_nr {
                        self.acked_nr = nr;
                    }
                    if !is_error {
                        emit(StreamerEvent::ProcessedCommand {
                            index: nr,
                            line: entry.text.clone(),
                        });
                    }
                    if self.total_lines > 0 {
                        emit(StreamerEvent::ProgressPercent(self.progress_percent()));
                    }
                }
                if self.wait_empty && self.inflight.is_empty() {
                    self.wait_empty = false;
                }
            }
            None => tracing::debug!("Acknowledgement with an empty in-flight log"),
        }
        emit(StreamerEvent::RxBufferPercent(self.rx_fill_percent()));
        self.refresh_state(emit);
        popped
    }

    pub(crate) fn set_mode(&mut self, mode: StreamingMode, emit: Emit) {
        self.mode = mode;
        if mode == StreamingMode::Incremental {
            // let the buffer drain before the one-at-a-time regime starts
            self.wait_empty = true;
        }
        emit(StreamerEvent::Log(format!("Streaming mode set to {}", mode)));
    }

    pub(crate) fn pause(&mut self) {
        if matches!(self.state, FlowState::Streaming | FlowState::Draining) {
            self.state = FlowState::Paused;
        }
    }

    pub(crate) fn resume(&mut self) {
        if self.state == FlowState::Paused {
            self.state = FlowState::Streaming;
        }
    }

    /// Stash the unsent remainder of the job and let the in-flight log
    /// drain. A halt with nothing queued is a no-op.
    pub(crate) fn halt(&mut self, emit: Emit) {
        if !self.job_active && self.pending.is_empty() && self.current.is_none() {
            return;
        }
        let mut remainder = std::mem::take(&mut self.pending);
        if let Some(cur) = self.current.take() {
            remainder.push_front(cur);
        }
        self.stash = Some(Stash {
            pending: remainder,
            total_lines: self.total_lines,
            acked_nr: self.acked_nr,
            job_active: self.job_active,
        });
        self.total_lines = 0;
        self.acked_nr = 0;
        self.job_active = false;
        self.state = FlowState::Halted;
        emit(StreamerEvent::Log(
            "Job halted; remaining lines stashed".to_string(),
        ));
        emit(StreamerEvent::BufsizeChange(0));
    }

    /// Restore a stashed job. Returns false when nothing was stashed.
    pub(crate) fn unstash(&mut self, emit: Emit) -> bool {
        let Some(stash) = self.stash.take() else {
            return false;
        };
        self.pending = stash.pending;
        self.total_lines = stash.total_lines;
        self.acked_nr = stash.acked_nr;
        self.job_active = stash.job_active;
        self.state = FlowState::Streaming;
        emit(StreamerEvent::BufsizeChange(self.total_lines));
        true
    }

    /// Forget the current job. Counters reset so the next job's
    /// progress starts from zero.
    pub(crate) fn clear_job(&mut self, emit: Emit) {
        self.pending.clear();
        self.current = None;
        self.total_lines = 0;
        self.acked_nr = 0;
        self.job_active = false;
        self.state = FlowState::Idle;
        emit(StreamerEvent::BufsizeChange(0));
    }

    /// Soft-reset bookkeeping: every queue and the in-flight log are
    /// flushed. The stash survives so a halted job can still resume.
    pub(crate) fn flush_all(&mut self) {
        self.pending.clear();
        self.priority.clear();
        self.current = None;
        self.inflight.clear();
        self.fill = 0;
        self.total_lines = 0;
        self.acked_nr = 0;
        self.wait_empty = false;
        self.job_active = false;
        self.state = FlowState::Idle;
    }

    /// Boot housekeeping. The firmware's receive buffer is empty now,
    /// so in-flight accounting restarts; queued source lines survive.
    pub(crate) fn on_boot(&mut self) {
        if let Some(cur) = self.current.take() {
            self.pending.push_front(cur);
        }
        self.inflight.clear();
        self.fill = 0;
        self.priority.clear();
        self.wait_empty = false;
        self.job_active = false;
        self.state = FlowState::Idle;
    }

    /// Drop everything not yet on the wire (disconnect default).
    pub(crate) fn discard_pending(&mut self) {
        self.pending.clear();
        self.priority.clear();
        self.current = None;
        self.job_active = false;
        self.state = FlowState::Idle;
    }

    pub(crate) fn state(&self) -> FlowState {
        self.state
    }

    pub(crate) fn mode(&self) -> StreamingMode {
        self.mode
    }

    /// Unacknowledged bytes currently counted against the firmware buffer
    pub(crate) fn buffer_fill(&self) -> usize {
        self.fill
    }

    pub(crate) fn rx_fill_percent(&self) -> u8 {
        (self.fill * 100 / self.capacity) as u8
    }

    pub(crate) fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some()) + self.priority.len()
    }

    pub(crate) fn is_job_active(&self) -> bool {
        self.job_active
    }

    /// True once a previous job has fully drained; the next `load`
    /// should start numbering from scratch.
    pub(crate) fn is_job_drained(&self) -> bool {
        !self.job_active
            && self.pending.is_empty()
            && self.current.is_none()
            && self.total_lines > 0
    }

    fn progress_percent(&self) -> u8 {
        if self.total_lines == 0 {
            return 0;
        }
        (self.acked_nr * 100 / self.total_lines) as u8
    }

    // Pull the next stream line through the preprocessor into `current`.
    fn advance(&mut self, pre: &mut dyn Preprocessor, emit: Emit) -> Result<()> {
        while let Some(line) = self.pending.pop_front() {
            if line.processed {
                self.current = Some(line);
                return Ok(());
            }

            let text = if self.mode == StreamingMode::CharacterCounting
                && is_settings_write(&line.text)
            {
                // grbl cannot buffer EEPROM writes; a comment line keeps
                // the acknowledgement bookkeeping aligned.
                tracing::warn!(
                    "Settings command '{}' stripped from character-counting stream",
                    line.text
                );
                emit(StreamerEvent::Log(format!(
                    "Cannot stream settings command '{}' in character-counting mode; \
                     use incremental streaming",
                    line.text
                )));
                "; setting stripped".to_string()
            } else {
                line.text.clone()
            };

            match pre.process(&text) {
                Ok(lines) => {
                    let mut produced = lines.into_iter();
                    let Some(first) = produced.next() else {
                        continue;
                    };
                    let rest: Vec<String> = produced.collect();
                    for extra in rest.into_iter().rev() {
                        self.pending.push_front(PendingLine {
                            nr: line.nr,
                            text: extra,
                            processed: true,
                        });
                    }
                    self.current = Some(PendingLine {
                        nr: line.nr,
                        text: first,
                        processed: true,
                    });
                    return Ok(());
                }
                Err(PreprocessError::UndefinedVariable { name }) => {
                    tracing::error!("Undefined variable #{}; halting job", name);
                    emit(StreamerEvent::Log(format!(
                        "Undefined variable #{}; job halted, set the variable and unstash",
                        name
                    )));
                    self.pending.push_front(line);
                    self.halt(emit);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn transmit(
        &mut self,
        nr: Option<usize>,
        text: String,
        endpoint: &dyn Endpoint,
        emit: Emit,
    ) -> Result<()> {
        let cost = text.len() + 1;
        if self.fill + cost > self.capacity {
            // callers check capacity first; reaching this is a bug
            return Err(StreamError::BufferOverflowAttempt {
                fill: self.fill,
                cost,
                capacity: self.capacity,
            }
            .into());
        }

        let wire = format!("{}\n", text);
        endpoint.write(wire.as_bytes())?;
        self.fill += cost;
        self.inflight.push_back(InflightLine {
            nr,
            text: text.clone(),
            cost,
        });

        emit(StreamerEvent::Write(wire));
        if let Some(index) = nr {
            emit(StreamerEvent::LineSent { index, line: text });
        }
        Ok(())
    }

    fn refresh_state(&mut self, emit: Emit) {
        match self.state {
            FlowState::Streaming if self.pending.is_empty() && self.current.is_none() => {
                if self.inflight.is_empty() {
                    self.finish(emit);
                } else {
                    self.state = FlowState::Draining;
                }
            }
            FlowState::Draining if self.inflight.is_empty() => self.finish(emit),
            _ => {}
        }
    }

    /// Emit `JobCompleted` exactly once per job, after the final
    /// `ProcessedCommand`.
    pub(crate) fn finish_if_drained(&mut self, emit: Emit) {
        if self.job_active
            && self.pending.is_empty()
            && self.current.is_none()
            && self.inflight.is_empty()
        {
            self.finish(emit);
        }
    }

    fn finish(&mut self, emit: Emit) {
        if self.job_active {
            self.job_active = false;
            tracing::info!("Job completed");
            emit(StreamerEvent::JobCompleted);
        }
        self.state = FlowState::Idle;
    }
}

// Matches `$` commands that write settings ($1=..., $130=..., $N0=...,
// $RST): everything except the $C/$X/$H/$G/$$/$# queries and toggles.
fn is_settings_write(line: &str) -> bool {
    match line.strip_prefix('$') {
        Some(rest) => !matches!(
            rest.chars().next(),
            Some('C' | 'X' | 'H' | 'G' | '$' | '#') | None
        ),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grblkit_core::TransportError;
    use grblkit_parser::GcodePreprocessor;
    use std::sync::Mutex;

    struct SinkEndpoint {
        writes: Mutex<Vec<String>>,
    }

    impl SinkEndpoint {
        fn new() -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
            }
        }

        fn lines(&self) -> Vec<String> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl Endpoint for SinkEndpoint {
        fn open(&self) -> Result<()> {
            Ok(())
        }
        fn close(&self) -> Result<()> {
            Ok(())
        }
        fn read_line(&self) -> Result<String> {
            Err(TransportError::Disconnected.into())
        }
        fn write(&self, data: &[u8]) -> Result<usize> {
            self.writes
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(data).into_owned());
            Ok(data.len())
        }
        fn unblock_reader(&self) {}
        fn description(&self) -> String {
            "sink".to_string()
        }
    }

    fn setup(capacity: usize) -> (FlowController, SinkEndpoint, GcodePreprocessor) {
        (
            FlowController::new(capacity),
            SinkEndpoint::new(),
            GcodePreprocessor::new(),
        )
    }

    #[test]
    fn character_counting_respects_capacity() {
        let (mut flow, endpoint, mut pre) = setup(20);
        let mut events = Vec::new();
        let mut emit = |ev: StreamerEvent| events.push(ev);

        // 9 + 9 = 18 bytes fit; the third line must wait
        flow.load("G1X10Y10\nG1X20Y20\nM5", &mut pre, &mut emit).unwrap();
        assert!(flow.start(&mut emit));
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();

        assert_eq!(endpoint.lines(), vec!["G1X10Y10\n", "G1X20Y20\n"]);
        assert_eq!(flow.buffer_fill(), 18);
        assert_eq!(flow.inflight_len(), 2);

        // the first ok releases 9 bytes, M5 (3) now fits
        flow.ack(false, &mut emit);
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();
        assert_eq!(endpoint.lines().last().unwrap(), "M5\n");
        assert_eq!(flow.buffer_fill(), 9 + 3);
    }

    #[test]
    fn incremental_sends_one_line_at_a_time() {
        let (mut flow, endpoint, mut pre) = setup(128);
        let mut events = Vec::new();
        let mut emit = |ev: StreamerEvent| events.push(ev);

        flow.set_mode(StreamingMode::Incremental, &mut emit);
        flow.load("G0X1\nG0X2\nG0X3", &mut pre, &mut emit).unwrap();
        flow.start(&mut emit);
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();
        assert_eq!(endpoint.lines().len(), 1);

        flow.ack(false, &mut emit);
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();
        assert_eq!(endpoint.lines().len(), 2);
    }

    #[test]
    fn priority_lines_jump_the_stream_queue() {
        let (mut flow, endpoint, mut pre) = setup(12);
        let mut events = Vec::new();
        let mut emit = |ev: StreamerEvent| events.push(ev);

        // fills the buffer: 11 bytes of 12
        flow.load("G1X10Y10F5\nG1X20\nG1X30", &mut pre, &mut emit)
            .unwrap();
        flow.start(&mut emit);
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();
        assert_eq!(endpoint.lines().len(), 1);

        flow.push_priority("G0X200".to_string()).unwrap();
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();
        // no room yet, the priority line waits too
        assert_eq!(endpoint.lines().len(), 1);

        flow.ack(false, &mut emit);
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();
        // priority line went out before queued line 2
        assert_eq!(endpoint.lines()[1], "G0X200\n");

        flow.ack(false, &mut emit);
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();
        assert_eq!(endpoint.lines()[2], "G1X20\n");
    }

    #[test]
    fn completion_is_emitted_after_the_last_ack() {
        let (mut flow, endpoint, mut pre) = setup(128);
        let mut events = Vec::new();
        let mut emit = |ev: StreamerEvent| events.push(ev);

        flow.load("G00Y3\n", &mut pre, &mut emit).unwrap();
        flow.start(&mut emit);
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();
        assert_eq!(flow.state(), FlowState::Draining);

        flow.ack(false, &mut emit);
        assert_eq!(flow.state(), FlowState::Idle);

        let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
        let processed = names
            .iter()
            .position(|n| *n == "on_processed_command")
            .unwrap();
        let completed = names.iter().position(|n| *n == "on_job_completed").unwrap();
        assert!(processed < completed);
    }

    #[test]
    fn empty_lines_are_streamed_and_numbered() {
        let (mut flow, endpoint, mut pre) = setup(128);
        let mut events = Vec::new();
        let mut emit = |ev: StreamerEvent| events.push(ev);

        flow.load("G00Y3\n\n", &mut pre, &mut emit).unwrap();
        flow.start(&mut emit);
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();

        assert_eq!(endpoint.lines(), vec!["G00Y3\n", "\n"]);
        let sent: Vec<(usize, String)> = events
            .iter()
            .filter_map(|e| match e {
                StreamerEvent::LineSent { index, line } => Some((*index, line.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(sent, vec![(1, "G00Y3".to_string()), (2, "".to_string())]);
    }

    #[test]
    fn halt_stashes_and_unstash_resumes() {
        let (mut flow, endpoint, mut pre) = setup(10);
        let events = std::cell::RefCell::new(Vec::new());
        let mut emit = |ev: StreamerEvent| events.borrow_mut().push(ev);

        flow.load("G1X10Y1\nG1X20\nG1X30", &mut pre, &mut emit).unwrap();
        flow.start(&mut emit);
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();
        assert_eq!(endpoint.lines().len(), 1);

        flow.halt(&mut emit);
        assert_eq!(flow.state(), FlowState::Halted);

        // the in-flight line drains, no completion is announced
        flow.ack(false, &mut emit);
        assert!(!events
            .borrow()
            .iter()
            .any(|e| matches!(e, StreamerEvent::JobCompleted)));

        assert!(flow.unstash(&mut emit));
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();
        assert_eq!(endpoint.lines()[1], "G1X20\n");
    }

    #[test]
    fn halt_on_idle_is_a_no_op() {
        let (mut flow, _endpoint, _pre) = setup(128);
        let mut events = Vec::new();
        let mut emit = |ev: StreamerEvent| events.push(ev);

        flow.halt(&mut emit);
        assert_eq!(flow.state(), FlowState::Idle);
        assert!(!flow.unstash(&mut emit));
        assert_eq!(flow.state(), FlowState::Idle);
        assert!(events.is_empty());
    }

    #[test]
    fn settings_write_is_stripped_in_character_counting() {
        let (mut flow, endpoint, mut pre) = setup(128);
        let mut events = Vec::new();
        let mut emit = |ev: StreamerEvent| events.push(ev);

        flow.load("$130=200\nG0X1", &mut pre, &mut emit).unwrap();
        flow.start(&mut emit);
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();

        assert_eq!(endpoint.lines()[0], "; setting stripped\n");
        assert_eq!(endpoint.lines()[1], "G0X1\n");
    }

    #[test]
    fn undefined_variable_halts_the_job() {
        let (mut flow, endpoint, mut pre) = setup(128);
        let mut events = Vec::new();
        let mut emit = |ev: StreamerEvent| events.push(ev);

        flow.load("G0X#1\nG0X2", &mut pre, &mut emit).unwrap();
        flow.start(&mut emit);
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();

        assert!(endpoint.lines().is_empty());
        assert_eq!(flow.state(), FlowState::Halted);

        // define the variable, resume from the stash
        pre.set_var("1", "42");
        assert!(flow.unstash(&mut emit));
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();
        assert_eq!(endpoint.lines()[0], "G0X42\n");
    }

    #[test]
    fn long_lines_are_rejected_up_front() {
        let (mut flow, _endpoint, mut pre) = setup(16);
        let mut emit = |_ev: StreamerEvent| {};
        let err = flow
            .load("G1X123456789012345678", &mut pre, &mut emit)
            .unwrap_err();
        assert!(matches!(
            err,
            grblkit_core::Error::Stream(StreamError::LineTooLong { .. })
        ));
    }

    #[test]
    fn progress_is_monotone_and_complete() {
        let (mut flow, endpoint, mut pre) = setup(128);
        let mut events = Vec::new();
        let mut emit = |ev: StreamerEvent| events.push(ev);

        flow.load("G0X1\nG0X2\nG0X3\nG0X4", &mut pre, &mut emit).unwrap();
        flow.start(&mut emit);
        flow.pump(&endpoint, &mut pre, &mut emit).unwrap();
        for _ in 0..4 {
            flow.ack(false, &mut emit);
        }

        let progress: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                StreamerEvent::ProgressPercent(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*progress.last().unwrap(), 100);
    }
}
