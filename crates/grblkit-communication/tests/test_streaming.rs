//! End-to-end streaming behavior against a scripted mock endpoint.

mod common;

use common::{wait_for, EventLog, MockEndpoint};
use grblkit_communication::{FlowState, GrblStreamer, StreamerConfig, StreamingMode};
use grblkit_core::StreamerEvent;

fn small_buffer_config(rx_buffer_size: usize) -> StreamerConfig {
    StreamerConfig {
        rx_buffer_size,
        ..Default::default()
    }
}

#[test]
fn two_line_stream_completes_in_order() {
    let mock = MockEndpoint::new();
    let (log, callback) = EventLog::new();
    let mut grbl = GrblStreamer::new(callback);
    grbl.connect_endpoint(mock.clone()).unwrap();

    grbl.stream("G00Y3\n\n").unwrap();
    assert_eq!(mock.data_writes(), vec!["G00Y3\n", "\n"]);

    mock.feed("ok");
    mock.feed("ok");
    assert!(log.wait_for_event("on_job_completed"));

    let sent: Vec<(usize, String)> = log
        .snapshot()
        .iter()
        .filter_map(|e| match e {
            StreamerEvent::LineSent { index, line } => Some((*index, line.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(sent, vec![(1, "G00Y3".to_string()), (2, "".to_string())]);

    let processed: Vec<(usize, String)> = log
        .snapshot()
        .iter()
        .filter_map(|e| match e {
            StreamerEvent::ProcessedCommand { index, line } => Some((*index, line.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        processed,
        vec![(1, "G00Y3".to_string()), (2, "".to_string())]
    );

    // the final acknowledgement precedes job completion
    let names = log.names();
    let last_processed = names
        .iter()
        .rposition(|n| *n == "on_processed_command")
        .unwrap();
    let completed = names.iter().position(|n| *n == "on_job_completed").unwrap();
    assert!(last_processed < completed);

    grbl.disconnect().unwrap();
}

#[test]
fn immediate_line_jumps_the_queue() {
    let mock = MockEndpoint::new();
    let (_log, callback) = EventLog::new();
    let mut grbl = GrblStreamer::with_config(small_buffer_config(20), callback);
    grbl.connect_endpoint(mock.clone()).unwrap();

    // 9 bytes each: two fit, the rest queue up
    let job = (0..10)
        .map(|i| format!("G1X{}0Y10", i))
        .collect::<Vec<_>>()
        .join("\n");
    grbl.stream(&job).unwrap();
    assert_eq!(mock.data_writes().len(), 2);
    assert!(grbl.queued_count() >= 7);

    grbl.send_immediately("G0 X200").unwrap();
    // no room yet; the priority line waits for an acknowledgement
    assert_eq!(mock.data_writes().len(), 2);

    mock.feed("ok");
    assert!(wait_for(|| mock.data_writes().len() >= 3));
    // the priority line went out before queued line 3
    assert_eq!(mock.data_writes()[2], "G0X200\n");
    assert!(grbl.buffer_fill() <= 20);

    grbl.disconnect().unwrap();
}

#[test]
fn incremental_mode_waits_for_each_ack() {
    let mock = MockEndpoint::new();
    let (_log, callback) = EventLog::new();
    let mut grbl = GrblStreamer::new(callback);
    grbl.connect_endpoint(mock.clone()).unwrap();

    grbl.set_streaming_mode(StreamingMode::Incremental);
    grbl.stream("G0X1\nG0X2\nG0X3").unwrap();
    assert_eq!(mock.data_writes(), vec!["G0X1\n"]);

    mock.feed("ok");
    assert!(wait_for(|| mock.data_writes().len() == 2));
    assert_eq!(mock.data_writes()[1], "G0X2\n");
    assert_eq!(grbl.inflight_count(), 1);

    grbl.disconnect().unwrap();
}

#[test]
fn pause_holds_dispatch_and_resume_continues() {
    let mock = MockEndpoint::new();
    let (_log, callback) = EventLog::new();
    let mut grbl = GrblStreamer::with_config(small_buffer_config(20), callback);
    grbl.connect_endpoint(mock.clone()).unwrap();

    grbl.stream("G1X10Y10\nG1X20Y20\nG1X30Y30\nG1X40Y40").unwrap();
    assert_eq!(mock.data_writes().len(), 2);

    grbl.pause().unwrap();
    assert!(mock.writes().contains(&"!".to_string()));
    assert_eq!(grbl.flow_state(), FlowState::Paused);

    // acknowledgements keep draining, but nothing new is dispatched
    mock.feed("ok");
    assert!(wait_for(|| grbl.inflight_count() == 1));
    assert_eq!(mock.data_writes().len(), 2);

    grbl.resume().unwrap();
    assert!(mock.writes().contains(&"~".to_string()));
    assert!(wait_for(|| mock.data_writes().len() == 3));
    assert_eq!(mock.data_writes()[2], "G1X30Y30\n");

    grbl.disconnect().unwrap();
}

#[test]
fn buffer_fill_never_exceeds_capacity() {
    let mock = MockEndpoint::new();
    let (_log, callback) = EventLog::new();
    let mut grbl = GrblStreamer::with_config(small_buffer_config(24), callback);
    grbl.connect_endpoint(mock.clone()).unwrap();

    let job = (0..20)
        .map(|i| format!("G1X{:02}Y3", i))
        .collect::<Vec<_>>()
        .join("\n");
    grbl.stream(&job).unwrap();
    assert!(grbl.buffer_fill() <= 24);

    for _ in 0..20 {
        mock.feed("ok");
        assert!(grbl.buffer_fill() <= 24);
    }
    assert!(wait_for(|| grbl.inflight_count() == 0));
    assert!(grbl.buffer_fill() <= 24);

    grbl.disconnect().unwrap();
}

#[test]
fn halt_then_unstash_on_idle_is_a_no_op() {
    let mock = MockEndpoint::new();
    let (_log, callback) = EventLog::new();
    let mut grbl = GrblStreamer::new(callback);
    grbl.connect_endpoint(mock.clone()).unwrap();

    grbl.halt().unwrap();
    grbl.unstash().unwrap();
    assert_eq!(grbl.flow_state(), FlowState::Idle);
    assert!(mock.data_writes().is_empty());

    grbl.disconnect().unwrap();
}

#[test]
fn halt_stashes_and_unstash_continues_at_the_next_line() {
    let mock = MockEndpoint::new();
    let (log, callback) = EventLog::new();
    let mut grbl = GrblStreamer::with_config(small_buffer_config(12), callback);
    grbl.connect_endpoint(mock.clone()).unwrap();

    grbl.stream("G1X10Y10F5\nG1X20Y20\nG1X30Y30").unwrap();
    assert_eq!(mock.data_writes().len(), 1);

    grbl.halt().unwrap();
    assert_eq!(grbl.flow_state(), FlowState::Halted);

    // the in-flight line drains without announcing completion
    mock.feed("ok");
    assert!(wait_for(|| grbl.inflight_count() == 0));
    assert_eq!(log.count("on_job_completed"), 0);

    grbl.unstash().unwrap();
    assert!(wait_for(|| mock.data_writes().len() == 2));
    assert_eq!(mock.data_writes()[1], "G1X20Y20\n");

    grbl.disconnect().unwrap();
}

#[test]
fn soft_reset_flushes_everything_and_boot_follows() {
    let mock = MockEndpoint::new();
    let (log, callback) = EventLog::new();
    let mut grbl = GrblStreamer::with_config(small_buffer_config(20), callback);
    grbl.connect_endpoint(mock.clone()).unwrap();

    grbl.stream("G1X10Y10\nG1X20Y20\nG1X30Y30\nG1X40Y40").unwrap();
    assert!(grbl.buffer_fill() > 0);
    assert!(grbl.queued_count() > 0);

    grbl.soft_reset().unwrap();
    assert_eq!(grbl.buffer_fill(), 0);
    assert_eq!(grbl.queued_count(), 0);
    assert_eq!(grbl.inflight_count(), 0);
    assert_eq!(*mock.writes().last().unwrap(), "\u{18}".to_string());

    mock.feed("Grbl 0.9j ['$' for help]");
    assert!(log.wait_for_event("on_boot"));
    assert!(grbl.is_connected());

    // boot triggers the implicit downloads
    assert!(wait_for(|| {
        let writes = mock.writes();
        writes.contains(&"$$\n".to_string())
            && writes.contains(&"$#\n".to_string())
            && writes.contains(&"$G\n".to_string())
    }));

    grbl.disconnect().unwrap();
}

#[test]
fn progress_is_monotone_and_resets_per_job() {
    let mock = MockEndpoint::new();
    let (log, callback) = EventLog::new();
    let mut grbl = GrblStreamer::new(callback);
    grbl.connect_endpoint(mock.clone()).unwrap();

    grbl.stream("G0X1\nG0X2").unwrap();
    mock.feed("ok");
    mock.feed("ok");
    assert!(log.wait_for_event("on_job_completed"));

    grbl.stream("G0X3\nG0X4").unwrap();
    mock.feed("ok");
    mock.feed("ok");
    assert!(log.wait_until(|events| {
        events
            .iter()
            .filter(|e| e.name() == "on_job_completed")
            .count()
            == 2
    }));

    let progress: Vec<u8> = log
        .snapshot()
        .iter()
        .filter_map(|e| match e {
            StreamerEvent::ProgressPercent(p) => Some(*p),
            _ => None,
        })
        .collect();

    // 0 .. 100 for the first job, then again for the second
    let reset = progress.iter().rposition(|p| *p == 0).unwrap();
    assert!(progress[..reset].contains(&100));
    assert_eq!(*progress.last().unwrap(), 100);

    grbl.disconnect().unwrap();
}
