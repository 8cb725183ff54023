//! Console demo for the grblkit driver.
//!
//! ```text
//! grblkit ports
//! grblkit stream <file> [device] [baud]
//! grblkit stream <file> --dry-run
//! ```

use grblkit::{init_logging, GrblStreamer, StreamerEvent};
use std::sync::mpsc;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    init_logging()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("ports") => ports(),
        Some("stream") => stream(&args[1..]),
        _ => {
            eprintln!("usage: grblkit ports");
            eprintln!("       grblkit stream <file> [device] [baud]");
            eprintln!("       grblkit stream <file> --dry-run");
            Ok(())
        }
    }
}

fn ports() -> anyhow::Result<()> {
    let ports = grblkit::list_ports()?;
    if ports.is_empty() {
        println!("No CNC-looking serial ports found");
        return Ok(());
    }
    for port in ports {
        println!("{}  {}", port.port_name, port.description);
    }
    Ok(())
}

fn stream(args: &[String]) -> anyhow::Result<()> {
    let file = args
        .first()
        .ok_or_else(|| anyhow::anyhow!("missing G-Code file argument"))?;
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let device = args
        .get(1)
        .filter(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "/dev/ttyACM0".to_string());
    let baud: u32 = match args.get(2) {
        Some(a) => a.parse()?,
        None => 115200,
    };

    let (done_tx, done_rx) = mpsc::channel();
    let mut grbl = GrblStreamer::new(move |event: StreamerEvent| {
        match &event {
            StreamerEvent::Log(text) => println!("  log: {}", text),
            StreamerEvent::ProgressPercent(p) => println!("  progress: {}%", p),
            StreamerEvent::Error {
                index,
                line,
                code,
                message,
            } => println!("  error {} on line {:?} '{}': {}", code, index, line, message),
            StreamerEvent::Alarm { code, message } => {
                println!("  ALARM {}: {}", code, message)
            }
            StreamerEvent::StateUpdate {
                mode,
                machine_pos,
                work_pos,
            } => println!("  {} M:{} W:{}", mode, machine_pos, work_pos),
            other => println!("  {}", other.name()),
        }
        if matches!(event, StreamerEvent::JobCompleted) {
            let _ = done_tx.send(());
        }
    });

    if dry_run {
        println!("Dry run of {}", file);
        grbl.connect_simulated()?;
    } else {
        println!("Streaming {} to {} at {} baud", file, device, baud);
        grbl.connect(&device, baud)?;
    }
    grbl.poll_start()?;

    // give the firmware a moment to boot and download its state
    std::thread::sleep(Duration::from_millis(1500));

    grbl.load_file(file)?;
    grbl.job_run()?;

    done_rx
        .recv_timeout(Duration::from_secs(3600))
        .map_err(|_| anyhow::anyhow!("timed out waiting for job completion"))?;

    grbl.disconnect()?;
    Ok(())
}
