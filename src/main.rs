mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands, Target};
use hidkit::poll::{PollLoop, PollOutcome};
use hidkit::{Config, HidDevice, Manager, ReadOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(kind) = cli.backend {
        config.backend.kind = Some(kind);
    }
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    hidkit::logger::init(&level)?;
    debug!(?config, "configuration loaded");

    let manager = Manager::with_config(&config).context("cannot start device manager")?;
    let report_len = config.read.default_report_len;

    match cli.command.unwrap_or(Commands::List {
        vid: 0,
        pid: 0,
        json: false,
    }) {
        Commands::List { vid, pid, json } => list(&manager, vid, pid, json),
        Commands::Info { target } => info(&manager, &target),
        Commands::Read {
            target,
            len,
            timeout_ms,
            count,
            nonblocking,
        } => read(
            &manager,
            &target,
            len.unwrap_or(report_len),
            timeout_ms.map(Duration::from_millis),
            count,
            nonblocking,
        ),
        Commands::Poll {
            target,
            report,
            attempts,
            interval_ms,
            len,
        } => poll(
            &manager,
            &target,
            &report.0,
            attempts,
            Duration::from_millis(interval_ms),
            len.unwrap_or(report_len),
        ),
    }
}

fn list(manager: &Manager, vid: u16, pid: u16, json: bool) -> Result<()> {
    let devices = manager
        .enumerate(vid, pid)
        .context("device enumeration failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        print!("{}", devices.render_text());
    }
    Ok(())
}

fn open(manager: &Manager, target: &Target) -> Result<HidDevice> {
    let dev = match (&target.path, target.vid, target.pid) {
        (Some(path), _, _) => manager.open_path(path),
        (None, Some(vid), Some(pid)) => manager.open(vid, pid, target.serial.as_deref()),
        _ => bail!("specify a device with --path or --vid/--pid"),
    };
    dev.context("cannot open device")
}

fn info(manager: &Manager, target: &Target) -> Result<()> {
    let dev = open(manager, target)?;
    let show = |v: Option<String>| v.unwrap_or_else(|| "-".into());
    println!("path         : {}", dev.path());
    println!("manufacturer : {}", show(dev.manufacturer_string()?));
    println!("product      : {}", show(dev.product_string()?));
    println!("serial       : {}", show(dev.serial_number_string()?));
    dev.close()?;
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Close `dev` unless the Ctrl-C handler already did.
fn finish(dev: &HidDevice, stop: &AtomicBool) -> Result<()> {
    match dev.close() {
        Err(hidkit::HidError::HandleClosed) if stop.load(Ordering::SeqCst) => Ok(()),
        other => Ok(other?),
    }
}

/// Close `dev` on Ctrl-C so a blocked read returns.
fn close_on_interrupt(dev: &Arc<HidDevice>) -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    let handler_dev = dev.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
        let _ = handler_dev.close();
    })
    .context("cannot install Ctrl-C handler")?;
    Ok(stop)
}

fn read(
    manager: &Manager,
    target: &Target,
    len: usize,
    timeout: Option<Duration>,
    count: usize,
    nonblocking: bool,
) -> Result<()> {
    let dev = Arc::new(open(manager, target)?);
    dev.set_blocking(!nonblocking)?;
    let stop = close_on_interrupt(&dev)?;

    let mut received = 0usize;
    while count == 0 || received < count {
        let outcome = match dev.read_timeout(len, timeout) {
            Err(hidkit::HidError::HandleClosed) if stop.load(Ordering::SeqCst) => break,
            other => other?,
        };
        match outcome {
            ReadOutcome::Data(report) => {
                println!("{}", hex(&report));
                received += 1;
            }
            ReadOutcome::WouldBlock => {
                println!("(no report pending)");
                break;
            }
            ReadOutcome::TimedOut => {
                println!("(timed out)");
                break;
            }
        }
    }

    finish(&dev, &stop)
}

fn poll(
    manager: &Manager,
    target: &Target,
    report: &[u8],
    attempts: usize,
    interval: Duration,
    len: usize,
) -> Result<()> {
    let dev = Arc::new(open(manager, target)?);
    dev.set_blocking(false)?;
    let stop = close_on_interrupt(&dev)?;

    let mut poller = PollLoop::new(interval);
    if attempts > 0 {
        poller = poller.max_attempts(attempts);
    }

    let outcome = poller.run(&stop, |n| {
        debug!(attempt = n, "sending report");
        dev.write(report)?;
        Ok(dev.read(len)?.into_data())
    });

    let outcome = match outcome {
        Err(hidkit::HidError::HandleClosed) if stop.load(Ordering::SeqCst) => {
            PollOutcome::Stopped { attempts: 0 }
        }
        other => other?,
    };

    match outcome {
        PollOutcome::Completed { value, attempts } => {
            println!("{}", hex(&value));
            debug!(attempts, "response received");
        }
        PollOutcome::Exhausted { attempts } => println!("(no response after {attempts} attempts)"),
        PollOutcome::Stopped { .. } => println!("(interrupted)"),
    }

    finish(&dev, &stop)
}
