use super::{Host, HostPaths};
use anyhow::{Context, Result};
use futures::StreamExt;
use service_host::{CommandReport, HostSignal, RequestOutcome, StopAllReport};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io::{self, Write};
use tracing::{info, warn};

enum Event {
    Log,
    Os(i32),
    Host(HostSignal),
}

/// Run the host until a signal arrives or the last process stops
///
/// With `boot`, the client is resumed only if auto-start is enabled.
pub async fn run(paths: &HostPaths, boot: bool) -> Result<()> {
    let host = Host::open(paths).await?;

    let report = if boot {
        host.controller.on_boot().await?
    } else {
        host.controller.on_host_start().await?
    };

    let Some(report) = report else {
        println!("Nothing to run: the client is not marked running or no command is set");
        return Ok(());
    };
    print_report(&report);

    if host.orchestrator.registry().is_empty() {
        println!("No process is running");
        return Ok(());
    }

    let signals = Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handler")?;
    let signals_handle = signals.handle();
    let (os_tx, os_rx) = async_channel::bounded(1);
    let forwarder = std::thread::spawn(move || {
        let mut signals = signals;
        for signal in signals.forever() {
            if os_tx.send_blocking(signal).is_err() {
                break;
            }
        }
    });

    let mut events = Box::pin(futures::stream::select(
        host.log.watch().map(|_| Event::Log),
        futures::stream::select(os_rx.map(Event::Os), host.signals.clone().map(Event::Host)),
    ));

    let mut cursor = 0;
    let mut stdout = io::stdout();
    while let Some(event) = events.next().await {
        match event {
            Event::Log => {
                let (lines, next) = host.log.lines_since(cursor);
                cursor = next;
                for line in lines {
                    writeln!(stdout, "{line}")?;
                }
                stdout.flush()?;
            }
            Event::Os(signal) => {
                info!(signal, "Received termination signal");
                break;
            }
            Event::Host(HostSignal::TeardownRequested) => {
                info!("No process left running");
                break;
            }
            Event::Host(_) => {}
        }
    }

    drop(events);

    let (lines, _) = host.log.lines_since(cursor);
    for line in lines {
        writeln!(stdout, "{line}")?;
    }

    let stopped = host.orchestrator.shutdown().await;
    print_stop_all(&stopped);

    signals_handle.close();
    if forwarder.join().is_err() {
        warn!("Signal forwarding thread panicked");
    }
    Ok(())
}

fn print_report(report: &CommandReport) {
    for (identity, outcome) in &report.outcomes {
        match outcome {
            RequestOutcome::Started { pid } => println!("Started {identity} (pid {pid})"),
            RequestOutcome::Stopped => println!("Stopped {identity}"),
            RequestOutcome::NotRunning => println!("{identity} was not running"),
            RequestOutcome::Failed(reason) => eprintln!("Failed {identity}: {reason}"),
        }
    }
}

fn print_stop_all(report: &StopAllReport) {
    println!("Stopped {} process(es)", report.stopped.len());
    for (identity, reason) in &report.failed {
        eprintln!("Could not stop {identity}: {reason}");
    }
}
