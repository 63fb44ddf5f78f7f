mod aggregate;
mod chart;
mod cli;
mod error;
mod netlink;
mod privilege;
mod proc;
mod report;
mod sampler;
mod scheduler;
mod session;
mod telemetry;
mod tracker;

use std::io::{self, Write};
use std::process;

use anyhow::{bail, Context, Result};
use nix::unistd::geteuid;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use cli::Args;
use netlink::ProcConnector;
use proc::{Cmdlines, PROC_ROOT};
use report::Report;
use sampler::PssSampler;
use scheduler::{Clock, MonotonicClock, NetlinkSource, Scheduler};
use session::{Session, Until};

fn init_logging() {
    let filter = EnvFilter::try_from_env("TREETIME_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse()?;
    init_logging();

    if !geteuid().is_root() {
        bail!("Needs root permission (effective uid is {}).", geteuid());
    }

    // subscribe first: everything the command does from here on is seen
    let connector = ProcConnector::subscribe().context("Cannot observe process events")?;
    let source = NetlinkSource::new(connector, !args.quiet)?;

    let clock = MonotonicClock::start();
    let command = proc::join_command(&args.command);
    let root = proc::launch(&args.command)?;
    info!(%root, %command, "observing");

    let until = if args.wait_all {
        Until::AllExit
    } else {
        Until::RootExits
    };
    let mut session = Session::new(root, command.clone(), Cmdlines::new(PROC_ROOT), until);
    let sampler = PssSampler::new(PROC_ROOT);

    // the socket is closed when the scheduler goes out of scope
    Scheduler::new(source, &sampler, clock, args.period_ms).run(&mut session)?;

    privilege::drop_root()?;

    let reaped = proc::reap(root)?;
    let wall_ms = clock.now_ms();

    let report = Report::new(
        command,
        session.tracker.counters(),
        &session.store,
        wall_ms,
        reaped,
    );

    let mut stdout = io::stdout().lock();
    report.write_text(&mut stdout, &session.store, args.columns, args.rows)?;
    stdout.flush()?;

    if let Some(path) = &args.output {
        report.write_json(path)?;
    }

    if args.return_result {
        let code = report.exit_code();
        if code != 0 {
            eprintln!("Error: command exited with code {}", code);
            process::exit(code);
        }
    }

    Ok(())
}
