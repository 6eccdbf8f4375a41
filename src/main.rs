use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use humantime::parse_duration;
use slog::{info, o, Drain, Logger};

use rancher_prom_sd::config_writer::ConfigWriter;
use rancher_prom_sd::discovery_loop::run_discovery_loop;
use rancher_prom_sd::rancher::{self, RancherCredentials};

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();
    let log = make_logger();

    // Configuration problems are reported before any network call.
    let credentials = RancherCredentials::from_env()?;

    let rt = tokio::runtime::Runtime::new()?;

    info!(
        log,
        "Starting rancher-prom-sd";
        "api" => %credentials.base_url,
        "output_file" => %cli_args.output_file.display(),
        "poll_interval" => ?cli_args.poll_interval
    );

    let ctx = rt
        .block_on(rancher::authenticate(
            log.clone(),
            credentials,
            cli_args.request_timeout,
        ))
        .context("authentication failed; check your RANCHER_ACCESS_KEY and RANCHER_SECRET_KEY")?;

    let writer = ConfigWriter::new(cli_args.output_file, log.clone());
    writer
        .remove_orphaned_tmp_file()
        .context("cleaning up temporary file from a previous run")?;

    let (stop_signal_sender, stop_signal_rcv) = crossbeam_channel::bounded::<()>(1);
    {
        let log = log.clone();
        rt.spawn(async move {
            shutdown_signal(log).await;
            let _ = stop_signal_sender.send(());
        });
    }

    rt.block_on(run_discovery_loop(
        log,
        ctx,
        writer,
        cli_args.poll_interval,
        cli_args.max_retry,
        stop_signal_rcv,
    ))?;

    Ok(())
}

/// Resolves once SIGINT or SIGTERM is delivered.
async fn shutdown_signal(log: Logger) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sig_int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sig_term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sig_int.recv() => {
            info!(log, "Caught SIGINT");
        }
        _ = sig_term.recv() => {
            info!(log, "Caught SIGTERM");
        }
    }
}

fn make_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).chan_size(8192).build();
    Logger::root(drain.fuse(), o!())
}

#[derive(Parser, Debug)]
#[clap(about, version)]
pub struct CliArgs {
    #[clap(
        long = "output-file",
        default_value = "prometheus-federation.json",
        help = r#"
Path of the published discovery file. The temporary file used for atomic
replacement is created next to it, so the containing directory must be
writeable.

"#
    )]
    output_file: PathBuf,

    #[clap(
        long = "poll-interval",
        default_value = "5s",
        value_parser = parse_duration,
        help = r#"
The interval at which the Rancher API is polled for targets. Also the
interval between retries after a transient failure.

"#
    )]
    poll_interval: Duration,

    #[clap(
        long = "request-timeout",
        default_value = "30s",
        value_parser = parse_duration,
        help = r#"
Deadline applied to every individual API request.

"#
    )]
    request_timeout: Duration,

    #[clap(
        long = "max-retry",
        default_value = "5",
        help = r#"
Number of consecutive failed discovery cycles after which the agent gives up
and exits non-zero.

"#
    )]
    max_retry: u32,
}
