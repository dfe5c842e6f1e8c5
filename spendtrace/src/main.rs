use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use spendtrace::handlers::{
    build_trace_options, build_tracer, execute_trace, log_level, parse_report_format,
    render_report, resolve_output_path, write_report,
};
use spendtrace::{TraceOptions, TraceOutcome};
use spendtrace_core::print_banner;
use spendtrace_scanner::{TraceSummary, UtxoRef};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    match chosen_command.subcommand() {
        Some(("trace", primary_command)) => handle_trace(primary_command, quiet).await,
        // No subcommand provided, just show the banner
        None => {}
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

// Handler functions

async fn handle_trace(sub_matches: &ArgMatches, quiet: bool) {
    let ui = sub_matches.get_flag("ui");
    let verbose = sub_matches.get_count("verbose");

    // The monitor owns the terminal, so no log output while it runs
    if !ui {
        tracing_subscriber::fmt()
            .with_max_level(log_level(verbose))
            .with_writer(std::io::stderr)
            .init();
    }

    let options = match parse_trace_args(sub_matches) {
        Ok(options) => options,
        Err(e) => fail(&e),
    };
    let format = sub_matches
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");
    let format = parse_report_format(format).unwrap_or_else(|e| fail(&e));
    let output = sub_matches
        .get_one::<String>("output")
        .map(|raw| resolve_output_path(raw))
        .transpose()
        .unwrap_or_else(|e| fail(&e));

    if !quiet {
        println!(
            "\n{} {}:{}",
            "Tracing".bright_cyan().bold(),
            options.txid,
            options.vout
        );
        println!("Workers:   {}", options.workers);
        println!("Max depth: {}", options.max_depth);
        println!("Ledger:    {}\n", options.base_url);
    }

    let outcome = if ui {
        run_with_monitor(options).await
    } else {
        let mut options = options;
        // Spinner only when nothing else is writing to the terminal
        options.show_progress = !quiet && verbose == 0;
        execute_trace(options, None).await
    };

    let outcome = outcome.unwrap_or_else(|e| fail(&e));
    print_summary(&outcome.summary, quiet);

    let report = render_report(&outcome, format).unwrap_or_else(|e| fail(&e));
    if let Err(e) = write_report(&report, output.as_deref()) {
        fail(&e);
    }
    if let Some(path) = output
        && !quiet
    {
        println!("{} {}", "✓ Report saved to".green(), path.display());
    }
}

fn parse_trace_args(sub_matches: &ArgMatches) -> Result<TraceOptions, String> {
    let outpoint = sub_matches
        .get_one::<String>("OUTPOINT")
        .ok_or("An outpoint (TXID:VOUT) is required")?;
    let max_depth = *sub_matches.get_one::<usize>("max-depth").unwrap_or(&10);
    let workers = *sub_matches.get_one::<usize>("workers").unwrap_or(&5);
    let delay = *sub_matches.get_one::<f64>("delay").unwrap_or(&0.2);
    let base_url = sub_matches
        .get_one::<Url>("base-url")
        .map(Url::as_str)
        .unwrap_or(spendtrace_scanner::ledger::DEFAULT_BASE_URL);

    build_trace_options(outpoint, max_depth, workers, delay, base_url)
}

/// Crawl in the background while the monitor runs in the foreground.
/// Leaving the monitor stops the crawl; in-flight lookups still finish.
async fn run_with_monitor(options: TraceOptions) -> Result<TraceOutcome, String> {
    let tracer = build_tracer(&options)?;
    let handle = tracer.handle();
    tracer.start(&options.txid, options.vout);

    let should_exit = Arc::new(AtomicBool::new(false));
    let signal_flag = Arc::clone(&should_exit);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_flag.store(true, Ordering::Relaxed);
        }
    });

    let monitor = tokio::task::spawn_blocking(move || {
        spendtrace_tui::run_monitor(handle, should_exit)
    })
    .await;

    match monitor {
        Ok(Ok(())) => {}
        Ok(Err(e)) => eprintln!("{} {}", "Error running monitor:".red(), e),
        Err(e) => eprintln!("{} {}", "Monitor task failed:".red(), e),
    }

    if !tracer.is_complete() {
        tracer.stop();
        println!("{}", "Stopping trace, waiting for in-flight lookups...".yellow());
    }
    tracer.wait().await;

    let summary = tracer.summary().unwrap_or_else(|| {
        TraceSummary::new(
            UtxoRef::new(options.txid.as_str(), options.vout),
            options.max_depth,
        )
    });
    Ok(TraceOutcome {
        summary,
        snapshot: tracer.snapshot(),
    })
}

fn print_summary(summary: &TraceSummary, quiet: bool) {
    if quiet {
        return;
    }
    let status = if summary.stopped {
        "✓ Trace stopped".yellow()
    } else {
        "✓ Trace complete!".green()
    };
    println!("\n{}", status);
    println!(
        "  {} outputs, {} spends, {} unspent in {:.2}s",
        summary.vertices,
        summary.edges,
        summary.findings.len(),
        summary.elapsed.as_secs_f64()
    );
    if summary.failed_units > 0 {
        println!(
            "  {}",
            format!("{} lookups failed, see -v output", summary.failed_units).red()
        );
    }
    if summary.depth_cutoffs > 0 {
        println!(
            "  {} branches continue past depth {}",
            summary.depth_cutoffs, summary.max_depth
        );
    }
    println!();
}

fn fail(message: &str) -> ! {
    eprintln!("{} {}", "✗".red(), message);
    std::process::exit(1);
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
