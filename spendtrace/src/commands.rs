use crate::CLAP_STYLING;
use clap::{arg, command};
use spendtrace_scanner::ledger::DEFAULT_BASE_URL;
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("spendtrace")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("spendtrace")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("trace")
                .about(
                    "Follow an output forward through the transactions that spend it, down to \
                unspent outputs or the depth limit.",
                )
                .arg(
                    arg!(<OUTPOINT>)
                        .required(true)
                        .help("The output to start from, as TXID:VOUT"),
                )
                .arg(
                    arg!(-m --"max-depth" <DEPTH>)
                        .required(false)
                        .help("How many spends to follow away from the starting output")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("10"),
                )
                .arg(
                    arg!(-w --"workers" <NUM_WORKERS>)
                        .required(false)
                        .help("The number of concurrent lookups in the worker pool.")
                        .value_parser(clap::builder::RangedU64ValueParser::<usize>::new().range(1..))
                        .default_value("5"),
                )
                .arg(
                    arg!(-d --"delay" <SECS>)
                        .required(false)
                        .help("Pause after every ledger API call, in seconds")
                        .value_parser(clap::value_parser!(f64))
                        .default_value("0.2"),
                )
                .arg(
                    arg!(--"base-url" <URL>)
                        .required(false)
                        .help("Esplora-compatible API to query")
                        .value_parser(clap::value_parser!(Url))
                        .default_value(DEFAULT_BASE_URL),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)"),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, dot")
                        .value_parser(["text", "json", "dot"])
                        .default_value("text"),
                )
                .arg(
                    arg!(--"ui")
                        .required(false)
                        .help("Watch the trace live in a terminal monitor")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-v --"verbose")
                        .required(false)
                        .help("Log crawl activity to stderr (repeat for more detail)")
                        .action(clap::ArgAction::Count),
                ),
        )
}
