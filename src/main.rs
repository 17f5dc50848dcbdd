use std::env::args;
use std::str::FromStr;
use std::string::ToString;

use futex_locks::harness::{LockKind, Workload};
use strum::IntoEnumIterator;

/// futex-locks <lock_kind> [threads] [iterations]
///
/// Runs the verification workload against the chosen lock. `RUST_LOG=trace` prints every
/// critical section, `debug` every thread's start and finish.
fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = args().skip(1);
    let kind = args
        .next()
        .ok_or(format!(
            "no lock supplied, use one of {}",
            LockKind::iter()
                .map(|k| k.to_string())
                .collect::<Vec<String>>()
                .join(",")
        ))
        .and_then(|selector| LockKind::from_str(&selector).map_err(|e| format!("{selector}: {e}")))?;

    let defaults = Workload::default();
    let workload = Workload {
        threads: parse_or(args.next(), "threads", defaults.threads)?,
        iterations: parse_or(args.next(), "iterations", defaults.iterations)?,
        ..defaults
    };
    if workload.acquisitions().is_none() {
        return Err(format!(
            "{} threads x {} iterations is too many acquisitions to count",
            workload.threads, workload.iterations
        ));
    }

    log::info!(
        "running {kind} with {} threads x {} iterations",
        workload.threads,
        workload.iterations
    );
    kind.run(&workload)
        .map(|report| {
            println!(
                "{kind}: {} acquisitions over {} threads in {:?}, mutual exclusion held",
                report.acquisitions, report.threads, report.elapsed
            )
        })
        .map_err(|e| e.to_string())
}

/// a missing positional argument falls back to the default, a malformed one is an error
fn parse_or<T: FromStr>(arg: Option<String>, name: &str, default: T) -> Result<T, String>
where
    T::Err: ToString,
{
    arg.map_or(Ok(default), |a| {
        a.parse()
            .map_err(|e: T::Err| format!("bad {name} '{a}': {}", e.to_string()))
    })
}
