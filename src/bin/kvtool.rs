// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! `kvtool <replica_file> <key> [<version> [<value>]]`
//!
//! Reference CLI surface for the library; not part of the safety-critical
//! core, so argument handling here is intentionally hand-rolled rather
//! than built on a declarative arg parser.
//!
//! With three args, performs a `get` and writes the raw value to stdout.
//! With four args, performs a `put` of the literal fourth argument. With
//! three args plus a version and no value argument, performs a `put` of
//! the bytes read from stdin. Exit code 0 on `Ok`/`AlreadyLearned`
//! outcomes, non-zero otherwise.

use std::io::{self, Read, Write};
use std::process::ExitCode;

use kvpaxos::{Handle, Outcome, ReadOutcome};

fn read_endpoints(path: &str) -> io::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 || args.len() > 5 {
        eprintln!("usage: kvtool <replica_file> <key> [<version> [<value>]]");
        return ExitCode::FAILURE;
    }

    let endpoints = match read_endpoints(&args[1]) {
        Ok(endpoints) => endpoints,
        Err(e) => {
            eprintln!("failed to read replica file {}: {}", args[1], e);
            return ExitCode::FAILURE;
        }
    };

    let handle = match Handle::construct(&endpoints) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("failed to construct handle: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let key = args[2].as_bytes();

    if args.len() == 5 {
        let version: u64 = match args[3].parse() {
            Ok(v) => v,
            Err(_) => {
                eprintln!("version must be a positive integer, got {:?}", args[3]);
                return ExitCode::FAILURE;
            }
        };
        let value = args[4].as_bytes();
        return report_put(handle.put(key, version, value));
    }

    if args.len() == 4 {
        let version: u64 = match args[3].parse() {
            Ok(v) => v,
            Err(_) => {
                eprintln!("version must be a positive integer, got {:?}", args[3]);
                return ExitCode::FAILURE;
            }
        };
        let mut value = Vec::new();
        if let Err(e) = io::stdin().read_to_end(&mut value) {
            eprintln!("failed to read stdin: {}", e);
            return ExitCode::FAILURE;
        }
        return report_put(handle.put(key, version, &value));
    }

    report_get(handle.get(key))
}

fn report_put(outcome: Outcome) -> ExitCode {
    match outcome {
        Outcome::Ok(version) => {
            eprintln!("status(ok) version({})", version);
            ExitCode::SUCCESS
        }
        Outcome::Resolved(value) => {
            eprintln!("status(resolved) value({} bytes)", value.len());
            ExitCode::FAILURE
        }
        Outcome::AlreadyLearned(value) => {
            eprintln!("status(already-learned) value({} bytes)", value.len());
            ExitCode::FAILURE
        }
        Outcome::InvalidInput => {
            eprintln!("status(invalid-input)");
            ExitCode::FAILURE
        }
        Outcome::NoPromiseQuorum(n) => {
            eprintln!("status(no-promise-quorum) nodes({})", n);
            ExitCode::FAILURE
        }
        Outcome::NoAcceptQuorum(n) => {
            eprintln!("status(no-accept-quorum) nodes({})", n);
            ExitCode::FAILURE
        }
        Outcome::NoLearnQuorum(n) => {
            eprintln!("status(no-learn-quorum) nodes({})", n);
            ExitCode::FAILURE
        }
    }
}

fn report_get(outcome: ReadOutcome) -> ExitCode {
    match outcome {
        ReadOutcome::Ok(version, value, replicas) => {
            eprintln!(
                "status(ok) version({}) replicas({})",
                version, replicas
            );
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            if lock.write_all(&value).is_err() || lock.flush().is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        ReadOutcome::NotFound => {
            eprintln!("status(not-found)");
            ExitCode::FAILURE
        }
        ReadOutcome::NoQuorum(count) => {
            eprintln!("status(no-quorum) replicas({})", count);
            ExitCode::FAILURE
        }
    }
}
