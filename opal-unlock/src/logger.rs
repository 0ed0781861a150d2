// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

static LOGGER: CliLogger = CliLogger;

/// Installs the stderr logger at the given verbosity.
///
/// # Errors
///
/// An error is returned if a logger has already been set.
pub fn init(filter: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(filter))
}

/// Stderr logger of the unlock tool.
///
/// Warnings and errors lead with the program name so they stand out next
/// to the PIN prompt. Protocol milestones print bare, and the wire dumps
/// at trace level carry the module they came from.
#[derive(Debug)]
struct CliLogger;

impl Log for CliLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        match record.level() {
            Level::Error | Level::Warn => {
                eprintln!("opal-unlock: {}", record.args());
            }
            Level::Info | Level::Debug => eprintln!("{}", record.args()),
            Level::Trace => eprintln!("[{}] {}", record.target(), record.args()),
        }
    }

    fn flush(&self) {}
}
