// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

mod cli;
mod logger;

use anyhow::Context;
use clap::Parser;
use log::{debug, warn};
use opal::{uid, Atom, Drive, Error, SgDevice};
use std::process::ExitCode;

use crate::cli::CliOptions;

const EXIT_CODE_LOGGER_FAIL: u8 = 3;

// MBR control and global range columns driven by the unlock sequence
const MBR_DONE: u64 = 2;
const READ_LOCKED: u64 = 7;
const WRITE_LOCKED: u64 = 8;

fn main() -> ExitCode {
    let cli = CliOptions::parse();

    if let Err(e) = logger::init(cli.verbosity()) {
        eprintln!("Logger error: {e:?}");
        return EXIT_CODE_LOGGER_FAIL.into();
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &CliOptions) -> anyhow::Result<()> {
    let auth_uid = cli::parse_authority(&cli.user)?;
    let mut drive =
        Drive::open(&cli.device).with_context(|| format!("cannot bring up {}", cli.device))?;

    let mut pin = cli.pin.clone();
    loop {
        let creds = match pin.take() {
            Some(p) => p,
            None => rpassword::prompt_password(format!("PIN for {}: ", cli.user))
                .context("cannot read PIN")?,
        };

        // a method failure reads as bad credentials and prompts again;
        // anything else is a real fault
        match unlock(&mut drive, auth_uid, creds.as_bytes()) {
            Ok(()) => break,
            Err(Error::Method { status, msg }) => {
                warn!("authentication failed: {msg} ({status:#04x})");
            }
            Err(e) => return Err(e.into()),
        }
    }

    debug!("drive unlocked");
    Ok(())
}

/// Clears everything between the host and the media.
fn unlock(drive: &mut Drive<SgDevice>, auth_uid: u64, pin: &[u8]) -> opal::Result<()> {
    drive.login(uid::LOCKING_SP, auth_uid, pin)?;

    // the MBR shadow is done (hide it), then both locks come off the
    // global range
    drive.table_set(uid::MBR_CONTROL, MBR_DONE, Atom::uint(1))?;
    drive.table_set(uid::LBA_RANGE_GLOBAL, READ_LOCKED, Atom::uint(0))?;
    drive.table_set(uid::LBA_RANGE_GLOBAL, WRITE_LOCKED, Atom::uint(0))?;
    Ok(())
}
