// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

use anyhow::{bail, Context};
use clap::Parser;
use log::LevelFilter;

/// Unlock a TCG Opal self-encrypting drive.
///
/// Authenticates against the Locking SP, marks the MBR shadow as done and
/// clears the read and write locks on the global LBA range.
#[derive(Parser, Debug)]
pub struct CliOptions {
    /// Provide more detailed output.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Locking SP authority to authenticate as ("adminN" or "userN").
    #[arg(short, long, default_value = "admin1")]
    pub user: String,

    /// PIN credentials; prompted for interactively when not given.
    #[arg(short, long)]
    pub pin: Option<String>,

    /// Block device node of the drive (eg /dev/sda).
    pub device: String,
}

impl CliOptions {
    pub fn verbosity(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// Maps an `adminN` / `userN` name onto the matching Locking SP authority.
pub fn parse_authority(user: &str) -> anyhow::Result<u64> {
    let (base, num) = if let Some(n) = user.strip_prefix("admin") {
        (opal::uid::admin as fn(u32) -> u64, n)
    } else if let Some(n) = user.strip_prefix("user") {
        (opal::uid::user as fn(u32) -> u64, n)
    } else {
        bail!("illegal Locking SP user '{user}'");
    };
    let num: u32 = num
        .parse()
        .with_context(|| format!("illegal Locking SP user '{user}'"))?;
    Ok(base(num))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn authority_names() {
        assert_eq!(parse_authority("admin1").unwrap(), opal::uid::admin(1));
        assert_eq!(parse_authority("user23").unwrap(), opal::uid::user(23));
        assert!(parse_authority("root").is_err());
        assert!(parse_authority("admin").is_err());
        assert!(parse_authority("userx").is_err());
    }
}
