// SPDX-License-Identifier: MIT
//
// Copyright IBM Corp. 2024

use std::fmt;

/// Hex dump of a wire buffer for trace logging.
///
/// Transport blocks are zero-padded to 512 bytes, so the dump prints the
/// leading significant bytes in 4-byte groups and folds the zero tail into
/// a total-length note.
#[derive(Debug)]
pub(crate) struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail = self.0.iter().rev().take_while(|b| **b == 0).count();
        let significant = self.0.len() - tail;

        for (i, b) in self.0[..significant].iter().enumerate() {
            if i > 0 && i % 4 == 0 {
                write!(f, " ")?;
            }
            write!(f, "{b:02x}")?;
        }
        if tail > 0 {
            if significant > 0 {
                write!(f, " ")?;
            }
            write!(f, "00.. ({} bytes)", self.0.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn groups_of_four() {
        let dump = HexDump(&[0xde, 0xad, 0xbe, 0xef, 0x01]);
        assert_eq!(format!("{dump}"), "deadbeef 01");
    }

    #[test]
    fn folds_the_zero_tail() {
        let mut block = [0u8; 64];
        block[..6].copy_from_slice(&[0xf8, 0xa8, 0x00, 0x00, 0x12, 0x34]);
        assert_eq!(
            format!("{}", HexDump(&block)),
            "f8a80000 1234 00.. (64 bytes)"
        );
    }

    #[test]
    fn all_padding() {
        assert_eq!(format!("{}", HexDump(&[0u8; 512])), "00.. (512 bytes)");
    }
}
