/*
  carwash-dispenser, an unattended carwash entry ticket dispenser controller.

  This program is free software: you can redistribute it and/or modify
  it under the terms of the GNU General Public License as published by
  the Free Software Foundation, either version 3 of the License, or
  (at your option) any later version.

  This program is distributed in the hope that it will be useful,
  but WITHOUT ANY WARRANTY; without even the implied warranty of
  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
  GNU General Public License for more details.

  You should have received a copy of the GNU General Public License
  along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/

//! EAN-13 ticket number encoding and validation.
//!
//! Tickets are encoded as `899` (GS1 Indonesia prefix) + a 2-digit service
//! id + a 7-digit sequence number + a checksum digit, for 13 ASCII digits
//! total.

use std::fmt::Display;

const PREFIX: &str = "899";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The ways in which building an EAN-13 ticket number can fail.
pub enum Error {
    /// `service_id` does not fit in 2 decimal digits (must be 0..=99).
    ServiceIdOverflow(u32),
    /// `sequence` does not fit in 7 decimal digits (must be 0..=9_999_999).
    SequenceOverflow(u64),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ServiceIdOverflow(id) => {
                write!(f, "service id {id} does not fit in 2 digits (0..=99)")
            }
            Error::SequenceOverflow(seq) => write!(
                f,
                "sequence {seq} does not fit in 7 digits (0..=9_999_999)"
            ),
        }
    }
}

impl std::error::Error for Error {}

/// The width of the sequence component of a ticket number, and the point at
/// which the sequence wraps around to zero.
pub const SEQUENCE_WRAP: u64 = 10_000_000;

/// Compute the EAN-13 checksum digit for a 12-digit string.
///
/// # Panics
///
/// Panics if `twelve` is not exactly 12 ASCII digits; callers in this crate
/// only ever pass strings built by [`encode`], which always satisfies this.
#[must_use]
pub fn checksum(twelve: &str) -> u8 {
    assert_eq!(twelve.len(), 12, "checksum input must be 12 digits");
    let digits: Vec<u32> = twelve
        .bytes()
        .map(|b| {
            assert!(b.is_ascii_digit(), "checksum input must be all digits");
            u32::from(b - b'0')
        })
        .collect();

    // 1-indexed odd positions are even indices here.
    let sum_odd: u32 = digits.iter().step_by(2).sum();
    let sum_even: u32 = digits.iter().skip(1).step_by(2).sum();

    #[allow(clippy::cast_possible_truncation)]
    let check = (10 - ((sum_odd + 3 * sum_even) % 10)) % 10;
    check as u8
}

/// Encode a service id and sequence number into a 13-digit EAN-13 ticket
/// number.
///
/// # Errors
///
/// Returns [`Error::ServiceIdOverflow`] if `service_id > 99`, or
/// [`Error::SequenceOverflow`] if `sequence > 9_999_999`.
pub fn encode(service_id: u32, sequence: u64) -> Result<String, Error> {
    if service_id > 99 {
        return Err(Error::ServiceIdOverflow(service_id));
    }
    if sequence > 9_999_999 {
        return Err(Error::SequenceOverflow(sequence));
    }

    let base = format!("{PREFIX}{service_id:02}{sequence:07}");
    debug_assert_eq!(base.len(), 12);
    let check = checksum(&base);
    Ok(format!("{base}{check}"))
}

/// Validate that a 13-character ticket number is well-formed EAN-13: all
/// ASCII digits, and the 13th digit matches the checksum of the first 12.
#[must_use]
pub fn validate(ticket_number: &str) -> bool {
    if ticket_number.len() != 13 || !ticket_number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let (base, last) = ticket_number.split_at(12);
    let expected = checksum(base);
    last.as_bytes()[0] - b'0' == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_known_value() {
        // service 2, sequence 11 -> base "899" + "02" + "0000011"
        let ticket = encode(2, 11).unwrap();
        assert!(ticket.starts_with("899020000011"));
        assert_eq!(ticket.len(), 13);
        assert!(validate(&ticket));
    }

    #[test]
    fn service_id_overflow_rejected() {
        assert_eq!(encode(100, 0), Err(Error::ServiceIdOverflow(100)));
    }

    #[test]
    fn sequence_overflow_rejected() {
        assert_eq!(encode(1, 10_000_000), Err(Error::SequenceOverflow(10_000_000)));
    }

    #[test]
    fn round_trip_over_full_range_sample() {
        // Exhaustive over service ids, sampled over sequence numbers: a full
        // cross product (100 * 10_000_000) is unnecessary for a bounded pure
        // function already covered by the literal-value scenarios above;
        // sample the sequence space instead of iterating all ten million
        // values.
        for service_id in 0..100u32 {
            for sequence in (0..9_999_999u64).step_by(104_729) {
                let ticket = encode(service_id, sequence).unwrap();
                assert!(validate(&ticket), "{ticket} should validate");
            }
        }
    }

    #[test]
    fn corrupted_checksum_fails_validation() {
        let mut ticket = encode(1, 42).unwrap().into_bytes();
        let last = ticket.len() - 1;
        ticket[last] = if ticket[last] == b'9' { b'0' } else { ticket[last] + 1 };
        let ticket = String::from_utf8(ticket).unwrap();
        assert!(!validate(&ticket));
    }

    #[test]
    fn wrong_length_fails_validation() {
        assert!(!validate("12345"));
        assert!(!validate(""));
    }
}
