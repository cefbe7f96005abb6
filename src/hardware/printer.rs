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

//! Thermal ticket printing over a USB ESC/POS device.
//!
//! The wire protocol is hand-rolled rather than delegated to a crate:
//! ESC/POS is a byte-level escape-code language, and driving it directly
//! over [`rusb`] keeps the failure modes (device unplugged mid-print,
//! timeout) visible instead of buried behind an unfamiliar crate's own
//! error type.

use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{Price, ServiceType};

const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;

/// EAN-13 barcode type code in ESC/POS's "function B" (`GS k`) encoding.
const BARCODE_TYPE_EAN13: u8 = 67;

#[derive(Debug)]
/// The ways printing a ticket can fail.
pub enum Error {
    /// No device matching the configured vendor/product id could be opened,
    /// even after one reconnect attempt.
    Unavailable,
    /// The USB transfer itself failed (device busy, timed out, unplugged
    /// mid-transfer).
    Transfer(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Unavailable => write!(f, "printer is not connected"),
            Error::Transfer(msg) => write!(f, "printer transfer failed: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// A printed ticket's content, ready for formatting.
pub struct TicketSlip<'a> {
    pub ticket_number: &'a str,
    pub service: &'a ServiceType,
    pub entry_time: DateTime<Utc>,
}

/// Something that can print a ticket slip bearing an EAN-13 barcode.
///
/// Implementations are expected to attempt exactly one reconnect on a
/// transport failure before reporting [`Error::Unavailable`]; callers never
/// retry a print themselves (a reprint would mean re-reserving a sequence
/// number).
pub trait TicketPrinter {
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] if the device cannot be reached, or
    /// [`Error::Transfer`] if a transfer to a reachable device fails.
    fn print(&mut self, slip: &TicketSlip) -> Result<(), Error>;
}

fn format_ticket_escpos(slip: &TicketSlip) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&[ESC, b'@']); // initialize
    buf.extend_from_slice(&[ESC, b'a', 1]); // center alignment

    buf.extend_from_slice(b"CARWASH ENTRY TICKET\n\n");
    buf.extend_from_slice(format!("Service : {}\n", slip.service.name).as_bytes());
    buf.extend_from_slice(format!("Price   : {}\n", slip.service.price.get()).as_bytes());
    buf.extend_from_slice(
        format!(
            "Entry   : {}\n\n",
            slip.entry_time.format("%Y-%m-%d %H:%M:%S")
        )
        .as_bytes(),
    );

    // GS h n: barcode height in dots.
    buf.extend_from_slice(&[GS, b'h', 80]);
    // GS w n: barcode module width.
    buf.extend_from_slice(&[GS, b'w', 2]);
    // GS H n: print human-readable digits below the bars.
    buf.extend_from_slice(&[GS, b'H', 2]);
    // GS k m n d1..dn: print a barcode of type m, n data bytes follow.
    buf.extend_from_slice(&[GS, b'k', BARCODE_TYPE_EAN13]);
    #[allow(clippy::cast_possible_truncation)]
    buf.push(slip.ticket_number.len() as u8);
    buf.extend_from_slice(slip.ticket_number.as_bytes());

    buf.extend_from_slice(b"\n\n\n");
    buf.extend_from_slice(&[GS, b'V', 1]); // partial cut
    buf
}

const OUT_ENDPOINT: u8 = 0x01;

/// An ESC/POS thermal printer reached over raw USB bulk transfers.
pub struct EscposUsbPrinter {
    vendor_id: u16,
    product_id: u16,
    timeout: Duration,
    handle: Option<rusb::DeviceHandle<rusb::GlobalContext>>,
}

impl EscposUsbPrinter {
    #[must_use]
    pub fn new(vendor_id: u16, product_id: u16, timeout: Duration) -> EscposUsbPrinter {
        let mut printer = EscposUsbPrinter {
            vendor_id,
            product_id,
            timeout,
            handle: None,
        };
        printer.connect();
        printer
    }

    fn connect(&mut self) {
        self.handle = rusb::open_device_with_vid_pid(self.vendor_id, self.product_id);
        if let Some(handle) = &self.handle {
            // Claiming interface 0 is correct for every ESC/POS USB printer
            // observed in the field; devices exposing the printer on a
            // different interface number are out of scope.
            let _ = handle.claim_interface(0);
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        for attempt in 0..2 {
            if self.handle.is_none() {
                self.connect();
            }
            let Some(handle) = &self.handle else {
                if attempt == 1 {
                    return Err(Error::Unavailable);
                }
                continue;
            };
            match handle.write_bulk(OUT_ENDPOINT, bytes, self.timeout) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    self.handle = None;
                    if attempt == 1 {
                        return Err(Error::Transfer(e.to_string()));
                    }
                }
            }
        }
        Err(Error::Unavailable)
    }
}

impl TicketPrinter for EscposUsbPrinter {
    fn print(&mut self, slip: &TicketSlip) -> Result<(), Error> {
        let bytes = format_ticket_escpos(slip);
        self.write_all(&bytes)
    }
}

/// A recording printer for tests: stores every slip it was asked to print,
/// formatted as it would be sent to the real device.
pub struct RecordingPrinter {
    pub printed: Vec<Vec<u8>>,
}

impl RecordingPrinter {
    #[must_use]
    pub fn new() -> RecordingPrinter {
        RecordingPrinter { printed: Vec::new() }
    }
}

impl Default for RecordingPrinter {
    fn default() -> Self {
        RecordingPrinter::new()
    }
}

impl TicketPrinter for RecordingPrinter {
    fn print(&mut self, slip: &TicketSlip) -> Result<(), Error> {
        self.printed.push(format_ticket_escpos(slip));
        Ok(())
    }
}

/// A printer double that always reports [`Error::Unavailable`], for
/// exercising the printer-failure fallback path.
pub struct FailingPrinter;

impl TicketPrinter for FailingPrinter {
    fn print(&mut self, _slip: &TicketSlip) -> Result<(), Error> {
        Err(Error::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_service() -> ServiceType {
        ServiceType {
            id: 1,
            name: "Standard Wash".into(),
            description: "Exterior wash".into(),
            price: Price::new(dec!(25000.00)).unwrap(),
        }
    }

    #[test]
    fn recording_printer_captures_barcode_payload() {
        let mut printer = RecordingPrinter::new();
        let service = sample_service();
        let slip = TicketSlip {
            ticket_number: "8990100000019",
            service: &service,
            entry_time: Utc::now(),
        };
        printer.print(&slip).unwrap();
        assert_eq!(printer.printed.len(), 1);
        let bytes = &printer.printed[0];
        assert!(bytes
            .windows(slip.ticket_number.len())
            .any(|w| w == slip.ticket_number.as_bytes()));
    }

    #[test]
    fn failing_printer_always_errors() {
        let mut printer = FailingPrinter;
        let service = sample_service();
        let slip = TicketSlip {
            ticket_number: "8990100000019",
            service: &service,
            entry_time: Utc::now(),
        };
        assert!(matches!(printer.print(&slip), Err(Error::Unavailable)));
    }
}
