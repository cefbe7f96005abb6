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

//! Loading and validating configurations for the dispenser controller.

use std::collections::HashSet;
use std::fmt::Display;
use std::io::Read;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, PartialEq)]
/// A configuration for the entire dispenser controller.
///
/// Contains all peripheral wiring, backend connection and timing parameters
/// needed for the three workers to operate correctly.
pub struct Configuration {
    /// The GPIO line of the vehicle loop sensor.
    pub pin_loop_sensor: u8,
    /// The GPIO lines of the four service-selection buttons, in button
    /// order (button 1 first).
    pub pin_buttons: [u8; 4],
    /// The GPIO line driving the entry gate relay.
    pub pin_gate: u8,
    /// The GPIO line driving the status indicator LED.
    pub pin_indicator_led: u8,
    /// The USB vendor id of the ESC/POS ticket printer.
    pub printer_vendor_id: u16,
    /// The USB product id of the ESC/POS ticket printer.
    pub printer_product_id: u16,
    /// The timeout for a single USB transfer to the printer, in
    /// milliseconds.
    pub printer_timeout_ms: u64,
    /// The base URL of the backend service (e.g.
    /// `https://carwash.example.com/api`).
    pub backend_base_url: String,
    /// The timeout for a single backend HTTP request, in milliseconds.
    pub backend_timeout_ms: u64,
    /// How often Network polls the backend for a health check, in
    /// milliseconds.
    pub health_check_interval_ms: u64,
    /// The maximum number of outstanding requests the retry queue will hold
    /// before dropping the oldest.
    pub pending_queue_capacity: usize,
    /// How long Primary waits for a queue-info response before greeting the
    /// driver without it, in milliseconds.
    pub queue_info_timeout_ms: u64,
    /// How long a single bounded put onto Network's inbound queue waits
    /// before being treated as `QueueFull`, in milliseconds.
    pub network_put_timeout_ms: u64,
    /// Subtracted from the AUTO-mode estimate to announce `est_min`.
    pub est_min_const: u32,
    /// Added to the AUTO-mode estimate to announce `est_max`.
    pub est_max_const: u32,
    /// How long the gate stays closed while the printer-error prompt plays,
    /// in milliseconds.
    pub printer_error_hold_ms: u64,
    /// The directory audio clip paths below are resolved relative to.
    pub audio_base_dir: PathBuf,
    /// Named audio clips (greeting, per-service acknowledgements, error
    /// tones), relative to `audio_base_dir` unless absolute.
    pub audio_clips: Vec<AudioClip>,
    /// Where the persisted ticket sequence cursor is stored.
    pub sequence_cursor_path: PathBuf,
    /// Where the user-facing log is appended.
    pub log_file_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
/// A single named audio clip.
pub struct AudioClip {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug)]
/// The set of errors that can occur when validating a configuration.
pub enum Error {
    /// The configuration was malformed and could not be parsed.
    Malformed(serde_json::Error),
    /// Two pins are assigned to differing functions.
    DuplicatePin(u8),
    /// A pin is outside the legal GPIO range for this device.
    ReservedPin(u8),
    /// A timing parameter that must be strictly positive was zero.
    ZeroInterval(&'static str),
    /// `backend_base_url` was empty.
    EmptyBackendUrl,
    /// `pending_queue_capacity` was zero.
    ZeroQueueCapacity,
}

impl Configuration {
    /// Construct a new `Configuration` by parsing some readable source.
    /// Also checks the configuration for logical inconsistencies.
    ///
    /// # Errors
    ///
    /// This function will return errors in line with the definition of
    /// `Error` in this module.
    pub fn parse(source: &mut impl Read) -> Result<Configuration, Error> {
        let config: Configuration = serde_json::from_reader(source).map_err(Error::Malformed)?;

        if config.backend_base_url.trim().is_empty() {
            return Err(Error::EmptyBackendUrl);
        }

        if config.pending_queue_capacity == 0 {
            return Err(Error::ZeroQueueCapacity);
        }

        for (value, label) in [
            (config.backend_timeout_ms, "backend_timeout_ms"),
            (config.health_check_interval_ms, "health_check_interval_ms"),
            (config.printer_timeout_ms, "printer_timeout_ms"),
            (config.queue_info_timeout_ms, "queue_info_timeout_ms"),
            (config.printer_error_hold_ms, "printer_error_hold_ms"),
            (config.network_put_timeout_ms, "network_put_timeout_ms"),
        ] {
            if value == 0 {
                return Err(Error::ZeroInterval(label));
            }
        }

        let mut pins_used = HashSet::new();
        for pin in [config.pin_loop_sensor, config.pin_gate, config.pin_indicator_led]
            .into_iter()
            .chain(config.pin_buttons)
        {
            if !is_legal(pin) {
                return Err(Error::ReservedPin(pin));
            }
            if !pins_used.insert(pin) {
                return Err(Error::DuplicatePin(pin));
            }
        }

        Ok(config)
    }
}

/// Determine whether a GPIO pin ID is a legal pin for use on this device.
fn is_legal(pin: u8) -> bool {
    // GPIO pins 0 through 27 exist on the target board, but 0 and 1 are
    // reserved for EEPROM.
    1 < pin && pin <= 27
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Malformed(e) => write!(f, "failed to parse configuration JSON: {e}"),
            Error::DuplicatePin(p) => write!(f, "GPIO pin {p} is assigned more than one role"),
            Error::ReservedPin(p) => write!(f, "GPIO pin {p} is not usable on this device"),
            Error::ZeroInterval(label) => write!(f, "{label} must be greater than zero"),
            Error::EmptyBackendUrl => write!(f, "backend_base_url must not be empty"),
            Error::ZeroQueueCapacity => write!(f, "pending_queue_capacity must be greater than zero"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn sample() -> Configuration {
        Configuration {
            pin_loop_sensor: 4,
            pin_buttons: [17, 27, 22, 23],
            pin_gate: 5,
            pin_indicator_led: 6,
            printer_vendor_id: 0x04b8,
            printer_product_id: 0x0e15,
            printer_timeout_ms: 2_000,
            backend_base_url: "https://carwash.example.com/api".into(),
            backend_timeout_ms: 5_000,
            health_check_interval_ms: 30_000,
            pending_queue_capacity: 50,
            queue_info_timeout_ms: 1_500,
            network_put_timeout_ms: 500,
            est_min_const: 1,
            est_max_const: 2,
            printer_error_hold_ms: 5_000,
            audio_base_dir: "/opt/dispenser/audio".into(),
            audio_clips: vec![AudioClip {
                name: "greeting".into(),
                path: "greeting.wav".into(),
            }],
            sequence_cursor_path: "/var/lib/dispenser/cursor".into(),
            log_file_path: "/var/log/dispenser.log".into(),
        }
    }

    #[test]
    fn full_config_round_trips() {
        let config = sample();
        let json = serde_json::to_string(&config).unwrap();
        let mut cursor = Cursor::new(json);
        assert_eq!(config, Configuration::parse(&mut cursor).unwrap());
    }

    #[test]
    fn rejects_duplicate_pin() {
        let mut config = sample();
        config.pin_gate = config.pin_loop_sensor;
        let json = serde_json::to_string(&config).unwrap();
        let mut cursor = Cursor::new(json);
        assert!(matches!(
            Configuration::parse(&mut cursor),
            Err(Error::DuplicatePin(_))
        ));
    }

    #[test]
    fn rejects_reserved_pin() {
        let mut config = sample();
        config.pin_gate = 0;
        let json = serde_json::to_string(&config).unwrap();
        let mut cursor = Cursor::new(json);
        assert!(matches!(
            Configuration::parse(&mut cursor),
            Err(Error::ReservedPin(0))
        ));
    }

    #[test]
    fn rejects_zero_interval() {
        let mut config = sample();
        config.backend_timeout_ms = 0;
        let json = serde_json::to_string(&config).unwrap();
        let mut cursor = Cursor::new(json);
        assert!(matches!(
            Configuration::parse(&mut cursor),
            Err(Error::ZeroInterval("backend_timeout_ms"))
        ));
    }

    #[test]
    fn rejects_empty_backend_url() {
        let mut config = sample();
        config.backend_base_url = String::new();
        let json = serde_json::to_string(&config).unwrap();
        let mut cursor = Cursor::new(json);
        assert!(matches!(
            Configuration::parse(&mut cursor),
            Err(Error::EmptyBackendUrl)
        ));
    }
}
