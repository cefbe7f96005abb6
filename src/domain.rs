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

//! Core domain entities: tickets, service types, queue info and device
//! status.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A single printed/registered ticket.
pub struct Ticket {
    /// The backend-assigned id, present only after a successful
    /// registration response.
    pub id: Option<u64>,
    /// The id of the service the driver selected (1..=4 in this device's
    /// configuration, but stored as the general service type id).
    pub service_type_id: u32,
    /// 13 ASCII digits, valid EAN-13 (see [`crate::ean`]).
    pub ticket_number: String,
    /// When the vehicle arrived at (and this ticket was issued for) the
    /// gate, in UTC.
    pub entry_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// A decimal amount with at most 2 fractional digits and a positive value.
///
/// Wraps [`rust_decimal::Decimal`] with a checked constructor so the
/// "≤ 2 fractional digits, > 0" invariant is enforced at construction rather
/// than re-checked at every use site.
pub struct Price(Decimal);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The ways in which a raw `Decimal` can fail to be a valid [`Price`].
pub enum PriceError {
    NotPositive,
    TooManyFractionalDigits,
}

impl Display for PriceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceError::NotPositive => write!(f, "price must be greater than zero"),
            PriceError::TooManyFractionalDigits => {
                write!(f, "price must have at most 2 fractional digits")
            }
        }
    }
}

impl std::error::Error for PriceError {}

impl Price {
    /// Construct a [`Price`], validating that it is positive and has at
    /// most 2 fractional digits.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::NotPositive`] if `value <= 0`, or
    /// [`PriceError::TooManyFractionalDigits`] if `value` carries more than
    /// 2 digits after the decimal point.
    pub fn new(value: Decimal) -> Result<Price, PriceError> {
        if value <= Decimal::ZERO {
            return Err(PriceError::NotPositive);
        }
        if value.scale() > 2 {
            return Err(PriceError::TooManyFractionalDigits);
        }
        Ok(Price(value))
    }

    #[must_use]
    pub fn get(&self) -> Decimal {
        self.0
    }
}

impl Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Price {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Decimal::deserialize(deserializer)?;
        Price::new(raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A wash service the driver can select.
///
/// Immutable once received from the backend; the whole list may be wholly
/// replaced by a later health-check update.
pub struct ServiceType {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub price: Price,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
/// The vehicle-queue announcement mode, as reported by the backend.
pub enum QueueMode {
    Auto,
    Manual,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Queue info used only to shape the greeting audio.
pub struct VehicleQueueInfo {
    pub vehicles_ahead: u32,
    pub mode: QueueMode,
    pub est_min: u32,
    pub est_max: u32,
    /// Required when `mode == QueueMode::Auto`.
    pub time_per_vehicle: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// The four externally visible device-status tags that drive the Indicator
/// LED pattern.
pub enum DeviceStatus {
    Fine,
    NetError,
    PrinterError,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The only way [`estimate`] can fail: the backend reported AUTO mode
/// without the per-vehicle timing it requires.
pub struct AutoModeMissingTimePerVehicle;

impl Display for AutoModeMissingTimePerVehicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue mode is AUTO but time_per_vehicle was not reported")
    }
}

impl std::error::Error for AutoModeMissingTimePerVehicle {}

/// Turn a [`VehicleQueueInfo`] into the `(est_min, est_max)` minutes
/// announced to the driver, or `None` if the mode suppresses the estimate
/// entirely.
///
/// - `Off` suppresses the estimate.
/// - `Manual` passes the server-reported `est_min`/`est_max` straight
///   through.
/// - `Auto` computes `estimated = vehicles_ahead * time_per_vehicle`, then
///   `est_min = estimated - est_min_const`, `est_max = estimated +
///   est_max_const`; if either result would be less than 1, both are
///   clamped to 0.
///
/// # Errors
///
/// Returns [`AutoModeMissingTimePerVehicle`] if `info.mode` is `Auto` and
/// `info.time_per_vehicle` is `None`.
pub fn estimate(
    info: &VehicleQueueInfo,
    est_min_const: u32,
    est_max_const: u32,
) -> Result<Option<(u32, u32)>, AutoModeMissingTimePerVehicle> {
    match info.mode {
        QueueMode::Off => Ok(None),
        QueueMode::Manual => Ok(Some((info.est_min, info.est_max))),
        QueueMode::Auto => {
            let time_per_vehicle = info.time_per_vehicle.ok_or(AutoModeMissingTimePerVehicle)?;
            let estimated = info.vehicles_ahead * time_per_vehicle;
            let est_min = estimated.saturating_sub(est_min_const);
            let est_max = estimated + est_max_const;
            if est_min < 1 || est_max < 1 {
                Ok(Some((0, 0)))
            } else {
                Ok(Some((est_min, est_max)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_rejects_non_positive() {
        assert_eq!(Price::new(Decimal::ZERO), Err(PriceError::NotPositive));
        assert_eq!(Price::new(dec!(-1.00)), Err(PriceError::NotPositive));
    }

    #[test]
    fn price_rejects_too_many_fractional_digits() {
        assert_eq!(
            Price::new(dec!(1.001)),
            Err(PriceError::TooManyFractionalDigits)
        );
    }

    #[test]
    fn price_accepts_valid_value() {
        let p = Price::new(dec!(75000.00)).unwrap();
        assert_eq!(p.get(), dec!(75000.00));
    }

    fn queue_info(mode: QueueMode, time_per_vehicle: Option<u32>) -> VehicleQueueInfo {
        VehicleQueueInfo {
            vehicles_ahead: 3,
            mode,
            est_min: 10,
            est_max: 20,
            time_per_vehicle,
        }
    }

    #[test]
    fn estimate_off_mode_suppresses_announcement() {
        assert_eq!(estimate(&queue_info(QueueMode::Off, None), 1, 2), Ok(None));
    }

    #[test]
    fn estimate_manual_mode_passes_through() {
        assert_eq!(
            estimate(&queue_info(QueueMode::Manual, None), 1, 2),
            Ok(Some((10, 20)))
        );
    }

    #[test]
    fn estimate_auto_mode_matches_literal_scenario() {
        // queue=3, time_per_vehicle=5, est_min_const=1, est_max_const=2 ->
        // estimated=15, announced est_min=14, est_max=17 (scenario S5).
        let info = VehicleQueueInfo {
            vehicles_ahead: 3,
            mode: QueueMode::Auto,
            est_min: 0,
            est_max: 0,
            time_per_vehicle: Some(5),
        };
        assert_eq!(estimate(&info, 1, 2), Ok(Some((14, 17))));
    }

    #[test]
    fn estimate_auto_mode_without_time_per_vehicle_fails() {
        assert_eq!(
            estimate(&queue_info(QueueMode::Auto, None), 1, 2),
            Err(AutoModeMissingTimePerVehicle)
        );
    }

    #[test]
    fn estimate_auto_mode_clamps_small_results_to_zero() {
        // estimated=0, est_min_const=5 -> est_min would underflow to 0 via
        // saturating_sub but the clamp rule still forces est_max to 0 too.
        let info = VehicleQueueInfo {
            vehicles_ahead: 0,
            mode: QueueMode::Auto,
            est_min: 0,
            est_max: 0,
            time_per_vehicle: Some(5),
        };
        assert_eq!(estimate(&info, 5, 0), Ok(Some((0, 0))));
    }
}
