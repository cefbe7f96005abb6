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

//! The HTTP boundary between Network and the backend service.
//!
//! Wire shapes are kept separate from [`crate::domain`] types: every
//! response is `{"data": ...}`-enveloped, fields are snake_case, and prices
//! travel as JSON strings so they round-trip through [`rust_decimal::Decimal`]
//! without floating point error. [`BackendClient`] translates between the
//! two; nothing outside this module ever sees a DTO.

use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Price, QueueMode, ServiceType, Ticket, VehicleQueueInfo};

#[derive(Debug)]
/// The ways a backend call can fail.
pub enum Error {
    /// The HTTP request itself failed (DNS, connect, timeout).
    Transport(String),
    /// The backend responded, but not with a 2xx status.
    Status(u16),
    /// The response body could not be decoded into the expected shape.
    Decode(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Transport(msg) => write!(f, "backend request failed: {msg}"),
            Error::Status(code) => write!(f, "backend responded with status {code}"),
            Error::Decode(msg) => write!(f, "could not decode backend response: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServiceTypeDto {
    id: u32,
    name: String,
    #[serde(default)]
    description: String,
    price: Decimal,
}

impl TryFrom<ServiceTypeDto> for ServiceType {
    type Error = Error;

    fn try_from(dto: ServiceTypeDto) -> Result<Self, Error> {
        Ok(ServiceType {
            id: dto.id,
            name: dto.name,
            description: dto.description,
            price: Price::new(dto.price).map_err(|e| Error::Decode(e.to_string()))?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InitialDataDto {
    last_ticket_sequence: u64,
    services: Vec<ServiceTypeDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum QueueModeDto {
    Auto,
    Manual,
    Off,
}

impl From<QueueModeDto> for QueueMode {
    fn from(dto: QueueModeDto) -> Self {
        match dto {
            QueueModeDto::Auto => QueueMode::Auto,
            QueueModeDto::Manual => QueueMode::Manual,
            QueueModeDto::Off => QueueMode::Off,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueInfoDto {
    vehicles_ahead: u32,
    mode: QueueModeDto,
    est_min: u32,
    est_max: u32,
    #[serde(default)]
    time_per_vehicle: Option<u32>,
}

impl From<QueueInfoDto> for VehicleQueueInfo {
    fn from(dto: QueueInfoDto) -> Self {
        VehicleQueueInfo {
            vehicles_ahead: dto.vehicles_ahead,
            mode: dto.mode.into(),
            est_min: dto.est_min,
            est_max: dto.est_max,
            time_per_vehicle: dto.time_per_vehicle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TicketRequestDto {
    ticket_number: String,
    service_type_id: u32,
    entry_time: DateTime<Utc>,
    status: &'static str,
}

impl From<&Ticket> for TicketRequestDto {
    fn from(ticket: &Ticket) -> Self {
        TicketRequestDto {
            ticket_number: ticket.ticket_number.clone(),
            service_type_id: ticket.service_type_id,
            entry_time: ticket.entry_time,
            status: "PENDING",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TicketResponseDto {
    id: u64,
    ticket_number: String,
    service_type_id: u32,
    entry_time: DateTime<Utc>,
}

impl From<TicketResponseDto> for Ticket {
    fn from(dto: TicketResponseDto) -> Self {
        Ticket {
            id: Some(dto.id),
            service_type_id: dto.service_type_id,
            ticket_number: dto.ticket_number,
            entry_time: dto.entry_time,
        }
    }
}

/// Everything Network needs from the backend: the boot-time catch-up data,
/// the queue info shown to the driver, and ticket registration.
///
/// `Send + Sync` because Network shares one client between its request loop
/// and its health-check loop via an `Arc`.
pub trait BackendClient: Send + Sync {
    /// Fetch the last known ticket sequence and the current service list.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] on any transport, status, or decode failure.
    fn get_initial_data(&self) -> Result<(u64, Vec<ServiceType>), Error>;

    /// Fetch the current vehicle queue info, used to shape the greeting.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] on any transport, status, or decode failure.
    fn get_queue_info(&self) -> Result<VehicleQueueInfo, Error>;

    /// Register a freshly printed ticket with the backend.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] on any transport, status, or decode failure. The
    /// sequence number embedded in `ticket.ticket_number` has already been
    /// persisted locally by the time this is called; a failure here is a
    /// network/backend health concern, not a rollback trigger.
    fn register_ticket(&self, ticket: &Ticket) -> Result<Ticket, Error>;

    /// Fetch the current service list, used by the periodic health check to
    /// detect server-side price or catalog changes.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] on any transport, status, or decode failure.
    fn get_services(&self) -> Result<Vec<ServiceType>, Error>;
}

/// A [`BackendClient`] backed by a blocking [`reqwest::blocking::Client`].
pub struct HttpBackendClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpBackendClient {
    /// # Panics
    ///
    /// Panics if the underlying TLS backend cannot be initialized, which
    /// only happens if the platform's root certificate store is
    /// unreadable.
    #[must_use]
    pub fn new(base_url: String, timeout: Duration) -> HttpBackendClient {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        HttpBackendClient { base_url, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn decode_envelope<T: for<'de> Deserialize<'de>>(
    response: reqwest::blocking::Response,
) -> Result<T, Error> {
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Status(status.as_u16()));
    }
    let envelope: Envelope<T> = response.json().map_err(|e| Error::Decode(e.to_string()))?;
    Ok(envelope.data)
}

impl BackendClient for HttpBackendClient {
    fn get_initial_data(&self) -> Result<(u64, Vec<ServiceType>), Error> {
        let response = self
            .client
            .get(self.url("/dispenser/initial-data"))
            .send()
            .map_err(|e| Error::Transport(e.to_string()))?;
        let dto: InitialDataDto = decode_envelope(response)?;
        let services = dto
            .services
            .into_iter()
            .map(ServiceType::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((dto.last_ticket_sequence, services))
    }

    fn get_queue_info(&self) -> Result<VehicleQueueInfo, Error> {
        let response = self
            .client
            .get(self.url("/dispenser/queue-info"))
            .send()
            .map_err(|e| Error::Transport(e.to_string()))?;
        let dto: QueueInfoDto = decode_envelope(response)?;
        Ok(dto.into())
    }

    fn register_ticket(&self, ticket: &Ticket) -> Result<Ticket, Error> {
        let body = TicketRequestDto::from(ticket);
        let response = self
            .client
            .post(self.url("/dispenser/tickets"))
            .json(&body)
            .send()
            .map_err(|e| Error::Transport(e.to_string()))?;
        let dto: TicketResponseDto = decode_envelope(response)?;
        Ok(dto.into())
    }

    fn get_services(&self) -> Result<Vec<ServiceType>, Error> {
        let response = self
            .client
            .get(self.url("/dispenser/services"))
            .send()
            .map_err(|e| Error::Transport(e.to_string()))?;
        let dtos: Vec<ServiceTypeDto> = decode_envelope(response)?;
        dtos.into_iter().map(ServiceType::try_from).collect()
    }
}

/// A scripted [`BackendClient`] for tests: returns canned results in order,
/// repeating the last one once exhausted, and records every ticket it was
/// asked to register.
pub struct StubBackendClient {
    initial_data: (u64, Vec<ServiceType>),
    queue_info: Result<VehicleQueueInfo, String>,
    registered: std::sync::Mutex<Vec<Ticket>>,
    fail_registration: bool,
    services: Vec<ServiceType>,
}

impl StubBackendClient {
    #[must_use]
    pub fn new(last_ticket_sequence: u64, services: Vec<ServiceType>) -> StubBackendClient {
        StubBackendClient {
            initial_data: (last_ticket_sequence, services.clone()),
            queue_info: Ok(VehicleQueueInfo {
                vehicles_ahead: 0,
                mode: QueueMode::Off,
                est_min: 0,
                est_max: 0,
                time_per_vehicle: None,
            }),
            registered: std::sync::Mutex::new(Vec::new()),
            fail_registration: false,
            services,
        }
    }

    #[must_use]
    pub fn with_queue_info(mut self, info: VehicleQueueInfo) -> StubBackendClient {
        self.queue_info = Ok(info);
        self
    }

    #[must_use]
    pub fn failing_registration(mut self) -> StubBackendClient {
        self.fail_registration = true;
        self
    }

    #[must_use]
    pub fn registered_tickets(&self) -> Vec<Ticket> {
        self.registered.lock().unwrap().clone()
    }
}

impl BackendClient for StubBackendClient {
    fn get_initial_data(&self) -> Result<(u64, Vec<ServiceType>), Error> {
        Ok(self.initial_data.clone())
    }

    fn get_queue_info(&self) -> Result<VehicleQueueInfo, Error> {
        self.queue_info.clone().map_err(Error::Transport)
    }

    fn register_ticket(&self, ticket: &Ticket) -> Result<Ticket, Error> {
        if self.fail_registration {
            return Err(Error::Status(503));
        }
        let mut registered = ticket.clone();
        registered.id = Some(self.registered.lock().unwrap().len() as u64 + 1);
        self.registered.lock().unwrap().push(registered.clone());
        Ok(registered)
    }

    fn get_services(&self) -> Result<Vec<ServiceType>, Error> {
        Ok(self.services.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_mode_dto_maps_to_domain() {
        assert_eq!(QueueMode::from(QueueModeDto::Auto), QueueMode::Auto);
        assert_eq!(QueueMode::from(QueueModeDto::Manual), QueueMode::Manual);
        assert_eq!(QueueMode::from(QueueModeDto::Off), QueueMode::Off);
    }

    #[test]
    fn ticket_request_dto_carries_pending_status() {
        let ticket = Ticket {
            id: None,
            service_type_id: 2,
            ticket_number: "8990200000028".into(),
            entry_time: Utc::now(),
        };
        let dto = TicketRequestDto::from(&ticket);
        assert_eq!(dto.status, "PENDING");
        assert_eq!(dto.ticket_number, ticket.ticket_number);
    }
}
