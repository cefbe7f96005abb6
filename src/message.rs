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

//! The sole queue payload type shared by all three workers.
//!
//! `Topic` tags the intended receiver: a queue receiver discards anything
//! not addressed to its own role. `MessagePayload` is a closed, typed union
//! rather than a free-form dict, so the topic tag is a cross-check rather
//! than the only way to dispatch.

use std::fmt::Display;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{SendTimeoutError, Sender};
use uuid::Uuid;

use crate::domain::{DeviceStatus, ServiceType, Ticket, VehicleQueueInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The intended receiver of a message. A receiver must discard any message
/// whose topic does not match its own role.
pub enum Topic {
    Network,
    Primary,
    Indicator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Whether a message is a one-way command, a one-way notification, or a
/// reply to an earlier command.
pub enum Kind {
    Command,
    Event,
    Response,
}

#[derive(Debug, Clone, PartialEq)]
/// The structured payload of a [`Message`], discriminated by context.
pub enum MessagePayload {
    /// Primary asks Network for the last server-known ticket number and the
    /// current service type list.
    GetInitialData,
    /// Network's answer to [`MessagePayload::GetInitialData`].
    InitialData {
        last_ticket_sequence: u64,
        services: Vec<ServiceType>,
    },
    /// Primary asks Network for the current vehicle queue info, to shape the
    /// greeting audio.
    GetQueueVehicleInfo,
    /// Network's answer to [`MessagePayload::GetQueueVehicleInfo`].
    QueueInfo(VehicleQueueInfo),
    /// Primary hands a freshly-printed ticket to Network for registration.
    RegisterTicket(Ticket),
    /// Network (or Primary) reports a device health change to the
    /// Indicator.
    DeviceStatusChanged(DeviceStatus),
    /// Network's health-check loop detected a changed service list and
    /// forwards it to Primary to hot-swap.
    ListOfServicesUpdate(Vec<ServiceType>),
}

#[derive(Debug, Clone, PartialEq)]
/// The sole payload carried on every inter-worker queue.
pub struct Message {
    pub id: String,
    pub topic: Topic,
    pub kind: Kind,
    pub payload: MessagePayload,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Construct a new message with a fresh id and the current time.
    #[must_use]
    pub fn new(topic: Topic, kind: Kind, payload: MessagePayload) -> Message {
        Message {
            id: Uuid::new_v4().to_string(),
            topic,
            kind,
            payload,
            correlation_id: None,
            created_at: Utc::now(),
        }
    }

    /// Construct a new message correlated to an earlier one (e.g. a
    /// `RESPONSE` answering a `COMMAND`).
    #[must_use]
    pub fn new_correlated(
        topic: Topic,
        kind: Kind,
        payload: MessagePayload,
        correlation_id: &str,
    ) -> Message {
        let mut msg = Message::new(topic, kind, payload);
        msg.correlation_id = Some(correlation_id.to_string());
        msg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The ways a bounded `put` onto a worker's inbound queue can fail. A full
/// queue is an error, never a block-forever (`spec.md` §5, "Cancellation &
/// timeouts").
pub enum QueueError {
    /// The queue did not accept the message within its timeout.
    Full,
    /// The receiving end has been dropped; the worker has shut down.
    Disconnected,
}

impl Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Full => write!(f, "queue full"),
            QueueError::Disconnected => write!(f, "receiver disconnected"),
        }
    }
}

impl std::error::Error for QueueError {}

/// A `Sender<Message>` behind a mutex, so that a worker with more than one
/// internal producer (e.g. Network's request loop and health-check loop)
/// never interleaves two partially-constructed sends onto the same outbound
/// queue (`spec.md` §5, "Shared resources").
pub struct GuardedSender(Mutex<Sender<Message>>);

impl GuardedSender {
    #[must_use]
    pub fn new(sender: Sender<Message>) -> GuardedSender {
        GuardedSender(Mutex::new(sender))
    }

    /// Put `msg` onto the guarded queue, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] if `timeout` elapses before the message
    /// is accepted, or [`QueueError::Disconnected`] if the receiver is gone.
    pub fn put(&self, msg: Message, timeout: Duration) -> Result<(), QueueError> {
        let sender = self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        sender.send_timeout(msg, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(_) => QueueError::Full,
            SendTimeoutError::Disconnected(_) => QueueError::Disconnected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_messages_get_distinct_ids() {
        let a = Message::new(Topic::Network, Kind::Event, MessagePayload::GetInitialData);
        let b = Message::new(Topic::Network, Kind::Event, MessagePayload::GetInitialData);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn correlated_message_carries_parent_id() {
        let parent = Message::new(Topic::Network, Kind::Command, MessagePayload::GetInitialData);
        let reply = Message::new_correlated(
            Topic::Primary,
            Kind::Response,
            MessagePayload::GetInitialData,
            &parent.id,
        );
        assert_eq!(reply.correlation_id.as_deref(), Some(parent.id.as_str()));
    }

    #[test]
    fn guarded_sender_delivers_within_capacity() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let guarded = GuardedSender::new(tx);
        guarded
            .put(
                Message::new(Topic::Network, Kind::Event, MessagePayload::GetInitialData),
                Duration::from_millis(10),
            )
            .unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn guarded_sender_reports_full_queue() {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let guarded = GuardedSender::new(tx);
        guarded
            .put(
                Message::new(Topic::Network, Kind::Event, MessagePayload::GetInitialData),
                Duration::from_millis(10),
            )
            .unwrap();
        let err = guarded
            .put(
                Message::new(Topic::Network, Kind::Event, MessagePayload::GetInitialData),
                Duration::from_millis(10),
            )
            .unwrap_err();
        assert_eq!(err, QueueError::Full);
    }
}
