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

//! The backend I/O worker.
//!
//! `NetworkWorker` runs two independent loops against one shared
//! [`BackendClient`]: a request loop answering Primary's synchronous asks
//! (initial data, queue info, ticket registration) and a health-check loop
//! polling the backend every `health_check_interval` to detect service-list
//! changes and drain anything the request loop could not deliver while the
//! backend was unreachable.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::backend::BackendClient;
use crate::console::UserLog;
use crate::domain::{DeviceStatus, ServiceType, Ticket};
use crate::message::{GuardedSender, Kind, Message, MessagePayload, Topic};

/// How long a send to Primary or Indicator may block before being dropped
/// with a warning. Generous relative to either worker's poll interval, since
/// a persistently full inbox means that worker has stalled.
const OUTBOUND_PUT_TIMEOUT: Duration = Duration::from_millis(500);

/// A ticket registration that could not be delivered and is waiting for the
/// backend to come back. Bounded; the oldest entry is dropped (with a
/// warning) once `capacity` is exceeded, since an unbounded queue would let
/// a long backend outage exhaust memory (`spec.md` §5, "Pending queue").
struct PendingQueue {
    tickets: VecDeque<Ticket>,
    capacity: usize,
}

impl PendingQueue {
    fn new(capacity: usize) -> PendingQueue {
        PendingQueue {
            tickets: VecDeque::new(),
            capacity,
        }
    }

    /// Enqueue `ticket`, dropping the oldest entry if this would exceed
    /// `capacity`. Returns the dropped ticket, if any.
    fn push(&mut self, ticket: Ticket) -> Option<Ticket> {
        let dropped = if self.tickets.len() >= self.capacity {
            self.tickets.pop_front()
        } else {
            None
        };
        self.tickets.push_back(ticket);
        dropped
    }

    fn pop_front(&mut self) -> Option<Ticket> {
        self.tickets.pop_front()
    }

    fn push_front(&mut self, ticket: Ticket) {
        self.tickets.push_front(ticket);
    }

    fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

/// Runs Network's two loops over one shared backend client.
pub struct NetworkWorker<W: Write> {
    backend: Arc<dyn BackendClient>,
    inbox: Receiver<Message>,
    to_primary: Arc<GuardedSender>,
    to_indicator: Sender<Message>,
    pending: Mutex<PendingQueue>,
    console: Arc<UserLog<W>>,
    stop: Arc<AtomicBool>,
    health_check_interval: Duration,
}

impl<W: Write + Send + Sync + 'static> NetworkWorker<W> {
    #[must_use]
    pub fn new(
        backend: Arc<dyn BackendClient>,
        inbox: Receiver<Message>,
        to_primary: Arc<GuardedSender>,
        to_indicator: Sender<Message>,
        console: Arc<UserLog<W>>,
        pending_queue_capacity: usize,
        health_check_interval: Duration,
    ) -> NetworkWorker<W> {
        NetworkWorker {
            backend,
            inbox,
            to_primary,
            to_indicator,
            pending: Mutex::new(PendingQueue::new(pending_queue_capacity)),
            console,
            stop: Arc::new(AtomicBool::new(false)),
            health_check_interval,
        }
    }

    /// A cancellation handle: calling `store(true, ...)` on it causes both
    /// loops to return on their next wakeup.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn report_status(&self, status: DeviceStatus) {
        let _ = self.to_indicator.send(Message::new(
            Topic::Indicator,
            Kind::Event,
            MessagePayload::DeviceStatusChanged(status),
        ));
    }

    /// Handle one inbound message, sending a correlated response back to
    /// Primary where one is expected. Requests are handled strictly in
    /// arrival order; there is no speculative reordering (`spec.md` §5,
    /// "Strict ordering").
    fn handle_request(&self, msg: Message) {
        if msg.topic != Topic::Network {
            return;
        }
        match msg.payload {
            MessagePayload::GetInitialData => match self.backend.get_initial_data() {
                Ok((last_ticket_sequence, services)) => {
                    self.report_status(DeviceStatus::Fine);
                    let reply = Message::new_correlated(
                        Topic::Primary,
                        Kind::Response,
                        MessagePayload::InitialData {
                            last_ticket_sequence,
                            services,
                        },
                        &msg.id,
                    );
                    let _ = self.to_primary.put(reply, OUTBOUND_PUT_TIMEOUT);
                }
                Err(e) => {
                    let _ = self
                        .console
                        .warn(&format!("could not fetch initial data: {e}"));
                    self.report_status(DeviceStatus::NetError);
                }
            },
            MessagePayload::GetQueueVehicleInfo => match self.backend.get_queue_info() {
                Ok(info) => {
                    self.report_status(DeviceStatus::Fine);
                    let reply = Message::new_correlated(
                        Topic::Primary,
                        Kind::Response,
                        MessagePayload::QueueInfo(info),
                        &msg.id,
                    );
                    let _ = self.to_primary.put(reply, OUTBOUND_PUT_TIMEOUT);
                }
                Err(e) => {
                    let _ = self
                        .console
                        .warn(&format!("could not fetch queue info: {e}"));
                    self.report_status(DeviceStatus::NetError);
                }
            },
            MessagePayload::RegisterTicket(ticket) => self.register_or_enqueue(ticket),
            _ => {}
        }
    }

    fn register_or_enqueue(&self, ticket: Ticket) {
        match self.backend.register_ticket(&ticket) {
            Ok(_) => self.report_status(DeviceStatus::Fine),
            Err(e) => {
                let _ = self
                    .console
                    .warn(&format!("ticket registration failed, queuing for retry: {e}"));
                self.report_status(DeviceStatus::NetError);
                let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Some(dropped) = pending.push(ticket) {
                    let _ = self.console.warn(&format!(
                        "pending ticket queue full, dropped oldest ticket {}",
                        dropped.ticket_number
                    ));
                }
            }
        }
    }

    /// Drain the pending queue against the backend, FIFO, stopping at the
    /// first failure (the backend is presumed still down, so there is no
    /// point trying the rest this round).
    fn drain_pending(&self) {
        loop {
            let next = {
                let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                pending.pop_front()
            };
            let Some(ticket) = next else { break };
            match self.backend.register_ticket(&ticket) {
                Ok(_) => {}
                Err(e) => {
                    let _ = self
                        .console
                        .warn(&format!("retry of queued ticket {} failed: {e}", ticket.ticket_number));
                    let mut pending = self.pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    pending.push_front(ticket);
                    break;
                }
            }
        }
    }

    /// The request loop: services Primary's commands and events one at a
    /// time, blocking on the inbound queue between messages.
    pub fn run_requests(&self) {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            match self.inbox.recv_timeout(Duration::from_millis(200)) {
                Ok(msg) => self.handle_request(msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// The health-check loop: every `health_check_interval`, fetch the
    /// current service list and forward it to Primary if it changed, then
    /// attempt to drain the pending queue.
    pub fn run_health_check(&self) {
        let mut last_services: Option<Vec<ServiceType>> = None;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            let started = Instant::now();

            match self.backend.get_services() {
                Ok(services) => {
                    self.report_status(DeviceStatus::Fine);
                    if last_services.as_ref() != Some(&services) {
                        let _ = self.to_primary.put(
                            Message::new(
                                Topic::Primary,
                                Kind::Event,
                                MessagePayload::ListOfServicesUpdate(services.clone()),
                            ),
                            OUTBOUND_PUT_TIMEOUT,
                        );
                        last_services = Some(services);
                    }
                    self.drain_pending();
                }
                Err(e) => {
                    let _ = self
                        .console
                        .warn(&format!("health check failed: {e}"));
                    self.report_status(DeviceStatus::NetError);
                }
            }

            let elapsed = started.elapsed();
            if elapsed < self.health_check_interval {
                std::thread::sleep(self.health_check_interval - elapsed);
            }
        }
    }
}

/// Construct the `(outbound sender, inbound receiver)` pair a caller wires
/// into [`NetworkWorker`] and the other two workers, wrapping the sender in
/// a [`GuardedSender`] so every producer shares one mutex-guarded handle.
#[must_use]
pub fn channel(capacity: usize) -> (Arc<GuardedSender>, Receiver<Message>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (Arc::new(GuardedSender::new(tx)), rx)
}
