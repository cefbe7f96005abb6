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

//! The main vehicle transaction state machine.
//!
//! `Fsm` is a pure `(State, Event) -> State` transition table: an illegal
//! transition is logged and the state is left unchanged rather than
//! treated as an error, since a button bounce or a stray duplicate event
//! must never be fatal to an in-progress transaction. `PrimaryWorker` owns
//! every peripheral involved in a transaction and drives `Fsm` one step at
//! a time from its poll loop, so at most one vehicle is ever mid-transaction.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::console::UserLog;
use crate::domain::{self, DeviceStatus, ServiceType, Ticket};
use crate::ean;
use crate::hardware::audio::AudioPlayer;
use crate::hardware::printer::{TicketPrinter, TicketSlip};
use crate::hardware::{DigitalInput, DigitalOutput};
use crate::message::{GuardedSender, Kind, Message, MessagePayload, Topic};
use crate::sequence::SequenceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A step in a single vehicle transaction.
pub enum State {
    Idle,
    Greeting,
    SelectingService,
    GeneratingTicket,
    SendingData,
    PrintingTicket,
    FailedToPrint,
    GateOpen,
    VehicleStaying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// An event that may advance the transaction state machine.
pub enum Event {
    Arrived,
    LeaveWithoutSelecting,
    GreetingDone,
    ServiceSelected,
    TicketGenerated,
    DataSent,
    PrintDone,
    PrinterError,
    PrinterErrorAcknowledged,
    GateOpened,
    VehicleEnter,
    /// A fatal, per-transaction-only error (`InvalidConfig` or
    /// `InvalidTicketNumber`, `spec.md` §7) was detected. Distinct from
    /// [`Event::LeaveWithoutSelecting`], which models the driver physically
    /// leaving rather than a configuration/encoding failure; kept as its
    /// own event so the two causes are never conflated in a log or test.
    Aborted,
}

/// The transaction state machine: a closed table of legal `(State, Event)`
/// pairs and nothing else.
pub struct Fsm {
    state: State,
}

impl Default for Fsm {
    fn default() -> Self {
        Fsm { state: State::Idle }
    }
}

impl Fsm {
    #[must_use]
    pub fn new() -> Fsm {
        Fsm::default()
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Apply `event` if `(state, event)` is a legal transition. Returns
    /// `true` if the state changed, `false` if the event was ignored.
    pub fn trigger(&mut self, event: Event) -> bool {
        let next = match (self.state, event) {
            (State::Idle, Event::Arrived) => State::Greeting,
            (State::Greeting, Event::GreetingDone) => State::SelectingService,
            (State::Greeting, Event::ServiceSelected) => State::GeneratingTicket,
            (State::Greeting, Event::Aborted) => State::Idle,
            (State::SelectingService, Event::ServiceSelected) => State::GeneratingTicket,
            (State::SelectingService, Event::LeaveWithoutSelecting) => State::Idle,
            (State::GeneratingTicket, Event::TicketGenerated) => State::SendingData,
            (State::GeneratingTicket, Event::Aborted) => State::Idle,
            (State::SendingData, Event::DataSent) => State::PrintingTicket,
            (State::PrintingTicket, Event::PrintDone) => State::GateOpen,
            (State::PrintingTicket, Event::PrinterError) => State::FailedToPrint,
            (State::FailedToPrint, Event::PrinterErrorAcknowledged) => State::VehicleStaying,
            (State::GateOpen, Event::GateOpened) => State::VehicleStaying,
            (State::VehicleStaying, Event::VehicleEnter) => State::Idle,
            _ => return false,
        };
        self.state = next;
        true
    }
}

/// The four service-selection buttons, in first-press-wins priority order.
const BUTTON_ORDER: [u32; 4] = [1, 2, 3, 4];

/// The scripted greeting clip names, matching the asset set listed in
/// `spec.md` §6.
mod clip {
    pub const WELCOME: &str = "welcome";
    pub const ANNOUNCE_QUEUE: &str = "saat_ini";
    pub const VEHICLES_IN_QUEUE: &str = "kendaraan_dalam_antr";
    pub const ESTIMATED_TIME: &str = "estimasi_waktu";
    pub const TO: &str = "hingga";
    pub const MINUTES: &str = "menit";
    pub const CHOOSE_WASH_TYPE: &str = "pilih_jenis_cuci";
    pub const TAKING_TICKET: &str = "taking_ticket";
    pub const PRINTER_ERROR: &str = "printer_error";
}

/// Build the greeting clip sequence for a resolved estimate (or its
/// absence), per `spec.md` §4.1's "Greeting protocol".
fn greeting_clips(vehicles_ahead: Option<u32>, estimate: Option<(u32, u32)>) -> Vec<String> {
    let mut clips = vec![clip::WELCOME.to_string()];
    if let (Some(vehicles_ahead), Some((est_min, est_max))) = (vehicles_ahead, estimate) {
        clips.push(clip::ANNOUNCE_QUEUE.to_string());
        clips.push(vehicles_ahead.to_string());
        clips.push(clip::VEHICLES_IN_QUEUE.to_string());
        clips.push(clip::ESTIMATED_TIME.to_string());
        clips.push(est_min.to_string());
        clips.push(clip::TO.to_string());
        clips.push(est_max.to_string());
        clips.push(clip::MINUTES.to_string());
    }
    clips.push(clip::CHOOSE_WASH_TYPE.to_string());
    clips
}

/// Owns every peripheral and channel endpoint involved in a vehicle
/// transaction, and drives the state machine one non-blocking step at a
/// time.
pub struct PrimaryWorker<W: Write> {
    loop_sensor: Box<dyn DigitalInput + Send>,
    buttons: [Box<dyn DigitalInput + Send>; 4],
    gate: Box<dyn DigitalOutput + Send>,
    printer: Box<dyn TicketPrinter + Send>,
    audio: Box<dyn AudioPlayer + Send>,
    sequence: SequenceStore,
    services: Vec<ServiceType>,
    to_network: Arc<GuardedSender>,
    from_network: Receiver<Message>,
    to_indicator: crossbeam_channel::Sender<Message>,
    fsm: Fsm,
    selected_service: Option<ServiceType>,
    generated_ticket: Option<Ticket>,
    console: Arc<UserLog<W>>,
    failed_print_hold: Duration,
    queue_info_timeout: Duration,
    network_put_timeout: Duration,
    est_min_const: u32,
    est_max_const: u32,
}

#[allow(clippy::too_many_arguments)]
/// Everything a [`PrimaryWorker`] needs beyond its peripherals and channel
/// endpoints. Bundled into one struct since [`PrimaryWorker::new`] already
/// takes five peripheral handles and three channel endpoints.
pub struct Timing {
    pub failed_print_hold: Duration,
    pub queue_info_timeout: Duration,
    pub network_put_timeout: Duration,
    pub est_min_const: u32,
    pub est_max_const: u32,
}

impl<W: Write> PrimaryWorker<W> {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        loop_sensor: Box<dyn DigitalInput + Send>,
        buttons: [Box<dyn DigitalInput + Send>; 4],
        gate: Box<dyn DigitalOutput + Send>,
        printer: Box<dyn TicketPrinter + Send>,
        audio: Box<dyn AudioPlayer + Send>,
        sequence: SequenceStore,
        services: Vec<ServiceType>,
        to_network: Arc<GuardedSender>,
        from_network: Receiver<Message>,
        to_indicator: crossbeam_channel::Sender<Message>,
        console: Arc<UserLog<W>>,
        timing: Timing,
    ) -> PrimaryWorker<W> {
        let _ = to_indicator.send(Message::new(
            Topic::Indicator,
            Kind::Event,
            MessagePayload::DeviceStatusChanged(DeviceStatus::Fine),
        ));
        PrimaryWorker {
            loop_sensor,
            buttons,
            gate,
            printer,
            audio,
            sequence,
            services,
            to_network,
            from_network,
            to_indicator,
            fsm: Fsm::new(),
            selected_service: None,
            generated_ticket: None,
            console,
            failed_print_hold: timing.failed_print_hold,
            queue_info_timeout: timing.queue_info_timeout,
            network_put_timeout: timing.network_put_timeout,
            est_min_const: timing.est_min_const,
            est_max_const: timing.est_max_const,
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.fsm.state()
    }

    fn vehicle_present(&mut self) -> bool {
        match self.loop_sensor.read() {
            Ok(present) => present,
            Err(e) => {
                let _ = self.console.warn(&format!("loop sensor read failed: {e}"));
                false
            }
        }
    }

    fn drain_service_updates(&mut self) {
        while let Ok(msg) = self.from_network.try_recv() {
            if msg.topic != Topic::Primary {
                continue;
            }
            if let MessagePayload::ListOfServicesUpdate(services) = msg.payload {
                let _ = self
                    .console
                    .info(&format!("service list updated: {} entries", services.len()));
                self.services = services;
            }
        }
    }

    /// Poll every button once, first-press-wins in `BUTTON_ORDER`.
    fn pressed_button(&mut self) -> Option<u32> {
        for (idx, id) in BUTTON_ORDER.iter().enumerate() {
            match self.buttons[idx].read() {
                Ok(true) => return Some(*id),
                Ok(false) => {}
                Err(e) => {
                    let _ = self.console.warn(&format!("button {id} read failed: {e}"));
                }
            }
        }
        None
    }

    /// Ask Network for the current queue info, waiting up to
    /// `queue_info_timeout`. Returns `None` on a timeout, a full outbound
    /// queue, or a disconnected channel, mirroring "on timeout it proceeds
    /// without estimate announcements" (`spec.md` §4.1).
    fn request_queue_info(&mut self) -> Option<domain::VehicleQueueInfo> {
        let request = Message::new(Topic::Network, Kind::Command, MessagePayload::GetQueueVehicleInfo);
        let correlation_id = request.id.clone();
        if let Err(e) = self.to_network.put(request, self.network_put_timeout) {
            let _ = self
                .console
                .warn(&format!("could not request queue info: {e}"));
            return None;
        }

        let deadline = Instant::now() + self.queue_info_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let _ = self.console.warn("queue info request timed out");
                return None;
            }
            match self.from_network.recv_timeout(remaining) {
                Ok(msg) if msg.topic == Topic::Primary => {
                    if msg.correlation_id.as_deref() != Some(correlation_id.as_str()) {
                        // Not the response we're waiting on (e.g. a
                        // service-list hot-swap event); keep waiting within
                        // the same deadline.
                        continue;
                    }
                    return match msg.payload {
                        MessagePayload::QueueInfo(info) => Some(info),
                        _ => None,
                    };
                }
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    let _ = self.console.warn("queue info request timed out");
                    return None;
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Run the entire greeting: fetch queue info, play the scripted clip
    /// sequence, and either fall through to `SelectingService` normally or
    /// short-circuit straight to ticket generation if a button interrupts
    /// playback. This is one of the few places Primary is allowed to block
    /// (`spec.md` §5, "Suspension points").
    fn run_greeting(&mut self) {
        let queue_info = self.request_queue_info();
        let (vehicles_ahead, computed) = match &queue_info {
            None => (None, None),
            Some(info) => match domain::estimate(info, self.est_min_const, self.est_max_const) {
                Ok(est) => (Some(info.vehicles_ahead), est),
                Err(e) => {
                    let _ = self
                        .console
                        .critical(&format!("invalid queue info configuration: {e}"));
                    self.fsm.trigger(Event::Aborted);
                    return;
                }
            },
        };
        let clips = greeting_clips(vehicles_ahead, computed);

        for name in clips {
            let _ = self.audio.play(&name);
            loop {
                if let Some(button) = self.pressed_button() {
                    self.audio.stop();
                    let service = self.services.iter().find(|s| s.id == button).cloned();
                    if let Some(service) = service {
                        self.selected_service = Some(service);
                        self.fsm.trigger(Event::GreetingDone);
                        self.fsm.trigger(Event::ServiceSelected);
                        return;
                    }
                    let _ = self
                        .console
                        .warn(&format!("button {button} has no matching service"));
                }
                if !self.audio.is_busy() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }

        self.fsm.trigger(Event::GreetingDone);
    }

    /// Run exactly one non-blocking step of the transaction state machine.
    /// Must be called repeatedly from a poll loop; never sleeps except for
    /// the bounded, intentional hold after a printer failure and the
    /// blocking greeting/selection audio playback, both explicit suspension
    /// points per `spec.md` §5.
    pub fn tick(&mut self) {
        self.drain_service_updates();

        match self.fsm.state() {
            State::Idle => {
                self.audio.stop();
                let _ = self.gate.off();
                self.selected_service = None;
                self.generated_ticket = None;
                if self.vehicle_present() {
                    self.fsm.trigger(Event::Arrived);
                }
            }
            State::Greeting => self.run_greeting(),
            State::SelectingService => {
                if self.selected_service.is_none() {
                    if !self.vehicle_present() {
                        self.fsm.trigger(Event::LeaveWithoutSelecting);
                        return;
                    }
                    if let Some(button) = self.pressed_button() {
                        let clip = format!("service_{button}");
                        let _ = self.audio.play(&clip);
                        self.selected_service =
                            self.services.iter().find(|s| s.id == button).cloned();
                    }
                } else if !self.audio.is_busy() {
                    // The acknowledgement tone is not preemptible: we only
                    // advance once it finishes playing.
                    self.fsm.trigger(Event::ServiceSelected);
                }
            }
            State::GeneratingTicket => {
                let Some(service) = self.selected_service.clone() else {
                    self.fsm.trigger(Event::Aborted);
                    return;
                };
                let sequence = self.sequence.reserve();
                match ean::encode(service.id, sequence) {
                    Ok(ticket_number) => {
                        self.generated_ticket = Some(Ticket {
                            id: None,
                            service_type_id: service.id,
                            ticket_number,
                            entry_time: chrono::Utc::now(),
                        });
                        self.fsm.trigger(Event::TicketGenerated);
                    }
                    Err(e) => {
                        let _ = self
                            .console
                            .critical(&format!("cannot encode ticket number, aborting transaction: {e}"));
                        self.fsm.trigger(Event::Aborted);
                    }
                }
            }
            State::SendingData => {
                if let Some(ticket) = self.generated_ticket.clone() {
                    let msg = Message::new(Topic::Network, Kind::Event, MessagePayload::RegisterTicket(ticket));
                    if let Err(e) = self.to_network.put(msg, self.network_put_timeout) {
                        let _ = self
                            .console
                            .warn(&format!("could not hand ticket to network worker: {e}"));
                        let _ = self.to_indicator.send(Message::new(
                            Topic::Indicator,
                            Kind::Event,
                            MessagePayload::DeviceStatusChanged(DeviceStatus::NetError),
                        ));
                    }
                }
                self.fsm.trigger(Event::DataSent);
            }
            State::PrintingTicket => {
                let (Some(ticket), Some(service)) =
                    (self.generated_ticket.clone(), self.selected_service.clone())
                else {
                    self.fsm.trigger(Event::PrinterError);
                    return;
                };
                let slip = TicketSlip {
                    ticket_number: &ticket.ticket_number,
                    service: &service,
                    entry_time: ticket.entry_time,
                };
                match self.printer.print(&slip) {
                    Ok(()) => {
                        if let Err(e) = self.sequence.confirm() {
                            let _ = self
                                .console
                                .critical(&format!("failed to persist ticket sequence: {e}"));
                        }
                        // Network is the sole authority on FINE/NET_ERROR
                        // (its health check already owns recovery); a
                        // successful print must not race a concurrent
                        // NET_ERROR on the indicator's last-writer-wins
                        // inbox.
                        self.fsm.trigger(Event::PrintDone);
                    }
                    Err(e) => {
                        // The reserved sequence was never persisted
                        // (`SequenceStore::confirm` was never called), so the
                        // same sequence is reissued on the next attempt; the
                        // gate is never pulsed for this transaction.
                        let _ = self
                            .console
                            .warn(&format!("ticket not printed, printer error: {e}"));
                        let _ = self.to_indicator.send(Message::new(
                            Topic::Indicator,
                            Kind::Event,
                            MessagePayload::DeviceStatusChanged(DeviceStatus::PrinterError),
                        ));
                        self.fsm.trigger(Event::PrinterError);
                    }
                }
            }
            State::GateOpen => {
                let _ = self.gate.on();
                let _ = self.audio.play(clip::TAKING_TICKET);
                self.fsm.trigger(Event::GateOpened);
            }
            State::VehicleStaying => {
                if !self.vehicle_present() {
                    self.fsm.trigger(Event::VehicleEnter);
                }
            }
            State::FailedToPrint => {
                let _ = self.audio.play(clip::PRINTER_ERROR);
                std::thread::sleep(self.failed_print_hold);
                self.fsm.trigger(Event::PrinterErrorAcknowledged);
            }
        }
    }

    /// Run the transaction loop forever, sleeping `poll_interval` between
    /// steps.
    pub fn run(&mut self, poll_interval: Duration) -> ! {
        loop {
            let started = Instant::now();
            self.tick();
            let elapsed = started.elapsed();
            if elapsed < poll_interval {
                std::thread::sleep(poll_interval - elapsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QueueMode;
    use crate::hardware::audio::RecordingPlayer;
    use crate::hardware::printer::{FailingPrinter, RecordingPrinter};
    use crate::hardware::{RecordingOutput, ScriptedInput};
    use crossbeam_channel::unbounded;
    use rust_decimal_macros::dec;
    use std::io::sink;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_CURSOR_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_cursor_path() -> std::path::PathBuf {
        let n = TEST_CURSOR_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("primary-test-cursor-{}-{n}", std::process::id()))
    }

    fn service(id: u32) -> ServiceType {
        ServiceType {
            id,
            name: format!("Service {id}"),
            description: String::new(),
            price: crate::domain::Price::new(dec!(10000.00)).unwrap(),
        }
    }

    fn default_timing() -> Timing {
        Timing {
            failed_print_hold: Duration::from_millis(1),
            queue_info_timeout: Duration::from_millis(50),
            network_put_timeout: Duration::from_millis(50),
            est_min_const: 1,
            est_max_const: 2,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn worker_with(
        loop_present: Vec<bool>,
        button1: Vec<bool>,
        audio_loaded: Vec<String>,
    ) -> (PrimaryWorker<std::io::Sink>, Receiver<Message>) {
        let buttons: [Box<dyn DigitalInput + Send>; 4] = [
            Box::new(ScriptedInput::new(button1)),
            Box::new(ScriptedInput::new(vec![false])),
            Box::new(ScriptedInput::new(vec![false])),
            Box::new(ScriptedInput::new(vec![false])),
        ];
        let (to_net, from_net_rx) = unbounded();
        let (_to_primary_tx, from_net) = unbounded();
        let (to_indicator, _indicator_rx) = unbounded();

        let worker = PrimaryWorker::new(
            Box::new(ScriptedInput::new(loop_present)),
            buttons,
            Box::new(RecordingOutput::new(false)),
            Box::new(RecordingPrinter::new()),
            Box::new(RecordingPlayer::new(audio_loaded)),
            SequenceStore::boot(unique_cursor_path(), 0),
            vec![service(1), service(2)],
            Arc::new(GuardedSender::new(to_net)),
            from_net,
            to_indicator,
            Arc::new(UserLog::new(sink())),
            default_timing(),
        );
        (worker, from_net_rx)
    }

    #[test]
    fn fsm_ignores_illegal_transition() {
        let mut fsm = Fsm::new();
        assert!(!fsm.trigger(Event::GreetingDone));
        assert_eq!(fsm.state(), State::Idle);
    }

    #[test]
    fn fsm_walks_full_happy_path() {
        let mut fsm = Fsm::new();
        assert!(fsm.trigger(Event::Arrived));
        assert!(fsm.trigger(Event::GreetingDone));
        assert!(fsm.trigger(Event::ServiceSelected));
        assert!(fsm.trigger(Event::TicketGenerated));
        assert!(fsm.trigger(Event::DataSent));
        assert!(fsm.trigger(Event::PrintDone));
        assert!(fsm.trigger(Event::GateOpened));
        assert!(fsm.trigger(Event::VehicleEnter));
        assert_eq!(fsm.state(), State::Idle);
    }

    #[test]
    fn fsm_printer_error_routes_through_failed_to_print() {
        let mut fsm = Fsm::new();
        fsm.trigger(Event::Arrived);
        fsm.trigger(Event::GreetingDone);
        fsm.trigger(Event::ServiceSelected);
        fsm.trigger(Event::TicketGenerated);
        fsm.trigger(Event::DataSent);
        assert!(fsm.trigger(Event::PrinterError));
        assert_eq!(fsm.state(), State::FailedToPrint);
        assert!(fsm.trigger(Event::PrinterErrorAcknowledged));
        assert_eq!(fsm.state(), State::VehicleStaying);
    }

    #[test]
    fn fsm_greeting_interrupt_reaches_generating_ticket() {
        let mut fsm = Fsm::new();
        fsm.trigger(Event::Arrived);
        assert!(fsm.trigger(Event::ServiceSelected));
        assert_eq!(fsm.state(), State::GeneratingTicket);
    }

    #[test]
    fn fsm_aborted_returns_to_idle_from_generating_ticket() {
        let mut fsm = Fsm::new();
        fsm.trigger(Event::Arrived);
        fsm.trigger(Event::GreetingDone);
        fsm.trigger(Event::ServiceSelected);
        assert!(fsm.trigger(Event::Aborted));
        assert_eq!(fsm.state(), State::Idle);
    }

    #[test]
    fn greeting_clips_suppress_estimate_when_none() {
        let clips = greeting_clips(None, None);
        assert_eq!(clips, vec!["welcome".to_string(), "pilih_jenis_cuci".to_string()]);
    }

    #[test]
    fn greeting_clips_announce_estimate_when_present() {
        let clips = greeting_clips(Some(3), Some((14, 17)));
        assert_eq!(
            clips,
            vec![
                "welcome", "saat_ini", "3", "kendaraan_dalam_antr", "estimasi_waktu", "14",
                "hingga", "17", "menit", "pilih_jenis_cuci",
            ]
        );
    }

    #[test]
    fn idle_stays_idle_without_a_vehicle() {
        let (mut worker, _rx) = worker_with(vec![false], vec![false], vec!["greeting".into()]);
        worker.tick();
        assert_eq!(worker.state(), State::Idle);
    }

    #[test]
    fn idle_moves_to_greeting_when_vehicle_arrives() {
        let (mut worker, _rx) = worker_with(vec![true], vec![false], vec!["greeting".into()]);
        worker.tick();
        assert_eq!(worker.state(), State::Greeting);
    }

    #[test]
    fn greeting_times_out_and_falls_through_to_selecting_service() {
        // No one answers the queue-info request, so the bounded wait in
        // `request_queue_info` elapses and the greeting proceeds without an
        // estimate (scenario-equivalent to S4/S1's boot path).
        let (mut worker, _from_net_rx) = worker_with(
            vec![true, true],
            vec![false],
            vec!["welcome".into(), "pilih_jenis_cuci".into()],
        );
        worker.tick(); // Idle -> Greeting
        worker.tick(); // Greeting runs to completion (queue info times out)
        assert_eq!(worker.state(), State::SelectingService);
    }

    #[test]
    fn leaving_before_selecting_returns_to_idle() {
        let (mut worker, _rx) = worker_with(
            vec![true, true, false],
            vec![false],
            vec!["welcome".into(), "pilih_jenis_cuci".into()],
        );
        worker.tick(); // Idle -> Greeting
        worker.tick(); // Greeting (times out) -> SelectingService
        worker.tick(); // vehicle gone -> Idle
        assert_eq!(worker.state(), State::Idle);
    }

    #[test]
    fn full_transaction_prints_and_opens_gate() {
        // Plenty of "vehicle present" reads to cover every state before the
        // vehicle leaves, then it departs for good.
        let mut loop_present = vec![true; 20];
        loop_present.push(false);
        let (mut worker, _rx) = worker_with(
            loop_present,
            vec![true],
            vec![
                "welcome".into(),
                "pilih_jenis_cuci".into(),
                "service_1".into(),
                "taking_ticket".into(),
            ],
        );
        for _ in 0..40 {
            worker.tick();
        }
        assert_eq!(worker.state(), State::Idle);
    }

    #[test]
    fn printer_failure_never_confirms_sequence() {
        let cursor_path = unique_cursor_path();
        let buttons: [Box<dyn DigitalInput + Send>; 4] = [
            Box::new(ScriptedInput::new(vec![true])),
            Box::new(ScriptedInput::new(vec![false])),
            Box::new(ScriptedInput::new(vec![false])),
            Box::new(ScriptedInput::new(vec![false])),
        ];
        let (to_net, _r1) = unbounded();
        let (_s1, from_net) = unbounded();
        let (to_indicator, indicator_rx) = unbounded();

        let mut worker = PrimaryWorker::new(
            Box::new(ScriptedInput::new(vec![true, true, true, true, true])),
            buttons,
            Box::new(RecordingOutput::new(false)),
            Box::new(FailingPrinter),
            Box::new(RecordingPlayer::new(vec![
                "welcome".into(),
                "pilih_jenis_cuci".into(),
                "service_1".into(),
                "printer_error".into(),
            ])),
            SequenceStore::boot(cursor_path.clone(), 0),
            vec![service(1)],
            Arc::new(GuardedSender::new(to_net)),
            from_net,
            to_indicator,
            Arc::new(UserLog::new(sink())),
            default_timing(),
        );

        worker.fsm.trigger(Event::Arrived);
        worker.fsm.trigger(Event::GreetingDone);
        worker.selected_service = Some(service(1));
        worker.fsm.trigger(Event::ServiceSelected);
        worker.tick(); // GeneratingTicket -> SendingData
        worker.tick(); // SendingData -> PrintingTicket
        worker.tick(); // PrintingTicket fails -> FailedToPrint

        assert_eq!(worker.state(), State::FailedToPrint);
        assert!(indicator_rx
            .try_iter()
            .any(|m| matches!(
                m.payload,
                MessagePayload::DeviceStatusChanged(DeviceStatus::PrinterError)
            )));
        assert_eq!(crate::sequence::load(&cursor_path), 0);
        let _ = std::fs::remove_file(&cursor_path);
    }

    #[test]
    fn ean_overflow_aborts_instead_of_advancing() {
        let cursor_path = unique_cursor_path();
        // Seed the cursor so the next reserved sequence overflows 7 digits.
        crate::sequence::persist(&cursor_path, ean::SEQUENCE_WRAP - 1).unwrap();
        let buttons: [Box<dyn DigitalInput + Send>; 4] = [
            Box::new(ScriptedInput::new(vec![false])),
            Box::new(ScriptedInput::new(vec![false])),
            Box::new(ScriptedInput::new(vec![false])),
            Box::new(ScriptedInput::new(vec![false])),
        ];
        let (to_net, _r1) = unbounded();
        let (_s1, from_net) = unbounded();
        let (to_indicator, _indicator_rx) = unbounded();

        let mut worker = PrimaryWorker::new(
            Box::new(ScriptedInput::new(vec![true])),
            buttons,
            Box::new(RecordingOutput::new(false)),
            Box::new(RecordingPrinter::new()),
            Box::new(RecordingPlayer::new(vec![])),
            SequenceStore::boot(cursor_path.clone(), 0),
            vec![service(1)],
            Arc::new(GuardedSender::new(to_net)),
            from_net,
            to_indicator,
            Arc::new(UserLog::new(sink())),
            default_timing(),
        );

        worker.fsm.trigger(Event::Arrived);
        worker.fsm.trigger(Event::GreetingDone);
        worker.selected_service = Some(service(1));
        worker.fsm.trigger(Event::ServiceSelected);
        // `SequenceStore::boot` set `next` to `SEQUENCE_WRAP`, one past the
        // last 7-digit-representable sequence; encoding must fail and abort.
        worker.tick();

        assert_eq!(worker.state(), State::Idle);
        assert_eq!(crate::sequence::load(&cursor_path), ean::SEQUENCE_WRAP - 1);
        let _ = std::fs::remove_file(&cursor_path);
    }

    #[test]
    fn queue_mode_off_is_reported_without_estimate() {
        let info = domain::VehicleQueueInfo {
            vehicles_ahead: 0,
            mode: QueueMode::Off,
            est_min: 0,
            est_max: 0,
            time_per_vehicle: None,
        };
        assert_eq!(domain::estimate(&info, 1, 2), Ok(None));
    }
}
