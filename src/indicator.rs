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

//! Non-blocking status LED driver.
//!
//! Each variant of [`Status`] implements the same contract: `tick(now)` is
//! called on every poll of the worker loop and must never sleep. A blinking
//! status remembers when it last toggled and only touches the driver once
//! its interval has elapsed, so the worker loop can run as fast as it likes
//! without flooding the GPIO line with redundant writes.

use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::domain::DeviceStatus;
use crate::hardware::DigitalOutput;
use crate::message::{Kind, Message, MessagePayload, Topic};

const NET_ERROR_BLINK_INTERVAL: Duration = Duration::from_millis(500);
const PRINTER_ERROR_BLINK_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
/// The LED's current behavior. Carries its own blink bookkeeping so `tick`
/// is a pure state transition plus (at most) one GPIO write.
pub enum Status {
    Shutdown,
    Fine,
    NetError {
        last_toggle: Option<Instant>,
        on: bool,
    },
    PrinterError {
        last_toggle: Option<Instant>,
        on: bool,
    },
}

impl Status {
    #[must_use]
    pub fn from_device_status(status: DeviceStatus) -> Status {
        match status {
            DeviceStatus::Fine => Status::Fine,
            DeviceStatus::NetError => Status::NetError {
                last_toggle: None,
                on: false,
            },
            DeviceStatus::PrinterError => Status::PrinterError {
                last_toggle: None,
                on: false,
            },
            DeviceStatus::Shutdown => Status::Shutdown,
        }
    }

    /// Advance the blink state machine and write to `led` if needed. Never
    /// sleeps; safe to call on every iteration of a tight poll loop.
    pub fn tick(&mut self, now: Instant, led: &mut dyn DigitalOutput) -> Result<(), gpio_cdev::Error> {
        match self {
            Status::Shutdown => led.off(),
            Status::Fine => led.on(),
            Status::NetError { last_toggle, on } => {
                blink(last_toggle, on, NET_ERROR_BLINK_INTERVAL, now, led)
            }
            Status::PrinterError { last_toggle, on } => {
                blink(last_toggle, on, PRINTER_ERROR_BLINK_INTERVAL, now, led)
            }
        }
    }
}

fn blink(
    last_toggle: &mut Option<Instant>,
    on: &mut bool,
    interval: Duration,
    now: Instant,
    led: &mut dyn DigitalOutput,
) -> Result<(), gpio_cdev::Error> {
    match *last_toggle {
        None => {
            *last_toggle = Some(now);
            *on = true;
            led.write(true)
        }
        Some(prev) if now.duration_since(prev) >= interval => {
            *on = !*on;
            *last_toggle = Some(now);
            led.write(*on)
        }
        Some(_) => Ok(()),
    }
}

/// Owns the status LED and the single inbound queue of device-status
/// events, polling both without ever blocking the worker thread.
pub struct IndicatorWorker {
    led: Box<dyn DigitalOutput + Send>,
    status: Status,
    inbox: Receiver<Message>,
}

impl IndicatorWorker {
    #[must_use]
    pub fn new(led: Box<dyn DigitalOutput + Send>, inbox: Receiver<Message>) -> IndicatorWorker {
        IndicatorWorker {
            led,
            status: Status::Shutdown,
            inbox,
        }
    }

    /// Drain every queued message, keeping only the last device-status seen
    /// (mirrors draining burst updates down to the freshest one), then tick
    /// the LED once.
    ///
    /// # Errors
    ///
    /// Returns an error if the LED write fails.
    pub fn poll(&mut self, now: Instant) -> Result<(), gpio_cdev::Error> {
        while let Ok(msg) = self.inbox.try_recv() {
            if msg.topic != Topic::Indicator || msg.kind != Kind::Event {
                continue;
            }
            if let MessagePayload::DeviceStatusChanged(status) = msg.payload {
                self.status = Status::from_device_status(status);
            }
        }
        self.status.tick(now, &mut self.led)
    }

    /// Run the poll loop until the channel is disconnected (all senders
    /// dropped), sleeping `poll_interval` between iterations.
    ///
    /// # Errors
    ///
    /// Returns an error if a LED write fails.
    pub fn run(&mut self, poll_interval: Duration) -> Result<(), gpio_cdev::Error> {
        loop {
            self.poll(Instant::now())?;
            if matches!(self.status, Status::Shutdown) {
                return Ok(());
            }
            if self.inbox.is_empty() && self.inbox_disconnected() {
                return Ok(());
            }
            std::thread::sleep(poll_interval);
        }
    }

    fn inbox_disconnected(&self) -> bool {
        // `try_recv` already drained everything available; a disconnected,
        // empty channel means every sender has been dropped and the
        // controller is shutting down.
        matches!(
            self.inbox.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::RecordingOutput;
    use crossbeam_channel::unbounded;

    #[test]
    fn fine_status_holds_led_on() {
        let mut led = RecordingOutput::new(false);
        let mut status = Status::Fine;
        status.tick(Instant::now(), &mut led).unwrap();
        assert!(led.last());
    }

    #[test]
    fn shutdown_status_holds_led_off() {
        let mut led = RecordingOutput::new(true);
        let mut status = Status::Shutdown;
        status.tick(Instant::now(), &mut led).unwrap();
        assert!(!led.last());
    }

    #[test]
    fn net_error_blinks_at_its_own_interval() {
        let mut led = RecordingOutput::new(false);
        let mut status = Status::NetError {
            last_toggle: None,
            on: false,
        };
        let t0 = Instant::now();
        status.tick(t0, &mut led).unwrap();
        assert!(led.last(), "first tick always turns the LED on");

        // Not enough time elapsed: no toggle.
        status.tick(t0 + Duration::from_millis(100), &mut led).unwrap();
        assert!(led.last());

        // Past the interval: toggles off.
        status.tick(t0 + Duration::from_millis(600), &mut led).unwrap();
        assert!(!led.last());
    }

    #[test]
    fn printer_error_blinks_faster_than_net_error() {
        let mut led = RecordingOutput::new(false);
        let mut status = Status::PrinterError {
            last_toggle: None,
            on: false,
        };
        let t0 = Instant::now();
        status.tick(t0, &mut led).unwrap();
        status.tick(t0 + Duration::from_millis(250), &mut led).unwrap();
        assert!(!led.last(), "printer error should have toggled off by 250ms");
    }

    #[test]
    fn worker_applies_latest_of_several_queued_events() {
        let (tx, rx) = unbounded();
        tx.send(Message::new(
            Topic::Indicator,
            Kind::Event,
            MessagePayload::DeviceStatusChanged(DeviceStatus::NetError),
        ))
        .unwrap();
        tx.send(Message::new(
            Topic::Indicator,
            Kind::Event,
            MessagePayload::DeviceStatusChanged(DeviceStatus::Fine),
        ))
        .unwrap();

        let mut worker = IndicatorWorker::new(Box::new(RecordingOutput::new(false)), rx);
        worker.poll(Instant::now()).unwrap();
        assert!(matches!(worker.status, Status::Fine));
    }

    #[test]
    fn run_exits_once_shutdown_is_applied() {
        let (tx, rx) = unbounded();
        tx.send(Message::new(
            Topic::Indicator,
            Kind::Event,
            MessagePayload::DeviceStatusChanged(DeviceStatus::Fine),
        ))
        .unwrap();
        tx.send(Message::new(
            Topic::Indicator,
            Kind::Event,
            MessagePayload::DeviceStatusChanged(DeviceStatus::Shutdown),
        ))
        .unwrap();

        let mut worker = IndicatorWorker::new(Box::new(RecordingOutput::new(true)), rx);
        worker.run(Duration::from_millis(1)).unwrap();
        assert!(matches!(worker.status, Status::Shutdown));
        assert!(!worker.led.is_on());
        // `tx` is still alive, so only the Shutdown status itself could have
        // ended the loop.
        drop(tx);
    }

    #[test]
    fn worker_ignores_messages_off_topic() {
        let (tx, rx) = unbounded();
        tx.send(Message::new(
            Topic::Primary,
            Kind::Event,
            MessagePayload::DeviceStatusChanged(DeviceStatus::NetError),
        ))
        .unwrap();

        let mut worker = IndicatorWorker::new(Box::new(RecordingOutput::new(false)), rx);
        worker.poll(Instant::now()).unwrap();
        assert!(matches!(worker.status, Status::Shutdown));
    }
}
