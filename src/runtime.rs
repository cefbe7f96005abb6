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

//! Process entry point: hardware construction and worker supervision.
//!
//! [`MakeHardware`] exists so the real GPIO/USB/HTTP stack can be swapped for
//! test doubles without touching [`run`] itself, the same dependency
//! injection shape used to spoof a rocket controller's ADCs and drivers for
//! development off target hardware.

use std::fs::{create_dir_all, File};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

use crate::backend::{BackendClient, HttpBackendClient};
use crate::config::Configuration;
use crate::console::UserLog;
use crate::hardware::audio::{AplayPlayer, AudioPlayer};
use crate::hardware::printer::{EscposUsbPrinter, TicketPrinter};
use crate::hardware::{DigitalInput, DigitalOutput};
use crate::indicator::IndicatorWorker;
use crate::network::{self, NetworkWorker};
use crate::primary::{PrimaryWorker, Timing};
use crate::sequence::SequenceStore;
use crate::ControllerError;

/// How often Primary and Indicator poll their peripherals and inbound
/// queues when there is nothing waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Constructs every piece of hardware the controller needs. Exists so the
/// worker-wiring logic in [`run`] can be exercised against a `Dummy`
/// implementation without any real GPIO, USB, or network access.
pub trait MakeHardware {
    type Chip;
    type Input: DigitalInput + Send + 'static;
    type Output: DigitalOutput + Send + 'static;

    /// # Errors
    ///
    /// Returns an error if the underlying chip cannot be opened.
    fn chip() -> Result<Self::Chip, ControllerError>;

    /// # Errors
    ///
    /// Returns an error if `pin` cannot be requested as an input line.
    fn input(chip: &mut Self::Chip, pin: u8) -> Result<Self::Input, ControllerError>;

    /// # Errors
    ///
    /// Returns an error if `pin` cannot be requested as an output line.
    fn output(chip: &mut Self::Chip, pin: u8) -> Result<Self::Output, ControllerError>;

    fn printer(config: &Configuration) -> Box<dyn TicketPrinter + Send>;

    fn audio(config: &Configuration) -> Box<dyn AudioPlayer + Send>;

    fn backend(config: &Configuration) -> Arc<dyn BackendClient>;
}

/// The hardware maker for the real device.
pub struct RaspberryPi;

impl MakeHardware for RaspberryPi {
    type Chip = Chip;
    type Input = LineHandle;
    type Output = LineHandle;

    fn chip() -> Result<Self::Chip, ControllerError> {
        Ok(Chip::new("/dev/gpiochip0")?)
    }

    fn input(chip: &mut Self::Chip, pin: u8) -> Result<Self::Input, ControllerError> {
        Ok(chip
            .get_line(u32::from(pin))?
            .request(LineRequestFlags::INPUT, 0, "dispenser")?)
    }

    fn output(chip: &mut Self::Chip, pin: u8) -> Result<Self::Output, ControllerError> {
        Ok(chip
            .get_line(u32::from(pin))?
            .request(LineRequestFlags::OUTPUT, 0, "dispenser")?)
    }

    fn printer(config: &Configuration) -> Box<dyn TicketPrinter + Send> {
        Box::new(EscposUsbPrinter::new(
            config.printer_vendor_id,
            config.printer_product_id,
            Duration::from_millis(config.printer_timeout_ms),
        ))
    }

    fn audio(config: &Configuration) -> Box<dyn AudioPlayer + Send> {
        let mut player = AplayPlayer::new();
        let clips: Vec<(String, PathBuf)> = config
            .audio_clips
            .iter()
            .map(|c| (c.name.clone(), c.path.clone()))
            .collect();
        player.load_all(&clips, &config.audio_base_dir);
        Box::new(player)
    }

    fn backend(config: &Configuration) -> Arc<dyn BackendClient> {
        Arc::new(HttpBackendClient::new(
            config.backend_base_url.clone(),
            Duration::from_millis(config.backend_timeout_ms),
        ))
    }
}

/// A hardware maker for exercising the controller on any Linux machine, with
/// no real GPIO chip, USB printer, ALSA output or backend connection: every
/// peripheral is a recording/stub double.
pub struct Dummy;

impl MakeHardware for Dummy {
    type Chip = ();
    type Input = crate::hardware::ScriptedInput;
    type Output = crate::hardware::RecordingOutput;

    fn chip() -> Result<Self::Chip, ControllerError> {
        Ok(())
    }

    fn input(_chip: &mut Self::Chip, _pin: u8) -> Result<Self::Input, ControllerError> {
        Ok(crate::hardware::ScriptedInput::new(vec![false]))
    }

    fn output(_chip: &mut Self::Chip, _pin: u8) -> Result<Self::Output, ControllerError> {
        Ok(crate::hardware::RecordingOutput::new(false))
    }

    fn printer(_config: &Configuration) -> Box<dyn TicketPrinter + Send> {
        Box::new(crate::hardware::printer::RecordingPrinter::new())
    }

    fn audio(config: &Configuration) -> Box<dyn AudioPlayer + Send> {
        let mut player = crate::hardware::audio::RecordingPlayer::new(Vec::new());
        let clips: std::collections::HashMap<String, PathBuf> = config
            .audio_clips
            .iter()
            .map(|c| (c.name.clone(), c.path.clone()))
            .collect();
        player.load_many(&clips);
        Box::new(player)
    }

    fn backend(_config: &Configuration) -> Arc<dyn BackendClient> {
        Arc::new(crate::backend::StubBackendClient::new(0, Vec::new()))
    }
}

/// Construct a new file at `path`, erroring if one already exists.
fn file_create_new(path: impl AsRef<std::path::Path>) -> std::io::Result<File> {
    File::options().read(true).write(true).create_new(true).open(path)
}

#[allow(clippy::too_many_lines)]
/// Parse arguments, load the configuration, construct hardware via `M`, and
/// run the three workers until one of them is stopped or panics.
///
/// Expects exactly two command-line arguments: the path to the
/// configuration JSON file, and a directory to write logs into.
///
/// # Errors
///
/// Returns a [`ControllerError`] if arguments are missing, the
/// configuration cannot be parsed, a peripheral cannot be acquired, or a
/// worker thread panics.
pub fn run<M: MakeHardware>() -> Result<(), ControllerError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let json_path = args
        .first()
        .ok_or(ControllerError::Args("no configuration JSON path given"))?;
    let logs_path = args
        .get(1)
        .ok_or(ControllerError::Args("no logs directory given"))?;

    create_dir_all(logs_path)?;
    let user_log = UserLog::new(file_create_new(PathBuf::from_iter([logs_path, "console.txt"]))?);

    user_log.debug("parsing configuration file")?;
    let config_file = File::open(json_path)?;
    let config = match Configuration::parse(&mut BufReader::new(config_file)) {
        Ok(c) => c,
        Err(e) => {
            user_log.critical(&format!("failed to parse configuration: {e}"))?;
            return Err(e.into());
        }
    };
    user_log.debug("configuration parsed successfully")?;

    let backend = M::backend(&config);

    user_log.debug("fetching initial data from backend")?;
    let (last_ticket_sequence, services) = match backend.get_initial_data() {
        Ok(data) => data,
        Err(e) => {
            user_log.warn(&format!(
                "could not reach backend at boot, starting with an empty service list: {e}"
            ))?;
            (0, Vec::new())
        }
    };
    let sequence = SequenceStore::boot(config.sequence_cursor_path.clone(), last_ticket_sequence);

    user_log.debug("acquiring GPIO")?;
    let mut chip = M::chip()?;
    let loop_sensor: Box<dyn DigitalInput + Send> = Box::new(M::input(&mut chip, config.pin_loop_sensor)?);
    let buttons: [Box<dyn DigitalInput + Send>; 4] = [
        Box::new(M::input(&mut chip, config.pin_buttons[0])?),
        Box::new(M::input(&mut chip, config.pin_buttons[1])?),
        Box::new(M::input(&mut chip, config.pin_buttons[2])?),
        Box::new(M::input(&mut chip, config.pin_buttons[3])?),
    ];
    let gate: Box<dyn DigitalOutput + Send> = Box::new(M::output(&mut chip, config.pin_gate)?);
    let led: Box<dyn DigitalOutput + Send> = Box::new(M::output(&mut chip, config.pin_indicator_led)?);
    user_log.debug("GPIO acquired successfully")?;

    let printer = M::printer(&config);
    let audio = M::audio(&config);

    let (to_network, network_inbox) = network::channel(config.pending_queue_capacity);
    let (to_primary, from_network) = crossbeam_channel::unbounded();
    let (to_indicator, indicator_inbox) = crossbeam_channel::unbounded();
    let to_primary = Arc::new(crate::message::GuardedSender::new(to_primary));

    let network_worker = NetworkWorker::new(
        Arc::clone(&backend),
        network_inbox,
        Arc::clone(&to_primary),
        to_indicator.clone(),
        Arc::new(UserLog::new(file_create_new(PathBuf::from_iter([
            logs_path,
            "network.txt",
        ]))?)),
        config.pending_queue_capacity,
        Duration::from_millis(config.health_check_interval_ms),
    );

    let timing = Timing {
        failed_print_hold: Duration::from_millis(config.printer_error_hold_ms),
        queue_info_timeout: Duration::from_millis(config.queue_info_timeout_ms),
        network_put_timeout: Duration::from_millis(config.network_put_timeout_ms),
        est_min_const: config.est_min_const,
        est_max_const: config.est_max_const,
    };
    let mut primary_worker = PrimaryWorker::new(
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
        Arc::new(UserLog::new(file_create_new(PathBuf::from_iter([
            logs_path,
            "primary.txt",
        ]))?)),
        timing,
    );

    let mut indicator_worker = IndicatorWorker::new(led, indicator_inbox);

    user_log.info("starting workers")?;
    std::thread::scope(|s| {
        let network_requests = s.spawn(|| network_worker.run_requests());
        let network_health = s.spawn(|| network_worker.run_health_check());
        let indicator = s.spawn(|| indicator_worker.run(POLL_INTERVAL));
        let primary = s.spawn(|| primary_worker.run(POLL_INTERVAL));

        // None of the four loops above is expected to return while the
        // controller is running, so whichever handle finishes first decides
        // the outcome: a panic becomes `WorkerPanicked`, a clean return (the
        // network loops' `stop` flag, or Indicator's inbox disconnecting)
        // just ends the process quietly.
        loop {
            if network_requests.is_finished() {
                return join_worker("network request loop", network_requests);
            }
            if network_health.is_finished() {
                return join_worker("network health-check loop", network_health);
            }
            if indicator.is_finished() {
                return join_worker("indicator loop", indicator)?.map_err(Into::into);
            }
            if primary.is_finished() {
                // `PrimaryWorker::run` never returns, so reaching here means
                // it panicked.
                let _ = primary.join();
                return Err(ControllerError::WorkerPanicked("primary loop"));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    })
}

/// Join a scoped worker thread already known to have finished, mapping a
/// panic to [`ControllerError::WorkerPanicked`].
fn join_worker<'scope, T>(
    name: &'static str,
    handle: std::thread::ScopedJoinHandle<'scope, T>,
) -> Result<T, ControllerError> {
    handle.join().map_err(|_| ControllerError::WorkerPanicked(name))
}
