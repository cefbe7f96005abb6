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

#![warn(clippy::pedantic)]

//! Controller firmware for an unattended carwash entry dispenser.
//!
//! Three long-lived workers — [`primary`], [`network`] and [`indicator`] —
//! coordinate over bounded channels to detect an arriving vehicle, register
//! and print a sequential EAN-13 ticket, open the gate, and keep a status
//! LED honest about backend and printer health.

pub mod backend;
pub mod config;
pub mod console;
pub mod domain;
pub mod ean;
pub mod hardware;
pub mod indicator;
pub mod message;
pub mod network;
pub mod primary;
pub mod runtime;
pub mod sequence;

use std::fmt::Display;

#[derive(Debug)]
/// The set of errors that can terminate the controller process itself.
///
/// Per-transaction and per-retry errors never reach this type; they are
/// handled locally by the worker that produced them and are only ever
/// reported across process boundaries as `DeviceStatus` events. This type
/// exists solely for the handful of failures that make running the
/// controller at all impossible.
pub enum ControllerError {
    /// Required command-line arguments were missing.
    Args(&'static str),
    /// An I/O operation (log file creation, cursor file access) failed.
    Io(std::io::Error),
    /// The configuration file failed to parse or validate.
    Config(config::Error),
    /// A GPIO chip or line could not be acquired.
    Gpio(gpio_cdev::Error),
    /// A worker thread panicked or its lock was poisoned.
    WorkerPanicked(&'static str),
}

impl From<std::io::Error> for ControllerError {
    fn from(e: std::io::Error) -> Self {
        ControllerError::Io(e)
    }
}

impl From<config::Error> for ControllerError {
    fn from(e: config::Error) -> Self {
        ControllerError::Config(e)
    }
}

impl From<gpio_cdev::Error> for ControllerError {
    fn from(e: gpio_cdev::Error) -> Self {
        ControllerError::Gpio(e)
    }
}

impl Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::Args(msg) => write!(f, "bad arguments: {msg}"),
            ControllerError::Io(e) => write!(f, "I/O error: {e}"),
            ControllerError::Config(e) => write!(f, "configuration error: {e}"),
            ControllerError::Gpio(e) => write!(f, "GPIO error: {e}"),
            ControllerError::WorkerPanicked(name) => write!(f, "worker '{name}' panicked"),
        }
    }
}

impl std::error::Error for ControllerError {}
