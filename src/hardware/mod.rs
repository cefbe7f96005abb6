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

//! Definitions for hardware devices.
//!
//! The goal of this module is to abstract away the details of exactly how our
//! peripherals work so that the worker logic elsewhere can stay free of
//! GPIO/USB/subprocess plumbing, and so that it can be exercised against
//! recording test doubles instead of real hardware.

pub mod audio;
pub mod printer;

use gpio_cdev::LineHandle;

/// A trait for a digital (GPIO) input pin, such as the loop sensor or a push
/// button.
pub trait DigitalInput {
    /// Read the current logic level of the pin. Returns `true` if pulled
    /// high.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn read(&mut self) -> Result<bool, gpio_cdev::Error>;
}

/// A trait for a digital (GPIO) output pin, such as the gate relay or the
/// status LED.
pub trait DigitalOutput {
    /// Set the pin's logic level to `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn write(&mut self, value: bool) -> Result<(), gpio_cdev::Error>;

    /// Read back the pin's last-written logic level.
    fn is_on(&self) -> bool;

    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn on(&mut self) -> Result<(), gpio_cdev::Error> {
        self.write(true)
    }

    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn off(&mut self) -> Result<(), gpio_cdev::Error> {
        self.write(false)
    }
}

/// A recording digital input for tests: yields each value in `history` in
/// order on successive reads, then repeats the last one.
pub struct ScriptedInput {
    history: Vec<bool>,
    cursor: usize,
}

impl ScriptedInput {
    #[must_use]
    pub fn new(history: Vec<bool>) -> ScriptedInput {
        assert!(!history.is_empty(), "a scripted input needs at least one value");
        ScriptedInput { history, cursor: 0 }
    }
}

impl DigitalInput for ScriptedInput {
    fn read(&mut self) -> Result<bool, gpio_cdev::Error> {
        let value = self.history[self.cursor.min(self.history.len() - 1)];
        if self.cursor < self.history.len() - 1 {
            self.cursor += 1;
        }
        Ok(value)
    }
}

/// A recording digital output for tests: stores every value it was ever
/// written, in order.
pub struct RecordingOutput(Vec<bool>);

impl RecordingOutput {
    #[must_use]
    pub fn new(initial: bool) -> RecordingOutput {
        RecordingOutput(vec![initial])
    }

    #[must_use]
    pub fn history(&self) -> &[bool] {
        &self.0
    }

    #[must_use]
    pub fn last(&self) -> bool {
        *self.0.last().expect("history is never empty")
    }
}

impl DigitalOutput for RecordingOutput {
    fn write(&mut self, value: bool) -> Result<(), gpio_cdev::Error> {
        self.0.push(value);
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.last()
    }
}

impl DigitalInput for LineHandle {
    fn read(&mut self) -> Result<bool, gpio_cdev::Error> {
        Ok(1 == self.get_value()?)
    }
}

impl DigitalOutput for LineHandle {
    fn write(&mut self, value: bool) -> Result<(), gpio_cdev::Error> {
        let int_value = u8::from(value);
        self.set_value(int_value)?;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.get_value().map(|v| v == 1).unwrap_or(false)
    }
}
