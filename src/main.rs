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

use dispenser::runtime::{self, RaspberryPi};
use dispenser::ControllerError;

/// The main function for the dispenser controller.
///
/// # Arguments
///
/// The first argument to this executable (via `std::env::args`) is the path
/// to a configuration JSON file.
///
/// The second argument is a directory to write per-worker log files into;
/// it is created if it does not already exist.
fn main() -> Result<(), ControllerError> {
    runtime::run::<RaspberryPi>()
}
