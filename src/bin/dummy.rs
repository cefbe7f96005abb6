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

use dispenser::runtime::{self, Dummy};
use dispenser::ControllerError;

/// A dummy main function for the dispenser controller.
///
/// Every peripheral is substituted for a recording/stub double so the three
/// workers can be exercised on any Linux machine, with no GPIO chip, USB
/// printer, ALSA output, or live backend required.
///
/// # Arguments
///
/// Same as the real `dispenser` binary: a configuration JSON path, then a
/// log directory.
fn main() -> Result<(), ControllerError> {
    runtime::run::<Dummy>()
}
