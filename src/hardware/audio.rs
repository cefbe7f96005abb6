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

//! Non-blocking prompt playback.
//!
//! Audio is played by spawning the system `aplay` binary rather than
//! linking an audio mixer library: the player only ever needs to start one
//! clip and poll whether it has finished, and a subprocess gives that for
//! free without pulling ALSA bindings into a GPIO-heavy binary.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

#[derive(Debug)]
pub enum Error {
    UnknownClip(String),
    Spawn(std::io::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnknownClip(name) => write!(f, "no audio clip loaded for '{name}'"),
            Error::Spawn(e) => write!(f, "failed to spawn audio player: {e}"),
        }
    }
}

impl std::error::Error for Error {}

/// Something that can play named audio clips without blocking the caller.
pub trait AudioPlayer {
    /// Register every clip in `clips` (name to resolved path) for later
    /// playback, replacing any clip previously loaded under the same name.
    fn load_many(&mut self, clips: &HashMap<String, PathBuf>);

    /// Start playing the clip named `name`. Any clip already playing on this
    /// player is stopped first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownClip`] if `name` was never loaded, or
    /// [`Error::Spawn`] if the underlying player process could not start.
    fn play(&mut self, name: &str) -> Result<(), Error>;

    /// Stop whatever clip is currently playing, if any.
    fn stop(&mut self);

    /// Whether a previously started clip is still playing.
    fn is_busy(&mut self) -> bool;
}

/// An [`AudioPlayer`] that shells out to `aplay` for each clip.
pub struct AplayPlayer {
    clips: HashMap<String, PathBuf>,
    current: Option<Child>,
}

impl AplayPlayer {
    #[must_use]
    pub fn new() -> AplayPlayer {
        AplayPlayer {
            clips: HashMap::new(),
            current: None,
        }
    }

    /// Register a clip under `name`, resolved relative to `base_dir` if not
    /// already absolute.
    pub fn load(&mut self, name: &str, path: &Path, base_dir: &Path) {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        };
        self.clips.insert(name.to_string(), resolved);
    }

    /// Register every clip in `clips`, resolved relative to `base_dir` if
    /// not already absolute.
    pub fn load_all(&mut self, clips: &[(String, PathBuf)], base_dir: &Path) {
        for (name, path) in clips {
            self.load(name, path, base_dir);
        }
    }

    fn reap_if_finished(&mut self) {
        if let Some(child) = &mut self.current {
            if matches!(child.try_wait(), Ok(Some(_))) {
                self.current = None;
            }
        }
    }
}

impl Default for AplayPlayer {
    fn default() -> Self {
        AplayPlayer::new()
    }
}

impl AudioPlayer for AplayPlayer {
    fn load_many(&mut self, clips: &HashMap<String, PathBuf>) {
        self.clips.extend(clips.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    fn play(&mut self, name: &str) -> Result<(), Error> {
        self.reap_if_finished();
        let path = self
            .clips
            .get(name)
            .ok_or_else(|| Error::UnknownClip(name.to_string()))?
            .clone();

        self.stop();

        let child = Command::new("aplay")
            .arg(&path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(Error::Spawn)?;
        self.current = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.current.take() {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }

    fn is_busy(&mut self) -> bool {
        self.reap_if_finished();
        self.current.is_some()
    }
}

/// A recording player for tests: never shells out, just records what was
/// asked of it.
pub struct RecordingPlayer {
    loaded: Vec<String>,
    pub played: Vec<String>,
    /// How many more `is_busy()` calls will report `true` after the most
    /// recent `play()`, simulating a clip that finishes almost immediately
    /// rather than hanging a caller that polls `is_busy()` in a loop.
    busy_polls_remaining: u32,
}

impl RecordingPlayer {
    #[must_use]
    pub fn new(loaded: Vec<String>) -> RecordingPlayer {
        RecordingPlayer {
            loaded,
            played: Vec::new(),
            busy_polls_remaining: 0,
        }
    }

    /// Force the next `busy_polls` calls to `is_busy()` to report `true`,
    /// overriding the default one-poll behavior after `play()`.
    pub fn set_busy_polls(&mut self, busy_polls: u32) {
        self.busy_polls_remaining = busy_polls;
    }
}

impl AudioPlayer for RecordingPlayer {
    fn load_many(&mut self, clips: &HashMap<String, PathBuf>) {
        for name in clips.keys() {
            if !self.loaded.iter().any(|n| n == name) {
                self.loaded.push(name.clone());
            }
        }
    }

    fn play(&mut self, name: &str) -> Result<(), Error> {
        if !self.loaded.iter().any(|n| n == name) {
            return Err(Error::UnknownClip(name.to_string()));
        }
        self.played.push(name.to_string());
        self.busy_polls_remaining = 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.busy_polls_remaining = 0;
    }

    fn is_busy(&mut self) -> bool {
        if self.busy_polls_remaining > 0 {
            self.busy_polls_remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_many_makes_clips_playable() {
        let mut player = RecordingPlayer::new(vec![]);
        let mut clips = HashMap::new();
        clips.insert("welcome".to_string(), PathBuf::from("welcome.wav"));
        player.load_many(&clips);
        assert!(player.play("welcome").is_ok());
    }

    #[test]
    fn recording_player_rejects_unknown_clip() {
        let mut player = RecordingPlayer::new(vec!["greeting".into()]);
        assert!(matches!(
            player.play("missing"),
            Err(Error::UnknownClip(_))
        ));
    }

    #[test]
    fn recording_player_tracks_playback() {
        let mut player = RecordingPlayer::new(vec!["greeting".into()]);
        assert!(!player.is_busy());
        player.play("greeting").unwrap();
        assert!(player.is_busy());
        assert_eq!(player.played, vec!["greeting".to_string()]);
        player.stop();
        assert!(!player.is_busy());
    }
}
