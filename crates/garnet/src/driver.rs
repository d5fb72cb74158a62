//! Core driver: game lifecycle, state persistence, rewind.

use std::{collections::VecDeque, path::Path};

use easyerr::{Error, ResultExt};

use crate::{
    core::{AvInfo, CoreBackend, FrameSink, GameLoadError, StateError},
    exchange::Buttons,
};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no game is loaded")]
    NoGameLoaded,
    #[error(transparent)]
    State { source: StateError },
    #[error("failed to access state file at {path}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Identity of the currently loaded game.
#[derive(Debug, Clone)]
pub struct LoadedGame {
    /// Lowercase hex md5 of the ROM image, used to identify the game to the
    /// achievements service.
    pub hash: String,
    pub av: AvInfo,
}

/// Bounded ring of serialized core states for rewind. Oldest snapshots are
/// evicted first.
struct RewindRing {
    snapshots: VecDeque<Vec<u8>>,
    capacity: usize,
}

/// Owns one emulation core and advances it exactly one frame at a time.
pub struct CoreDriver {
    core: Box<dyn CoreBackend>,
    game: Option<LoadedGame>,
    rewind: RewindRing,
}

impl CoreDriver {
    pub fn new(core: Box<dyn CoreBackend>) -> Self {
        Self {
            core,
            game: None,
            rewind: RewindRing {
                snapshots: VecDeque::new(),
                capacity: 0,
            },
        }
    }

    /// Hands the ROM to the core and computes its content hash. Any
    /// previously loaded game is unloaded first.
    pub fn load_game(&mut self, rom: &[u8]) -> Result<&LoadedGame, GameLoadError> {
        if self.game.is_some() {
            self.unload_game();
        }

        let hash = format!("{:x}", md5::compute(rom));
        let av = self.core.load_game(rom)?;
        tracing::info!(
            %hash,
            width = av.width,
            height = av.height,
            fps = av.fps,
            "game loaded"
        );

        Ok(self.game.insert(LoadedGame { hash, av }))
    }

    pub fn unload_game(&mut self) {
        if self.game.take().is_some() {
            self.core.unload_game();
            self.rewind.snapshots.clear();
        }
    }

    pub fn game(&self) -> Option<&LoadedGame> {
        self.game.as_ref()
    }

    pub fn core(&self) -> &dyn CoreBackend {
        &*self.core
    }

    pub fn core_mut(&mut self) -> &mut dyn CoreBackend {
        &mut *self.core
    }

    /// Advances one frame, routing core output into `sink`.
    pub fn run_frame(&mut self, input: Buttons, sink: &mut dyn FrameSink) -> Result<(), DriverError> {
        if self.game.is_none() {
            return Err(DriverError::NoGameLoaded);
        }
        self.core.run_frame(input, sink);
        Ok(())
    }

    pub fn reset(&mut self) -> Result<(), DriverError> {
        if self.game.is_none() {
            return Err(DriverError::NoGameLoaded);
        }
        self.core.reset();
        Ok(())
    }

    pub fn save_state(&mut self) -> Result<Vec<u8>, DriverError> {
        if self.game.is_none() {
            return Err(DriverError::NoGameLoaded);
        }
        self.core.serialize().context(DriverCtx::State)
    }

    pub fn load_state(&mut self, state: &[u8]) -> Result<(), DriverError> {
        if self.game.is_none() {
            return Err(DriverError::NoGameLoaded);
        }
        self.core.unserialize(state).context(DriverCtx::State)
    }

    pub fn save_state_to(&mut self, path: &Path) -> Result<(), DriverError> {
        let state = self.save_state()?;
        std::fs::write(path, state).with_context(|_| DriverCtx::Io {
            path: path.display().to_string(),
        })
    }

    pub fn load_state_from(&mut self, path: &Path) -> Result<(), DriverError> {
        let state = std::fs::read(path).with_context(|_| DriverCtx::Io {
            path: path.display().to_string(),
        })?;
        self.load_state(&state)
    }

    /// Copies battery-backed save RAM out of the core.
    pub fn save_ram(&mut self) -> Option<Vec<u8>> {
        self.core.save_ram()
    }

    /// Restores battery RAM. Returns how many bytes the core accepted.
    pub fn load_save_ram(&mut self, data: &[u8]) -> usize {
        self.core.load_save_ram(data)
    }

    /// Writes the battery save to `path`. A core without battery RAM writes
    /// nothing.
    pub fn save_ram_to(&mut self, path: &Path) -> Result<(), DriverError> {
        let Some(data) = self.save_ram() else {
            return Ok(());
        };
        std::fs::write(path, data).with_context(|_| DriverCtx::Io {
            path: path.display().to_string(),
        })
    }

    /// Restores the battery save from `path`, returning how many bytes the
    /// core accepted.
    pub fn load_save_ram_from(&mut self, path: &Path) -> Result<usize, DriverError> {
        let data = std::fs::read(path).with_context(|_| DriverCtx::Io {
            path: path.display().to_string(),
        })?;
        Ok(self.load_save_ram(&data))
    }

    /// Enables rewind with room for `capacity` snapshots; 0 disables it and
    /// drops any held snapshots.
    pub fn rewind_configure(&mut self, capacity: usize) {
        self.rewind.capacity = capacity;
        if capacity == 0 {
            self.rewind.snapshots.clear();
        } else {
            while self.rewind.snapshots.len() > capacity {
                self.rewind.snapshots.pop_front();
            }
        }
    }

    /// Pushes the current state onto the rewind ring, evicting the oldest
    /// snapshot when full.
    pub fn rewind_push(&mut self) -> Result<(), DriverError> {
        if self.rewind.capacity == 0 {
            return Ok(());
        }
        let state = self.save_state()?;
        if self.rewind.snapshots.len() == self.rewind.capacity {
            self.rewind.snapshots.pop_front();
        }
        self.rewind.snapshots.push_back(state);
        Ok(())
    }

    /// Pops the most recent snapshot and restores it. Returns `false` if the
    /// ring is empty.
    pub fn rewind_pop(&mut self) -> Result<bool, DriverError> {
        let Some(state) = self.rewind.snapshots.pop_back() else {
            return Ok(false);
        };
        self.load_state(&state)?;
        Ok(true)
    }

    pub fn rewind_len(&self) -> usize {
        self.rewind.snapshots.len()
    }
}
