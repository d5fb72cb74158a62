//! The seam between the driver and a concrete emulation core.

use retro::pixel::PixelProcess;
pub use retro::{AvInfo, FrameSink, GameLoadError, StateError};

use crate::exchange::Buttons;

/// Frame-steppable emulation core. Implemented by [`retro::LibretroCore`]
/// and by in-process fakes in tests.
pub trait CoreBackend: Send {
    fn load_game(&mut self, rom: &[u8]) -> Result<AvInfo, GameLoadError>;
    fn unload_game(&mut self);
    fn reset(&mut self);

    /// Advances exactly one frame, invoking `sink` synchronously for any
    /// video/audio/geometry output. Must never block on I/O.
    fn run_frame(&mut self, input: Buttons, sink: &mut dyn FrameSink);

    fn serialize(&mut self) -> Result<Vec<u8>, StateError>;
    fn unserialize(&mut self, state: &[u8]) -> Result<(), StateError>;

    fn save_ram(&mut self) -> Option<Vec<u8>>;
    fn load_save_ram(&mut self, data: &[u8]) -> usize;

    /// Reads one byte of emulated memory, `None` if unmapped.
    fn read_byte(&self, addr: u32) -> Option<u8>;

    fn av_info(&self) -> AvInfo;

    fn set_pixel_process(&mut self, process: PixelProcess) {
        let _ = process;
    }
}

impl CoreBackend for retro::LibretroCore {
    fn load_game(&mut self, rom: &[u8]) -> Result<AvInfo, GameLoadError> {
        Self::load_game(self, rom)
    }

    fn unload_game(&mut self) {
        Self::unload_game(self);
    }

    fn reset(&mut self) {
        Self::reset(self);
    }

    fn run_frame(&mut self, input: Buttons, sink: &mut dyn FrameSink) {
        Self::run_frame(self, input.bits(), sink);
    }

    fn serialize(&mut self) -> Result<Vec<u8>, StateError> {
        Self::serialize(self)
    }

    fn unserialize(&mut self, state: &[u8]) -> Result<(), StateError> {
        Self::unserialize(self, state)
    }

    fn save_ram(&mut self) -> Option<Vec<u8>> {
        Self::save_ram(self)
    }

    fn load_save_ram(&mut self, data: &[u8]) -> usize {
        Self::load_save_ram(self, data)
    }

    fn read_byte(&self, addr: u32) -> Option<u8> {
        Self::read_byte(self, addr as usize)
    }

    fn av_info(&self) -> AvInfo {
        Self::av_info(self)
    }

    fn set_pixel_process(&mut self, process: PixelProcess) {
        Self::set_pixel_process(self, process);
    }
}
