//! The Garnet emulation runtime.
//!
//! Ties one [`CoreDriver`] to the lock-free exchange buffers and the
//! achievements module. A [`Garnet`] is an explicit context object: nothing
//! in this crate is process-global, and tests can run several instances side
//! by side.

pub mod core;
pub mod driver;
pub mod event;
pub mod exchange;
pub mod modules;
pub mod runner;

use crate::core::{AvInfo, CoreBackend, FrameSink, GameLoadError};
use crate::driver::{CoreDriver, DriverError, LoadedGame};
use crate::exchange::{
    AUDIO_RING_CAPACITY, AudioConsumer, AudioProducer, InputRegister, VideoConsumer, VideoProducer,
    audio_ring, video_exchange,
};
use crate::modules::cheevos::{CheevosModule, MemoryRead};

/// Pluggable host modules.
pub struct Modules {
    pub cheevos: Box<dyn CheevosModule>,
}

/// The host-thread ends of the exchange buffers.
pub struct HostHandles {
    pub video: VideoConsumer,
    pub audio: AudioConsumer,
    pub input: InputRegister,
}

/// The runtime context living on the emulation thread.
pub struct Garnet {
    driver: CoreDriver,
    modules: Modules,
    video: VideoProducer,
    audio: AudioProducer,
    input: InputRegister,
    frame: u64,
}

impl Garnet {
    /// Builds a runtime around a core and returns it together with the host
    /// ends of its exchange buffers.
    pub fn new(core: Box<dyn CoreBackend>, modules: Modules) -> (Self, HostHandles) {
        let (video_tx, video_rx) = video_exchange();
        let (audio_tx, audio_rx) = audio_ring(AUDIO_RING_CAPACITY);
        let input = InputRegister::new();

        let garnet = Self {
            driver: CoreDriver::new(core),
            modules,
            video: video_tx,
            audio: audio_tx,
            input: input.clone(),
            frame: 0,
        };
        let host = HostHandles {
            video: video_rx,
            audio: audio_rx,
            input,
        };
        (garnet, host)
    }

    /// Loads a ROM and publishes its geometry to the host side.
    pub fn load_game(&mut self, rom: &[u8]) -> Result<LoadedGame, GameLoadError> {
        let game = self.driver.load_game(rom)?.clone();
        self.video.set_geometry(game.av.width, game.av.height);
        Ok(game)
    }

    /// Unloads the game from both the core and the achievements engine.
    pub fn unload_game(&mut self) {
        self.modules.cheevos.unload_game();
        self.driver.unload_game();
    }

    /// Advances one emulated frame and pumps the achievements engine.
    ///
    /// Input is sampled once, at this frame boundary. With `publish_video`
    /// false the core still runs and audio still flows; only the video
    /// publication is suppressed (frame-skip).
    pub fn run_frame(&mut self, publish_video: bool) -> Result<(), DriverError> {
        let input = self.input.get();

        let Self {
            driver,
            modules,
            video,
            audio,
            ..
        } = self;

        let mut sink = ExchangeSink {
            video,
            audio,
            publish_video,
        };
        driver.run_frame(input, &mut sink)?;
        modules.cheevos.do_frame(&DriverMemory(driver));

        self.frame += 1;
        Ok(())
    }

    /// Services achievements background work while no game is running.
    pub fn idle(&mut self) {
        self.modules.cheevos.idle();
    }

    /// Frames emulated since creation.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn driver(&self) -> &CoreDriver {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut CoreDriver {
        &mut self.driver
    }

    pub fn cheevos(&self) -> &dyn CheevosModule {
        &*self.modules.cheevos
    }

    pub fn av_info(&self) -> AvInfo {
        self.driver.core().av_info()
    }
}

struct DriverMemory<'a>(&'a CoreDriver);

impl MemoryRead for DriverMemory<'_> {
    fn read_byte(&self, addr: u32) -> Option<u8> {
        self.0.core().read_byte(addr)
    }
}

struct ExchangeSink<'a> {
    video: &'a mut VideoProducer,
    audio: &'a mut AudioProducer,
    publish_video: bool,
}

impl FrameSink for ExchangeSink<'_> {
    fn video_frame(&mut self, pixels: &[u32], width: u32, height: u32) {
        if self.publish_video {
            self.video.publish(width, height, pixels);
        }
    }

    fn audio_samples(&mut self, samples: &[i16]) {
        self.audio.push(samples);
    }

    fn geometry_changed(&mut self, info: AvInfo) {
        tracing::debug!(width = info.width, height = info.height, "core changed geometry");
        self.video.set_geometry(info.width, info.height);
    }
}
