//! Runtime behavior tests against an in-process fake core.

use std::time::Duration;

use garnet::core::{AvInfo, CoreBackend, FrameSink, GameLoadError, StateError};
use garnet::driver::DriverError;
use garnet::exchange::Buttons;
use garnet::modules::cheevos::NopCheevosModule;
use garnet::runner::{CooperativeRunner, RunState, Runner};
use garnet::{Garnet, Modules};

/// Deterministic core: each frame paints the frame counter into every pixel,
/// emits a fixed chunk of audio and mirrors the counter into emulated RAM.
struct FakeCore {
    loaded: bool,
    frame: u32,
    ram: [u8; 16],
}

impl FakeCore {
    fn new() -> Self {
        Self {
            loaded: false,
            frame: 0,
            ram: [0; 16],
        }
    }
}

impl CoreBackend for FakeCore {
    fn load_game(&mut self, rom: &[u8]) -> Result<AvInfo, GameLoadError> {
        if rom.is_empty() {
            return Err(GameLoadError::Rejected);
        }
        self.loaded = true;
        self.frame = 0;
        self.ram = [0; 16];
        Ok(self.av_info())
    }

    fn unload_game(&mut self) {
        self.loaded = false;
    }

    fn reset(&mut self) {
        self.frame = 0;
        self.ram = [0; 16];
    }

    fn run_frame(&mut self, input: Buttons, sink: &mut dyn FrameSink) {
        self.frame += 1;
        self.ram[0] = self.frame as u8;
        self.ram[1] = input.bits() as u8;
        self.ram[2] = (input.bits() >> 8) as u8;

        let pixels = vec![self.frame; 4 * 3];
        sink.video_frame(&pixels, 4, 3);
        sink.audio_samples(&[1, -1, 2, -2]);
    }

    fn serialize(&mut self) -> Result<Vec<u8>, StateError> {
        let mut state = self.frame.to_le_bytes().to_vec();
        state.extend_from_slice(&self.ram);
        Ok(state)
    }

    fn unserialize(&mut self, state: &[u8]) -> Result<(), StateError> {
        if state.len() != 20 {
            return Err(StateError::Unserialize);
        }
        self.frame = u32::from_le_bytes(state[..4].try_into().unwrap());
        self.ram.copy_from_slice(&state[4..]);
        Ok(())
    }

    fn save_ram(&mut self) -> Option<Vec<u8>> {
        Some(self.ram.to_vec())
    }

    fn load_save_ram(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.ram.len());
        self.ram[..n].copy_from_slice(&data[..n]);
        n
    }

    fn read_byte(&self, addr: u32) -> Option<u8> {
        self.ram.get(addr as usize).copied()
    }

    fn av_info(&self) -> AvInfo {
        AvInfo {
            width: 4,
            height: 3,
            fps: 60.0,
            sample_rate: 32768.0,
        }
    }
}

fn runtime() -> (Garnet, garnet::HostHandles) {
    Garnet::new(
        Box::new(FakeCore::new()),
        Modules {
            cheevos: Box::new(NopCheevosModule),
        },
    )
}

#[test]
fn operations_require_a_loaded_game() {
    let (mut garnet, _host) = runtime();
    assert!(matches!(garnet.run_frame(true), Err(DriverError::NoGameLoaded)));
    assert!(matches!(garnet.driver_mut().reset(), Err(DriverError::NoGameLoaded)));
    assert!(matches!(garnet.driver_mut().save_state(), Err(DriverError::NoGameLoaded)));
}

#[test]
fn empty_rom_is_rejected_and_core_stays_usable() {
    let (mut garnet, _host) = runtime();
    assert!(matches!(garnet.load_game(&[]), Err(GameLoadError::Rejected)));
    assert!(garnet.load_game(&[1, 2, 3]).is_ok());
    assert!(garnet.run_frame(true).is_ok());
}

#[test]
fn content_hash_is_md5_of_the_rom() {
    let (mut garnet, _host) = runtime();
    let game = garnet.load_game(b"abc").unwrap();
    assert_eq!(game.hash, "900150983cd24fb0d6963f7d28e17f72");
}

#[test]
fn frames_flow_into_the_exchange() {
    let (mut garnet, mut host) = runtime();
    garnet.load_game(&[1]).unwrap();
    assert_eq!(host.video.geometry(), (4, 3));

    garnet.run_frame(true).unwrap();
    let frame = host.video.poll().expect("a frame was published");
    assert_eq!((frame.width, frame.height), (4, 3));
    assert!(frame.pixels.iter().all(|&p| p == 1));

    let mut audio = [0i16; 4];
    assert_eq!(host.audio.pop(&mut audio), 4);
    assert_eq!(audio, [1, -1, 2, -2]);
}

#[test]
fn frame_skip_suppresses_video_but_not_audio() {
    let (mut garnet, mut host) = runtime();
    garnet.load_game(&[1]).unwrap();

    garnet.run_frame(false).unwrap();
    assert!(host.video.poll().is_none());
    assert!(host.audio.len() > 0, "audio still flows on skipped frames");
    assert_eq!(garnet.frame(), 1, "the core was still stepped");

    garnet.run_frame(true).unwrap();
    assert!(host.video.poll().is_some());
}

#[test]
fn input_is_applied_at_the_next_frame_boundary() {
    let (mut garnet, host) = runtime();
    garnet.load_game(&[1]).unwrap();

    host.input.set(Buttons::A | Buttons::RIGHT);
    garnet.run_frame(true).unwrap();

    // the fake mirrors the sampled button mask into emulated RAM
    let lo = garnet.driver().core().read_byte(1).unwrap();
    let hi = garnet.driver().core().read_byte(2).unwrap();
    let sampled = Buttons::from_bits_truncate(u32::from(lo) | u32::from(hi) << 8);
    assert_eq!(sampled, Buttons::A | Buttons::RIGHT);
}

#[test]
fn save_and_load_state_round_trip() {
    let (mut garnet, _host) = runtime();
    garnet.load_game(&[1]).unwrap();

    garnet.run_frame(true).unwrap();
    garnet.run_frame(true).unwrap();
    let state = garnet.driver_mut().save_state().unwrap();

    garnet.run_frame(true).unwrap();
    assert_eq!(garnet.driver().core().read_byte(0), Some(3));

    garnet.driver_mut().load_state(&state).unwrap();
    assert_eq!(garnet.driver().core().read_byte(0), Some(2));
}

#[test]
fn battery_save_round_trips_through_a_file() {
    let path = std::env::temp_dir().join("garnet-battery-test.sav");
    let (mut garnet, _host) = runtime();
    garnet.load_game(&[1]).unwrap();
    garnet.run_frame(true).unwrap();
    garnet.driver_mut().save_ram_to(&path).unwrap();

    let (mut fresh, _host) = runtime();
    fresh.load_game(&[1]).unwrap();
    let accepted = fresh.driver_mut().load_save_ram_from(&path).unwrap();
    assert_eq!(accepted, 16);
    assert_eq!(fresh.driver().core().read_byte(0), Some(1));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn rewind_restores_previous_frames() {
    let (mut garnet, _host) = runtime();
    garnet.load_game(&[1]).unwrap();
    garnet.driver_mut().rewind_configure(2);

    for _ in 0..3 {
        garnet.run_frame(true).unwrap();
        garnet.driver_mut().rewind_push().unwrap();
    }
    // capacity 2: the snapshot of frame 1 was evicted
    assert_eq!(garnet.driver().rewind_len(), 2);

    assert!(garnet.driver_mut().rewind_pop().unwrap());
    assert_eq!(garnet.driver().core().read_byte(0), Some(3));
    assert!(garnet.driver_mut().rewind_pop().unwrap());
    assert_eq!(garnet.driver().core().read_byte(0), Some(2));
    assert!(!garnet.driver_mut().rewind_pop().unwrap());
}

#[test]
fn cooperative_runner_only_advances_while_running() {
    let (mut garnet, _host) = runtime();
    garnet.load_game(&[1]).unwrap();

    let mut runner = CooperativeRunner::new(garnet);
    assert_eq!(runner.tick(), 0, "stopped runner does nothing");

    runner.start();
    std::thread::sleep(Duration::from_millis(40));
    assert!(runner.tick() > 0);

    runner.pause();
    let at_pause = runner.garnet().frame();
    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(runner.tick(), 0);
    assert_eq!(runner.garnet().frame(), at_pause);

    runner.resume();
    std::thread::sleep(Duration::from_millis(40));
    assert!(runner.tick() > 0);

    let garnet = runner.stop();
    assert!(garnet.frame() > at_pause);
}

#[test]
fn turbo_paces_from_the_first_frame() {
    let (mut garnet, _host) = runtime();
    garnet.load_game(&[1]).unwrap();

    // turbo is set before the loop ever runs a frame
    let runner = Runner::new(garnet);
    runner.set_turbo(8.0);
    runner.start();
    std::thread::sleep(Duration::from_millis(200));
    runner.pause();

    let garnet = runner.stop().expect("sole owner after join");
    // 8x of 60 fps over 200 ms is ~96 frames; real-time pacing would give ~12
    assert!(garnet.frame() > 40, "turbo applied, got {} frames", garnet.frame());
}

#[test]
fn threaded_runner_paces_and_stops_cleanly() {
    let (mut garnet, mut host) = runtime();
    garnet.load_game(&[1]).unwrap();

    let runner = Runner::new(garnet);
    assert_eq!(runner.state(), RunState::Paused);

    runner.start();
    assert_eq!(runner.state(), RunState::Running);
    std::thread::sleep(Duration::from_millis(200));

    runner.pause();
    let garnet = runner.stop().expect("sole owner after join");
    let frames = garnet.frame();
    assert!(frames > 0, "runner produced frames");
    // ~60 fps over 200 ms; generous upper bound guards against free-running
    assert!(frames < 60, "runner paced frames, got {frames}");

    // the last published frame is still readable after stop
    host.video.poll();
    let last = host.video.latest();
    assert!(!last.pixels.is_empty());
}
