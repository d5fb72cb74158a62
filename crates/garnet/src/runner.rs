//! Frame loop scheduling.
//!
//! Two strategies with identical consumer-visible behavior: [`Runner`] paces
//! frames on a dedicated thread (preferred, lower jitter), and
//! [`CooperativeRunner`] is a fallback pumped by the host's own periodic
//! callback. Both step the core every tick even while frame-skipping; only
//! video publication is suppressed, so audio and achievement timing stay
//! exact.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use spin_sleep::SpinSleeper;

use crate::Garnet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

/// Wall-clock timer that stops counting while paused.
struct Timer {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl Timer {
    fn new() -> Self {
        Self {
            accumulated: Duration::ZERO,
            running_since: None,
        }
    }

    fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map_or(Duration::ZERO, |s| s.elapsed())
    }
}

struct Shared {
    garnet: Mutex<Garnet>,
    advance: AtomicBool,
    shutdown: AtomicBool,
    /// Turbo multiplier as `f32` bits.
    turbo: AtomicU32,
    frame_skip: AtomicU32,
}

fn frame_step(fps: f64, turbo: f32) -> Duration {
    Duration::from_secs_f64(1.0 / (fps.max(1.0) * f64::from(turbo.clamp(0.05, 32.0))))
}

fn should_publish(frame: u64, skip: u32) -> bool {
    skip == 0 || frame % (u64::from(skip) + 1) == 0
}

fn worker(shared: Arc<Shared>) {
    let sleeper = SpinSleeper::default();

    let mut timer = Timer::new();
    let mut emulated = Duration::ZERO;
    let mut fps = 60.0;

    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }
        if shared.advance.load(Ordering::Relaxed) {
            timer.resume();
        } else {
            timer.pause();

            std::thread::yield_now();
            std::hint::spin_loop();
            continue;
        }

        // current settings, so a turbo change paces this very frame
        let turbo = f32::from_bits(shared.turbo.load(Ordering::Relaxed));
        let skip = shared.frame_skip.load(Ordering::Relaxed);
        let step = frame_step(fps, turbo);

        // how far behind real-time we are
        let delta = timer.elapsed().saturating_sub(emulated);
        let to_sleep = step.saturating_sub(delta);
        if !to_sleep.is_zero() {
            sleeper.sleep(to_sleep);
        }

        // resync after a stall longer than two frames instead of fast-forwarding
        let now = timer.elapsed();
        if now.saturating_sub(emulated) > step * 2 {
            emulated = now.saturating_sub(step);
        }

        let mut garnet = shared.garnet.lock().unwrap();
        let publish = should_publish(garnet.frame(), skip);
        if garnet.run_frame(publish).is_err() {
            garnet.idle();
        }
        fps = garnet.av_info().fps;
        drop(garnet);

        emulated += step;
    }
}

/// Dedicated-thread frame loop.
pub struct Runner {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Runner {
    /// Spawns the emulation thread. The loop starts paused; call
    /// [`start`](Self::start).
    pub fn new(garnet: Garnet) -> Self {
        let shared = Arc::new(Shared {
            garnet: Mutex::new(garnet),
            advance: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            turbo: AtomicU32::new(1.0f32.to_bits()),
            frame_skip: AtomicU32::new(0),
        });

        let handle = std::thread::Builder::new()
            .name("garnet runner".into())
            .spawn({
                let shared = shared.clone();
                move || worker(shared)
            })
            .unwrap();

        Self {
            shared,
            handle: Some(handle),
        }
    }

    pub fn start(&self) {
        self.shared.advance.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.shared.advance.store(false, Ordering::SeqCst);
    }

    pub fn running(&self) -> bool {
        self.shared.advance.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RunState {
        if self.handle.is_none() {
            RunState::Stopped
        } else if self.running() {
            RunState::Running
        } else {
            RunState::Paused
        }
    }

    pub fn set_turbo(&self, turbo: f32) {
        self.shared.turbo.store(turbo.to_bits(), Ordering::Relaxed);
    }

    pub fn set_frame_skip(&self, skip: u32) {
        self.shared.frame_skip.store(skip, Ordering::Relaxed);
    }

    /// Locks the runtime for direct access. The emulation thread waits at
    /// the next frame boundary while the guard is held.
    pub fn get(&self) -> MutexGuard<'_, Garnet> {
        self.shared.garnet.lock().unwrap()
    }

    /// Signals shutdown, joins the emulation thread at the frame boundary
    /// and returns the runtime. The last published frame stays readable on
    /// the host side.
    pub fn stop(mut self) -> Option<Garnet> {
        self.shutdown_join();
        let shared = self.shared.clone();
        drop(self);
        Arc::into_inner(shared).and_then(|s| s.garnet.into_inner().ok())
    }

    fn shutdown_join(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.shutdown_join();
    }
}

/// Frame loop pumped by the host's own periodic callback.
pub struct CooperativeRunner {
    garnet: Garnet,
    state: RunState,
    timer: Timer,
    emulated: Duration,
    turbo: f32,
    frame_skip: u32,
}

impl CooperativeRunner {
    /// A tick never runs more than this many frames of catch-up.
    const MAX_CATCH_UP: u32 = 4;

    pub fn new(garnet: Garnet) -> Self {
        Self {
            garnet,
            state: RunState::Stopped,
            timer: Timer::new(),
            emulated: Duration::ZERO,
            turbo: 1.0,
            frame_skip: 0,
        }
    }

    pub fn start(&mut self) {
        self.state = RunState::Running;
        self.timer.resume();
    }

    pub fn pause(&mut self) {
        if self.state == RunState::Running {
            self.state = RunState::Paused;
            self.timer.pause();
        }
    }

    pub fn resume(&mut self) {
        if self.state == RunState::Paused {
            self.start();
        }
    }

    pub fn stop(mut self) -> Garnet {
        self.timer.pause();
        self.state = RunState::Stopped;
        self.garnet
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn set_turbo(&mut self, turbo: f32) {
        self.turbo = turbo;
    }

    pub fn set_frame_skip(&mut self, skip: u32) {
        self.frame_skip = skip;
    }

    pub fn garnet(&self) -> &Garnet {
        &self.garnet
    }

    pub fn garnet_mut(&mut self) -> &mut Garnet {
        &mut self.garnet
    }

    /// Runs every frame wall-clock owes since the last call. Returns how
    /// many frames were run.
    pub fn tick(&mut self) -> u32 {
        if self.state != RunState::Running {
            return 0;
        }

        let step = frame_step(self.garnet.av_info().fps, self.turbo);
        let mut ran = 0;
        while self.timer.elapsed().saturating_sub(self.emulated) >= step {
            if ran == Self::MAX_CATCH_UP {
                // stalled; resync instead of fast-forwarding
                self.emulated = self.timer.elapsed();
                break;
            }

            let publish = should_publish(self.garnet.frame(), self.frame_skip);
            if self.garnet.run_frame(publish).is_err() {
                self.garnet.idle();
            }
            self.emulated += step;
            ran += 1;
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_cadence_with_frame_skip() {
        // skip = 2 keeps every third frame
        let kept: Vec<u64> = (0..9).filter(|&f| should_publish(f, 2)).collect();
        assert_eq!(kept, [0, 3, 6]);
        // skip = 0 keeps everything
        assert!((0..9).all(|f| should_publish(f, 0)));
    }

    #[test]
    fn turbo_scales_the_frame_step() {
        // Duration is quantized to whole nanoseconds, so the ratio is only
        // accurate to rounding.
        let base = frame_step(60.0, 1.0);
        let double = frame_step(60.0, 2.0);
        assert!((base.as_secs_f64() / double.as_secs_f64() - 2.0).abs() < 1e-6);
        assert_eq!(base.subsec_nanos(), 16_666_667);
        assert_eq!(double.subsec_nanos(), 8_333_333);
    }

    #[test]
    fn timer_ignores_paused_time() {
        let mut timer = Timer::new();
        timer.resume();
        std::thread::sleep(Duration::from_millis(10));
        timer.pause();
        let at_pause = timer.elapsed();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(timer.elapsed(), at_pause);
        timer.resume();
        assert!(timer.elapsed() >= at_pause);
    }
}
