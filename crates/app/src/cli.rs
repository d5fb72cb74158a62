use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};

/// Post-processing applied to core framebuffers.
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum PixelMode {
    /// Colors untouched
    #[default]
    Normal,
    /// Contrast correction for colors authored for a non-backlit screen
    Correct,
    /// Classic four-shade green palette
    Dmg,
}

#[derive(Args, Debug)]
pub struct RaConfig {
    /// RetroAchievements username
    #[arg(long("ra-user"))]
    pub user: Option<String>,
    /// RetroAchievements API token
    #[arg(long("ra-token"))]
    pub token: Option<String>,
    /// Start in hardcore mode
    #[arg(long, default_value_t = false)]
    pub hardcore: bool,
    /// Replay already-earned achievements from scratch
    #[arg(long, default_value_t = false)]
    pub encore: bool,
    /// Disable achievements entirely
    #[arg(long, default_value_t = false)]
    pub offline: bool,
}

/// Garnet: headless libretro runtime harness
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Path to the libretro core library (.so/.dylib/.dll)
    #[arg(short, long)]
    pub core: PathBuf,
    /// Path to the ROM to load and run
    #[arg(short, long)]
    pub rom: PathBuf,
    /// Directory for battery saves
    #[arg(long, default_value = "saves")]
    pub save_dir: PathBuf,
    /// Directory handed to the core for system files (BIOS images etc.)
    #[arg(long, default_value = "system")]
    pub system_dir: PathBuf,
    /// Framebuffer post-processing
    #[arg(long, value_enum, default_value = "normal")]
    pub pixel: PixelMode,
    #[command(flatten)]
    pub ra: RaConfig,
    /// Emulation speed multiplier
    #[arg(long, default_value_t = 1.0)]
    pub turbo: f32,
    /// Keep only every (N+1)-th frame's video; the core still runs every
    /// frame
    #[arg(long, default_value_t = 0)]
    pub frame_skip: u32,
    /// Stop after roughly this many emulated frames (0 = run until killed)
    #[arg(short, long, default_value_t = 0)]
    pub frames: u64,
    /// Drive the frame loop cooperatively on this thread instead of a
    /// dedicated one
    #[arg(long, default_value_t = false)]
    pub cooperative: bool,
}
