//! Dynamic loading and driving of libretro cores.
//!
//! A [`LibretroCore`] owns a dlopen'd core library plus the buffers its C
//! callbacks write into. The libretro ABI has no userdata pointer, so while a
//! core function is executing, a thread-local points at this core's
//! [`CallbackState`]; it is cleared again before the call returns. Nothing
//! else in the process is global.

use std::{
    cell::Cell,
    ffi::{CStr, CString, c_char, c_uint, c_void},
    path::Path,
    ptr,
};

use easyerr::{Error, ResultExt};
use libloading::Library;

pub mod abi;
pub mod pixel;

use abi::{CoreFns, GameGeometry, PixelFormat, SystemAvInfo, SystemTiming};
use pixel::PixelProcess;

/// Receives the output of one emulated frame.
pub trait FrameSink {
    /// A completed video frame in ABGR8888. Called at most once per
    /// [`LibretroCore::run_frame`]; a duplicate frame produces no call.
    fn video_frame(&mut self, pixels: &[u32], width: u32, height: u32);

    /// Interleaved stereo samples produced during the frame.
    fn audio_samples(&mut self, samples: &[i16]);

    /// The core changed its output resolution or timing. Reported before the
    /// first `video_frame` at the new geometry.
    fn geometry_changed(&mut self, info: AvInfo);
}

/// Output geometry and timing, flattened from `retro_system_av_info`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub sample_rate: f64,
}

#[derive(Debug, Error)]
pub enum CoreLoadError {
    #[error("failed to open core library")]
    Open { source: libloading::Error },
    #[error("core is missing required symbol `{name}`")]
    MissingSymbol {
        name: &'static str,
        source: libloading::Error,
    },
    #[error("core speaks libretro API v{found}, expected v{expected}")]
    ApiVersion { found: u32, expected: u32 },
}

#[derive(Debug, Error)]
pub enum GameLoadError {
    #[error("core rejected the game image")]
    Rejected,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("core does not support save states")]
    Unsupported,
    #[error("core failed to serialize its state")]
    Serialize,
    #[error("core failed to restore the given state")]
    Unserialize,
}

/// A span of emulated address space captured from the core's memory map.
#[derive(Debug, Clone, Copy)]
struct MemoryRegion {
    start: usize,
    len: usize,
    ptr: *mut u8,
}

/// Everything the C callbacks touch. Boxed so its address stays stable while
/// the thread-local points at it.
struct CallbackState {
    pixel_format: PixelFormat,
    process: PixelProcess,
    geometry: GameGeometry,
    timing: SystemTiming,
    geometry_dirty: bool,

    video: Vec<u32>,
    video_size: Option<(u32, u32)>,
    audio: Vec<i16>,
    input: u32,

    regions: Vec<MemoryRegion>,
    system_dir: CString,
    save_dir: CString,
}

thread_local! {
    static ACTIVE: Cell<*mut CallbackState> = const { Cell::new(ptr::null_mut()) };
}

unsafe extern "C" fn environment_cb(cmd: c_uint, data: *mut c_void) -> bool {
    let state = ACTIVE.get();
    if state.is_null() {
        return false;
    }
    let state = unsafe { &mut *state };

    match cmd & !abi::ENV_EXPERIMENTAL {
        abi::ENV_GET_OVERSCAN => {
            unsafe { *data.cast::<bool>() = false };
            true
        }
        abi::ENV_GET_CAN_DUPE => {
            unsafe { *data.cast::<bool>() = true };
            true
        }
        abi::ENV_SET_PERFORMANCE_LEVEL => true,
        abi::ENV_GET_SYSTEM_DIRECTORY => {
            unsafe { *data.cast::<*const c_char>() = state.system_dir.as_ptr() };
            true
        }
        abi::ENV_GET_SAVE_DIRECTORY => {
            unsafe { *data.cast::<*const c_char>() = state.save_dir.as_ptr() };
            true
        }
        abi::ENV_SET_PIXEL_FORMAT => {
            let raw = unsafe { *data.cast::<i32>() };
            match PixelFormat::from_raw(raw) {
                Some(format) => {
                    tracing::debug!(?format, "core set pixel format");
                    state.pixel_format = format;
                    true
                }
                None => {
                    tracing::warn!(raw, "core requested unknown pixel format");
                    false
                }
            }
        }
        abi::ENV_SET_SYSTEM_AV_INFO => {
            let info = unsafe { &*data.cast::<SystemAvInfo>() };
            state.geometry = info.geometry;
            state.timing = info.timing;
            state.geometry_dirty = true;
            true
        }
        abi::ENV_SET_GEOMETRY => {
            state.geometry = unsafe { *data.cast::<GameGeometry>() };
            state.geometry_dirty = true;
            true
        }
        abi::ENV_SET_MEMORY_MAPS => {
            let map = unsafe { &*data.cast::<abi::MemoryMap>() };
            let descriptors =
                unsafe { std::slice::from_raw_parts(map.descriptors, map.num_descriptors as usize) };
            state.regions = descriptors
                .iter()
                .filter(|d| !d.ptr.is_null() && d.len > 0)
                .map(|d| MemoryRegion {
                    start: d.start,
                    len: d.len,
                    ptr: unsafe { d.ptr.cast::<u8>().add(d.offset) },
                })
                .collect();
            tracing::debug!(regions = state.regions.len(), "captured core memory map");
            true
        }
        abi::ENV_GET_INPUT_BITMASKS => true,
        abi::ENV_SET_VARIABLES => true,
        abi::ENV_GET_VARIABLE_UPDATE => {
            unsafe { *data.cast::<bool>() = false };
            true
        }
        other => {
            tracing::trace!(cmd = other, "unhandled environment command");
            false
        }
    }
}

unsafe extern "C" fn video_refresh_cb(data: *const c_void, width: c_uint, height: c_uint, pitch: usize) {
    let state = ACTIVE.get();
    if state.is_null() || data.is_null() {
        // A null frame means "duplicate the previous one".
        return;
    }
    let state = unsafe { &mut *state };

    let src = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), pitch * height as usize) };
    pixel::convert_frame(
        src,
        width as usize,
        height as usize,
        pitch,
        state.pixel_format,
        state.process,
        &mut state.video,
    );
    state.video_size = Some((width, height));
}

unsafe extern "C" fn audio_sample_cb(left: i16, right: i16) {
    let state = ACTIVE.get();
    if state.is_null() {
        return;
    }
    let state = unsafe { &mut *state };
    state.audio.push(left);
    state.audio.push(right);
}

unsafe extern "C" fn audio_sample_batch_cb(data: *const i16, frames: usize) -> usize {
    let state = ACTIVE.get();
    if state.is_null() || data.is_null() {
        return frames;
    }
    let state = unsafe { &mut *state };
    let samples = unsafe { std::slice::from_raw_parts(data, frames * 2) };
    state.audio.extend_from_slice(samples);
    frames
}

unsafe extern "C" fn input_poll_cb() {}

unsafe extern "C" fn input_state_cb(port: c_uint, device: c_uint, _index: c_uint, id: c_uint) -> i16 {
    let state = ACTIVE.get();
    if state.is_null() || port != 0 || device != abi::DEVICE_JOYPAD {
        return 0;
    }
    let mask = unsafe { (*state).input };
    if id == abi::DEVICE_ID_JOYPAD_MASK {
        (mask & 0x7FFF) as i16
    } else if id < 16 {
        i16::from(mask >> id & 1 == 1)
    } else {
        0
    }
}

/// A loaded libretro core.
pub struct LibretroCore {
    fns: CoreFns,
    state: Box<CallbackState>,
    game_loaded: bool,
    // Dropped last; `fns` pointers dangle once the library is unloaded.
    _library: Library,
}

// All core entry points are called from whichever thread currently owns the
// `LibretroCore`, never from two threads at once. The raw pointers inside
// `state.regions` point into the core's own allocations.
unsafe impl Send for LibretroCore {}

impl LibretroCore {
    /// Loads a core library and runs `retro_init`.
    ///
    /// `system_dir` and `save_dir` are handed to the core when it asks for
    /// its directories; they are not created here.
    pub fn load(path: &Path, system_dir: &Path, save_dir: &Path) -> Result<Self, CoreLoadError> {
        #[cfg(target_os = "linux")]
        let library: Library = unsafe {
            libloading::os::unix::Library::open(
                Some(path),
                libc::RTLD_NOW | libc::RTLD_LOCAL | libc::RTLD_NODELETE,
            )
            .context(CoreLoadCtx::Open)?
            .into()
        };
        #[cfg(not(target_os = "linux"))]
        let library = unsafe { Library::new(path).context(CoreLoadCtx::Open)? };

        let fns = unsafe { load_core_fns(&library)? };

        let version = unsafe { (fns.api_version)() };
        if version != abi::API_VERSION {
            return Err(CoreLoadError::ApiVersion {
                found: version,
                expected: abi::API_VERSION,
            });
        }

        let mut core = Self {
            fns,
            state: Box::new(CallbackState {
                pixel_format: PixelFormat::Rgb1555,
                process: PixelProcess::None,
                geometry: GameGeometry {
                    base_width: 0,
                    base_height: 0,
                    max_width: 0,
                    max_height: 0,
                    aspect_ratio: 0.0,
                },
                timing: SystemTiming {
                    fps: 60.0,
                    sample_rate: 32768.0,
                },
                geometry_dirty: false,
                video: Vec::new(),
                video_size: None,
                audio: Vec::new(),
                input: 0,
                regions: Vec::new(),
                system_dir: path_cstring(system_dir),
                save_dir: path_cstring(save_dir),
            }),
            game_loaded: false,
            _library: library,
        };

        unsafe {
            (core.fns.set_environment)(environment_cb);
            (core.fns.set_video_refresh)(video_refresh_cb);
            (core.fns.set_audio_sample)(audio_sample_cb);
            (core.fns.set_audio_sample_batch)(audio_sample_batch_cb);
            (core.fns.set_input_poll)(input_poll_cb);
            (core.fns.set_input_state)(input_state_cb);
        }
        core.with_active(|fns| unsafe { (fns.init)() });

        let (name, version) = core.library_info();
        tracing::info!(core = %name, version = %version, "loaded libretro core");

        Ok(core)
    }

    /// Core library name and version from `retro_get_system_info`.
    pub fn library_info(&self) -> (String, String) {
        let mut info = abi::SystemInfo {
            library_name: ptr::null(),
            library_version: ptr::null(),
            valid_extensions: ptr::null(),
            need_fullpath: false,
            block_extract: false,
        };
        unsafe { (self.fns.get_system_info)(&mut info) };
        (cstr_owned(info.library_name), cstr_owned(info.library_version))
    }

    /// Hands the ROM image to the core.
    pub fn load_game(&mut self, rom: &[u8]) -> Result<AvInfo, GameLoadError> {
        let info = abi::GameInfo {
            path: ptr::null(),
            data: rom.as_ptr().cast(),
            size: rom.len(),
            meta: ptr::null(),
        };
        let ok = self.with_active(|fns| unsafe { (fns.load_game)(&info) });
        if !ok {
            return Err(GameLoadError::Rejected);
        }
        self.game_loaded = true;

        let mut av = SystemAvInfo {
            geometry: self.state.geometry,
            timing: self.state.timing,
        };
        self.with_active(|fns| unsafe { (fns.get_system_av_info)(&mut av) });
        self.state.geometry = av.geometry;
        self.state.timing = av.timing;
        self.state.geometry_dirty = false;
        self.state.video_size = None;

        // Cores that never send a memory map still expose system RAM the
        // classic way.
        if self.state.regions.is_empty() {
            let ptr = unsafe { (self.fns.get_memory_data)(abi::MEMORY_SYSTEM_RAM) };
            let len = unsafe { (self.fns.get_memory_size)(abi::MEMORY_SYSTEM_RAM) };
            if !ptr.is_null() && len > 0 {
                self.state.regions.push(MemoryRegion {
                    start: 0,
                    len,
                    ptr: ptr.cast(),
                });
            }
        }

        Ok(self.av_info())
    }

    pub fn unload_game(&mut self) {
        if self.game_loaded {
            self.with_active(|fns| unsafe { (fns.unload_game)() });
            self.game_loaded = false;
            self.state.regions.clear();
            self.state.video_size = None;
        }
    }

    pub fn reset(&mut self) {
        self.with_active(|fns| unsafe { (fns.reset)() });
    }

    pub fn av_info(&self) -> AvInfo {
        AvInfo {
            width: self.state.geometry.base_width,
            height: self.state.geometry.base_height,
            fps: self.state.timing.fps,
            sample_rate: self.state.timing.sample_rate,
        }
    }

    pub fn set_pixel_process(&mut self, process: PixelProcess) {
        self.state.process = process;
    }

    /// Runs one emulated frame and forwards its output to `sink`.
    ///
    /// `input` is the joypad button mask sampled for the whole frame. The
    /// core's callbacks run synchronously inside this call.
    pub fn run_frame(&mut self, input: u32, sink: &mut dyn FrameSink) {
        self.state.input = input;
        self.state.audio.clear();
        self.state.video_size = None;

        self.with_active(|fns| unsafe { (fns.run)() });

        if self.state.geometry_dirty {
            self.state.geometry_dirty = false;
            sink.geometry_changed(self.av_info());
        }
        if let Some((width, height)) = self.state.video_size.take() {
            sink.video_frame(&self.state.video, width, height);
        }
        if !self.state.audio.is_empty() {
            sink.audio_samples(&self.state.audio);
        }
    }

    /// Snapshot of the core's internal state, for save states and rewind.
    pub fn serialize(&mut self) -> Result<Vec<u8>, StateError> {
        let size = self.with_active(|fns| unsafe { (fns.serialize_size)() });
        if size == 0 {
            return Err(StateError::Unsupported);
        }
        let mut buf = vec![0u8; size];
        let ok =
            self.with_active(|fns| unsafe { (fns.serialize)(buf.as_mut_ptr().cast(), size) });
        if ok { Ok(buf) } else { Err(StateError::Serialize) }
    }

    pub fn unserialize(&mut self, state: &[u8]) -> Result<(), StateError> {
        let ok = self
            .with_active(|fns| unsafe { (fns.unserialize)(state.as_ptr().cast(), state.len()) });
        if ok { Ok(()) } else { Err(StateError::Unserialize) }
    }

    /// Copies the battery-backed save RAM out of the core, if it has any.
    pub fn save_ram(&mut self) -> Option<Vec<u8>> {
        let (ptr, len) = self.save_ram_raw()?;
        Some(unsafe { std::slice::from_raw_parts(ptr, len).to_vec() })
    }

    /// Writes previously saved battery RAM back into the core. Returns how
    /// many bytes were copied.
    pub fn load_save_ram(&mut self, data: &[u8]) -> usize {
        let Some((ptr, len)) = self.save_ram_raw() else {
            return 0;
        };
        let n = len.min(data.len());
        unsafe { std::slice::from_raw_parts_mut(ptr, len)[..n].copy_from_slice(&data[..n]) };
        n
    }

    fn save_ram_raw(&mut self) -> Option<(*mut u8, usize)> {
        let ptr = self.with_active(|fns| unsafe { (fns.get_memory_data)(abi::MEMORY_SAVE_RAM) });
        let len = self.with_active(|fns| unsafe { (fns.get_memory_size)(abi::MEMORY_SAVE_RAM) });
        (!ptr.is_null() && len > 0).then_some((ptr.cast(), len))
    }

    /// Reads one byte of emulated memory, if `addr` falls inside a mapped
    /// region.
    pub fn read_byte(&self, addr: usize) -> Option<u8> {
        let region = self
            .state
            .regions
            .iter()
            .find(|r| addr >= r.start && addr - r.start < r.len)?;
        Some(unsafe { *region.ptr.add(addr - region.start) })
    }

    /// Sets the current frame's callback state, runs `f`, clears it again.
    fn with_active<R>(&mut self, f: impl FnOnce(&CoreFns) -> R) -> R {
        ACTIVE.set(&raw mut *self.state);
        let result = f(&self.fns);
        ACTIVE.set(ptr::null_mut());
        result
    }
}

impl Drop for LibretroCore {
    fn drop(&mut self) {
        self.unload_game();
        self.with_active(|fns| unsafe { (fns.deinit)() });
    }
}

unsafe fn load_core_fns(library: &Library) -> Result<CoreFns, CoreLoadError> {
    macro_rules! sym {
        ($name:literal) => {
            unsafe {
                *library
                    .get(concat!($name, "\0").as_bytes())
                    .with_context(|_| CoreLoadCtx::MissingSymbol { name: $name })?
            }
        };
    }

    Ok(CoreFns {
        api_version: sym!("retro_api_version"),
        init: sym!("retro_init"),
        deinit: sym!("retro_deinit"),
        reset: sym!("retro_reset"),
        run: sym!("retro_run"),
        load_game: sym!("retro_load_game"),
        unload_game: sym!("retro_unload_game"),
        serialize_size: sym!("retro_serialize_size"),
        serialize: sym!("retro_serialize"),
        unserialize: sym!("retro_unserialize"),
        get_system_info: sym!("retro_get_system_info"),
        get_system_av_info: sym!("retro_get_system_av_info"),
        set_environment: sym!("retro_set_environment"),
        set_video_refresh: sym!("retro_set_video_refresh"),
        set_audio_sample: sym!("retro_set_audio_sample"),
        set_audio_sample_batch: sym!("retro_set_audio_sample_batch"),
        set_input_poll: sym!("retro_set_input_poll"),
        set_input_state: sym!("retro_set_input_state"),
        get_memory_data: sym!("retro_get_memory_data"),
        get_memory_size: sym!("retro_get_memory_size"),
    })
}

fn path_cstring(path: &Path) -> CString {
    let bytes: Vec<u8> = path
        .to_string_lossy()
        .bytes()
        .filter(|&b| b != 0)
        .collect();
    CString::new(bytes).unwrap_or_default()
}

fn cstr_owned(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}
