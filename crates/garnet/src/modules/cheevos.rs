//! Achievements module interface.
//!
//! The engine behind this trait wants to make HTTP calls but owns no network
//! stack: it stages each request in a relay table and the host performs the
//! I/O, feeding the response back by id. Results and unlocks surface as
//! queued [`EventRecord`]s, never as return values; nothing reachable from
//! this trait may block the frame loop or make it fail.

use easyerr::Error;

pub use crate::event::{AchievementKind, EventKind, EventRecord};

/// Read access to emulated memory for trigger evaluation.
pub trait MemoryRead {
    fn read_byte(&self, addr: u32) -> Option<u8>;

    fn read_u16_le(&self, addr: u32) -> Option<u16> {
        let lo = self.read_byte(addr)?;
        let hi = self.read_byte(addr.wrapping_add(1))?;
        Some(u16::from_le_bytes([lo, hi]))
    }

    fn read_u32_le(&self, addr: u32) -> Option<u32> {
        let lo = self.read_u16_le(addr)?;
        let hi = self.read_u16_le(addr.wrapping_add(2))?;
        Some(u32::from(hi) << 16 | u32::from(lo))
    }
}

/// One staged HTTP request, performed by the host on the engine's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Monotonically increasing, never reused for the process lifetime.
    pub id: u32,
    pub url: String,
    /// POST body; `None` makes this a GET.
    pub body: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("no staged request with id {id}")]
    UnknownRequestId { id: u32 },
}

/// Achievements support is not wired up in this build.
#[derive(Debug, Error)]
#[error("achievements support is unavailable")]
pub struct Unavailable;

/// Achievement totals for the loaded game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GameSummary {
    pub achievement_count: u32,
    pub unlocked_count: u32,
    pub total_points: u32,
    pub unlocked_points: u32,
}

pub trait CheevosModule: Send {
    /// Starts a login with a username and API token. The outcome arrives
    /// later as a `LoginSuccess`/`LoginFailed` event.
    fn begin_login(&self, username: &str, token: &str) -> Result<(), Unavailable>;

    fn logout(&self);

    /// Identifies the game server-side by content hash. The outcome arrives
    /// as a `GameLoadSuccess`/`GameLoadFailed` event.
    fn begin_load_game(&self, content_hash: &str) -> Result<(), Unavailable>;

    fn unload_game(&self);

    fn is_game_loaded(&self) -> bool;

    /// Pumps the engine once per emulated frame, after the core has run.
    /// Evaluates trigger conditions against `mem` and may stage requests and
    /// events as a side effect.
    fn do_frame(&self, mem: &dyn MemoryRead);

    /// Services background work (pending login, ping) when no frame context
    /// is available.
    fn idle(&self);

    fn set_hardcore(&self, enabled: bool);
    fn hardcore(&self) -> bool;
    fn set_encore(&self, enabled: bool);

    /// Lowest-id staged request not yet answered, if any. Poll repeatedly;
    /// each answered request unblocks the next.
    fn pending_request(&self) -> Option<HttpRequest>;

    /// Feeds a completed (or failed) HTTP response back to the engine.
    fn submit_response(&self, id: u32, status: u16, body: &[u8]) -> Result<(), RelayError>;

    /// Whether an event is queued. Side-effect free.
    fn has_pending_event(&self) -> bool;

    /// The oldest queued event, without consuming it.
    fn pending_event(&self) -> Option<EventRecord>;

    /// Pops the oldest queued event.
    fn consume_event(&self);

    fn summary(&self) -> GameSummary;
}

/// Stand-in used when achievements support is disabled. Every operation is a
/// no-op; the rest of the runtime is unaffected.
pub struct NopCheevosModule;

impl CheevosModule for NopCheevosModule {
    fn begin_login(&self, _username: &str, _token: &str) -> Result<(), Unavailable> {
        Err(Unavailable)
    }

    fn logout(&self) {}

    fn begin_load_game(&self, _content_hash: &str) -> Result<(), Unavailable> {
        Err(Unavailable)
    }

    fn unload_game(&self) {}

    fn is_game_loaded(&self) -> bool {
        false
    }

    fn do_frame(&self, _mem: &dyn MemoryRead) {}

    fn idle(&self) {}

    fn set_hardcore(&self, _enabled: bool) {}

    fn hardcore(&self) -> bool {
        false
    }

    fn set_encore(&self, _enabled: bool) {}

    fn pending_request(&self) -> Option<HttpRequest> {
        None
    }

    fn submit_response(&self, id: u32, _status: u16, _body: &[u8]) -> Result<(), RelayError> {
        Err(RelayError::UnknownRequestId { id })
    }

    fn has_pending_event(&self) -> bool {
        false
    }

    fn pending_event(&self) -> Option<EventRecord> {
        None
    }

    fn consume_event(&self) {}

    fn summary(&self) -> GameSummary {
        GameSummary::default()
    }
}
