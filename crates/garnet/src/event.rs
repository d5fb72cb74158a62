//! Fixed-layout achievement event records.
//!
//! The byte offsets are a cross-boundary contract: hosts on the other side of
//! an FFI or IPC boundary read these records by offset, so the layout is
//! explicit, padded by hand, and pinned by const assertions.

use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

/// Event discriminant stored in [`EventRecord::event_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[repr(u32)]
pub enum EventKind {
    None = 0,
    AchievementTriggered = 1,
    LeaderboardStarted = 2,
    LeaderboardFailed = 3,
    LeaderboardSubmitted = 4,
    ChallengeIndicatorShow = 5,
    ChallengeIndicatorHide = 6,
    ProgressIndicatorShow = 7,
    ProgressIndicatorHide = 8,
    GameCompleted = 15,
    ServerError = 16,
    Disconnected = 17,
    Reconnected = 18,
    LoginSuccess = 100,
    LoginFailed = 101,
    GameLoadSuccess = 102,
    GameLoadFailed = 103,
}

/// Kind tag carried by achievement events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::FromRepr)]
#[repr(u8)]
pub enum AchievementKind {
    #[default]
    Standard = 0,
    Missable = 1,
    Progression = 2,
    Win = 3,
}

/// One queued event, 1564 bytes. Strings are nul-terminated and truncated at
/// their field width.
#[derive(Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct EventRecord {
    pub event_type: u32,
    pub achievement_id: u32,
    pub achievement_points: u32,
    pub title: [u8; 256],
    pub description: [u8; 256],
    pub badge_url: [u8; 512],
    pub rarity: f32,
    pub rarity_hardcore: f32,
    pub achievement_kind: u8,
    pub error_message: [u8; 512],
    _pad: [u8; 3],
    pub error_code: i32,
}

const_assert_eq!(std::mem::offset_of!(EventRecord, event_type), 0);
const_assert_eq!(std::mem::offset_of!(EventRecord, achievement_id), 4);
const_assert_eq!(std::mem::offset_of!(EventRecord, achievement_points), 8);
const_assert_eq!(std::mem::offset_of!(EventRecord, title), 12);
const_assert_eq!(std::mem::offset_of!(EventRecord, description), 268);
const_assert_eq!(std::mem::offset_of!(EventRecord, badge_url), 524);
const_assert_eq!(std::mem::offset_of!(EventRecord, rarity), 1036);
const_assert_eq!(std::mem::offset_of!(EventRecord, rarity_hardcore), 1040);
const_assert_eq!(std::mem::offset_of!(EventRecord, achievement_kind), 1044);
const_assert_eq!(std::mem::offset_of!(EventRecord, error_message), 1045);
const_assert_eq!(std::mem::offset_of!(EventRecord, error_code), 1560);
const_assert_eq!(std::mem::size_of::<EventRecord>(), 1564);

impl EventRecord {
    pub fn new(kind: EventKind) -> Self {
        let mut record = Self::new_zeroed();
        record.event_type = kind as u32;
        record
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_repr(self.event_type).unwrap_or(EventKind::None)
    }

    pub fn set_title(&mut self, s: &str) {
        copy_nul_terminated(&mut self.title, s);
    }

    pub fn set_description(&mut self, s: &str) {
        copy_nul_terminated(&mut self.description, s);
    }

    pub fn set_badge_url(&mut self, s: &str) {
        copy_nul_terminated(&mut self.badge_url, s);
    }

    pub fn set_error_message(&mut self, s: &str) {
        copy_nul_terminated(&mut self.error_message, s);
    }

    pub fn title(&self) -> String {
        read_nul_terminated(&self.title)
    }

    pub fn description(&self) -> String {
        read_nul_terminated(&self.description)
    }

    pub fn badge_url(&self) -> String {
        read_nul_terminated(&self.badge_url)
    }

    pub fn error_message(&self) -> String {
        read_nul_terminated(&self.error_message)
    }
}

impl std::fmt::Debug for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecord")
            .field("kind", &self.kind())
            .field("achievement_id", &self.achievement_id)
            .field("achievement_points", &self.achievement_points)
            .field("title", &self.title())
            .field("error_code", &self.error_code)
            .finish_non_exhaustive()
    }
}

/// Copies `s` into `dst`, truncating to leave room for the terminating nul.
fn copy_nul_terminated(dst: &mut [u8], s: &str) {
    let n = s.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&s.as_bytes()[..n]);
    dst[n..].fill(0);
}

fn read_nul_terminated(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_round_trip_through_raw_bytes() {
        let mut record = EventRecord::new(EventKind::AchievementTriggered);
        record.achievement_id = 42;
        record.achievement_points = 10;
        record.rarity = 12.5;
        record.rarity_hardcore = 3.25;
        record.achievement_kind = AchievementKind::Win as u8;
        record.error_code = -7;
        record.set_title("Speed Demon");
        record.set_description("Finish in under a minute");
        record.set_badge_url("https://example.invalid/badge/42.png");

        let bytes = record.as_bytes().to_vec();
        assert_eq!(bytes.len(), 1564);

        let read = EventRecord::read_from_bytes(&bytes).unwrap();
        assert_eq!(read.kind(), EventKind::AchievementTriggered);
        assert_eq!(read.achievement_id, 42);
        assert_eq!(read.achievement_points, 10);
        assert_eq!(read.rarity, 12.5);
        assert_eq!(read.rarity_hardcore, 3.25);
        assert_eq!(read.title(), "Speed Demon");
        assert_eq!(read.description(), "Finish in under a minute");
        assert_eq!(read.badge_url(), "https://example.invalid/badge/42.png");
        assert_eq!(read.error_code, -7);
    }

    #[test]
    fn raw_offsets_match_the_documented_layout() {
        let mut record = EventRecord::new(EventKind::ServerError);
        record.achievement_id = 0x11223344;
        record.set_title("T");
        record.set_error_message("boom");
        record.error_code = 500;

        let bytes = record.as_bytes();
        assert_eq!(bytes[0..4], 16u32.to_le_bytes());
        assert_eq!(bytes[4..8], 0x11223344u32.to_le_bytes());
        assert_eq!(bytes[12], b'T');
        assert_eq!(bytes[13], 0);
        assert_eq!(&bytes[1045..1049], b"boom");
        assert_eq!(bytes[1560..1564], 500i32.to_le_bytes());
    }

    #[test]
    fn oversized_strings_truncate_at_field_width() {
        let mut record = EventRecord::new(EventKind::AchievementTriggered);
        let long = "x".repeat(300);
        record.set_title(&long);
        record.set_description("next field untouched");

        assert_eq!(record.title().len(), 255);
        assert_eq!(record.title[254], b'x');
        assert_eq!(record.title[255], 0);
        assert_eq!(record.description(), "next field untouched");
    }

    #[test]
    fn unknown_event_type_reads_as_none() {
        let mut record = EventRecord::new(EventKind::None);
        record.event_type = 9999;
        assert_eq!(record.kind(), EventKind::None);
    }
}
