//! Achievements server API: request bodies and response payloads.
//!
//! Every call is a form-encoded POST to a single `dorequest` endpoint,
//! dispatched by the `r` parameter. Responses are JSON with an overall
//! `Success` flag; a false flag carries a human-readable `Error`.

use serde::Deserialize;

use crate::trigger::Trigger;

pub const DOREQUEST_URL: &str = "https://retroachievements.org/dorequest.php";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Percent-encodes a form value (everything but unreserved characters).
fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for &b in value.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

pub fn login_body(username: &str, token: &str) -> String {
    format!("r=login2&u={}&t={}", encode(username), encode(token))
}

pub fn game_id_body(hash: &str) -> String {
    format!("r=gameid&m={}", encode(hash))
}

pub fn patch_body(username: &str, token: &str, game_id: u32) -> String {
    format!("r=patch&u={}&t={}&g={game_id}", encode(username), encode(token))
}

pub fn award_body(username: &str, token: &str, achievement_id: u32, hardcore: bool, hash: &str) -> String {
    format!(
        "r=awardachievement&u={}&t={}&a={achievement_id}&h={}&m={}",
        encode(username),
        encode(token),
        u8::from(hardcore),
        encode(hash),
    )
}

pub fn ping_body(username: &str, token: &str, game_id: u32) -> String {
    format!("r=ping&u={}&t={}&g={game_id}", encode(username), encode(token))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    pub user: Option<String>,
    pub token: Option<String>,
    #[serde(default)]
    pub score: u32,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameIdResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "GameID", default)]
    pub game_id: u32,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatchResponse {
    #[serde(default)]
    pub success: bool,
    pub patch_data: Option<PatchData>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatchData {
    #[serde(rename = "ID")]
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub achievements: Vec<AchievementDef>,
    /// Achievement ids this user has already unlocked server-side.
    #[serde(default)]
    pub unlocks: Vec<u32>,
}

/// One achievement definition from the game's patch set.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AchievementDef {
    #[serde(rename = "ID")]
    pub id: u32,
    pub title: String,
    pub description: String,
    pub points: u32,
    #[serde(rename = "BadgeURL", default)]
    pub badge_url: String,
    #[serde(default)]
    pub rarity: f32,
    #[serde(default)]
    pub rarity_hardcore: f32,
    /// 0 standard, 1 missable, 2 progression, 3 win.
    #[serde(rename = "Type", default)]
    pub kind: u8,
    pub trigger: Trigger,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AwardResponse {
    #[serde(default)]
    pub success: bool,
    pub score: Option<u32>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{Cmp, MemSize};

    #[test]
    fn bodies_are_form_encoded() {
        assert_eq!(login_body("user one", "a+b"), "r=login2&u=user%20one&t=a%2Bb");
        assert_eq!(game_id_body("abc123"), "r=gameid&m=abc123");
        assert_eq!(
            award_body("u", "t", 42, true, "deadbeef"),
            "r=awardachievement&u=u&t=t&a=42&h=1&m=deadbeef"
        );
    }

    #[test]
    fn login_response_parses() {
        let json = r#"{"Success":true,"User":"player","Token":"tok","Score":1234}"#;
        let response: LoginResponse = serde_json::from_str(json).unwrap();
        assert!(response.success);
        assert_eq!(response.user.as_deref(), Some("player"));
        assert_eq!(response.score, 1234);
    }

    #[test]
    fn failed_login_carries_an_error() {
        let json = r#"{"Success":false,"Error":"Invalid user/token combination."}"#;
        let response: LoginResponse = serde_json::from_str(json).unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Invalid user/token combination."));
    }

    #[test]
    fn patch_response_parses_achievements() {
        let json = r#"{
            "Success": true,
            "PatchData": {
                "ID": 9,
                "Title": "Example Quest",
                "Achievements": [{
                    "ID": 42,
                    "Title": "Speed Demon",
                    "Description": "Finish fast",
                    "Points": 10,
                    "BadgeURL": "https://example.invalid/42.png",
                    "Rarity": 12.5,
                    "RarityHardcore": 3.25,
                    "Type": 3,
                    "Trigger": {"size":"u8","address":7,"op":"eq","value":1}
                }]
            }
        }"#;
        let response: PatchResponse = serde_json::from_str(json).unwrap();
        let data = response.patch_data.unwrap();
        assert_eq!(data.id, 9);
        let ach = &data.achievements[0];
        assert_eq!((ach.id, ach.points), (42, 10));
        assert_eq!(ach.trigger.size, MemSize::U8);
        assert_eq!(ach.trigger.op, Cmp::Eq);
    }
}
