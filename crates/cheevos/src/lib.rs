//! Achievements engine.
//!
//! [`RaClient`] implements `garnet`'s achievements module interface: a login
//! and game-identification state machine, per-frame trigger evaluation, and
//! the pull-based HTTP relay and event queue the host drains. The client is
//! a cheap-to-clone handle; one clone lives on the emulation thread inside
//! the runtime, another on the control thread for relay and event polling.
//! All network failures degrade into queued events; nothing here can stall
//! or fail the frame loop.

mod api;
mod queue;
mod relay;
pub mod trigger;

use std::sync::{Arc, Mutex};

use garnet::event::{EventKind, EventRecord};
use garnet::modules::cheevos::{
    CheevosModule, GameSummary, HttpRequest, MemoryRead, RelayError, Unavailable,
};

use crate::api::AchievementDef;
use crate::queue::EventQueue;
use crate::relay::{Continuation, Relay};

/// Rich-presence ping cadence in frames, roughly two minutes at 60 fps.
const PING_INTERVAL_FRAMES: u32 = 7200;

#[derive(Debug, Clone)]
struct User {
    username: String,
    token: String,
    score: u32,
}

enum Session {
    LoggedOut,
    Pending,
    LoggedIn(User),
}

struct AchievementState {
    def: AchievementDef,
    /// Trigger result from the previous frame, for edge detection.
    last: bool,
    unlocked: bool,
}

struct GameState {
    game_id: u32,
    hash: String,
    title: String,
    achievements: Vec<AchievementState>,
    completed_emitted: bool,
    frames: u32,
}

struct Inner {
    relay: Relay,
    events: EventQueue,
    session: Session,
    hardcore: bool,
    encore: bool,
    connected: bool,
    game: Option<GameState>,
}

/// Shared achievements client handle.
#[derive(Clone)]
pub struct RaClient(Arc<Mutex<Inner>>);

impl Default for RaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RaClient {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Inner {
            relay: Relay::new(),
            events: EventQueue::new(),
            session: Session::LoggedOut,
            hardcore: false,
            encore: false,
            connected: true,
            game: None,
        })))
    }
}

impl Inner {
    fn stage(&mut self, body: String, continuation: Continuation) {
        let staged = self.relay.stage(
            api::DOREQUEST_URL.to_owned(),
            Some(body),
            Some(api::FORM_CONTENT_TYPE.to_owned()),
            continuation,
        );
        if let Err(refused) = staged {
            // fail the request immediately rather than leaking it
            self.dispatch(refused, 0, &[]);
        }
    }

    fn dispatch(&mut self, continuation: Continuation, status: u16, body: &[u8]) {
        match continuation {
            Continuation::Login => self.finish_login(status, body),
            Continuation::ResolveGame { hash } => self.finish_resolve(hash, status, body),
            Continuation::FetchPatch { game_id, hash } => {
                self.finish_patch(game_id, hash, status, body);
            }
            Continuation::Award { achievement_id } => self.finish_award(achievement_id, status, body),
            Continuation::Ping => self.track_connectivity(status == 200),
        }
    }

    /// Emits `Disconnected`/`Reconnected` on transport-level transitions.
    fn track_connectivity(&mut self, transport_ok: bool) {
        if transport_ok && !self.connected {
            self.connected = true;
            self.events.push(EventRecord::new(EventKind::Reconnected));
        } else if !transport_ok && self.connected {
            self.connected = false;
            self.events.push(EventRecord::new(EventKind::Disconnected));
        }
    }

    fn push_failure(&mut self, kind: EventKind, message: &str, status: u16) {
        let mut event = EventRecord::new(kind);
        event.set_error_message(message);
        event.error_code = i32::from(status);
        self.events.push(event);
    }

    fn finish_login(&mut self, status: u16, body: &[u8]) {
        self.track_connectivity(status == 200);
        if status != 200 {
            self.session = Session::LoggedOut;
            self.push_failure(EventKind::LoginFailed, "login request failed", status);
            return;
        }

        match serde_json::from_slice::<api::LoginResponse>(body) {
            Ok(response) if response.success => {
                let (Some(username), Some(token)) = (response.user, response.token) else {
                    self.session = Session::LoggedOut;
                    self.push_failure(EventKind::LoginFailed, "malformed login response", status);
                    return;
                };
                tracing::info!(user = %username, "logged in");

                let mut event = EventRecord::new(EventKind::LoginSuccess);
                event.set_title(&username);
                self.events.push(event);

                self.session = Session::LoggedIn(User {
                    username,
                    token,
                    score: response.score,
                });
            }
            Ok(response) => {
                self.session = Session::LoggedOut;
                let message = response.error.as_deref().unwrap_or("login rejected");
                self.push_failure(EventKind::LoginFailed, message, status);
            }
            Err(e) => {
                self.session = Session::LoggedOut;
                self.push_failure(EventKind::LoginFailed, &format!("bad login response: {e}"), status);
            }
        }
    }

    fn finish_resolve(&mut self, hash: String, status: u16, body: &[u8]) {
        self.track_connectivity(status == 200);
        if status != 200 {
            self.push_failure(EventKind::GameLoadFailed, "game lookup failed", status);
            return;
        }

        match serde_json::from_slice::<api::GameIdResponse>(body) {
            Ok(response) if response.success && response.game_id != 0 => {
                let Session::LoggedIn(user) = &self.session else {
                    self.push_failure(EventKind::GameLoadFailed, "no user session", status);
                    return;
                };
                let body = api::patch_body(&user.username, &user.token, response.game_id);
                self.stage(
                    body,
                    Continuation::FetchPatch {
                        game_id: response.game_id,
                        hash,
                    },
                );
            }
            Ok(response) => {
                let message = response
                    .error
                    .as_deref()
                    .unwrap_or("unknown game hash");
                self.push_failure(EventKind::GameLoadFailed, message, status);
            }
            Err(e) => {
                self.push_failure(
                    EventKind::GameLoadFailed,
                    &format!("bad game lookup response: {e}"),
                    status,
                );
            }
        }
    }

    fn finish_patch(&mut self, game_id: u32, hash: String, status: u16, body: &[u8]) {
        self.track_connectivity(status == 200);
        let data = if status == 200 {
            match serde_json::from_slice::<api::PatchResponse>(body) {
                Ok(response) if response.success => response.patch_data,
                Ok(response) => {
                    let message = response.error.as_deref().unwrap_or("patch rejected");
                    self.push_failure(EventKind::GameLoadFailed, message, status);
                    return;
                }
                Err(e) => {
                    self.push_failure(
                        EventKind::GameLoadFailed,
                        &format!("bad patch response: {e}"),
                        status,
                    );
                    return;
                }
            }
        } else {
            self.push_failure(EventKind::GameLoadFailed, "patch fetch failed", status);
            return;
        };
        let Some(data) = data else {
            self.push_failure(EventKind::GameLoadFailed, "empty patch data", status);
            return;
        };

        if data.id != game_id {
            tracing::warn!(game_id, patch_id = data.id, "patch set id mismatch");
        }
        tracing::info!(
            game_id,
            title = %data.title,
            achievements = data.achievements.len(),
            "game identified"
        );

        // encore mode replays the set as if nothing were unlocked yet
        let unlocks = if self.encore { &[][..] } else { &data.unlocks[..] };
        let achievements = data
            .achievements
            .iter()
            .map(|def| AchievementState {
                def: def.clone(),
                last: false,
                unlocked: unlocks.contains(&def.id),
            })
            .collect();

        let mut event = EventRecord::new(EventKind::GameLoadSuccess);
        event.achievement_id = game_id;
        event.set_title(&data.title);
        self.events.push(event);

        self.game = Some(GameState {
            game_id,
            hash,
            title: data.title,
            achievements,
            completed_emitted: false,
            frames: 0,
        });
    }

    fn finish_award(&mut self, achievement_id: u32, status: u16, body: &[u8]) {
        self.track_connectivity(status == 200);
        if status == 200 {
            match serde_json::from_slice::<api::AwardResponse>(body) {
                Ok(response) if response.success => {
                    if let (Session::LoggedIn(user), Some(score)) =
                        (&mut self.session, response.score)
                    {
                        user.score = score;
                        tracing::debug!(score = user.score, "score updated");
                    }
                    return;
                }
                Ok(response) => {
                    let message = response.error.as_deref().unwrap_or("award rejected");
                    let mut event = EventRecord::new(EventKind::ServerError);
                    event.achievement_id = achievement_id;
                    event.set_error_message(message);
                    event.error_code = i32::from(status);
                    self.events.push(event);
                    return;
                }
                Err(_) => {}
            }
        }
        let mut event = EventRecord::new(EventKind::ServerError);
        event.achievement_id = achievement_id;
        event.set_error_message("award submission failed");
        event.error_code = i32::from(status);
        self.events.push(event);
    }

    fn pump_frame(&mut self, mem: &dyn MemoryRead) {
        let Some(game) = &mut self.game else {
            return;
        };

        // evaluate edges first; unlock bookkeeping needs the whole engine
        let mut unlocks = Vec::new();
        for state in &mut game.achievements {
            if state.unlocked {
                continue;
            }
            let now = state.def.trigger.eval(mem);
            if now && !state.last {
                state.unlocked = true;
                unlocks.push(state.def.clone());
            }
            state.last = now;
        }

        game.frames += 1;
        let ping_due = game.frames % PING_INTERVAL_FRAMES == 0;
        let all_unlocked = game.achievements.iter().all(|a| a.unlocked);
        let completed = all_unlocked && !game.completed_emitted && !game.achievements.is_empty();
        if completed {
            game.completed_emitted = true;
        }
        let game_id = game.game_id;
        let hash = game.hash.clone();
        let title = game.title.clone();

        for def in unlocks {
            self.unlock(&def, &hash);
        }
        if completed {
            tracing::info!(game_id, "all achievements unlocked");
            let mut event = EventRecord::new(EventKind::GameCompleted);
            event.achievement_id = game_id;
            event.set_title(&title);
            self.events.push(event);
        }
        if ping_due && let Session::LoggedIn(user) = &self.session {
            let body = api::ping_body(&user.username, &user.token, game_id);
            self.stage(body, Continuation::Ping);
        }
    }

    fn unlock(&mut self, def: &AchievementDef, hash: &str) {
        tracing::info!(id = def.id, title = %def.title, points = def.points, "achievement unlocked");

        let mut event = EventRecord::new(EventKind::AchievementTriggered);
        event.achievement_id = def.id;
        event.achievement_points = def.points;
        event.rarity = def.rarity;
        event.rarity_hardcore = def.rarity_hardcore;
        event.achievement_kind = def.kind;
        event.set_title(&def.title);
        event.set_description(&def.description);
        event.set_badge_url(&def.badge_url);
        self.events.push(event);

        if let Session::LoggedIn(user) = &self.session {
            let body = api::award_body(&user.username, &user.token, def.id, self.hardcore, hash);
            self.stage(body, Continuation::Award {
                achievement_id: def.id,
            });
        }
    }
}

impl CheevosModule for RaClient {
    fn begin_login(&self, username: &str, token: &str) -> Result<(), Unavailable> {
        let mut inner = self.0.lock().unwrap();
        inner.session = Session::Pending;
        let body = api::login_body(username, token);
        inner.stage(body, Continuation::Login);
        Ok(())
    }

    fn logout(&self) {
        let mut inner = self.0.lock().unwrap();
        inner.session = Session::LoggedOut;
        inner.game = None;
    }

    fn begin_load_game(&self, content_hash: &str) -> Result<(), Unavailable> {
        let mut inner = self.0.lock().unwrap();
        inner.game = None;

        if matches!(inner.session, Session::LoggedOut) {
            inner.push_failure(EventKind::GameLoadFailed, "no user session", 0);
            return Ok(());
        }

        let body = api::game_id_body(content_hash);
        inner.stage(
            body,
            Continuation::ResolveGame {
                hash: content_hash.to_owned(),
            },
        );
        Ok(())
    }

    fn unload_game(&self) {
        self.0.lock().unwrap().game = None;
    }

    fn is_game_loaded(&self) -> bool {
        self.0.lock().unwrap().game.is_some()
    }

    fn do_frame(&self, mem: &dyn MemoryRead) {
        self.0.lock().unwrap().pump_frame(mem);
    }

    fn idle(&self) {
        // background work is host-pumped through the relay; nothing to do
        // without frame context
    }

    fn set_hardcore(&self, enabled: bool) {
        let mut inner = self.0.lock().unwrap();
        if inner.hardcore == enabled {
            return;
        }
        inner.hardcore = enabled;
        // toggling invalidates in-flight edge state; no retroactive unlocks
        if let Some(game) = &mut inner.game {
            for state in &mut game.achievements {
                state.last = false;
            }
            tracing::info!(enabled, "hardcore toggled, trigger runtime reset");
        }
    }

    fn hardcore(&self) -> bool {
        self.0.lock().unwrap().hardcore
    }

    fn set_encore(&self, enabled: bool) {
        self.0.lock().unwrap().encore = enabled;
    }

    fn pending_request(&self) -> Option<HttpRequest> {
        self.0.lock().unwrap().relay.pending()
    }

    fn submit_response(&self, id: u32, status: u16, body: &[u8]) -> Result<(), RelayError> {
        let mut inner = self.0.lock().unwrap();
        let Some(continuation) = inner.relay.take(id) else {
            tracing::warn!(id, "response for unknown request id");
            return Err(RelayError::UnknownRequestId { id });
        };
        inner.dispatch(continuation, status, body);
        Ok(())
    }

    fn has_pending_event(&self) -> bool {
        !self.0.lock().unwrap().events.is_empty()
    }

    fn pending_event(&self) -> Option<EventRecord> {
        self.0.lock().unwrap().events.front().cloned()
    }

    fn consume_event(&self) {
        self.0.lock().unwrap().events.consume();
    }

    fn summary(&self) -> GameSummary {
        let inner = self.0.lock().unwrap();
        let Some(game) = &inner.game else {
            return GameSummary::default();
        };

        let mut summary = GameSummary {
            achievement_count: game.achievements.len() as u32,
            ..GameSummary::default()
        };
        for state in &game.achievements {
            summary.total_points += state.def.points;
            if state.unlocked {
                summary.unlocked_count += 1;
                summary.unlocked_points += state.def.points;
            }
        }
        summary
    }
}
