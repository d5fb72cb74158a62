//! Staged-request table for the HTTP relay.
//!
//! The engine never talks to the network itself: it stages requests here and
//! the host performs the I/O, answering by id. Ids are monotonic from 1 and
//! never reused; polling surfaces requests in FIFO order, lowest id first.

use garnet::modules::cheevos::HttpRequest;

/// What to do with the response once the host delivers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Continuation {
    Login,
    ResolveGame { hash: String },
    FetchPatch { game_id: u32, hash: String },
    Award { achievement_id: u32 },
    Ping,
}

struct Slot {
    request: HttpRequest,
    continuation: Continuation,
}

pub(crate) struct Relay {
    // insertion order == id order, so slots[0] is the next to poll
    slots: Vec<Slot>,
    next_id: u32,
}

/// In-flight request cap, matching the engine's bounded descriptor table.
pub(crate) const MAX_PENDING: usize = 32;

impl Relay {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_id: 1,
        }
    }

    /// Stages a request. On overflow the continuation is handed back so the
    /// caller can fail it immediately instead of silently dropping it.
    pub(crate) fn stage(
        &mut self,
        url: String,
        body: Option<String>,
        content_type: Option<String>,
        continuation: Continuation,
    ) -> Result<u32, Continuation> {
        if self.slots.len() >= MAX_PENDING {
            tracing::warn!(cap = MAX_PENDING, "request table full");
            return Err(continuation);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.slots.push(Slot {
            request: HttpRequest {
                id,
                url,
                body,
                content_type,
            },
            continuation,
        });
        Ok(id)
    }

    /// The oldest staged request still awaiting a response.
    pub(crate) fn pending(&self) -> Option<HttpRequest> {
        self.slots.first().map(|slot| slot.request.clone())
    }

    /// Claims the continuation for `id`, removing the request.
    pub(crate) fn take(&mut self, id: u32) -> Option<Continuation> {
        let index = self.slots.iter().position(|slot| slot.request.id == id)?;
        Some(self.slots.remove(index).continuation)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
