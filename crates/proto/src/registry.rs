//! Message registry: the id -> decoder table.
//!
//! Each deployment installs one table for the lifetime of its engine
//! context, before the first connection starts. Replacement is whole-table
//! only; there is no incremental registration, so the set of decodable
//! kinds is closed and known up front. The engine-reserved kinds are always
//! present — the engine must be able to decode fault/keep-alive traffic no
//! matter how far an application trims the table.

use std::collections::HashMap;

use crate::message::{Body, kind};
use crate::wire::{BodyReader, WireError};

/// Decoder for one message kind. Reads exactly the body fields; the kind id
/// and role byte have already been consumed by the codec.
pub type DecodeFn = fn(&mut BodyReader<'_>) -> Result<Body, WireError>;

/// Maps a numeric wire id to the decoder reconstructing that message kind.
#[derive(Clone)]
pub struct Registry {
    table: HashMap<u16, DecodeFn>,
}

impl Registry {
    /// Registry covering every kind this crate defines.
    pub fn builtin() -> Self {
        let mut table: HashMap<u16, DecodeFn> = HashMap::new();
        table.insert(kind::ACCESS, decode_access);
        table.insert(kind::ENTER_ROOM, decode_enter_room);
        table.insert(kind::EXIT_ROOM, decode_exit_room);
        table.insert(kind::CHAT, decode_chat);
        table.insert(kind::WHISPER, decode_whisper);
        table.insert(kind::KICK, decode_kick);
        table.insert(kind::BROADCAST, decode_broadcast);
        Self::from_table(table)
    }

    /// Install a deployment-defined table. The engine-reserved kinds are
    /// added unconditionally; everything else is exactly what the caller
    /// supplied.
    pub fn from_table(mut table: HashMap<u16, DecodeFn>) -> Self {
        table.insert(kind::KEEP_ALIVE, decode_keep_alive);
        table.insert(kind::FAULT, decode_fault);
        Self { table }
    }

    pub fn contains(&self, kind: u16) -> bool {
        self.table.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Decode the body for `kind` from `r`. Unknown ids fail with a typed
    /// error the connection layer maps to a protocol violation.
    pub fn decode_body(&self, kind: u16, r: &mut BodyReader<'_>) -> Result<Body, WireError> {
        match self.table.get(&kind) {
            Some(decode) => decode(r),
            None => Err(WireError::UnknownKind { kind }),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<u16> = self.table.keys().copied().collect();
        kinds.sort_unstable();
        f.debug_struct("Registry").field("kinds", &kinds).finish()
    }
}

pub fn decode_keep_alive(_r: &mut BodyReader<'_>) -> Result<Body, WireError> {
    Ok(Body::KeepAlive)
}

pub fn decode_fault(r: &mut BodyReader<'_>) -> Result<Body, WireError> {
    Ok(Body::Fault {
        detail: r.get_string()?,
    })
}

pub fn decode_access(r: &mut BodyReader<'_>) -> Result<Body, WireError> {
    Ok(Body::Access {
        version: r.get_u16()?,
        result: r.get_u8()?,
    })
}

pub fn decode_enter_room(r: &mut BodyReader<'_>) -> Result<Body, WireError> {
    Ok(Body::EnterRoom {
        room: r.get_string()?,
        name: r.get_string()?,
        profile: r.get_string()?,
    })
}

pub fn decode_exit_room(r: &mut BodyReader<'_>) -> Result<Body, WireError> {
    Ok(Body::ExitRoom {
        room: r.get_string()?,
        name: r.get_string()?,
    })
}

pub fn decode_chat(r: &mut BodyReader<'_>) -> Result<Body, WireError> {
    Ok(Body::Chat {
        room: r.get_string()?,
        name: r.get_string()?,
        text: r.get_string()?,
    })
}

pub fn decode_whisper(r: &mut BodyReader<'_>) -> Result<Body, WireError> {
    Ok(Body::Whisper {
        room: r.get_string()?,
        from: r.get_string()?,
        to: r.get_string()?,
        text: r.get_string()?,
    })
}

pub fn decode_kick(r: &mut BodyReader<'_>) -> Result<Body, WireError> {
    Ok(Body::Kick {
        room: r.get_string()?,
        name: r.get_string()?,
        kicker: r.get_string()?,
        ban: r.get_bool()?,
    })
}

pub fn decode_broadcast(r: &mut BodyReader<'_>) -> Result<Body, WireError> {
    Ok(Body::Broadcast {
        text: r.get_string()?,
    })
}
