//! Framed message definitions.
//!
//! Scope:
//! - `Message`: the unit of wire exchange (role, pacing hints, body).
//! - `Body`: closed set of message kinds, keyed by the same numeric id used
//!   on the network so registry lookup and pattern dispatch share one source
//!   of truth.
//!
//! Encoding / framing:
//! - Logical messages are framed by `codec.rs` as `[kind: u16][role: u8][body]`.
//! - Bodies serialize through the field primitives in `wire.rs`.
//!
//! Versioning strategy:
//! - Kind ids are stable across protocol versions. The engine reserves
//!   `0x0000..0x0010`; application protocols take ids from `0x0010` up.
//!   New kinds are added with fresh ids, never by reusing a retired one.
//!
//! (C) Parlor

use std::time::Duration;

use crate::wire::{BodyWriter, WireError};

/// Stable wire type ids. Engine-internal kinds stay below `kind::APP_BASE`.
pub mod kind {
    /// Minimal liveness message (empty body). Engine-reserved.
    pub const KEEP_ALIVE: u16 = 0x0001;
    /// One-line fault report, also used for error/closed signaling. Engine-reserved.
    pub const FAULT: u16 = 0x0002;

    /// First id available to application protocols.
    pub const APP_BASE: u16 = 0x0010;

    pub const ACCESS: u16 = 0x0010;
    pub const ENTER_ROOM: u16 = 0x0011;
    pub const EXIT_ROOM: u16 = 0x0012;
    pub const CHAT: u16 = 0x0013;
    pub const WHISPER: u16 = 0x0014;
    pub const KICK: u16 = 0x0015;
    pub const BROADCAST: u16 = 0x0016;
}

/// Exchange role of a message within a request/response conversation.
///
/// Defaults to `Request`; application logic sets it at most once before
/// transmission (via [`Message::with_role`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Role {
    #[default]
    Request = 0,
    Indication = 1,
    Response = 2,
    Confirm = 3,
}

impl Role {
    pub fn from_u8(raw: u8) -> Result<Self, WireError> {
        match raw {
            0 => Ok(Role::Request),
            1 => Ok(Role::Indication),
            2 => Ok(Role::Response),
            3 => Ok(Role::Confirm),
            other => Err(WireError::BadRole(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Closed set of message bodies. Only the *shape* of the chat-layer kinds is
/// defined here; their business rules live with the chat layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Liveness probe; carries nothing.
    KeepAlive,
    /// Peer- or server-side fault wrapped as a one-line text payload.
    Fault { detail: String },
    /// Version negotiation / admission result.
    Access { version: u16, result: u8 },
    EnterRoom {
        room: String,
        name: String,
        profile: String,
    },
    ExitRoom { room: String, name: String },
    Chat {
        room: String,
        name: String,
        text: String,
    },
    Whisper {
        room: String,
        from: String,
        to: String,
        text: String,
    },
    Kick {
        room: String,
        name: String,
        kicker: String,
        ban: bool,
    },
    Broadcast { text: String },
}

/// Post-read pause applied after receiving a chat-bearing message, the
/// engine's throttle against peers that flood the room.
const CHAT_READ_PAUSE: Duration = Duration::from_millis(25);
/// Post-write pause applied after fanning a broadcast onto one connection.
const BROADCAST_WRITE_PAUSE: Duration = Duration::from_millis(10);

impl Body {
    /// The stable wire type id of this body.
    pub fn kind(&self) -> u16 {
        match self {
            Body::KeepAlive => kind::KEEP_ALIVE,
            Body::Fault { .. } => kind::FAULT,
            Body::Access { .. } => kind::ACCESS,
            Body::EnterRoom { .. } => kind::ENTER_ROOM,
            Body::ExitRoom { .. } => kind::EXIT_ROOM,
            Body::Chat { .. } => kind::CHAT,
            Body::Whisper { .. } => kind::WHISPER,
            Body::Kick { .. } => kind::KICK,
            Body::Broadcast { .. } => kind::BROADCAST,
        }
    }

    /// Serialize the body fields. The kind id and role byte are written by
    /// the codec, never here.
    pub fn encode(&self, w: &mut BodyWriter<'_>) -> Result<(), WireError> {
        match self {
            Body::KeepAlive => Ok(()),
            Body::Fault { detail } => w.put_string(detail),
            Body::Access { version, result } => {
                w.put_u16(*version);
                w.put_u8(*result);
                Ok(())
            }
            Body::EnterRoom {
                room,
                name,
                profile,
            } => {
                w.put_string(room)?;
                w.put_string(name)?;
                w.put_string(profile)
            }
            Body::ExitRoom { room, name } => {
                w.put_string(room)?;
                w.put_string(name)
            }
            Body::Chat { room, name, text } => {
                w.put_string(room)?;
                w.put_string(name)?;
                w.put_string(text)
            }
            Body::Whisper {
                room,
                from,
                to,
                text,
            } => {
                w.put_string(room)?;
                w.put_string(from)?;
                w.put_string(to)?;
                w.put_string(text)
            }
            Body::Kick {
                room,
                name,
                kicker,
                ban,
            } => {
                w.put_string(room)?;
                w.put_string(name)?;
                w.put_string(kicker)?;
                w.put_bool(*ban);
                Ok(())
            }
            Body::Broadcast { text } => w.put_string(text),
        }
    }

    fn default_read_pause(&self) -> Duration {
        match self {
            Body::Chat { .. } | Body::Whisper { .. } => CHAT_READ_PAUSE,
            _ => Duration::ZERO,
        }
    }

    fn default_write_pause(&self) -> Duration {
        match self {
            Body::Broadcast { .. } => BROADCAST_WRITE_PAUSE,
            _ => Duration::ZERO,
        }
    }
}

/// The unit of wire exchange: a body plus its exchange role and pacing
/// hints. The kind id is derived from the body and immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    role: Role,
    read_pause: Duration,
    write_pause: Duration,
    body: Body,
}

impl Message {
    /// Wrap a body with the default role (`Request`) and the body's default
    /// pacing.
    pub fn new(body: Body) -> Self {
        let read_pause = body.default_read_pause();
        let write_pause = body.default_write_pause();
        Self {
            role: Role::Request,
            read_pause,
            write_pause,
            body,
        }
    }

    /// Set the exchange role. Intended to be called at most once, before the
    /// message is handed to a connection.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_read_pause(mut self, pause: Duration) -> Self {
        self.read_pause = pause;
        self
    }

    pub fn with_write_pause(mut self, pause: Duration) -> Self {
        self.write_pause = pause;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn kind(&self) -> u16 {
        self.body.kind()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Delay the receiver applies after delivering this message.
    pub fn read_pause(&self) -> Duration {
        self.read_pause
    }

    /// Delay the sender applies after writing this message.
    pub fn write_pause(&self) -> Duration {
        self.write_pause
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_kinds_stay_reserved() {
        assert!(kind::KEEP_ALIVE < kind::APP_BASE);
        assert!(kind::FAULT < kind::APP_BASE);
        assert!(kind::ACCESS >= kind::APP_BASE);
    }

    #[test]
    fn role_defaults_to_request() {
        let m = Message::new(Body::KeepAlive);
        assert_eq!(m.role(), Role::Request);
        let m = m.with_role(Role::Confirm);
        assert_eq!(m.role(), Role::Confirm);
    }

    #[test]
    fn role_bytes_round_trip() {
        for role in [Role::Request, Role::Indication, Role::Response, Role::Confirm] {
            assert_eq!(Role::from_u8(role.as_u8()).unwrap(), role);
        }
        assert!(matches!(Role::from_u8(9), Err(WireError::BadRole(9))));
    }

    #[test]
    fn chat_carries_read_pause_by_default() {
        let chat = Message::new(Body::Chat {
            room: "lobby".into(),
            name: "ada".into(),
            text: "hi".into(),
        });
        assert!(chat.read_pause() > Duration::ZERO);
        assert_eq!(chat.write_pause(), Duration::ZERO);

        let quiet = chat.with_read_pause(Duration::ZERO);
        assert_eq!(quiet.read_pause(), Duration::ZERO);
    }
}
