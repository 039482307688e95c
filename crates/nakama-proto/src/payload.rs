use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelJoinType {
    Room,
    DirectMessage,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelJoin {
    pub target: String,
    pub channel_type: ChannelJoinType,
    #[serde(default)]
    pub persistence: bool,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLeave {
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessageSend {
    pub channel_id: String,
    pub content: String,
    #[serde(default = "default_true")]
    pub persistent: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPresence {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub username: String,
    #[serde(default)]
    pub persistence: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel_id: String,
    pub message_id: Uuid,
    pub code: i32,
    pub sender: UserPresence,
    pub content: String,
    pub persistent: bool,
    pub create_time_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCreate {
    pub module: String,
    /// JSON-encoded params, opaque to the core and passed verbatim to
    /// `MatchHandler::init`. Kept as a string (rather than `serde_json::Value`)
    /// so both wire codecs — including the non-self-describing binary one —
    /// can carry it without extra round-trip machinery.
    #[serde(default)]
    pub params: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MatchJoinTarget {
    MatchId(String),
    Token(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchJoin {
    pub target: MatchJoinTarget,
    #[serde(default)]
    pub metadata: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchLeave {
    pub match_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub match_id: String,
    pub authoritative: bool,
    pub label: String,
    pub size: u32,
    pub presences: Vec<UserPresence>,
    #[serde(rename = "self")]
    pub self_presence: UserPresence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDataSend {
    pub match_id: String,
    pub op_code: i64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default = "default_true")]
    pub reliable: bool,
    #[serde(default)]
    pub presences: Vec<UserPresence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchData {
    pub match_id: String,
    pub presence: UserPresence,
    pub op_code: i64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPresenceEvent {
    pub match_id: String,
    #[serde(default)]
    pub joins: Vec<UserPresence>,
    #[serde(default)]
    pub leaves: Vec<UserPresence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakerStringProperty(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakerAdd {
    pub min_count: u32,
    pub max_count: u32,
    #[serde(default = "default_one")]
    pub count_multiple: u32,
    #[serde(default)]
    pub string_properties: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub numeric_properties: std::collections::HashMap<String, f64>,
    #[serde(default)]
    pub query: String,
}

fn default_one() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakerTicket {
    pub ticket_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakerRemove {
    pub ticket_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakerUser {
    pub presence: UserPresence,
    pub string_properties: std::collections::HashMap<String, String>,
    pub numeric_properties: std::collections::HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakerMatched {
    pub ticket_id: String,
    /// Opaque token accepted by `MatchJoin` in place of a bare match-id.
    pub token: String,
    pub users: Vec<MatchmakerUser>,
    #[serde(rename = "self")]
    pub self_user: MatchmakerUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusFollow {
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUnfollow {
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPresenceEvent {
    #[serde(default)]
    pub joins: Vec<UserPresence>,
    #[serde(default)]
    pub leaves: Vec<UserPresence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamData {
    pub stream_mode: u8,
    pub stream_subject: Uuid,
    pub stream_subcontext: Uuid,
    pub stream_label: String,
    pub sender: Option<UserPresence>,
    pub data: String,
    #[serde(default = "default_true")]
    pub reliable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub subject: String,
    /// JSON-encoded content, opaque to the core.
    pub content: String,
    pub code: i32,
    pub sender_id: Option<Uuid>,
    pub create_time_ms: i64,
    pub persistent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notifications {
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ping {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pong {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rpc {
    pub id: String,
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub server_time_ms: i64,
}

/// The `payload` union of the outer envelope. Each variant has a fixed
/// schema; field numbers are not modeled explicitly here because the JSON
/// mapping used on the wire tags variants by (snake_case) name rather than
/// number, and the binary codec re-derives a stable discriminant from the
/// enum's declaration order, which this type intentionally never reorders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    ChannelJoin(ChannelJoin),
    ChannelLeave(ChannelLeave),
    ChannelMessageSend(ChannelMessageSend),
    ChannelMessage(ChannelMessage),
    MatchCreate(MatchCreate),
    MatchJoin(MatchJoin),
    MatchLeave(MatchLeave),
    Match(Match),
    MatchDataSend(MatchDataSend),
    MatchData(MatchData),
    MatchPresenceEvent(MatchPresenceEvent),
    MatchmakerAdd(MatchmakerAdd),
    MatchmakerTicket(MatchmakerTicket),
    MatchmakerRemove(MatchmakerRemove),
    MatchmakerMatched(MatchmakerMatched),
    StatusFollow(StatusFollow),
    StatusUnfollow(StatusUnfollow),
    StatusPresenceEvent(StatusPresenceEvent),
    StreamData(StreamData),
    Notifications(Notifications),
    Ping(Ping),
    Pong(Pong),
    Rpc(Rpc),
    Heartbeat(Heartbeat),
    Error(ErrorPayload),
}

/// The dispatch key used by the pipeline and hook registries (spec §4.7,
/// §9: "a registry from payload-tag enum to optional function pointers").
/// One variant per [`Payload`] case, carried separately so hook lookup
/// tables don't need a payload value on hand to key into themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadTag {
    ChannelJoin,
    ChannelLeave,
    ChannelMessageSend,
    ChannelMessage,
    MatchCreate,
    MatchJoin,
    MatchLeave,
    Match,
    MatchDataSend,
    MatchData,
    MatchPresenceEvent,
    MatchmakerAdd,
    MatchmakerTicket,
    MatchmakerRemove,
    MatchmakerMatched,
    StatusFollow,
    StatusUnfollow,
    StatusPresenceEvent,
    StreamData,
    Notifications,
    Ping,
    Pong,
    Rpc,
    Heartbeat,
    Error,
}

impl Payload {
    pub fn tag(&self) -> PayloadTag {
        match self {
            Payload::ChannelJoin(_) => PayloadTag::ChannelJoin,
            Payload::ChannelLeave(_) => PayloadTag::ChannelLeave,
            Payload::ChannelMessageSend(_) => PayloadTag::ChannelMessageSend,
            Payload::ChannelMessage(_) => PayloadTag::ChannelMessage,
            Payload::MatchCreate(_) => PayloadTag::MatchCreate,
            Payload::MatchJoin(_) => PayloadTag::MatchJoin,
            Payload::MatchLeave(_) => PayloadTag::MatchLeave,
            Payload::Match(_) => PayloadTag::Match,
            Payload::MatchDataSend(_) => PayloadTag::MatchDataSend,
            Payload::MatchData(_) => PayloadTag::MatchData,
            Payload::MatchPresenceEvent(_) => PayloadTag::MatchPresenceEvent,
            Payload::MatchmakerAdd(_) => PayloadTag::MatchmakerAdd,
            Payload::MatchmakerTicket(_) => PayloadTag::MatchmakerTicket,
            Payload::MatchmakerRemove(_) => PayloadTag::MatchmakerRemove,
            Payload::MatchmakerMatched(_) => PayloadTag::MatchmakerMatched,
            Payload::StatusFollow(_) => PayloadTag::StatusFollow,
            Payload::StatusUnfollow(_) => PayloadTag::StatusUnfollow,
            Payload::StatusPresenceEvent(_) => PayloadTag::StatusPresenceEvent,
            Payload::StreamData(_) => PayloadTag::StreamData,
            Payload::Notifications(_) => PayloadTag::Notifications,
            Payload::Ping(_) => PayloadTag::Ping,
            Payload::Pong(_) => PayloadTag::Pong,
            Payload::Rpc(_) => PayloadTag::Rpc,
            Payload::Heartbeat(_) => PayloadTag::Heartbeat,
            Payload::Error(_) => PayloadTag::Error,
        }
    }
}

/// Canonical protobuf-to-JSON mapping represents `bytes` fields as base64
/// text; this `serde(with = ...)` module gives `data` fields that encoding
/// uniformly across both wire formats.
mod base64_bytes {
    use base64::prelude::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <&str>::deserialize(deserializer)?;
        BASE64_STANDARD.decode(s).map_err(serde::de::Error::custom)
    }

}
