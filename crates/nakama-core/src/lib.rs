//! Shared identifiers, stream descriptors, presence types and process
//! configuration used by every crate in the realtime core.

pub mod config;
pub mod ids;
pub mod presence;
pub mod stream;

pub use config::Config;
pub use ids::{MatchId, SessionId, UserId};
pub use presence::{Presence, PresenceMeta};
pub use stream::{Stream, StreamMode};
