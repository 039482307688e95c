//! Wire envelope, payload union, error codes and the two wire-format codecs.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod payload;

pub use codec::{decode, encode, CodecError, WireFormat};
pub use envelope::Envelope;
pub use error::{ErrorCode, ErrorPayload};
pub use payload::{Payload, PayloadTag};
