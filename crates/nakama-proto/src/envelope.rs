use serde::{Deserialize, Serialize};

use crate::error::ErrorPayload;
use crate::payload::Payload;

/// The outer framed message: a client-chosen opaque `collation_id` echoed on
/// replies/errors, and a typed `payload` union.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub collation_id: String,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(payload: Payload) -> Self {
        Self {
            collation_id: String::new(),
            payload,
        }
    }

    pub fn with_collation_id(mut self, collation_id: impl Into<String>) -> Self {
        self.collation_id = collation_id.into();
        self
    }

    /// Build an error envelope, echoing `collation_id` when one was
    /// parseable from the originating request.
    pub fn error(collation_id: impl Into<String>, error: ErrorPayload) -> Self {
        Self {
            collation_id: collation_id.into(),
            payload: Payload::Error(error),
        }
    }
}
