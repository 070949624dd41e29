// src/core/notice.rs

//! Status notifications the server sends to clients on pairing transitions.

use serde::{Deserialize, Serialize};
use strum_macros::{EnumIter, IntoStaticStr};

/// How notices are rendered on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoticeFormat {
    /// Free-text sentences understood by existing clients.
    #[default]
    Text,
    /// `{"type":"status","status":"<code>"}` objects.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ServerNotice {
    Waiting,
    Paired,
    #[strum(serialize = "pair_disconnected")]
    PartnerLeft,
    WaitTimeout,
    ShuttingDown,
}

impl ServerNotice {
    /// The stable status code used by the JSON format.
    pub fn status(&self) -> &'static str {
        self.into()
    }

    pub fn text(&self) -> &'static str {
        match self {
            ServerNotice::Waiting => "Waiting for a pair",
            ServerNotice::Paired => "Paired with another client",
            ServerNotice::PartnerLeft => "Your pair has disconnected",
            ServerNotice::WaitTimeout => "Timed out waiting for a pair",
            ServerNotice::ShuttingDown => "Server is shutting down",
        }
    }

    pub fn encode(&self, format: NoticeFormat) -> String {
        match format {
            NoticeFormat::Text => self.text().to_string(),
            NoticeFormat::Json => {
                serde_json::json!({ "type": "status", "status": self.status() }).to_string()
            }
        }
    }
}
