//! User-facing notices
//!
//! The cache never renders anything itself. It publishes notices on a
//! broadcast channel and whatever presents them subscribes.

use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::config::BackendKind;

/// Buffered notices per subscriber before old ones are dropped
const CHANNEL_CAPACITY: usize = 32;

/// A message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notice {
    /// Persistent and dismissible; offers an explicit reauthorize action
    #[serde(rename_all = "camelCase")]
    ReauthRequired { backend: BackendKind },
    /// Short-lived error report
    Transient { message: String },
}

impl Notice {
    /// Whether the notice stays until the user acts on it
    pub fn is_persistent(&self) -> bool {
        matches!(self, Notice::ReauthRequired { .. })
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::ReauthRequired { backend } => {
                write!(
                    f,
                    "Your {} session expired. Sign in again to keep syncing.",
                    backend
                )
            }
            Notice::Transient { message } => f.write_str(message),
        }
    }
}

/// Cloneable publishing side of the notice channel
#[derive(Clone)]
pub struct Notices {
    sender: broadcast::Sender<Notice>,
}

impl Notices {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// New receiver seeing notices published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    /// Publish a notice; nobody listening is fine
    pub fn publish(&self, notice: Notice) {
        trace!(notice = %notice, "Publishing notice");
        let _ = self.sender.send(notice);
    }

    pub fn transient(&self, message: impl Into<String>) {
        self.publish(Notice::Transient {
            message: message.into(),
        });
    }
}

impl Default for Notices {
    fn default() -> Self {
        Self::new()
    }
}
