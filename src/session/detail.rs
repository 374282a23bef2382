use super::{MailboxSession, SessionError};
use crate::api::types::{ActionKind, MessageDetail};

/// The one message shown in the detail pane, if any.
#[derive(Debug, Default)]
pub struct DetailViewController {
    open: Option<MessageDetail>,
}

impl DetailViewController {
    pub fn open(&mut self, message: MessageDetail) {
        self.open = Some(message);
    }

    /// Returns whether something was open. Safe to call repeatedly.
    pub fn close(&mut self) -> bool {
        self.open.take().is_some()
    }

    pub fn current(&self) -> Option<&MessageDetail> {
        self.open.as_ref()
    }

    pub fn shows_any(&self, ids: &[String]) -> bool {
        self.open
            .as_ref()
            .is_some_and(|m| ids.iter().any(|id| id == m.id()))
    }
}

impl MailboxSession {
    /// Show a message from the loaded list. Detail content comes with the
    /// list page, so no extra request is made.
    pub fn open_message(&mut self, id: &str) -> Result<(), SessionError> {
        let message = self
            .list
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownMessage(id.to_string()))?;
        log::debug!("Opening message {}", id);
        self.detail.open(message);
        Ok(())
    }

    pub fn close_message(&mut self) -> bool {
        self.detail.close()
    }

    pub fn open_detail(&self) -> Option<&MessageDetail> {
        self.detail.current()
    }

    /// Apply an action to the open message. It is closed once the action
    /// succeeds.
    pub fn detail_action(&mut self, kind: ActionKind) -> Result<u64, SessionError> {
        let (id, mailbox) = match self.detail.current() {
            Some(m) => (m.id().to_string(), m.mailbox.clone()),
            None => return Err(SessionError::NothingOpen),
        };
        self.dispatch_in(kind, &[id], &mailbox)
    }
}
