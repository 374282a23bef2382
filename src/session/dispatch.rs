use super::notify::Severity;
use super::{MailboxSession, SessionError, SessionEvent};
use crate::api::client::ApiError;
use crate::api::types::ActionKind;
use crate::backend::BackendCommand;

#[derive(Debug)]
struct PendingAction {
    op_id: u64,
    kind: ActionKind,
}

/// Tracks the single in-flight mutating action of a session.
#[derive(Debug, Default)]
pub struct ActionDispatcher {
    pending: Option<PendingAction>,
    next_op_id: u64,
}

impl ActionDispatcher {
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_kind(&self) -> Option<ActionKind> {
        self.pending.as_ref().map(|p| p.kind)
    }

    fn begin(&mut self, kind: ActionKind) -> u64 {
        self.next_op_id += 1;
        self.pending = Some(PendingAction {
            op_id: self.next_op_id,
            kind,
        });
        self.next_op_id
    }

    /// Clear the pending action if `op_id` is the one in flight.
    fn finish(&mut self, op_id: u64) -> bool {
        if self.pending.as_ref().is_some_and(|p| p.op_id == op_id) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}

/// First-seen order, duplicates dropped.
fn dedupe_ids(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

fn action_failure_message(kind: ActionKind, err: &ApiError) -> String {
    let detail = match err.detail() {
        Some(d) => d.to_string(),
        None if err.is_timeout() => "The request timed out.".to_string(),
        None => "Try again later.".to_string(),
    };
    format!("Could not apply '{}'. {}", kind, detail)
}

impl MailboxSession {
    /// Apply `kind` to `ids` in the active mailbox as one batched request.
    pub fn dispatch_action(&mut self, kind: ActionKind, ids: &[String]) -> Result<u64, SessionError> {
        let mailbox = match self.active.clone() {
            Some(m) => m,
            None if ids.is_empty() => String::new(),
            None => return Err(SessionError::NoActiveMailbox),
        };
        self.dispatch_in(kind, ids, &mailbox)
    }

    /// Apply `kind` to the current selection, in list order.
    pub fn dispatch_selected(&mut self, kind: ActionKind) -> Result<u64, SessionError> {
        let ids = self.selection.ordered(self.list.ids());
        self.dispatch_action(kind, &ids)
    }

    pub(super) fn dispatch_in(
        &mut self,
        kind: ActionKind,
        ids: &[String],
        mailbox: &str,
    ) -> Result<u64, SessionError> {
        if ids.is_empty() {
            self.notification
                .show(Severity::Warning, "Select at least one message first.");
            return Err(SessionError::EmptySelection);
        }
        if self.dispatcher.is_pending() {
            return Err(SessionError::ActionInFlight);
        }
        if self.is_loading() {
            return Err(SessionError::LoadInFlight);
        }

        let ids = dedupe_ids(ids);
        let op_id = self.dispatcher.begin(kind);
        log::info!(
            "Dispatching {} on {} message(s) in {} (op {})",
            kind,
            ids.len(),
            mailbox,
            op_id
        );
        let sent = self.cmd_tx.send(BackendCommand::ApplyAction {
            op_id,
            kind,
            ids,
            mailbox: mailbox.to_string(),
        });
        if sent.is_err() {
            self.dispatcher.finish(op_id);
            return Err(SessionError::BackendGone);
        }
        Ok(op_id)
    }

    pub(super) fn handle_action_applied(
        &mut self,
        op_id: u64,
        kind: ActionKind,
        ids: Vec<String>,
        mailbox: String,
        result: Result<(), ApiError>,
    ) -> bool {
        if !self.dispatcher.finish(op_id) {
            log::debug!("Discarding result of unknown action op {}", op_id);
            return false;
        }

        match result {
            Ok(()) => {
                let still_active = self.active.as_deref() == Some(mailbox.as_str());
                let message = if still_active {
                    format!("Action '{}' succeeded. Refreshing...", kind)
                } else {
                    format!("Action '{}' succeeded.", kind)
                };
                self.notification.show(Severity::Success, message);

                self.selection.remove_all(&ids);
                if self.detail.shows_any(&ids) {
                    self.detail.close();
                }
                self.events.push(SessionEvent::ActionComplete {
                    kind,
                    ids,
                    mailbox: mailbox.clone(),
                });

                if still_active {
                    if let Err(e) = self.start_refresh() {
                        log::error!("Refresh after {} failed to start: {}", kind, e);
                    }
                } else {
                    log::info!("Skipping refresh: {} is no longer active", mailbox);
                }
            }
            Err(e) => {
                self.notification
                    .show(Severity::Error, action_failure_message(kind, &e));
            }
        }
        true
    }

    pub fn action_pending(&self) -> Option<ActionKind> {
        self.dispatcher.pending_kind()
    }
}
