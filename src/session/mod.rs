mod detail;
mod dispatch;
mod list;
mod notify;
mod pagination;
mod selection;

pub use notify::Severity;

use detail::DetailViewController;
use dispatch::ActionDispatcher;
use list::MessageListStore;
use notify::{Notification, NotificationSlot};
use pagination::PaginationState;
use selection::SelectionSet;

use crate::api::client::ApiError;
use crate::api::types::{ActionKind, MessageDetail, MessagePage};
use crate::backend::{BackendCommand, BackendResponse, FetchKind};
use crate::compose::{ComposeMode, ComposeSeed, QuoteComposer};
use crate::config::MailboxEntry;
use std::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no messages selected")]
    EmptySelection,
    #[error("another action is still in progress")]
    ActionInFlight,
    #[error("the message list is still loading")]
    LoadInFlight,
    #[error("no mailbox is selected")]
    NoActiveMailbox,
    #[error("unknown mailbox '{0}'")]
    UnknownMailbox(String),
    #[error("message '{0}' is not in the loaded list")]
    UnknownMessage(String),
    #[error("no message is open")]
    NothingOpen,
    #[error("backend is not running")]
    BackendGone,
}

/// Which list load, if any, is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Initial,
    More,
    Refresh,
}

impl LoadState {
    fn expects(self, kind: FetchKind) -> bool {
        matches!(
            (self, kind),
            (LoadState::Initial, FetchKind::Initial)
                | (LoadState::More, FetchKind::More)
                | (LoadState::Refresh, FetchKind::Refresh)
        )
    }
}

/// Outward notifications for the embedding UI, drained with
/// [`MailboxSession::take_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Compose(ComposeSeed),
    ActionComplete {
        kind: ActionKind,
        ids: Vec<String>,
        mailbox: String,
    },
}

/// Owns the active mailbox and everything loaded for it. All mutation of
/// the list, selection and open message goes through here.
pub struct MailboxSession {
    cmd_tx: mpsc::Sender<BackendCommand>,
    mailboxes: Vec<MailboxEntry>,
    active: Option<String>,
    generation: u64,
    load: LoadState,
    list: MessageListStore,
    pagination: PaginationState,
    selection: SelectionSet,
    detail: DetailViewController,
    dispatcher: ActionDispatcher,
    notification: NotificationSlot,
    events: Vec<SessionEvent>,
    composer: QuoteComposer,
}

impl MailboxSession {
    pub fn new(
        cmd_tx: mpsc::Sender<BackendCommand>,
        mailboxes: Vec<MailboxEntry>,
        page_size: u32,
        composer: QuoteComposer,
    ) -> Self {
        MailboxSession {
            cmd_tx,
            mailboxes,
            active: None,
            generation: 0,
            load: LoadState::Idle,
            list: MessageListStore::new(),
            pagination: PaginationState::new(page_size),
            selection: SelectionSet::new(),
            detail: DetailViewController::default(),
            dispatcher: ActionDispatcher::default(),
            notification: NotificationSlot::default(),
            events: Vec::new(),
            composer,
        }
    }

    // --- Mailbox lifecycle ---

    /// Switch to `name`, discarding everything loaded for the previous
    /// mailbox, and fetch its first page. Results of requests issued before
    /// the switch are ignored when they arrive.
    pub fn select_mailbox(&mut self, name: &str) -> Result<(), SessionError> {
        if !self.mailboxes.iter().any(|m| m.name == name) {
            return Err(SessionError::UnknownMailbox(name.to_string()));
        }

        self.generation += 1;
        log::info!(
            "Selecting mailbox {} (generation {})",
            name,
            self.generation
        );
        self.active = Some(name.to_string());
        self.list.clear();
        self.pagination.reset();
        self.selection.clear();
        self.detail.close();

        self.request_page(FetchKind::Initial, 0)
    }

    /// Fetch the next page. Returns `Ok(false)` without issuing a request
    /// when there is nothing more to load or another load or action is
    /// outstanding.
    pub fn load_more(&mut self) -> Result<bool, SessionError> {
        if !self.can_load_more() {
            log::debug!(
                "load_more ignored (has_more: {}, load: {:?}, action pending: {})",
                self.has_more(),
                self.load,
                self.dispatcher.is_pending()
            );
            return Ok(false);
        }
        let offset = self.list.len();
        self.request_page(FetchKind::More, offset)?;
        Ok(true)
    }

    /// Re-fetch the first page, replacing the list once it arrives.
    pub fn refresh(&mut self) -> Result<(), SessionError> {
        if self.active.is_none() {
            return Err(SessionError::NoActiveMailbox);
        }
        if self.dispatcher.is_pending() {
            return Err(SessionError::ActionInFlight);
        }
        self.start_refresh()
    }

    fn start_refresh(&mut self) -> Result<(), SessionError> {
        self.generation += 1;
        log::info!(
            "Refreshing {} (generation {})",
            self.active.as_deref().unwrap_or(""),
            self.generation
        );
        self.request_page(FetchKind::Refresh, 0)
    }

    fn request_page(&mut self, kind: FetchKind, offset: usize) -> Result<(), SessionError> {
        let mailbox = self.active.clone().ok_or(SessionError::NoActiveMailbox)?;
        let sent = self.cmd_tx.send(BackendCommand::ListMessages {
            generation: self.generation,
            kind,
            mailbox,
            limit: self.pagination.limit(),
            offset,
        });
        if sent.is_err() {
            self.load = LoadState::Idle;
            return Err(SessionError::BackendGone);
        }
        self.load = match kind {
            FetchKind::Initial => LoadState::Initial,
            FetchKind::More => LoadState::More,
            FetchKind::Refresh => LoadState::Refresh,
        };
        Ok(())
    }

    // --- Responses ---

    /// Apply a backend response. Returns whether session state changed.
    pub fn on_response(&mut self, response: BackendResponse) -> bool {
        match response {
            BackendResponse::Messages {
                generation,
                kind,
                mailbox,
                offset,
                result,
            } => self.handle_messages(generation, kind, mailbox, offset, result),
            BackendResponse::ActionApplied {
                op_id,
                kind,
                ids,
                mailbox,
                result,
            } => self.handle_action_applied(op_id, kind, ids, mailbox, result),
        }
    }

    fn handle_messages(
        &mut self,
        generation: u64,
        kind: FetchKind,
        mailbox: String,
        offset: usize,
        result: Result<MessagePage, ApiError>,
    ) -> bool {
        let current = generation == self.generation
            && self.active.as_deref() == Some(mailbox.as_str())
            && self.load.expects(kind)
            && (kind != FetchKind::More || offset == self.list.len());
        if !current {
            log::debug!(
                "Discarding stale {:?} page for {} (generation {}, current {})",
                kind,
                mailbox,
                generation,
                self.generation
            );
            return false;
        }
        self.load = LoadState::Idle;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                self.pagination.halt();
                let message = self.fetch_failure_message(&mailbox, &e);
                self.notification.show(Severity::Error, message);
                return true;
            }
        };

        let received = page.messages.len();
        let accept = self.pagination.accept_count(offset, received, page.total);
        if accept < received {
            log::warn!(
                "Server sent {} messages for {} at offset {}; keeping {}",
                received,
                mailbox,
                offset,
                accept
            );
        }
        let messages: Vec<MessageDetail> = page.messages.into_iter().take(accept).collect();

        let added = match kind {
            FetchKind::More => self.list.append(messages),
            FetchKind::Initial | FetchKind::Refresh => {
                self.selection.clear();
                self.detail.close();
                self.pagination.reset();
                self.list.replace(messages)
            }
        };
        self.pagination.record_page(received, page.total);
        if received > 0 && added == 0 {
            log::warn!("Page for {} added nothing new; stopping pagination", mailbox);
            self.pagination.halt();
        }
        log::info!(
            "{} now holds {} message(s) (total: {:?}, has_more: {})",
            mailbox,
            self.list.len(),
            self.pagination.total(),
            self.has_more()
        );
        true
    }

    fn fetch_failure_message(&self, mailbox: &str, err: &ApiError) -> String {
        let label = self.label_for(mailbox);
        match err {
            ApiError::Timeout { secs } => format!(
                "Loading {} timed out after {}s. The server may still be syncing; try refreshing.",
                label, secs
            ),
            _ => format!(
                "Could not load {}. {}",
                label,
                err.detail().unwrap_or("Try again later.")
            ),
        }
    }

    // --- Selection ---

    /// Flip one loaded message in or out of the selection. Returns whether
    /// it is now selected.
    pub fn toggle(&mut self, id: &str) -> Result<bool, SessionError> {
        if !self.list.contains(id) {
            return Err(SessionError::UnknownMessage(id.to_string()));
        }
        Ok(self.selection.toggle(id))
    }

    pub fn toggle_all(&mut self, checked: bool) {
        self.selection.toggle_all(checked, self.list.ids());
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn selected_ids(&self) -> Vec<String> {
        self.selection.ordered(self.list.ids())
    }

    pub fn is_all_selected(&self) -> bool {
        self.selection.is_all_selected(self.list.len())
    }

    pub fn is_partially_selected(&self) -> bool {
        self.selection.is_partially_selected(self.list.len())
    }

    // --- Compose ---

    /// Derive reply/forward content from the open message and queue it for
    /// the compose UI.
    pub fn compose(&mut self, mode: ComposeMode) -> Result<ComposeSeed, SessionError> {
        let source = self.detail.current().ok_or(SessionError::NothingOpen)?;
        let seed = self.composer.compose(source, mode);
        self.events.push(SessionEvent::Compose(seed.clone()));
        Ok(seed)
    }

    // --- Queries ---

    pub fn mailboxes(&self) -> &[MailboxEntry] {
        &self.mailboxes
    }

    pub fn active_mailbox(&self) -> Option<&str> {
        self.active.as_deref()
    }

    fn label_for<'a>(&'a self, name: &'a str) -> &'a str {
        self.mailboxes
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.label.as_str())
            .unwrap_or(name)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn messages(&self) -> &[MessageDetail] {
        self.list.as_slice()
    }

    pub fn offset(&self) -> usize {
        self.list.len()
    }

    pub fn limit(&self) -> u32 {
        self.pagination.limit()
    }

    pub fn total(&self) -> Option<u64> {
        self.pagination.total()
    }

    pub fn has_more(&self) -> bool {
        self.pagination.has_more(self.list.len())
    }

    pub fn load_state(&self) -> LoadState {
        self.load
    }

    pub fn is_loading(&self) -> bool {
        self.load != LoadState::Idle
    }

    pub fn is_busy(&self) -> bool {
        self.is_loading() || self.dispatcher.is_pending()
    }

    pub fn can_load_more(&self) -> bool {
        self.has_more() && !self.is_busy()
    }

    pub fn can_refresh(&self) -> bool {
        self.active.is_some() && !self.dispatcher.is_pending()
    }

    pub fn can_dispatch(&self) -> bool {
        self.active.is_some() && !self.is_busy()
    }

    pub fn notification(&self) -> Option<&Notification> {
        self.notification.current()
    }

    pub fn dismiss_notification(&mut self) -> Option<Notification> {
        self.notification.dismiss()
    }

    pub fn dismiss_notification_id(&mut self, id: u64) -> bool {
        self.notification.dismiss_id(id)
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drop queued compose seeds, keeping every other event.
    pub fn discard_compose_events(&mut self) {
        self.events.retain(|e| !matches!(e, SessionEvent::Compose(_)));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::types::{ListPayload, MessageBody, MessageSummary, Timestamp};

    pub fn message_in(id: &str, mailbox: &str) -> MessageDetail {
        MessageDetail {
            summary: MessageSummary {
                id: id.to_string(),
                from: Some(format!("Sender {} <s{}@example.com>", id, id)),
                subject: Some(format!("Subject {}", id)),
                preview: format!("Preview {}", id),
                timestamp: Timestamp::default(),
                is_read: false,
                has_attachments: false,
            },
            body: MessageBody::Plain {
                text: format!("Body {}", id),
            },
            to: vec!["me@example.com".to_string()],
            cc: Vec::new(),
            attachments: Vec::new(),
            mailbox: mailbox.to_string(),
        }
    }

    pub fn message(id: &str) -> MessageDetail {
        message_in(id, "INBOX")
    }

    fn page(ids: impl IntoIterator<Item = u32>, total: Option<u64>) -> MessagePage {
        MessagePage {
            messages: ids.into_iter().map(|i| message(&i.to_string())).collect(),
            total,
        }
    }

    fn session() -> (MailboxSession, mpsc::Receiver<BackendCommand>) {
        let (tx, rx) = mpsc::channel();
        let mailboxes = ["INBOX", "INBOX.Sent", "INBOX.Trash"]
            .iter()
            .map(|n| MailboxEntry {
                name: n.to_string(),
                label: n.trim_start_matches("INBOX.").to_string(),
            })
            .collect();
        let composer = QuoteComposer::new("%d.%m.%Y", None, None);
        (MailboxSession::new(tx, mailboxes, 25, composer), rx)
    }

    struct ListRequest {
        generation: u64,
        kind: FetchKind,
        mailbox: String,
        limit: u32,
        offset: usize,
    }

    impl ListRequest {
        fn reply(&self, result: Result<MessagePage, ApiError>) -> BackendResponse {
            BackendResponse::Messages {
                generation: self.generation,
                kind: self.kind,
                mailbox: self.mailbox.clone(),
                offset: self.offset,
                result,
            }
        }
    }

    fn expect_list(rx: &mpsc::Receiver<BackendCommand>) -> ListRequest {
        match rx.try_recv() {
            Ok(BackendCommand::ListMessages {
                generation,
                kind,
                mailbox,
                limit,
                offset,
            }) => ListRequest {
                generation,
                kind,
                mailbox,
                limit,
                offset,
            },
            other => panic!("expected ListMessages, got {:?}", other),
        }
    }

    fn expect_action(
        rx: &mpsc::Receiver<BackendCommand>,
    ) -> (u64, ActionKind, Vec<String>, String) {
        match rx.try_recv() {
            Ok(BackendCommand::ApplyAction {
                op_id,
                kind,
                ids,
                mailbox,
            }) => (op_id, kind, ids, mailbox),
            other => panic!("expected ApplyAction, got {:?}", other),
        }
    }

    fn action_reply(
        op_id: u64,
        kind: ActionKind,
        ids: Vec<String>,
        mailbox: &str,
        result: Result<(), ApiError>,
    ) -> BackendResponse {
        BackendResponse::ActionApplied {
            op_id,
            kind,
            ids,
            mailbox: mailbox.to_string(),
            result,
        }
    }

    /// Session on INBOX with messages 1..=n loaded out of `total`.
    fn loaded(n: u32, total: u64) -> (MailboxSession, mpsc::Receiver<BackendCommand>) {
        let (mut s, rx) = session();
        s.select_mailbox("INBOX").unwrap();
        let req = expect_list(&rx);
        assert!(s.on_response(req.reply(Ok(page(1..=n, Some(total))))));
        (s, rx)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pagination_scenario() {
        let (mut s, rx) = session();
        s.select_mailbox("INBOX").unwrap();
        let req = expect_list(&rx);
        assert_eq!((req.kind, req.limit, req.offset), (FetchKind::Initial, 25, 0));
        assert_eq!(req.mailbox, "INBOX");

        s.on_response(req.reply(Ok(page(1..=25, Some(30)))));
        assert_eq!(s.offset(), 25);
        assert!(s.has_more());

        assert_eq!(s.load_more(), Ok(true));
        let req = expect_list(&rx);
        assert_eq!((req.kind, req.offset), (FetchKind::More, 25));
        s.on_response(req.reply(Ok(page(26..=30, Some(30)))));
        assert_eq!(s.offset(), 30);
        assert!(!s.has_more());

        assert_eq!(s.load_more(), Ok(false));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_load_more_is_noop_while_loading() {
        let (mut s, rx) = loaded(25, 100);
        assert_eq!(s.load_more(), Ok(true));
        let _pending = expect_list(&rx);
        assert_eq!(s.load_state(), LoadState::More);
        assert_eq!(s.load_more(), Ok(false));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_pages_never_exceed_limit_or_total() {
        let (mut s, rx) = session();
        s.select_mailbox("INBOX").unwrap();
        let req = expect_list(&rx);
        s.on_response(req.reply(Ok(page(1..=40, Some(30)))));
        assert_eq!(s.offset(), 25);

        s.load_more().unwrap();
        let req = expect_list(&rx);
        s.on_response(req.reply(Ok(page(26..=40, Some(30)))));
        assert_eq!(s.offset(), 30);
        assert!(!s.has_more());
    }

    #[test]
    fn test_flat_pages_use_full_page_heuristic() {
        let (mut s, rx) = session();
        s.select_mailbox("INBOX").unwrap();
        let req = expect_list(&rx);
        s.on_response(req.reply(Ok(page(1..=25, None))));
        assert!(s.has_more());
        assert_eq!(s.total(), None);

        s.load_more().unwrap();
        let req = expect_list(&rx);
        s.on_response(req.reply(Ok(page(26..=30, None))));
        assert!(!s.has_more());
    }

    #[test]
    fn test_wrapped_page_without_total_keeps_every_message() {
        let (mut s, rx) = session();
        s.select_mailbox("INBOX").unwrap();
        let req = expect_list(&rx);
        let payload: ListPayload =
            serde_json::from_value(serde_json::json!({"emails": [{"id": 1}, {"id": 2}, {"id": 3}]}))
                .unwrap();
        assert!(s.on_response(req.reply(Ok(payload.into_page("INBOX")))));

        assert_eq!(s.offset(), 3);
        assert_eq!(s.total(), None);
        let loaded: Vec<&str> = s.messages().iter().map(|m| m.id()).collect();
        assert_eq!(loaded, vec!["1", "2", "3"]);
        assert!(!s.has_more());
        assert!(s.notification().is_none());
    }

    #[test]
    fn test_empty_or_duplicate_page_halts_pagination() {
        let (mut s, rx) = loaded(25, 100);
        s.load_more().unwrap();
        let req = expect_list(&rx);
        s.on_response(req.reply(Ok(page(1..=25, Some(100)))));
        assert_eq!(s.offset(), 25);
        assert!(!s.has_more());

        let (mut s, rx) = loaded(25, 100);
        s.load_more().unwrap();
        let req = expect_list(&rx);
        s.on_response(req.reply(Ok(page(std::iter::empty(), Some(100)))));
        assert!(!s.has_more());
    }

    #[test]
    fn test_select_mailbox_clears_state_before_fetch_resolves() {
        let (mut s, rx) = loaded(10, 10);
        s.toggle("3").unwrap();
        s.open_message("4").unwrap();

        s.select_mailbox("INBOX.Sent").unwrap();
        assert!(s.messages().is_empty());
        assert_eq!(s.selection().count(), 0);
        assert!(s.open_detail().is_none());
        assert!(!s.has_more());
        assert_eq!(s.active_mailbox(), Some("INBOX.Sent"));
        assert_eq!(expect_list(&rx).mailbox, "INBOX.Sent");
    }

    #[test]
    fn test_unknown_mailbox_rejected() {
        let (mut s, rx) = session();
        assert_eq!(
            s.select_mailbox("Spam"),
            Err(SessionError::UnknownMailbox("Spam".to_string()))
        );
        assert!(s.active_mailbox().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stale_page_after_mailbox_switch_is_discarded() {
        let (mut s, rx) = loaded(25, 30);
        s.load_more().unwrap();
        let inbox_page2 = expect_list(&rx);

        s.select_mailbox("INBOX.Trash").unwrap();
        let trash = expect_list(&rx);

        assert!(!s.on_response(inbox_page2.reply(Ok(page(26..=30, Some(30))))));
        assert!(s.messages().is_empty());
        assert_eq!(s.load_state(), LoadState::Initial);

        assert!(s.on_response(trash.reply(Ok(page(std::iter::empty(), Some(0))))));
        assert!(s.messages().is_empty());
        assert_eq!(s.load_state(), LoadState::Idle);
    }

    #[test]
    fn test_switch_back_still_discards_old_generation() {
        let (mut s, rx) = session();
        s.select_mailbox("INBOX").unwrap();
        let first = expect_list(&rx);
        s.select_mailbox("INBOX.Sent").unwrap();
        let _sent = expect_list(&rx);
        s.select_mailbox("INBOX").unwrap();
        let second = expect_list(&rx);

        assert!(!s.on_response(first.reply(Ok(page(1..=3, Some(3))))));
        assert!(s.on_response(second.reply(Ok(page(7..=8, Some(2))))));
        let loaded: Vec<&str> = s.messages().iter().map(|m| m.id()).collect();
        assert_eq!(loaded, vec!["7", "8"]);
    }

    #[test]
    fn test_toggle_all_and_counts() {
        let (mut s, _rx) = loaded(10, 10);
        s.toggle_all(true);
        assert_eq!(s.selection().count(), 10);
        assert!(s.is_all_selected());
        s.toggle("1").unwrap();
        assert!(s.is_partially_selected());
        s.toggle_all(false);
        assert_eq!(s.selection().count(), 0);
        assert_eq!(
            s.toggle("99"),
            Err(SessionError::UnknownMessage("99".to_string()))
        );
    }

    #[test]
    fn test_bulk_action_batches_and_refreshes() {
        let (mut s, rx) = loaded(10, 10);
        s.toggle("7").unwrap();
        s.toggle("3").unwrap();

        s.dispatch_selected(ActionKind::MarkRead).unwrap();
        let (op_id, kind, sent_ids, mailbox) = expect_action(&rx);
        assert_eq!(kind, ActionKind::MarkRead);
        assert_eq!(sent_ids, ids(&["3", "7"]));
        assert_eq!(mailbox, "INBOX");
        assert!(!s.can_dispatch());
        assert!(rx.try_recv().is_err());

        assert!(s.on_response(action_reply(op_id, kind, sent_ids, "INBOX", Ok(()))));
        assert_eq!(s.selection().count(), 0);
        let refresh = expect_list(&rx);
        assert_eq!((refresh.kind, refresh.offset), (FetchKind::Refresh, 0));
        assert_eq!(
            s.notification().map(|n| n.severity),
            Some(Severity::Success)
        );
        assert_eq!(
            s.take_events(),
            vec![SessionEvent::ActionComplete {
                kind: ActionKind::MarkRead,
                ids: ids(&["3", "7"]),
                mailbox: "INBOX".to_string(),
            }]
        );

        s.on_response(refresh.reply(Ok(page(1..=8, Some(8)))));
        assert_eq!(s.offset(), 8);
        assert_eq!(s.load_state(), LoadState::Idle);
    }

    #[test]
    fn test_discarding_compose_events_keeps_action_results() {
        let (mut s, rx) = loaded(10, 10);
        s.open_message("4").unwrap();
        s.toggle("2").unwrap();
        s.dispatch_selected(ActionKind::MarkRead).unwrap();
        let (op_id, kind, sent_ids, _) = expect_action(&rx);
        s.on_response(action_reply(op_id, kind, sent_ids, "INBOX", Ok(())));

        s.compose(ComposeMode::Reply).unwrap();
        s.discard_compose_events();
        assert_eq!(
            s.take_events(),
            vec![SessionEvent::ActionComplete {
                kind: ActionKind::MarkRead,
                ids: ids(&["2"]),
                mailbox: "INBOX".to_string(),
            }]
        );
    }

    #[test]
    fn test_delete_closes_open_detail() {
        let (mut s, rx) = loaded(10, 10);
        s.open_message("5").unwrap();
        s.toggle("5").unwrap();
        s.toggle("6").unwrap();
        s.dispatch_selected(ActionKind::Delete).unwrap();
        let (op_id, kind, sent_ids, _) = expect_action(&rx);

        s.on_response(action_reply(op_id, kind, sent_ids, "INBOX", Ok(())));
        assert!(s.open_detail().is_none());
        assert_eq!(s.selection().count(), 0);
        assert_eq!(expect_list(&rx).kind, FetchKind::Refresh);
    }

    #[test]
    fn test_unrelated_detail_stays_open_until_refresh() {
        let (mut s, rx) = loaded(10, 10);
        s.open_message("1").unwrap();
        s.dispatch_action(ActionKind::MarkUnread, &ids(&["2"])).unwrap();
        let (op_id, kind, sent_ids, _) = expect_action(&rx);
        s.on_response(action_reply(op_id, kind, sent_ids, "INBOX", Ok(())));
        assert!(s.open_detail().is_some());

        let refresh = expect_list(&rx);
        s.on_response(refresh.reply(Ok(page(1..=10, Some(10)))));
        assert!(s.open_detail().is_none());
    }

    #[test]
    fn test_failed_action_leaves_state_untouched() {
        let (mut s, rx) = loaded(10, 10);
        s.toggle("2").unwrap();
        s.toggle("4").unwrap();
        s.open_message("2").unwrap();
        let before: Vec<MessageDetail> = s.messages().to_vec();

        s.dispatch_selected(ActionKind::Delete).unwrap();
        let (op_id, kind, sent_ids, _) = expect_action(&rx);
        let err = ApiError::Status {
            status: 500,
            detail: Some("IMAP error".to_string()),
        };
        assert!(s.on_response(action_reply(op_id, kind, sent_ids, "INBOX", Err(err))));

        assert_eq!(s.messages(), before.as_slice());
        assert_eq!(s.selected_ids(), ids(&["2", "4"]));
        assert_eq!(s.open_detail().map(|m| m.id()), Some("2"));
        let note = s.notification().unwrap();
        assert_eq!(note.severity, Severity::Error);
        assert_eq!(note.message, "Could not apply 'delete'. IMAP error");
        assert!(rx.try_recv().is_err());
        assert!(s.take_events().is_empty());
        assert!(s.can_dispatch());
    }

    #[test]
    fn test_empty_selection_rejected_locally() {
        let (mut s, rx) = loaded(5, 5);
        assert_eq!(
            s.dispatch_selected(ActionKind::MarkRead),
            Err(SessionError::EmptySelection)
        );
        assert_eq!(
            s.notification().map(|n| n.severity),
            Some(Severity::Warning)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_one_action_in_flight() {
        let (mut s, rx) = loaded(5, 5);
        s.dispatch_action(ActionKind::MarkRead, &ids(&["1", "1", "2"]))
            .unwrap();
        let (_, _, sent_ids, _) = expect_action(&rx);
        assert_eq!(sent_ids, ids(&["1", "2"]));

        assert_eq!(
            s.dispatch_action(ActionKind::Delete, &ids(&["3"])),
            Err(SessionError::ActionInFlight)
        );
        assert_eq!(s.refresh(), Err(SessionError::ActionInFlight));
        assert_eq!(s.load_more(), Ok(false));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_refused_while_list_loading() {
        let (mut s, rx) = loaded(25, 50);
        s.load_more().unwrap();
        let _ = expect_list(&rx);
        assert_eq!(
            s.dispatch_action(ActionKind::MarkRead, &ids(&["1"])),
            Err(SessionError::LoadInFlight)
        );
    }

    #[test]
    fn test_mismatched_action_result_is_ignored() {
        let (mut s, rx) = loaded(5, 5);
        let op_id = s.dispatch_action(ActionKind::MarkRead, &ids(&["1"])).unwrap();
        let _ = expect_action(&rx);
        assert!(!s.on_response(action_reply(
            op_id + 7,
            ActionKind::MarkRead,
            ids(&["1"]),
            "INBOX",
            Ok(())
        )));
        assert_eq!(s.action_pending(), Some(ActionKind::MarkRead));
    }

    #[test]
    fn test_action_completing_after_switch_skips_refresh() {
        let (mut s, rx) = loaded(5, 5);
        s.toggle("1").unwrap();
        s.dispatch_selected(ActionKind::Delete).unwrap();
        let (op_id, kind, sent_ids, _) = expect_action(&rx);

        s.select_mailbox("INBOX.Sent").unwrap();
        let sent = expect_list(&rx);
        s.on_response(sent.reply(Ok(page(std::iter::empty(), Some(0)))));

        assert!(s.on_response(action_reply(op_id, kind, sent_ids, "INBOX", Ok(()))));
        assert!(rx.try_recv().is_err());
        assert_eq!(s.active_mailbox(), Some("INBOX.Sent"));
        assert_eq!(s.take_events().len(), 1);
    }

    #[test]
    fn test_timeout_is_reported_distinctly_and_stops_pagination() {
        let (mut s, rx) = loaded(25, 100);
        s.load_more().unwrap();
        let req = expect_list(&rx);
        s.on_response(req.reply(Err(ApiError::Timeout { secs: 60 })));

        assert_eq!(s.offset(), 25);
        assert!(!s.has_more());
        let note = s.notification().unwrap();
        assert!(note.message.contains("timed out after 60s"), "{}", note.message);

        assert_eq!(s.load_more(), Ok(false));
        s.refresh().unwrap();
        let req = expect_list(&rx);
        s.on_response(req.reply(Ok(page(1..=25, Some(100)))));
        assert!(s.has_more());
    }

    #[test]
    fn test_generic_failure_uses_server_detail() {
        let (mut s, rx) = session();
        s.select_mailbox("INBOX.Trash").unwrap();
        let req = expect_list(&rx);
        let err = ApiError::Status {
            status: 503,
            detail: Some("Mail server unavailable".to_string()),
        };
        s.on_response(req.reply(Err(err)));
        assert_eq!(
            s.notification().map(|n| n.message.as_str()),
            Some("Could not load Trash. Mail server unavailable")
        );

        s.refresh().unwrap();
        let req = expect_list(&rx);
        s.on_response(req.reply(Err(ApiError::Transport("refused".to_string()))));
        assert_eq!(
            s.notification().map(|n| n.message.as_str()),
            Some("Could not load Trash. Try again later.")
        );
    }

    #[test]
    fn test_failed_refresh_keeps_list_selection_and_detail() {
        let (mut s, rx) = loaded(10, 10);
        s.toggle("3").unwrap();
        s.open_message("3").unwrap();
        s.refresh().unwrap();
        let req = expect_list(&rx);
        s.on_response(req.reply(Err(ApiError::Transport("reset".to_string()))));

        assert_eq!(s.offset(), 10);
        assert_eq!(s.selected_ids(), ids(&["3"]));
        assert!(s.open_detail().is_some());
    }

    #[test]
    fn test_refresh_supersedes_pending_load_more() {
        let (mut s, rx) = loaded(25, 60);
        s.load_more().unwrap();
        let more = expect_list(&rx);
        s.refresh().unwrap();
        let refresh = expect_list(&rx);
        assert!(refresh.generation > more.generation);

        assert!(!s.on_response(more.reply(Ok(page(26..=50, Some(60))))));
        assert!(s.on_response(refresh.reply(Ok(page(1..=25, Some(60))))));
        assert_eq!(s.offset(), 25);
    }

    #[test]
    fn test_detail_action_and_compose() {
        let (mut s, rx) = loaded(3, 3);
        assert_eq!(s.compose(ComposeMode::Reply), Err(SessionError::NothingOpen));
        assert_eq!(
            s.detail_action(ActionKind::Delete),
            Err(SessionError::NothingOpen)
        );

        s.open_message("2").unwrap();
        let seed = s.compose(ComposeMode::Reply).unwrap();
        assert_eq!(seed.to, vec!["Sender 2 <s2@example.com>"]);
        assert_eq!(s.take_events(), vec![SessionEvent::Compose(seed)]);

        s.detail_action(ActionKind::MarkRead).unwrap();
        let (op_id, kind, sent_ids, mailbox) = expect_action(&rx);
        assert_eq!(sent_ids, ids(&["2"]));
        s.on_response(action_reply(op_id, kind, sent_ids, &mailbox, Ok(())));
        assert!(s.open_detail().is_none());
    }

    #[test]
    fn test_open_unknown_message() {
        let (mut s, _rx) = loaded(3, 3);
        assert_eq!(
            s.open_message("nope"),
            Err(SessionError::UnknownMessage("nope".to_string()))
        );
        assert!(!s.close_message());
    }

    #[test]
    fn test_backend_gone() {
        let (mut s, rx) = session();
        drop(rx);
        assert_eq!(s.select_mailbox("INBOX"), Err(SessionError::BackendGone));
        assert_eq!(s.load_state(), LoadState::Idle);
    }
}
