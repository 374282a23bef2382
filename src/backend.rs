use crate::api::client::{ApiClient, ApiError};
use crate::api::types::{ActionKind, MessagePage};
use std::sync::{mpsc, Arc};
use std::thread;

/// Which list load a fetch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Initial,
    More,
    Refresh,
}

/// Commands sent from the session to the backend thread.
#[derive(Debug)]
pub enum BackendCommand {
    ListMessages {
        generation: u64,
        kind: FetchKind,
        mailbox: String,
        limit: u32,
        offset: usize,
    },
    ApplyAction {
        op_id: u64,
        kind: ActionKind,
        ids: Vec<String>,
        mailbox: String,
    },
    Shutdown,
}

/// Responses sent from the backend thread to the session. Each carries the
/// tag it was issued with so stale results can be recognised.
#[derive(Debug)]
pub enum BackendResponse {
    Messages {
        generation: u64,
        kind: FetchKind,
        mailbox: String,
        offset: usize,
        result: Result<MessagePage, ApiError>,
    },
    ActionApplied {
        op_id: u64,
        kind: ActionKind,
        ids: Vec<String>,
        mailbox: String,
        result: Result<(), ApiError>,
    },
}

/// Spawn the backend thread. Returns the command sender and response receiver.
///
/// Actions run one at a time on the backend thread. Each list fetch gets its
/// own thread, so a fetch the session has already abandoned never delays the
/// next one.
pub fn spawn(
    client: ApiClient,
) -> (
    mpsc::Sender<BackendCommand>,
    mpsc::Receiver<BackendResponse>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<BackendCommand>();
    let (resp_tx, resp_rx) = mpsc::channel::<BackendResponse>();

    thread::spawn(move || {
        backend_loop(Arc::new(client), cmd_rx, resp_tx);
    });

    (cmd_tx, resp_rx)
}

fn backend_loop(
    client: Arc<ApiClient>,
    cmd_rx: mpsc::Receiver<BackendCommand>,
    resp_tx: mpsc::Sender<BackendResponse>,
) {
    while let Ok(cmd) = cmd_rx.recv() {
        let response = match cmd {
            BackendCommand::ListMessages {
                generation,
                kind,
                mailbox,
                limit,
                offset,
            } => {
                let client = Arc::clone(&client);
                let resp_tx = resp_tx.clone();
                thread::spawn(move || {
                    let result = client.list_messages(&mailbox, limit, offset);
                    if let Err(ref e) = result {
                        log::warn!("Listing {} at offset {} failed: {}", mailbox, offset, e);
                    }
                    // The session may be gone by now.
                    let _ = resp_tx.send(BackendResponse::Messages {
                        generation,
                        kind,
                        mailbox,
                        offset,
                        result,
                    });
                });
                continue;
            }
            BackendCommand::ApplyAction {
                op_id,
                kind,
                ids,
                mailbox,
            } => {
                let result = client.apply_action(kind, &ids, &mailbox);
                if let Err(ref e) = result {
                    log::warn!("Action {} (op {}) failed: {}", kind, op_id, e);
                }
                BackendResponse::ActionApplied {
                    op_id,
                    kind,
                    ids,
                    mailbox,
                    result,
                }
            }
            BackendCommand::Shutdown => {
                log::debug!("Backend shutting down");
                break;
            }
        };
        if resp_tx.send(response).is_err() {
            break;
        }
    }
}
