use crate::api::types::MessageDetail;
use std::collections::HashSet;

/// Messages of the active mailbox in the order the server returned them.
/// Never re-sorted: load-more correctness depends on server ordering.
#[derive(Debug, Default)]
pub struct MessageListStore {
    messages: Vec<MessageDetail>,
}

impl MessageListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page, dropping ids already held. Returns how many were added.
    pub fn append(&mut self, page: Vec<MessageDetail>) -> usize {
        let mut seen: HashSet<String> = self.messages.iter().map(|m| m.id().to_string()).collect();
        let before = self.messages.len();
        for msg in page {
            if seen.insert(msg.id().to_string()) {
                self.messages.push(msg);
            } else {
                log::warn!("Dropping duplicate message {} from page", msg.id());
            }
        }
        self.messages.len() - before
    }

    pub fn replace(&mut self, page: Vec<MessageDetail>) -> usize {
        self.messages.clear();
        self.append(page)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn get(&self, id: &str) -> Option<&MessageDetail> {
        self.messages.iter().find(|m| m.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|m| m.id())
    }

    pub fn as_slice(&self) -> &[MessageDetail] {
        &self.messages
    }
}
