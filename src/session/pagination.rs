/// Cursor for the active mailbox. The offset itself is not stored: it is
/// always the number of messages held by the list store.
#[derive(Debug)]
pub struct PaginationState {
    limit: u32,
    total: Option<u64>,
    last_page_full: bool,
    halted: bool,
}

impl PaginationState {
    pub fn new(limit: u32) -> Self {
        PaginationState {
            limit,
            total: None,
            last_page_full: false,
            halted: false,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn reset(&mut self) {
        self.total = None;
        self.last_page_full = false;
        self.halted = false;
    }

    /// Whether another page exists past `offset`. Without a server total,
    /// a full last page is taken to mean there may be more.
    pub fn has_more(&self, offset: usize) -> bool {
        if self.halted {
            return false;
        }
        match self.total {
            Some(total) => (offset as u64) < total,
            None => self.last_page_full,
        }
    }

    /// How many of `received` items starting at `offset` may be kept
    /// without exceeding the page limit or the reported total.
    pub fn accept_count(&self, offset: usize, received: usize, total: Option<u64>) -> usize {
        let mut accept = received.min(self.limit as usize);
        if let Some(total) = total {
            let remaining = total.saturating_sub(offset as u64);
            accept = accept.min(remaining.min(usize::MAX as u64) as usize);
        }
        accept
    }

    pub fn record_page(&mut self, received: usize, total: Option<u64>) {
        self.total = total;
        self.last_page_full = received >= self.limit as usize;
        if received == 0 {
            self.halted = true;
        }
    }

    /// Stop pagination until the next refresh or mailbox switch.
    pub fn halt(&mut self) {
        self.halted = true;
    }
}
