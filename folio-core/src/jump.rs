/// Back/forward history of visited pages.
///
/// Each page appears at most once; storing it again moves it to the end.
/// The cursor equals `entries.len()` while the user is not browsing the
/// history.
#[derive(Debug, Default, Clone)]
pub struct JumpHistory {
    entries: Vec<usize>,
    cursor: usize,
}

impl JumpHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, page: usize) {
        self.entries.retain(|&entry| entry != page);
        self.entries.push(page);
        self.cursor = self.entries.len();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    /// Step back. Leaving the end of the history first records
    /// `current_page`, so that [`forward`](Self::forward) can return to it.
    pub fn back(&mut self, current_page: usize) -> Option<usize> {
        if self.cursor == 0 {
            return None;
        }
        if self.cursor == self.entries.len() {
            self.store(current_page);
            self.cursor = self.entries.len() - 1;
            if self.cursor == 0 {
                return None;
            }
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).copied()
    }

    pub fn forward(&mut self) -> Option<usize> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).copied()
    }

    pub fn entries(&self) -> &[usize] {
        &self.entries
    }

    pub fn is_browsing(&self) -> bool {
        self.cursor < self.entries.len()
    }
}
