/// Fixed-capacity, append-only buffer of log lines
///
/// Entries past the capacity are dropped whole; an accepted entry is never
/// truncated.
#[derive(Debug, Clone)]
pub struct LogSink {
    entries: Vec<String>,
    capacity: usize,
}

impl LogSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Returns whether the entry was kept
    pub fn append(&mut self, entry: String) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.clone()
    }
}
