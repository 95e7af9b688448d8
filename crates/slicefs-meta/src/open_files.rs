//! Files this client has open, used to keep unlinked inodes alive.

use dashmap::DashMap;

use crate::types::Ino;

#[derive(Default)]
pub struct OpenFiles {
    counts: DashMap<Ino, u32>,
}

impl OpenFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, ino: Ino) {
        *self.counts.entry(ino).or_insert(0) += 1;
    }

    /// Drop one handle; returns the handles left.
    pub fn close(&self, ino: Ino) -> u32 {
        let left = match self.counts.get_mut(&ino) {
            Some(mut n) => {
                *n = n.saturating_sub(1);
                *n
            }
            None => return 0,
        };
        if left == 0 {
            self.counts.remove_if(&ino, |_, n| *n == 0);
        }
        left
    }

    pub fn is_open(&self, ino: Ino) -> bool {
        self.counts.get(&ino).map(|n| *n > 0).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
