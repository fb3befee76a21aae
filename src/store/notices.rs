use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// User-visible notification, the headless stand-in for a toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NoticeQueue {
    queue: VecDeque<Notice>,
    capacity: usize,
}

impl NoticeQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, notice: Notice) {
        if self.capacity == 0 {
            return;
        }

        while self.queue.len() >= self.capacity {
            self.queue.pop_front();
        }
        self.queue.push_back(notice);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.queue.iter()
    }

    pub(crate) fn drain(&mut self) -> Vec<Notice> {
        self.queue.drain(..).collect()
    }
}
