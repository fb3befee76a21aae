use std::collections::VecDeque;

use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// One audited tool decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecution {
    pub id: String,
    pub tool: String,
    pub args: Value,
    pub result: String,
    pub approved: bool,
    pub timestamp: OffsetDateTime,
    pub duration_ms: Option<u64>,
}

impl ToolExecution {
    #[must_use]
    pub fn new(
        tool: impl Into<String>,
        args: Value,
        result: impl Into<String>,
        approved: bool,
        duration_ms: Option<u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool: tool.into(),
            args,
            result: result.into(),
            approved,
            timestamp: OffsetDateTime::now_utc(),
            duration_ms,
        }
    }
}

/// Fixed-capacity ring; the oldest entry is evicted first.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditLog {
    entries: VecDeque<ToolExecution>,
    capacity: usize,
}

impl AuditLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, execution: ToolExecution) {
        if self.capacity == 0 {
            return;
        }

        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(execution);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolExecution> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn last(&self) -> Option<&ToolExecution> {
        self.entries.back()
    }
}
