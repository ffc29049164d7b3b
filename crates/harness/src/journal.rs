// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event router and journal: every mutation becomes an observed event
//! with a global monotonic stream cursor, held in a bounded ring and
//! dispatched to matching subscriptions in cursor order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::protocol::{ObservedEvent, StreamFilter};

/// Sink receiving `(subscription_id, cursor, event)` dispatches.
pub type SubscriptionSink = Arc<dyn Fn(&str, u64, &ObservedEvent) + Send + Sync>;

struct Subscription {
    subscription_id: String,
    connection_id: u64,
    filter: StreamFilter,
    cursor: u64,
    sink: SubscriptionSink,
}

pub struct Journal {
    entries: VecDeque<(u64, ObservedEvent)>,
    max_entries: usize,
    last_cursor: u64,
    subscriptions: Vec<Subscription>,
    by_id: HashMap<String, usize>,
}

impl Journal {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries,
            last_cursor: 0,
            subscriptions: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn current_cursor(&self) -> u64 {
        self.last_cursor
    }

    /// Assign the next cursor, append to the ring, dispatch to matching
    /// subscriptions in registration order.
    pub fn publish(&mut self, event: ObservedEvent) -> u64 {
        self.last_cursor += 1;
        let cursor = self.last_cursor;
        self.entries.push_back((cursor, event.clone()));
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        for sub in &mut self.subscriptions {
            if sub.filter.matches(&event) {
                (sub.sink)(&sub.subscription_id, cursor, &event);
                sub.cursor = cursor;
            }
        }
        cursor
    }

    /// Register a subscription. When `after_cursor` is inside the ring,
    /// matching entries replay through the sink before the subscription
    /// goes live; past the lower bound there is no backfill and the
    /// caller observes only the returned current cursor.
    pub fn subscribe(
        &mut self,
        subscription_id: String,
        connection_id: u64,
        filter: StreamFilter,
        after_cursor: Option<u64>,
        sink: SubscriptionSink,
    ) -> u64 {
        let mut cursor = self.last_cursor;
        if let Some(after) = after_cursor {
            let oldest = self.entries.front().map(|(c, _)| *c).unwrap_or(self.last_cursor + 1);
            let replayable = after + 1 >= oldest;
            if replayable {
                for (entry_cursor, event) in &self.entries {
                    if *entry_cursor > after && filter.matches(event) {
                        sink(&subscription_id, *entry_cursor, event);
                        cursor = *entry_cursor;
                    }
                }
            }
        }

        self.by_id.insert(subscription_id.clone(), self.subscriptions.len());
        self.subscriptions.push(Subscription {
            subscription_id,
            connection_id,
            filter,
            cursor,
            sink,
        });
        self.last_cursor
    }

    /// Idempotent; unknown ids are a no-op.
    pub fn unsubscribe(&mut self, subscription_id: &str) -> bool {
        if self.by_id.remove(subscription_id).is_none() {
            return false;
        }
        self.subscriptions.retain(|s| s.subscription_id != subscription_id);
        self.reindex();
        true
    }

    /// Tear down every subscription owned by a connection.
    pub fn remove_connection(&mut self, connection_id: u64) {
        self.subscriptions.retain(|s| s.connection_id != connection_id);
        self.by_id.clear();
        self.reindex();
    }

    fn reindex(&mut self) {
        self.by_id = self
            .subscriptions
            .iter()
            .enumerate()
            .map(|(i, s)| (s.subscription_id.clone(), i))
            .collect();
    }

    pub fn subscription_cursor(&self, subscription_id: &str) -> Option<u64> {
        self.by_id
            .get(subscription_id)
            .and_then(|&i| self.subscriptions.get(i))
            .map(|s| s.cursor)
    }

    pub fn has_subscription(&self, subscription_id: &str) -> bool {
        self.by_id.contains_key(subscription_id)
    }
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
