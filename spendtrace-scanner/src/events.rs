use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// State-change notification from a worker to whoever renders the crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateEvent {
    StatusMessage { text: String },
    UnspentNotification { label: String, text: String },
}

impl UpdateEvent {
    pub fn status(text: impl Into<String>) -> Self {
        UpdateEvent::StatusMessage { text: text.into() }
    }

    pub fn unspent(label: impl Into<String>, text: impl Into<String>) -> Self {
        UpdateEvent::UnspentNotification {
            label: label.into(),
            text: text.into(),
        }
    }
}

/// Many-producer, single-consumer FIFO of update events.
///
/// Has its own lock, independent of the crawl state, so a slow renderer
/// never stalls workers beyond the cost of a push.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<UpdateEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: UpdateEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }

    /// Remove and return everything queued, in publish order.
    pub fn drain_all(&self) -> EventBatch {
        let drained = std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner));
        EventBatch(drained.into())
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One drain's worth of events.
///
/// A renderer repaints once per non-empty batch, showing the most recent status
/// and using the most recent unspent notification as a one-pass highlight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch(pub Vec<UpdateEvent>);

impl EventBatch {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UpdateEvent> {
        self.0.iter()
    }

    pub fn latest_status(&self) -> Option<&str> {
        self.0.iter().rev().find_map(|e| match e {
            UpdateEvent::StatusMessage { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// `(label, text)` of the last unspent notification in the batch.
    pub fn latest_unspent(&self) -> Option<(&str, &str)> {
        self.0.iter().rev().find_map(|e| match e {
            UpdateEvent::UnspentNotification { label, text } => {
                Some((label.as_str(), text.as_str()))
            }
            _ => None,
        })
    }
}

impl IntoIterator for EventBatch {
    type Item = UpdateEvent;
    type IntoIter = std::vec::IntoIter<UpdateEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let queue = EventQueue::new();
        queue.publish(UpdateEvent::status("one"));
        queue.publish(UpdateEvent::unspent("a", "a is unspent"));
        queue.publish(UpdateEvent::status("two"));

        let batch = queue.drain_all();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.0[0], UpdateEvent::status("one"));
        assert_eq!(batch.0[2], UpdateEvent::status("two"));

        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn test_latest_wins_within_batch() {
        let batch = EventBatch(vec![
            UpdateEvent::unspent("a", "first"),
            UpdateEvent::status("s1"),
            UpdateEvent::unspent("b", "second"),
            UpdateEvent::status("s2"),
        ]);

        assert_eq!(batch.latest_status(), Some("s2"));
        assert_eq!(batch.latest_unspent(), Some(("b", "second")));
    }

    #[test]
    fn test_batch_without_notifications() {
        let batch = EventBatch(vec![UpdateEvent::status("only")]);
        assert_eq!(batch.latest_unspent(), None);
        assert_eq!(EventBatch::default().latest_status(), None);
    }

    #[test]
    fn test_per_producer_order_kept_under_contention() {
        let queue = Arc::new(EventQueue::new());

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100 {
                        queue.publish(UpdateEvent::status(format!("{}:{}", p, i)));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let batch = queue.drain_all();
        assert_eq!(batch.len(), 400);

        for p in 0..4 {
            let seen: Vec<usize> = batch
                .iter()
                .filter_map(|e| match e {
                    UpdateEvent::StatusMessage { text } => {
                        let (producer, seq) = text.split_once(':')?;
                        (producer == p.to_string()).then(|| seq.parse().ok()).flatten()
                    }
                    _ => None,
                })
                .collect();
            assert_eq!(seen, (0..100).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let json = serde_json::to_string(&UpdateEvent::unspent("a", "t")).unwrap();
        assert!(json.contains("\"kind\":\"unspent_notification\""));
    }
}
