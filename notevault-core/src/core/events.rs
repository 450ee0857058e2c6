//! Change notifications for caches layered above the storage.

use std::cell::RefCell;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::core::model::{LinkedNotebook, Note, Notebook, Resource, SavedSearch, Tag, User};

/// One committed change. Events are only sent after the transaction that
/// produced them has committed.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageEvent {
    UserPut(Box<User>),
    UserExpunged { id: i64 },
    NotebookPut(Box<Notebook>),
    NotebookExpunged { local_id: String, note_local_ids: Vec<String> },
    LinkedNotebookPut(Box<LinkedNotebook>),
    LinkedNotebookExpunged { guid: String },
    NotePut(Box<Note>),
    NoteUpdated(Box<Note>),
    NoteExpunged { local_id: String },
    TagPut(Box<Tag>),
    TagExpunged { local_id: String, child_local_ids: Vec<String> },
    TagsExpunged { local_ids: Vec<String> },
    ResourcePut(Box<Resource>),
    ResourceExpunged { local_id: String },
    SavedSearchPut(Box<SavedSearch>),
    SavedSearchExpunged { local_id: String },
    AccountSwitched { storage_dir: std::path::PathBuf },
}

/// Fan-out of [`StorageEvent`]s to every live subscriber.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RefCell<Vec<Sender<StorageEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<StorageEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    /// Sends `event` to all subscribers, dropping the ones whose receiver is gone.
    pub fn publish(&self, event: StorageEvent) {
        let mut subscribers = self.subscribers.borrow_mut();
        subscribers.retain(|s| s.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_subscribers_and_prunes_dropped() {
        let bus = EventBus::default();
        let first = bus.subscribe();
        let second = bus.subscribe();
        drop(second);

        bus.publish(StorageEvent::NoteExpunged {
            local_id: "n1".into(),
        });
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(
            first.try_recv().unwrap(),
            StorageEvent::NoteExpunged {
                local_id: "n1".into()
            }
        );
    }
}
