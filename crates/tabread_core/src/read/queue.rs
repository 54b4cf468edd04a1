//! Pre-loaded entity work queue shared by read workers.

use crate::model::entity::Entity;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Fixed set of entities drained by workers.
///
/// The queue never grows after construction, so an empty pop means all
/// work has been claimed. Callers hand it an already de-duplicated list.
#[derive(Debug)]
pub(crate) struct EntityWorkQueue {
    pending: Mutex<VecDeque<Entity>>,
}

impl EntityWorkQueue {
    pub(crate) fn new(entities: impl IntoIterator<Item = Entity>) -> Self {
        Self {
            pending: Mutex::new(entities.into_iter().collect()),
        }
    }

    /// Claims the next entity, or `None` once the queue is drained.
    pub(crate) fn pop(&self) -> Option<Entity> {
        self.pending.lock().pop_front()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::EntityWorkQueue;
    use crate::model::entity::Entity;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn entity(id: usize) -> Entity {
        Entity::new("Participant", id.to_string()).expect("valid entity")
    }

    #[test]
    fn pops_in_load_order() {
        let queue = EntityWorkQueue::new([entity(2), entity(1)]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(entity(2)));
        assert_eq!(queue.pop(), Some(entity(1)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn concurrent_pops_claim_each_entity_once() {
        let queue = Arc::new(EntityWorkQueue::new((0..1_000).map(entity)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut claimed = Vec::new();
                    while let Some(entity) = queue.pop() {
                        claimed.push(entity);
                    }
                    claimed
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().expect("popper should not panic"));
        }
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 1_000);
        assert_eq!(unique.len(), 1_000);
    }
}
