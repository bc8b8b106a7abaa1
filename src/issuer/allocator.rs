use std::sync::Mutex;

use tracing::debug;

use crate::{
    constants::{MAX_OPERATIONAL_NODE_ID, MIN_OPERATIONAL_NODE_ID},
    error::{IssuerError, IssuerResult},
    NodeId,
};

#[derive(Debug)]
struct AllocatorState {
    next: Option<NodeId>,
    override_id: Option<NodeId>,
}

/// Hands out node IDs. A requested ID is used once by the next allocation;
/// otherwise IDs come from a counter that never goes backwards.
#[derive(Debug)]
pub struct NodeIdAllocator {
    state: Mutex<AllocatorState>,
}

fn check_operational(id: NodeId) -> IssuerResult<()> {
    if !(MIN_OPERATIONAL_NODE_ID..=MAX_OPERATIONAL_NODE_ID).contains(&id) {
        return Err(IssuerError::Configuration(format!(
            "{id:#018x} is not an operational node ID"
        )));
    }
    Ok(())
}

impl NodeIdAllocator {
    pub fn new(first_node_id: NodeId) -> IssuerResult<Self> {
        check_operational(first_node_id)?;
        Ok(Self {
            state: Mutex::new(AllocatorState {
                next: Some(first_node_id),
                override_id: None,
            }),
        })
    }

    /// Use `id` for the next allocation only. Replaces an earlier unused request.
    pub fn request_node_id(&self, id: NodeId) -> IssuerResult<()> {
        check_operational(id)?;
        let mut state = self.lock()?;
        state.override_id = Some(id);
        Ok(())
    }

    pub fn allocate(&self) -> IssuerResult<NodeId> {
        self.allocate_with(None)
    }

    /// Allocate under a single lock. `explicit` is used as is and leaves both
    /// the pending request and the counter untouched.
    pub fn allocate_with(&self, explicit: Option<NodeId>) -> IssuerResult<NodeId> {
        if let Some(id) = explicit {
            check_operational(id)?;
        }
        let mut state = self.lock()?;
        if let Some(id) = explicit {
            debug!(node_id = id, "Using node ID from request");
            return Ok(id);
        }
        if let Some(id) = state.override_id.take() {
            debug!(node_id = id, "Using requested node ID");
            return Ok(id);
        }

        let id = state.next.ok_or_else(|| {
            IssuerError::Configuration("operational node ID range exhausted".to_string())
        })?;
        state.next = id.checked_add(1).filter(|n| *n <= MAX_OPERATIONAL_NODE_ID);
        Ok(id)
    }

    /// Next counter value, ignoring any pending request.
    pub fn peek(&self) -> IssuerResult<Option<NodeId>> {
        Ok(self.lock()?.next)
    }

    fn lock(&self) -> IssuerResult<std::sync::MutexGuard<'_, AllocatorState>> {
        self.state
            .lock()
            .map_err(|_| IssuerError::Configuration("node ID allocator poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use super::*;

    #[test]
    fn counter_and_override() {
        let allocator = NodeIdAllocator::new(1).unwrap();
        assert_eq!(allocator.allocate().unwrap(), 1);
        assert_eq!(allocator.allocate().unwrap(), 2);

        allocator.request_node_id(0x1000).unwrap();
        assert_eq!(allocator.allocate().unwrap(), 0x1000);
        // One-shot, and the counter was not consumed
        assert_eq!(allocator.allocate().unwrap(), 3);
        assert_eq!(allocator.peek().unwrap(), Some(4));
    }

    #[test]
    fn later_request_replaces_earlier() {
        let allocator = NodeIdAllocator::new(1).unwrap();
        allocator.request_node_id(10).unwrap();
        allocator.request_node_id(20).unwrap();
        assert_eq!(allocator.allocate().unwrap(), 20);
        assert_eq!(allocator.allocate().unwrap(), 1);
    }

    #[test]
    fn non_operational_ids_are_rejected() {
        assert!(NodeIdAllocator::new(0).is_err());
        let allocator = NodeIdAllocator::new(1).unwrap();
        assert!(allocator.request_node_id(0).is_err());
        assert!(allocator
            .request_node_id(MAX_OPERATIONAL_NODE_ID + 1)
            .is_err());
    }

    #[test]
    fn exhaustion() {
        let allocator = NodeIdAllocator::new(MAX_OPERATIONAL_NODE_ID).unwrap();
        assert_eq!(allocator.allocate().unwrap(), MAX_OPERATIONAL_NODE_ID);
        let err = allocator.allocate().unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn explicit_id_keeps_pending_request() {
        let allocator = NodeIdAllocator::new(1).unwrap();
        allocator.request_node_id(0x20).unwrap();
        assert_eq!(allocator.allocate_with(Some(0x10)).unwrap(), 0x10);
        assert_eq!(allocator.allocate().unwrap(), 0x20);
        assert_eq!(allocator.allocate().unwrap(), 1);
        assert!(allocator.allocate_with(Some(0)).is_err());
        assert_eq!(allocator.peek().unwrap(), Some(2));
    }

    #[test]
    fn concurrent_explicit_and_counter_allocations() {
        const EXPLICIT: NodeId = 0xAB;
        let allocator = Arc::new(NodeIdAllocator::new(0x1000).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || {
                    (0..200)
                        .map(|i| {
                            let explicit = ((t + i) % 2 == 0).then_some(EXPLICIT);
                            (explicit, allocator.allocate_with(explicit).unwrap())
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counter_ids = HashSet::new();
        for handle in handles {
            for (explicit, id) in handle.join().unwrap() {
                match explicit {
                    Some(requested) => assert_eq!(id, requested),
                    None => {
                        assert_ne!(id, EXPLICIT);
                        assert!(counter_ids.insert(id));
                    }
                }
            }
        }
        assert_eq!(counter_ids.len(), 800);
        assert_eq!(allocator.peek().unwrap(), Some(0x1000 + 800));
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let allocator = Arc::new(NodeIdAllocator::new(1).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| allocator.allocate().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 800);
        assert_eq!(allocator.peek().unwrap(), Some(801));
    }
}
