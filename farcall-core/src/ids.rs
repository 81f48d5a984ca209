use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Correlates a response with the request that caused it.
///
/// Formatted as `<instance>-<counter>`; unique for as long as the allocating
/// link lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        RequestId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty id cannot be correlated and is ignored by receivers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExposureId(u64);

impl ListenerId {
    pub fn new(value: u64) -> Self {
        ListenerId(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl ExposureId {
    pub fn new(value: u64) -> Self {
        ExposureId(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener#{}", self.0)
    }
}

impl fmt::Display for ExposureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exposure#{}", self.0)
    }
}

/// Per-link request id source: a random instance value plus a monotonic counter.
#[derive(Debug)]
pub struct RequestIdAllocator {
    instance: u64,
    next: AtomicU64,
}

impl RequestIdAllocator {
    pub fn new() -> Self {
        Self::with_instance(rand::random::<u64>())
    }

    pub fn with_instance(instance: u64) -> Self {
        RequestIdAllocator {
            instance,
            next: AtomicU64::new(0),
        }
    }

    pub fn allocate(&self) -> RequestId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        RequestId(format!("{}-{}", self.instance, n))
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for RequestIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ListenerIdAllocator {
    next: AtomicU64,
}

impl ListenerIdAllocator {
    pub fn new() -> Self {
        ListenerIdAllocator {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> ListenerId {
        ListenerId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ExposureIdAllocator {
    next: AtomicU64,
}

impl ExposureIdAllocator {
    pub fn new() -> Self {
        ExposureIdAllocator {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> ExposureId {
        ExposureId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ExposureIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_request_id_format() {
        let allocator = RequestIdAllocator::with_instance(7);

        assert_eq!(allocator.allocate().as_str(), "7-0");
        assert_eq!(allocator.allocate().as_str(), "7-1");
        assert_eq!(allocator.peek_next(), 2);
        assert_eq!(allocator.instance(), 7);
    }

    #[test]
    fn test_request_id_empty() {
        assert!(RequestId::default().is_empty());
        assert!(!RequestId::from("1-0").is_empty());
    }

    #[test]
    fn test_allocators_are_independent() {
        let a = RequestIdAllocator::with_instance(1);
        let b = RequestIdAllocator::with_instance(2);

        assert_ne!(a.allocate(), b.allocate());
        assert_eq!(a.peek_next(), 1);
        assert_eq!(b.peek_next(), 1);
    }

    #[test]
    fn test_allocator_thread_safety() {
        let allocator = Arc::new(RequestIdAllocator::new());
        let mut handles = vec![];
        let num_threads = 8;
        let ids_per_thread = 200;

        for _ in 0..num_threads {
            let alloc = Arc::clone(&allocator);
            handles.push(thread::spawn(move || {
                (0..ids_per_thread)
                    .map(|_| alloc.allocate())
                    .collect::<Vec<_>>()
            }));
        }

        let mut all_ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all_ids.insert(id.clone()), "Duplicate ID found: {}", id);
            }
        }

        assert_eq!(all_ids.len(), num_threads * ids_per_thread);
    }

    #[test]
    fn test_listener_and_exposure_ids() {
        let listeners = ListenerIdAllocator::new();
        let exposures = ExposureIdAllocator::new();

        assert_eq!(listeners.allocate(), ListenerId::new(1));
        assert_eq!(listeners.allocate().as_u64(), 2);
        assert_eq!(exposures.allocate(), ExposureId::new(1));
        assert_eq!(format!("{}", ExposureId::new(3)), "Exposure#3");
        assert_eq!(format!("{}", ListenerId::new(4)), "Listener#4");
    }

    #[test]
    fn test_serialization() {
        let id = RequestId::new("42-3");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"42-3\"");
        let back: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
