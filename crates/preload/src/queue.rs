//! Pending fetches ordered by urgency.

use folio_fetch::Url;
use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;

/// A page waiting for a fetch slot.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub url: Url,
    /// Lower is more urgent.
    pub priority: i64,
    pub enqueued_at: Instant,
    /// Insertion order, assigned by the queue on [`push`](PriorityQueue::push).
    seq: u64,
}
impl PendingRequest {
    pub fn new(url: Url, priority: i64) -> Self {
        Self { url, priority, enqueued_at: Instant::now(), seq: 0 }
    }

    fn key(&self) -> (i64, u64) {
        (self.priority, self.seq)
    }
}

/// Priority queue of pending fetches: most urgent (lowest priority value)
/// first, first-in first-out among equals.
///
/// A URL is queued at most once; pushing it again replaces the earlier
/// request, which also moves it behind everything else of the same priority.
///
/// # Examples
///
/// ```
/// use folio_fetch::Url;
/// use folio_preload::{PendingRequest, PriorityQueue};
///
/// let page = |n: u32| Url::parse(&format!("https://cdn.example/{n}.jpg")).unwrap();
/// let mut queue = PriorityQueue::default();
/// queue.push(PendingRequest::new(page(1), 2));
/// queue.push(PendingRequest::new(page(2), 1));
/// queue.push(PendingRequest::new(page(3), 1));
///
/// assert_eq!(queue.pop().unwrap().url, page(2));
/// assert_eq!(queue.pop().unwrap().url, page(3));
/// assert_eq!(queue.pop().unwrap().url, page(1));
/// assert!(queue.pop().is_none());
/// ```
#[derive(Debug, Default)]
pub struct PriorityQueue {
    order: BTreeMap<(i64, u64), PendingRequest>,
    index: HashMap<Url, (i64, u64)>,
    next_seq: u64,
}

impl PriorityQueue {
    /// Queue `request`, returning the request it replaced, if its URL was
    /// already queued.
    pub fn push(&mut self, mut request: PendingRequest) -> Option<PendingRequest> {
        let replaced = self.remove(&request.url);
        request.seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(request.url.clone(), request.key());
        self.order.insert(request.key(), request);
        replaced
    }

    /// Take the most urgent request.
    pub fn pop(&mut self) -> Option<PendingRequest> {
        let (_, request) = self.order.pop_first()?;
        self.index.remove(&request.url);
        Some(request)
    }

    pub fn peek(&self) -> Option<&PendingRequest> {
        self.order.first_key_value().map(|(_, request)| request)
    }

    /// Withdraw the request for `url`, if it is still waiting.
    pub fn remove(&mut self, url: &Url) -> Option<PendingRequest> {
        let key = self.index.remove(url)?;
        self.order.remove(&key)
    }

    /// Priority `url` is queued with.
    pub fn priority_of(&self, url: &Url) -> Option<i64> {
        self.index.get(url).map(|(priority, _)| *priority)
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.index.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Remove everything, returning the withdrawn requests in queue order.
    pub fn clear(&mut self) -> Vec<PendingRequest> {
        self.index.clear();
        std::mem::take(&mut self.order).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn page(n: usize) -> Url {
        Url::parse(&format!("https://cdn.example/ch1/{n}.jpg")).unwrap()
    }

    fn drain(queue: &mut PriorityQueue) -> Vec<Url> {
        std::iter::from_fn(|| queue.pop()).map(|r| r.url).collect()
    }

    #[rstest]
    // Equal priorities keep arrival order; lower values jump ahead.
    #[case(&[3, 1, 4, 1, 5], &[1, 3, 0, 2, 4])]
    #[case(&[0, 0, 0], &[0, 1, 2])]
    #[case(&[2, 1, 0], &[2, 1, 0])]
    #[case(&[-1, 5, -1, 0], &[0, 2, 3, 1])]
    fn test_pop_order(#[case] priorities: &[i64], #[case] expected: &[usize]) {
        let mut queue = PriorityQueue::default();
        for (n, priority) in priorities.iter().enumerate() {
            queue.push(PendingRequest::new(page(n), *priority));
        }
        assert_eq!(drain(&mut queue), expected.iter().map(|n| page(*n)).collect::<Vec<_>>());
    }

    #[test]
    fn test_remove_if_present() {
        let mut queue = PriorityQueue::default();
        queue.push(PendingRequest::new(page(0), 1));
        queue.push(PendingRequest::new(page(1), 2));
        assert_eq!(queue.remove(&page(0)).map(|r| r.priority), Some(1));
        assert!(queue.remove(&page(0)).is_none());
        assert!(queue.remove(&page(7)).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(drain(&mut queue), [page(1)]);
    }

    #[test]
    fn test_push_replaces_same_url() {
        let mut queue = PriorityQueue::default();
        queue.push(PendingRequest::new(page(0), 5));
        queue.push(PendingRequest::new(page(1), 3));
        let replaced = queue.push(PendingRequest::new(page(0), 1)).unwrap();
        assert_eq!(replaced.priority, 5);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.priority_of(&page(0)), Some(1));
        assert_eq!(queue.peek().map(|r| r.url.clone()), Some(page(0)));
        assert_eq!(drain(&mut queue), [page(0), page(1)]);
    }

    #[test]
    fn test_clear_returns_queue_order() {
        let mut queue = PriorityQueue::default();
        queue.push(PendingRequest::new(page(0), 9));
        queue.push(PendingRequest::new(page(1), 0));
        let cleared: Vec<_> = queue.clear().into_iter().map(|r| r.url).collect();
        assert_eq!(cleared, [page(1), page(0)]);
        assert!(queue.is_empty());
        assert!(!queue.contains(&page(0)));
    }
}
