use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::{Condvar, Mutex};

use crate::{Slot, SLOT_COUNT};

/// Pending target widths for one page, one entry per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Request {
    widths: [Option<u32>; SLOT_COUNT],
}

impl Request {
    pub fn new(slot: Slot, width: u32) -> Self {
        let mut request = Self::default();
        request.update(slot, width);
        request
    }

    /// Last writer wins.
    pub fn update(&mut self, slot: Slot, width: u32) {
        self.widths[slot.index()] = Some(width);
    }

    pub fn width(&self, slot: Slot) -> Option<u32> {
        self.widths[slot.index()]
    }

    pub fn has_slot(&self, slot: Slot) -> bool {
        self.widths[slot.index()].is_some()
    }

    pub fn remove(&mut self, slot: Slot) {
        self.widths[slot.index()] = None;
    }

    pub fn is_empty(&self) -> bool {
        self.widths.iter().all(Option::is_none)
    }

    /// Remove and return the lowest pending slot.
    fn take_lowest(&mut self) -> Option<(Slot, u32)> {
        Slot::ALL.into_iter().find_map(|slot| {
            let width = self.widths[slot.index()].take()?;
            Some((slot, width))
        })
    }
}

/// One unit of work for the render worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    pub page: usize,
    pub slot: Slot,
    pub width: u32,
}

/// Outcome of a blocking wait on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Work(RenderRequest),
    /// Woken by [`RequestQueue::interrupt`] without work.
    Interrupted,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: BTreeMap<usize, Request>,
    center: usize,
    interrupts: usize,
}

impl QueueState {
    fn nearest_page(&self, center: usize) -> Option<usize> {
        let below = self.pending.range(..=center).next_back().map(|(page, _)| *page);
        let above = self
            .pending
            .range((Bound::Excluded(center), Bound::Unbounded))
            .next()
            .map(|(page, _)| *page);
        match (below, above) {
            (Some(lo), Some(hi)) => {
                if center - lo <= hi - center {
                    Some(lo)
                } else {
                    Some(hi)
                }
            }
            (lo, hi) => lo.or(hi),
        }
    }

    fn take_nearest(&mut self, center: usize) -> Option<RenderRequest> {
        let page = self.nearest_page(center)?;
        let request = self.pending.get_mut(&page)?;
        let (slot, width) = request.take_lowest()?;
        if request.is_empty() {
            self.pending.remove(&page);
        }
        Some(RenderRequest { page, slot, width })
    }
}

/// Pending render requests keyed by page, served nearest-to-center first.
///
/// A page has at most one [`Request`]; enqueueing a page that is already
/// pending merges into it and does not signal the consumer again.
#[derive(Debug, Default)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when a new page entry was created.
    pub fn enqueue(&self, page: usize, slot: Slot, width: u32) -> bool {
        let mut state = self.state.lock();
        if let Some(request) = state.pending.get_mut(&page) {
            request.update(slot, width);
            return false;
        }
        state.pending.insert(page, Request::new(slot, width));
        drop(state);
        self.available.notify_one();
        true
    }

    /// Remove the request nearest to `center`, preferring the lower page on
    /// a tie. The page stays queued while it has other pending slots.
    pub fn dequeue_nearest(&self, center: usize) -> Option<RenderRequest> {
        self.state.lock().take_nearest(center)
    }

    /// Block until there is work or an interrupt. Work is chosen relative to
    /// the center last passed to [`set_center`](Self::set_center).
    pub fn wait_next(&self) -> Wake {
        let mut state = self.state.lock();
        loop {
            if state.interrupts > 0 {
                state.interrupts -= 1;
                return Wake::Interrupted;
            }
            let center = state.center;
            if let Some(request) = state.take_nearest(center) {
                return Wake::Work(request);
            }
            self.available.wait(&mut state);
        }
    }

    /// Wake one waiter with no work.
    pub fn interrupt(&self) {
        self.state.lock().interrupts += 1;
        self.available.notify_one();
    }

    pub fn set_center(&self, center: usize) {
        self.state.lock().center = center;
    }

    pub fn center(&self) -> usize {
        self.state.lock().center
    }

    /// Drop the `slot` part of every request outside `keep_min..=keep_max`.
    /// Returns the number of pages removed entirely.
    pub fn retain_window(&self, slot: Slot, keep_min: usize, keep_max: usize) -> usize {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|page, request| {
            if (keep_min..=keep_max).contains(page) || !request.has_slot(slot) {
                return true;
            }
            request.remove(slot);
            !request.is_empty()
        });
        before - state.pending.len()
    }

    pub fn pending(&self, page: usize) -> Option<Request> {
        self.state.lock().pending.get(&page).copied()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.interrupts = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn pages(queue: &RequestQueue, center: usize) -> Vec<usize> {
        std::iter::from_fn(|| queue.dequeue_nearest(center))
            .map(|request| request.page)
            .collect()
    }

    #[test]
    fn merging_keeps_one_request_with_last_width() {
        let queue = RequestQueue::new();
        assert!(queue.enqueue(4, Slot::Primary, 600));
        assert!(!queue.enqueue(4, Slot::Primary, 800));
        assert_eq!(queue.len(), 1);
        let pending = queue.pending(4).unwrap();
        assert_eq!(pending.width(Slot::Primary), Some(800));
        assert_eq!(pending.width(Slot::Secondary), None);

        let request = queue.dequeue_nearest(0).unwrap();
        assert_eq!(
            request,
            RenderRequest {
                page: 4,
                slot: Slot::Primary,
                width: 800
            }
        );
        assert!(queue.dequeue_nearest(0).is_none());
    }

    #[test]
    fn nearest_page_wins_and_ties_go_down() {
        let queue = RequestQueue::new();
        for page in [2, 5, 9] {
            queue.enqueue(page, Slot::Primary, 100);
        }
        assert_eq!(pages(&queue, 6), vec![5, 9, 2]);

        for page in [4, 8] {
            queue.enqueue(page, Slot::Primary, 100);
        }
        assert_eq!(pages(&queue, 6), vec![4, 8]);

        for page in [6, 7] {
            queue.enqueue(page, Slot::Primary, 100);
        }
        assert_eq!(pages(&queue, 6), vec![6, 7]);
    }

    #[test]
    fn center_beyond_every_page_and_before_every_page() {
        let queue = RequestQueue::new();
        for page in [3, 1, 7] {
            queue.enqueue(page, Slot::Primary, 100);
        }
        assert_eq!(pages(&queue, 100), vec![7, 3, 1]);

        for page in [3, 1, 7] {
            queue.enqueue(page, Slot::Primary, 100);
        }
        assert_eq!(pages(&queue, 0), vec![1, 3, 7]);
    }

    #[test]
    fn page_with_several_slots_is_served_slot_by_slot() {
        let queue = RequestQueue::new();
        queue.enqueue(3, Slot::Tertiary, 300);
        queue.enqueue(3, Slot::Primary, 100);

        let first = queue.dequeue_nearest(3).unwrap();
        assert_eq!((first.slot, first.width), (Slot::Primary, 100));
        assert_eq!(queue.len(), 1);

        let second = queue.dequeue_nearest(3).unwrap();
        assert_eq!((second.slot, second.width), (Slot::Tertiary, 300));
        assert!(queue.is_empty());
    }

    #[test]
    fn retain_window_drops_only_the_given_slot() {
        let queue = RequestQueue::new();
        queue.enqueue(1, Slot::Primary, 100);
        queue.enqueue(1, Slot::Secondary, 200);
        queue.enqueue(5, Slot::Primary, 100);
        queue.enqueue(30, Slot::Primary, 100);

        assert_eq!(queue.retain_window(Slot::Primary, 4, 10), 1);
        assert_eq!(queue.pending(1), Some(Request::new(Slot::Secondary, 200)));
        assert!(queue.pending(5).is_some());
        assert!(queue.pending(30).is_none());
    }

    #[test]
    fn interrupt_wakes_a_blocked_consumer() {
        let queue = Arc::new(RequestQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_next())
        };
        thread::sleep(Duration::from_millis(20));
        queue.interrupt();
        assert_eq!(consumer.join().unwrap(), Wake::Interrupted);
    }

    #[test]
    fn blocked_consumer_receives_work_once() {
        let queue = Arc::new(RequestQueue::new());
        queue.set_center(10);
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_next())
        };
        thread::sleep(Duration::from_millis(20));
        queue.enqueue(12, Slot::Secondary, 640);
        queue.enqueue(12, Slot::Secondary, 480);
        match consumer.join().unwrap() {
            Wake::Work(request) => assert_eq!(request.page, 12),
            Wake::Interrupted => panic!("expected work"),
        }
    }

    #[test]
    fn clear_drops_everything() {
        let queue = RequestQueue::new();
        queue.enqueue(1, Slot::Primary, 1);
        queue.enqueue(2, Slot::Primary, 1);
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.dequeue_nearest(1).is_none());
    }

    #[test]
    fn order_matches_brute_force_reference() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let queue = RequestQueue::new();
            let mut reference: Vec<usize> = Vec::new();
            for _ in 0..rng.gen_range(1..40) {
                let page = rng.gen_range(0..60);
                queue.enqueue(page, Slot::Primary, 100);
                if !reference.contains(&page) {
                    reference.push(page);
                }
            }
            let center = rng.gen_range(0..60);

            while let Some(request) = queue.dequeue_nearest(center) {
                let expected = *reference
                    .iter()
                    .min_by_key(|page| (page.abs_diff(center), **page))
                    .unwrap();
                assert_eq!(request.page, expected);
                reference.retain(|page| *page != expected);
            }
            assert!(reference.is_empty());
        }
    }
}
