//! Intrusive FIFO used by the real-time and high-priority tiers.
//!
//! Threads are chained through their own `next` link, so appending never
//! allocates. Every mutation first checks the head/tail/count triple; an
//! inconsistent triple is reported back as a static description and the
//! caller escalates it to the fatal sink.

use alloc::sync::Arc;

use crate::thread::Thread;

pub(crate) type Fault = &'static str;

pub(crate) struct TierQueue {
    first: Option<Arc<Thread>>,
    last: Option<Arc<Thread>>,
    count: usize,
}

impl TierQueue {
    pub(crate) const fn new() -> Self {
        Self {
            first: None,
            last: None,
            count: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    fn check(&self) -> Result<(), Fault> {
        match (&self.first, &self.last) {
            (None, Some(_)) => Err("tail without head"),
            (Some(_), None) => Err("head without tail"),
            (None, None) if self.count != 0 => Err("count drift on empty queue"),
            (Some(_), Some(_)) if self.count == 0 => Err("count drift on non-empty queue"),
            _ => Ok(()),
        }
    }

    /// Append in O(1).
    pub(crate) fn push_back(&mut self, thread: Arc<Thread>) -> Result<(), Fault> {
        self.check()?;
        *thread.link().lock() = None;
        match self.last.take() {
            Some(last) => {
                let mut link = last.link().lock();
                if link.is_some() {
                    drop(link);
                    self.last = Some(last);
                    return Err("tail has a successor");
                }
                *link = Some(thread.clone());
            }
            None => self.first = Some(thread.clone()),
        }
        self.last = Some(thread);
        self.count += 1;
        Ok(())
    }

    pub(crate) fn pop_front(&mut self) -> Result<Option<Arc<Thread>>, Fault> {
        self.check()?;
        let Some(head) = self.first.take() else {
            return Ok(None);
        };
        let next = head.link().lock().take();
        if next.is_none() {
            match &self.last {
                Some(last) if Arc::ptr_eq(last, &head) => self.last = None,
                _ => return Err("tail unreachable from head"),
            }
        }
        self.first = next;
        self.count -= 1;
        Ok(Some(head))
    }

    /// Unlink `thread` wherever it sits. Linear in the queue length.
    pub(crate) fn remove(&mut self, thread: &Arc<Thread>) -> Result<bool, Fault> {
        self.check()?;
        let mut prev: Option<Arc<Thread>> = None;
        let mut cur = self.first.clone();
        let mut steps = 0;
        while let Some(node) = cur {
            steps += 1;
            if steps > self.count {
                return Err("chain longer than count");
            }
            let next = node.link().lock().clone();
            if Arc::ptr_eq(&node, thread) {
                *node.link().lock() = None;
                match &prev {
                    None => self.first = next.clone(),
                    Some(p) => *p.link().lock() = next.clone(),
                }
                if next.is_none() {
                    self.last = prev;
                }
                self.count -= 1;
                return Ok(true);
            }
            prev = Some(node);
            cur = next;
        }
        Ok(false)
    }

    #[cfg(test)]
    pub(crate) fn ids(&self) -> alloc::vec::Vec<u64> {
        let mut ids = alloc::vec::Vec::new();
        let mut cur = self.first.clone();
        while let Some(node) = cur {
            ids.push(node.id().as_u64());
            cur = node.link().lock().clone();
        }
        ids
    }
}

impl Drop for TierQueue {
    fn drop(&mut self) {
        // Unchain one thread at a time so dropping a long queue never
        // recurses through the links.
        self.last = None;
        let mut cur = self.first.take();
        while let Some(node) = cur {
            cur = node.link().lock().take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Process, ProcessId, ProcessKind};
    use crate::thread::{Priority, ThreadBuilder, ThreadId};
    use crate::time::Instant;
    use alloc::vec;
    use alloc::vec::Vec;

    fn threads(n: u64) -> Vec<Arc<Thread>> {
        let process = Process::new(ProcessId::new(1), ProcessKind::UserApplication, Priority::Normal, "q");
        (1..=n)
            .map(|id| ThreadBuilder::new().build(ThreadId::new(id).unwrap(), &process, Instant::default()))
            .collect()
    }

    #[test]
    fn test_fifo_order() {
        let t = threads(3);
        let mut queue = TierQueue::new();
        for thread in &t {
            queue.push_back(thread.clone()).unwrap();
        }
        assert_eq!(queue.len(), 3);
        let drained: Vec<u64> = core::iter::from_fn(|| queue.pop_front().unwrap())
            .map(|t| t.id().as_u64())
            .collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let t = threads(5);
        let mut queue = TierQueue::new();
        for thread in &t {
            queue.push_back(thread.clone()).unwrap();
        }
        assert!(queue.remove(&t[2]).unwrap());
        assert!(queue.remove(&t[0]).unwrap());
        assert!(queue.remove(&t[4]).unwrap());
        assert!(!queue.remove(&t[4]).unwrap());
        assert_eq!(queue.ids(), vec![2, 4]);

        queue.push_back(t[0].clone()).unwrap();
        assert_eq!(queue.ids(), vec![2, 4, 1]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_tail_without_head_is_reported() {
        let t = threads(2);
        let mut queue = TierQueue::new();
        queue.push_back(t[0].clone()).unwrap();
        queue.first = None;
        assert_eq!(queue.push_back(t[1].clone()), Err("tail without head"));
        assert_eq!(queue.pop_front().err(), Some("tail without head"));
    }

    #[test]
    fn test_drop_releases_every_thread() {
        let t = threads(100);
        let mut queue = TierQueue::new();
        for thread in &t {
            queue.push_back(thread.clone()).unwrap();
        }
        drop(queue);
        assert!(t.iter().all(|thread| Arc::strong_count(thread) == 1));
    }
}
