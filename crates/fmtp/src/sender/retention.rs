// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Product retention table.
//!
//! Maps `prodindex` to the product bytes plus per-receiver ack state, all
//! under one mutex. Exclusive per-product access for retransmission workers
//! is an RAII [`EntryGuard`]: while a guard is live the entry is `in_use`
//! and eviction is deferred. Whoever requests removal latches `remove`, and
//! the guard's drop performs the eviction under the mutex. The `notified`
//! latch makes the terminal "product done" callback fire exactly once per
//! product, whichever of {last ack, timeout, receiver teardown} ends it.

use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::notify::{ProductDone, SenderNotifier};
use crate::protocol::BopMsg;
use crate::ConnId;

/// Immutable per-product payload shared with retransmission workers.
///
/// The product bytes are the caller's `Arc` handed to `send_product`; the
/// table keeps a clone alive until eviction.
#[derive(Debug)]
pub struct ProductData {
    pub prodindex: u32,
    pub prodsize: u32,
    pub metadata: Vec<u8>,
    pub start_sec: u64,
    pub start_nsec: u32,
    pub bytes: Arc<[u8]>,
}

impl ProductData {
    /// Reconstruct the BOP for this product (BOP_REQ replies).
    pub fn bop(&self) -> BopMsg {
        BopMsg {
            start_sec: self.start_sec,
            start_nsec: self.start_nsec,
            prodsize: self.prodsize,
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug)]
struct EntryState {
    data: Arc<ProductData>,
    /// Connections still owing a RETX_END.
    unfinished: HashSet<ConnId>,
    /// Connections that acknowledged full delivery.
    acked: HashSet<ConnId>,
    in_use: bool,
    remove: bool,
    notified: bool,
}

/// Retention table guarded by a single mutex.
///
/// Concurrent `get` calls for the same product serialize on the `in_use`
/// flag; workers on separate products only contend for the brief map
/// operations.
pub struct RetentionTable {
    inner: Mutex<HashMap<u32, EntryState>>,
    released: Condvar,
    notifier: Arc<dyn SenderNotifier>,
}

impl RetentionTable {
    pub fn new(notifier: Arc<dyn SenderNotifier>) -> RetentionTable {
        RetentionTable {
            inner: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            notifier,
        }
    }

    /// Register a product with the set of receivers that owe an ack.
    pub fn add(&self, data: Arc<ProductData>, unfinished: HashSet<ConnId>) {
        let prodindex = data.prodindex;
        let mut map = self.inner.lock();
        let previous = map.insert(
            prodindex,
            EntryState {
                data,
                unfinished,
                acked: HashSet::new(),
                in_use: false,
                remove: false,
                notified: false,
            },
        );
        debug_assert!(previous.is_none(), "duplicate retention entry");
    }

    /// Acquire exclusive access to a product's entry.
    ///
    /// Blocks while another worker holds the entry; returns `None` when the
    /// entry is absent or already marked for removal (callers answer with
    /// RETX_REJ).
    pub fn get(&self, prodindex: u32) -> Option<EntryGuard<'_>> {
        let mut map = self.inner.lock();
        loop {
            let acquired = match map.get_mut(&prodindex) {
                None => return None,
                Some(e) => {
                    if e.remove {
                        return None;
                    }
                    if e.in_use {
                        None
                    } else {
                        e.in_use = true;
                        Some(Arc::clone(&e.data))
                    }
                }
            };
            match acquired {
                Some(data) => {
                    return Some(EntryGuard {
                        table: self,
                        prodindex,
                        data,
                    });
                }
                None => self.released.wait(&mut map),
            }
        }
    }

    /// Record a RETX_END from `conn`. Returns true iff the unfinished set
    /// became empty on this call; the done notification (complete) fires
    /// here and eviction is latched.
    pub fn ack_receiver(&self, prodindex: u32, conn: ConnId) -> bool {
        let mut map = self.inner.lock();
        let Some(e) = map.get_mut(&prodindex) else {
            return false;
        };
        if !e.unfinished.remove(&conn) {
            return false;
        }
        e.acked.insert(conn);
        if !e.unfinished.is_empty() {
            return false;
        }
        e.remove = true;
        let event = take_done_event(e);
        if !e.in_use {
            map.remove(&prodindex);
        }
        drop(map);
        self.released.notify_all();
        if let Some(event) = event {
            self.notifier.product_done(event);
        }
        true
    }

    /// Purge a torn-down connection from every unfinished set, completing
    /// any products it was the last holdout for.
    pub fn drop_receiver(&self, conn: ConnId) {
        let mut events = Vec::new();
        let mut evict = Vec::new();
        let mut map = self.inner.lock();
        for (idx, e) in map.iter_mut() {
            if e.unfinished.remove(&conn) && e.unfinished.is_empty() && !e.remove {
                e.remove = true;
                if let Some(event) = take_done_event(e) {
                    events.push(event);
                }
                if !e.in_use {
                    evict.push(*idx);
                }
            }
        }
        for idx in evict {
            map.remove(&idx);
        }
        drop(map);
        if !events.is_empty() {
            self.released.notify_all();
        }
        for event in events {
            self.notifier.product_done(event);
        }
    }

    /// Timeout-path removal. Evicts now when the entry is idle, otherwise
    /// latches `remove` for the releasing worker. Returns true when an
    /// entry existed.
    pub fn attempt_remove(&self, prodindex: u32) -> bool {
        let mut map = self.inner.lock();
        let Some(e) = map.get_mut(&prodindex) else {
            return false;
        };
        e.remove = true;
        let event = take_done_event(e);
        if !e.in_use {
            map.remove(&prodindex);
        }
        drop(map);
        self.released.notify_all();
        if let Some(event) = event {
            self.notifier.product_done(event);
        }
        true
    }

    /// Snapshot of the connections still owing an ack for `prodindex`.
    pub fn unfinished_of(&self, prodindex: u32) -> Vec<ConnId> {
        self.inner
            .lock()
            .get(&prodindex)
            .map(|e| e.unfinished.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Issue a unicast send to every still-unfinished receiver of
    /// `prodindex`. The closure decides what "dead connection" means; its
    /// first error aborts the iteration.
    pub fn notify_unacked<F>(&self, prodindex: u32, mut send: F) -> Result<()>
    where
        F: FnMut(ConnId) -> Result<()>,
    {
        for conn in self.unfinished_of(prodindex) {
            send(conn)?;
        }
        Ok(())
    }

    pub fn contains(&self, prodindex: u32) -> bool {
        self.inner.lock().contains_key(&prodindex)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, prodindex: u32) {
        let mut map = self.inner.lock();
        let event = match map.get_mut(&prodindex) {
            None => None,
            Some(e) => {
                e.in_use = false;
                if e.remove {
                    let event = take_done_event(e);
                    map.remove(&prodindex);
                    event
                } else {
                    None
                }
            }
        };
        drop(map);
        self.released.notify_all();
        if let Some(event) = event {
            self.notifier.product_done(event);
        }
    }
}

/// Latch and build the terminal notification; `None` once fired.
fn take_done_event(e: &mut EntryState) -> Option<ProductDone> {
    if e.notified {
        return None;
    }
    e.notified = true;
    let mut acked: Vec<ConnId> = e.acked.iter().copied().collect();
    acked.sort_unstable();
    Some(ProductDone {
        prodindex: e.data.prodindex,
        complete: e.unfinished.is_empty(),
        acked,
    })
}

/// Exclusive-access handle on one retention entry.
///
/// Dereferences to the immutable [`ProductData`]; dropping it clears
/// `in_use` and performs any eviction latched while it was held.
pub struct EntryGuard<'a> {
    table: &'a RetentionTable,
    prodindex: u32,
    data: Arc<ProductData>,
}

impl EntryGuard<'_> {
    pub fn prodindex(&self) -> u32 {
        self.prodindex
    }
}

impl Deref for EntryGuard<'_> {
    type Target = ProductData;

    fn deref(&self) -> &ProductData {
        &self.data
    }
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.table.release(self.prodindex);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::SenderEvents;
    use std::thread;
    use std::time::Duration;

    fn product(prodindex: u32, size: u32) -> Arc<ProductData> {
        Arc::new(ProductData {
            prodindex,
            prodsize: size,
            metadata: vec![0xAB; 4],
            start_sec: 1,
            start_nsec: 2,
            bytes: vec![0u8; size as usize].into(),
        })
    }

    fn table_with_events() -> (
        Arc<RetentionTable>,
        crossbeam::channel::Receiver<ProductDone>,
    ) {
        let (notifier, rx) = SenderEvents::channel();
        (Arc::new(RetentionTable::new(notifier)), rx)
    }

    #[test]
    fn test_last_ack_completes_and_evicts() {
        let (table, rx) = table_with_events();
        table.add(product(1, 100), HashSet::from([10, 11]));

        assert!(!table.ack_receiver(1, 10));
        assert!(rx.try_recv().is_err());

        assert!(table.ack_receiver(1, 11));
        let done = rx.try_recv().unwrap();
        assert_eq!(done.prodindex, 1);
        assert!(done.complete);
        assert_eq!(done.acked, vec![10, 11]);
        assert!(!table.contains(1));
    }

    #[test]
    fn test_duplicate_ack_is_ignored() {
        let (table, rx) = table_with_events();
        table.add(product(1, 100), HashSet::from([10, 11]));
        assert!(!table.ack_receiver(1, 10));
        assert!(!table.ack_receiver(1, 10));
        assert!(rx.try_recv().is_err());
        assert!(table.contains(1));
    }

    #[test]
    fn test_timeout_eviction_reports_incomplete() {
        let (table, rx) = table_with_events();
        table.add(product(2, 100), HashSet::from([10, 11]));
        table.ack_receiver(2, 10);

        assert!(table.attempt_remove(2));
        let done = rx.try_recv().unwrap();
        assert_eq!(done.prodindex, 2);
        assert!(!done.complete);
        assert_eq!(done.acked, vec![10]);
        assert!(!table.contains(2));

        // Second removal attempt: entry gone, no second notification.
        assert!(!table.attempt_remove(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_eviction_deferred_while_guard_held() {
        let (table, rx) = table_with_events();
        table.add(product(3, 100), HashSet::from([10]));

        let guard = table.get(3).expect("entry present");
        assert!(table.attempt_remove(3));
        // Latched, not evicted: the guard is still live.
        assert!(table.contains(3));
        let done = rx.try_recv().unwrap();
        assert!(!done.complete);

        drop(guard);
        assert!(!table.contains(3));
        // Eviction on release must not re-notify.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_get_after_remove_latched_returns_none() {
        let (table, _rx) = table_with_events();
        table.add(product(4, 100), HashSet::from([10]));
        let guard = table.get(4).unwrap();
        table.attempt_remove(4);
        drop(guard);

        assert!(table.get(4).is_none());
    }

    #[test]
    fn test_get_serializes_on_in_use() {
        let (table, _rx) = table_with_events();
        table.add(product(5, 100), HashSet::new());

        let guard = table.get(5).unwrap();
        let contender = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let g = table.get(5);
                g.is_some()
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!contender.is_finished());
        drop(guard);
        assert!(contender.join().unwrap());
    }

    #[test]
    fn test_drop_receiver_completes_products() {
        let (table, rx) = table_with_events();
        table.add(product(6, 100), HashSet::from([10, 11]));
        table.add(product(7, 100), HashSet::from([11]));
        table.ack_receiver(6, 10);

        table.drop_receiver(11);

        let mut done: Vec<ProductDone> = vec![rx.try_recv().unwrap(), rx.try_recv().unwrap()];
        done.sort_by_key(|d| d.prodindex);
        // Product 6: receiver 10 acked, dead receiver 11 absent.
        assert_eq!(done[0].prodindex, 6);
        assert_eq!(done[0].acked, vec![10]);
        // Product 7: nobody acked.
        assert_eq!(done[1].prodindex, 7);
        assert!(done[1].acked.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_notify_unacked_iterates_unfinished() {
        let (table, _rx) = table_with_events();
        table.add(product(8, 100), HashSet::from([20, 21, 22]));
        table.ack_receiver(8, 21);

        let mut seen = Vec::new();
        table
            .notify_unacked(8, |conn| {
                seen.push(conn);
                Ok(())
            })
            .unwrap();
        seen.sort_unstable();
        assert_eq!(seen, vec![20, 22]);
    }

    #[test]
    fn test_guard_derefs_to_product_data() {
        let (table, _rx) = table_with_events();
        table.add(product(9, 42), HashSet::new());
        let guard = table.get(9).unwrap();
        assert_eq!(guard.prodsize, 42);
        assert_eq!(guard.prodindex(), 9);
        assert_eq!(guard.bop().prodsize, 42);
    }
}
