use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use log::debug;

use crate::error::{OfpError, Result};
use crate::packet::MacAddr;

/// A host learned on a datapath port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacEntry {
    pub dpid: u64,
    pub mac: MacAddr,
    pub port: u16,
    pub ip: Option<Ipv4Addr>,
    pub learned_at: Instant,
}

/// Selects the entries returned by `MacTable::list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    All,
    Datapath(u64),
    Mac(MacAddr),
    Port(u64, u16),
    Ip(Ipv4Addr),
}

impl ListFilter {
    fn matches(&self, e: &MacEntry) -> bool {
        match *self {
            ListFilter::All => true,
            ListFilter::Datapath(dpid) => e.dpid == dpid,
            ListFilter::Mac(mac) => e.mac == mac,
            ListFilter::Port(dpid, port) => e.dpid == dpid && e.port == port,
            ListFilter::Ip(ip) => e.ip == Some(ip),
        }
    }
}

/// Snapshot of table entries, oldest first.
pub struct MacEntries {
    inner: std::vec::IntoIter<MacEntry>,
}

impl Iterator for MacEntries {
    type Item = MacEntry;

    fn next(&mut self) -> Option<MacEntry> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for MacEntries {}

type Key = (u64, MacAddr);

struct Slot {
    entry: MacEntry,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Arena of slots threaded on an age list. `head` is the least recently
/// learned entry, `tail` the most recent.
#[derive(Default)]
struct Inner {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<Key, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl Inner {
    fn slot(&self, idx: usize) -> Option<&Slot> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, idx: usize) -> Option<&mut Slot> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slot(idx) {
            Some(s) => (s.prev, s.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(s) = self.slot_mut(p) {
                    s.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(s) = self.slot_mut(n) {
                    s.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(s) = self.slot_mut(idx) {
            s.prev = None;
            s.next = None;
        }
    }

    fn push_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        if let Some(s) = self.slot_mut(idx) {
            s.prev = old_tail;
            s.next = None;
        }
        match old_tail {
            Some(t) => {
                if let Some(s) = self.slot_mut(t) {
                    s.next = Some(idx);
                }
            }
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    /// Update an existing entry in place and make it the newest.
    fn refresh(&mut self, idx: usize, port: u16, ip: Option<Ipv4Addr>, now: Instant) {
        if let Some(s) = self.slot_mut(idx) {
            s.entry.port = port;
            if ip.is_some() {
                s.entry.ip = ip;
            }
            s.entry.learned_at = now;
        }
        self.unlink(idx);
        self.push_back(idx);
    }

    fn insert(&mut self, entry: MacEntry, capacity: usize) -> Result<()> {
        if self.index.len() >= capacity {
            return Err(OfpError::TableFull(capacity));
        }
        let key = (entry.dpid, entry.mac);
        let slot = Slot {
            entry,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_back(idx);
        Ok(())
    }

    fn remove(&mut self, idx: usize) -> Option<MacEntry> {
        self.unlink(idx);
        let slot = self.slots.get_mut(idx)?.take()?;
        self.index.remove(&(slot.entry.dpid, slot.entry.mac));
        self.free.push(idx);
        Some(slot.entry)
    }

    fn evict_oldest(&mut self, n: usize) -> usize {
        let mut removed = 0;
        while removed < n {
            let head = match self.head {
                Some(head) => head,
                None => break,
            };
            match self.remove(head) {
                Some(e) => debug!("Evicted {} on datapath {:#x} (port {})", e.mac, e.dpid, e.port),
                None => break,
            }
            removed += 1;
        }
        removed
    }

    /// Walk the age list from oldest to newest.
    fn iter(&self) -> AgeOrder<'_> {
        AgeOrder {
            inner: self,
            cursor: self.head,
        }
    }

    fn remove_matching(&mut self, filter: ListFilter) -> usize {
        let doomed: Vec<usize> = self
            .index
            .values()
            .copied()
            .filter(|&idx| self.slot(idx).map_or(false, |s| filter.matches(&s.entry)))
            .collect();
        doomed.iter().filter(|&&idx| self.remove(idx).is_some()).count()
    }
}

struct AgeOrder<'a> {
    inner: &'a Inner,
    cursor: Option<usize>,
}

impl<'a> Iterator for AgeOrder<'a> {
    type Item = &'a MacEntry;

    fn next(&mut self) -> Option<&'a MacEntry> {
        let slot = self.inner.slot(self.cursor?)?;
        self.cursor = slot.next;
        Some(&slot.entry)
    }
}

/// Layer-2 learning table shared by every switch session.
///
/// Keyed by (datapath id, MAC). Bounded: when full, the least recently
/// learned entries make room. Lookups never change the eviction order.
pub struct MacTable {
    inner: RwLock<Inner>,
    capacity: usize,
    eviction_batch: usize,
}

impl MacTable {
    pub fn new(capacity: usize, eviction_batch: usize) -> MacTable {
        MacTable {
            inner: RwLock::new(Inner::default()),
            capacity: capacity.max(1),
            eviction_batch: eviction_batch.max(1),
        }
    }

    // Mutations never panic midway, so a poisoned lock still guards a
    // consistent arena.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record that `mac` was seen on `port` of datapath `dpid`. Always succeeds.
    pub fn learn(&self, dpid: u64, mac: MacAddr, port: u16, ip: Option<Ipv4Addr>) {
        let mut inner = self.write();
        // stamped under the lock so age order and timestamps agree
        let now = Instant::now();
        if let Some(&idx) = inner.index.get(&(dpid, mac)) {
            inner.refresh(idx, port, ip, now);
            return;
        }
        let entry = MacEntry {
            dpid,
            mac,
            port,
            ip,
            learned_at: now,
        };
        if let Err(OfpError::TableFull(_)) = inner.insert(entry.clone(), self.capacity) {
            let evicted = inner.evict_oldest(self.eviction_batch);
            debug!("MAC table full, evicted {} entries", evicted);
            if let Err(e) = inner.insert(entry, self.capacity) {
                // unreachable with a capacity of at least one
                debug!("Dropping {} after eviction: {}", mac, e);
            }
        }
    }

    pub fn lookup(&self, dpid: u64, mac: MacAddr) -> Option<MacEntry> {
        let inner = self.read();
        let idx = *inner.index.get(&(dpid, mac))?;
        inner.slot(idx).map(|s| s.entry.clone())
    }

    /// Remove up to `n` of the least recently learned entries.
    pub fn evict_oldest(&self, n: usize) -> usize {
        self.write().evict_oldest(n)
    }

    pub fn list(&self, filter: ListFilter) -> MacEntries {
        let snapshot: Vec<MacEntry> = self
            .read()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        MacEntries {
            inner: snapshot.into_iter(),
        }
    }

    /// Forget every host learned on `port` of datapath `dpid`.
    pub fn remove_port(&self, dpid: u64, port: u16) -> usize {
        self.write().remove_matching(ListFilter::Port(dpid, port))
    }

    /// Forget every host learned on datapath `dpid`.
    pub fn remove_datapath(&self, dpid: u64) -> usize {
        self.write().remove_matching(ListFilter::Datapath(dpid))
    }

    pub fn len(&self) -> usize {
        self.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn mac(n: u8) -> MacAddr {
        MacAddr([0, 0, 0, 0, 0, n])
    }

    fn macs_of(entries: MacEntries) -> Vec<MacAddr> {
        entries.map(|e| e.mac).collect()
    }

    #[test]
    fn learn_is_idempotent_and_refreshes_order() {
        let table = MacTable::new(8, 1);
        table.learn(1, mac(1), 1, None);
        table.learn(1, mac(2), 2, None);
        table.learn(1, mac(1), 1, None);
        assert_eq!(table.len(), 2);
        assert_eq!(macs_of(table.list(ListFilter::All)), vec![mac(2), mac(1)]);
    }

    #[test]
    fn relearn_updates_port_and_keeps_ip() {
        let table = MacTable::new(8, 1);
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        table.learn(1, mac(1), 1, Some(ip));
        table.learn(1, mac(1), 3, None);
        let entry = table.lookup(1, mac(1)).unwrap();
        assert_eq!(entry.port, 3);
        assert_eq!(entry.ip, Some(ip));
        assert_eq!(table.list(ListFilter::Ip(ip)).len(), 1);
    }

    #[test]
    fn datapaths_are_separate_keys() {
        let table = MacTable::new(8, 1);
        table.learn(1, mac(1), 1, None);
        table.learn(2, mac(1), 4, None);
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(1, mac(1)).unwrap().port, 1);
        assert_eq!(table.lookup(2, mac(1)).unwrap().port, 4);
        assert!(table.lookup(3, mac(1)).is_none());
        assert_eq!(table.list(ListFilter::Mac(mac(1))).len(), 2);
    }

    #[test]
    fn overflow_evicts_least_recently_learned() {
        let table = MacTable::new(3, 1);
        table.learn(1, mac(1), 1, None);
        table.learn(1, mac(2), 2, None);
        table.learn(1, mac(3), 3, None);
        // lookups do not protect an entry from eviction
        assert!(table.lookup(1, mac(1)).is_some());
        table.learn(1, mac(4), 4, None);
        assert_eq!(table.len(), 3);
        assert!(table.lookup(1, mac(1)).is_none());
        assert_eq!(macs_of(table.list(ListFilter::All)), vec![mac(2), mac(3), mac(4)]);
    }

    #[test]
    fn overflow_with_larger_batch() {
        let table = MacTable::new(4, 2);
        for n in 1..=5 {
            table.learn(1, mac(n), n as u16, None);
        }
        assert_eq!(macs_of(table.list(ListFilter::All)), vec![mac(3), mac(4), mac(5)]);
    }

    #[test]
    fn evict_oldest_reports_count() {
        let table = MacTable::new(8, 1);
        table.learn(1, mac(1), 1, None);
        table.learn(1, mac(2), 1, None);
        assert_eq!(table.evict_oldest(5), 2);
        assert!(table.is_empty());
        assert_eq!(table.evict_oldest(1), 0);
    }

    #[test]
    fn freed_slots_are_reused() {
        let table = MacTable::new(2, 1);
        for n in 1..=10 {
            table.learn(1, mac(n), 1, None);
        }
        assert_eq!(table.read().slots.len(), 2);
        assert_eq!(macs_of(table.list(ListFilter::All)), vec![mac(9), mac(10)]);
    }

    #[test]
    fn purge_by_port_and_datapath() {
        let table = MacTable::new(8, 1);
        table.learn(1, mac(1), 1, None);
        table.learn(1, mac(2), 2, None);
        table.learn(1, mac(3), 2, None);
        table.learn(2, mac(4), 2, None);
        assert_eq!(table.remove_port(1, 2), 2);
        assert_eq!(macs_of(table.list(ListFilter::All)), vec![mac(1), mac(4)]);
        assert_eq!(table.remove_datapath(2), 1);
        assert_eq!(macs_of(table.list(ListFilter::Datapath(1))), vec![mac(1)]);
        assert_eq!(table.list(ListFilter::Port(1, 1)).len(), 1);
    }

    #[test]
    fn concurrent_learners_respect_capacity() {
        let table = Arc::new(MacTable::new(64, 1));
        let handles: Vec<_> = (0..4u64)
            .map(|dpid| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for n in 0..=255u8 {
                        table.learn(dpid, mac(n), n as u16, None);
                        table.lookup(dpid, mac(n));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.len(), 64);
        let listed: Vec<MacEntry> = table.list(ListFilter::All).collect();
        assert_eq!(listed.len(), 64);
        assert!(listed.windows(2).all(|w| w[0].learned_at <= w[1].learned_at));
    }
}
