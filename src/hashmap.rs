//! Insertion-ordered hash map (spec.md §3 "Insertion-ordered hash map",
//! §4.4 C2).
//!
//! Fixed bucket count, arena-indexed entry slots, two intrusive chains per
//! live entry: a bucket chain (collision resolution) and a chronological
//! chain (oldest to newest, walked by [`OrderedHashMap::traverse`] and by
//! the registry's destruction order). `capacity` sizes the bucket array
//! once at construction and is never rehashed — it bounds collision-chain
//! length for a well-distributed key set, not the number of live entries,
//! which the entry arena grows to fit (spec.md §4.4, and §8 scenario S3:
//! six keys insert cleanly into a capacity-4 map, one pair colliding).

use crate::pointer::Pointer;

const HASH_SEED: u64 = 5381;

fn djb2(key: &str) -> u64 {
    let mut hash = HASH_SEED;
    for b in key.bytes() {
        hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(b as u64);
    }
    hash
}

struct Entry {
    key: Box<str>,
    value: Pointer,
    next_in_bucket: Option<usize>,
    prev_chrono: Option<usize>,
    next_chrono: Option<usize>,
}

/// What to do when the key is already present / already absent, plus an
/// optional veto predicate consulted before the mutation actually happens
/// (spec.md §4.4 C2: `set(key, value, {insert_allowed, update_allowed,
/// set_fn?, set_fn_data})`). `set_fn` is handed `(key, old_value)` — a null
/// `Pointer` for `old_value` on the insert path, the entry's current value
/// on the update path — and returning `false` vetoes the operation with
/// `Status::Vetoed`. A closure folds the C contract's separate `set_fn` +
/// `set_fn_data` pair into one capturing `FnMut`, the idiomatic Rust way to
/// carry a predicate's own state.
pub struct SetOptions<'a> {
    pub insert_if_absent: bool,
    pub update_if_present: bool,
    pub set_fn: Option<&'a mut dyn FnMut(&str, &Pointer) -> bool>,
}

impl<'a> SetOptions<'a> {
    pub fn upsert() -> Self {
        SetOptions {
            insert_if_absent: true,
            update_if_present: true,
            set_fn: None,
        }
    }
    pub fn insert_only() -> Self {
        SetOptions {
            insert_if_absent: true,
            update_if_present: false,
            set_fn: None,
        }
    }
    pub fn update_only() -> Self {
        SetOptions {
            insert_if_absent: false,
            update_if_present: true,
            set_fn: None,
        }
    }

    /// Attaches a veto predicate to an existing set of allow/deny flags.
    pub fn vetoed_by(mut self, set_fn: &'a mut dyn FnMut(&str, &Pointer) -> bool) -> Self {
        self.set_fn = Some(set_fn);
        self
    }
}

/// Options for [`OrderedHashMap::unset`]: mirrors [`SetOptions`]'s veto
/// mechanism (spec.md §4.4 `unset(key, {unset_fn?, unset_fn_data})`).
#[derive(Default)]
pub struct UnsetOptions<'a> {
    pub unset_fn: Option<&'a mut dyn FnMut(&str, &Pointer) -> bool>,
}

impl<'a> UnsetOptions<'a> {
    pub fn none() -> Self {
        UnsetOptions::default()
    }

    pub fn vetoed_by(unset_fn: &'a mut dyn FnMut(&str, &Pointer) -> bool) -> Self {
        UnsetOptions {
            unset_fn: Some(unset_fn),
        }
    }
}

/// Outcome of a [`OrderedHashMap::set`] or [`OrderedHashMap::unset`] call,
/// using the same 0/1/2/err status vocabulary as the rest of the protocol
/// (spec.md §7): `Ok` on success, `SoftMiss` when the key was absent and
/// insertion was disallowed (or, for `unset`, when the key was simply
/// absent), `Exists` when the key was present and update was disallowed.
pub use crate::error::Status;

/// Per-entry action a [`OrderedHashMap::traverse`] callback can take
/// (spec.md §4.4 `traverse(first_to_last, fn, data)`: `fn` returns an
/// action `{ KEEP | SET(new_value) | UNSET, interrupt }`).
pub enum Verdict {
    /// Leave the entry as is.
    Keep,
    /// Replace the entry's value, releasing the displaced one.
    Set(Pointer),
    /// Unlink and destroy the entry.
    Unset,
}

/// A [`Verdict`] plus whether `traverse` should stop after applying it.
pub struct TraverseAction {
    pub verdict: Verdict,
    pub interrupt: bool,
}

impl TraverseAction {
    pub fn keep() -> Self {
        TraverseAction {
            verdict: Verdict::Keep,
            interrupt: false,
        }
    }

    pub fn stop() -> Self {
        TraverseAction {
            verdict: Verdict::Keep,
            interrupt: true,
        }
    }

    pub fn set(value: Pointer) -> Self {
        TraverseAction {
            verdict: Verdict::Set(value),
            interrupt: false,
        }
    }

    pub fn unset() -> Self {
        TraverseAction {
            verdict: Verdict::Unset,
            interrupt: false,
        }
    }
}

pub struct OrderedHashMap {
    buckets: Box<[Option<usize>]>,
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    chrono_head: Option<usize>,
    chrono_tail: Option<usize>,
    len: usize,
    capacity: usize,
}

impl OrderedHashMap {
    pub fn with_capacity(capacity: usize) -> Self {
        let bucket_count = capacity.next_power_of_two().max(1);
        OrderedHashMap {
            buckets: vec![None; bucket_count].into_boxed_slice(),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            chrono_head: None,
            chrono_tail: None,
            len: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// The bucket-sizing capacity given to [`OrderedHashMap::with_capacity`].
    /// Bounds collision-chain length for a well-distributed key set; it does
    /// not cap the number of live entries (spec.md §4.4).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_of(&self, key: &str) -> usize {
        (djb2(key) as usize) & (self.buckets.len() - 1)
    }

    fn find_index(&self, key: &str) -> Option<usize> {
        let mut cursor = self.buckets[self.bucket_of(key)];
        while let Some(idx) = cursor {
            let entry = self.slots[idx].as_ref().expect("bucket chain points at live slot");
            if entry.key.as_ref() == key {
                return Some(idx);
            }
            cursor = entry.next_in_bucket;
        }
        None
    }

    pub fn get(&self, key: &str) -> (Status, Pointer) {
        match self.find_index(key) {
            Some(idx) => (
                Status::Ok,
                self.slots[idx].as_ref().unwrap().value.clone(),
            ),
            None => (Status::SoftMiss, Pointer::null()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.find_index(key).is_some()
    }

    /// Inserts or updates `key` according to `opts`. Takes ownership of
    /// `value` outright — the map becomes its sole owner, the same way
    /// `Vec::push` or `HashMap::insert` take ownership of what you hand
    /// them. Callers that need to keep their own reference too (e.g. the
    /// registry holding onto a context it just inserted) must
    /// `value.cloned_owned()` *before* calling `set`, exactly as they would
    /// before any other move.
    pub fn set(&mut self, key: &str, value: Pointer, mut opts: SetOptions<'_>) -> Status {
        if let Some(idx) = self.find_index(key) {
            if !opts.update_if_present {
                return Status::Exists;
            }
            if let Some(set_fn) = opts.set_fn.as_mut() {
                let old_value = &self.slots[idx].as_ref().unwrap().value;
                if !set_fn(key, old_value) {
                    return Status::Vetoed;
                }
            }
            let entry = self.slots[idx].as_mut().unwrap();
            let old = std::mem::replace(&mut entry.value, value);
            old.ref_count.decrement();
            return Status::Ok;
        }

        if !opts.insert_if_absent {
            return Status::SoftMiss;
        }
        if let Some(set_fn) = opts.set_fn.as_mut() {
            if !set_fn(key, &Pointer::null()) {
                return Status::Vetoed;
            }
        }

        let bucket = self.bucket_of(key);
        let entry = Entry {
            key: key.into(),
            value,
            next_in_bucket: self.buckets[bucket],
            prev_chrono: self.chrono_tail,
            next_chrono: None,
        };

        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(entry);
                idx
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };

        self.buckets[bucket] = Some(idx);
        if let Some(tail) = self.chrono_tail {
            self.slots[tail].as_mut().unwrap().next_chrono = Some(idx);
        } else {
            self.chrono_head = Some(idx);
        }
        self.chrono_tail = Some(idx);
        self.len += 1;
        Status::Ok
    }

    /// Removes `key`, releasing its value's reference. `SoftMiss` if absent,
    /// `Vetoed` if `opts.unset_fn` refuses.
    pub fn unset(&mut self, key: &str, mut opts: UnsetOptions<'_>) -> Status {
        let Some(idx) = self.find_index(key) else {
            return Status::SoftMiss;
        };
        if let Some(unset_fn) = opts.unset_fn.as_mut() {
            let value = &self.slots[idx].as_ref().unwrap().value;
            if !unset_fn(key, value) {
                return Status::Vetoed;
            }
        }
        self.unlink(idx);
        let entry = self.slots[idx].take().unwrap();
        entry.value.ref_count.decrement();
        self.free.push(idx);
        self.len -= 1;
        Status::Ok
    }

    fn unlink(&mut self, idx: usize) {
        let bucket = self.bucket_of(&self.slots[idx].as_ref().unwrap().key);
        let mut cursor = self.buckets[bucket];
        let mut prev: Option<usize> = None;
        while let Some(cur) = cursor {
            let next = self.slots[cur].as_ref().unwrap().next_in_bucket;
            if cur == idx {
                match prev {
                    Some(p) => self.slots[p].as_mut().unwrap().next_in_bucket = next,
                    None => self.buckets[bucket] = next,
                }
                break;
            }
            prev = Some(cur);
            cursor = next;
        }

        let (prev_chrono, next_chrono) = {
            let entry = self.slots[idx].as_ref().unwrap();
            (entry.prev_chrono, entry.next_chrono)
        };
        match prev_chrono {
            Some(p) => self.slots[p].as_mut().unwrap().next_chrono = next_chrono,
            None => self.chrono_head = next_chrono,
        }
        match next_chrono {
            Some(n) => self.slots[n].as_mut().unwrap().prev_chrono = prev_chrono,
            None => self.chrono_tail = prev_chrono,
        }
    }

    /// Visits every live entry oldest-to-newest, applying each callback's
    /// [`Verdict`] (spec.md §4.4): `Set` replaces the value (releasing the
    /// displaced one), `Unset` unlinks and destroys the node. The next node
    /// is captured *before* the action runs, so `Unset` on the current node
    /// mid-walk is safe. Returns `true` if a callback set `interrupt`.
    pub fn traverse<F: FnMut(&str, &Pointer) -> TraverseAction>(&mut self, mut f: F) -> bool {
        let mut cursor = self.chrono_head;
        while let Some(idx) = cursor {
            let entry = self.slots[idx].as_ref().unwrap();
            let key = entry.key.to_string();
            let value_view = entry.value.clone();
            let action = f(&key, &value_view);
            let next = self.slots[idx].as_ref().unwrap().next_chrono;

            match action.verdict {
                Verdict::Keep => {}
                Verdict::Set(new_value) => {
                    let entry = self.slots[idx].as_mut().unwrap();
                    let old = std::mem::replace(&mut entry.value, new_value);
                    old.ref_count.decrement();
                }
                Verdict::Unset => {
                    self.unlink(idx);
                    let entry = self.slots[idx].take().unwrap();
                    entry.value.ref_count.decrement();
                    self.free.push(idx);
                    self.len -= 1;
                }
            }

            cursor = next;
            if action.interrupt {
                return true;
            }
        }
        false
    }

    /// Removes every entry, releasing each value's reference, newest-first
    /// is not guaranteed — callers needing strict reverse-insertion teardown
    /// order (the registry's FINAL-all path) should collect keys via
    /// `traverse` first and `unset` them explicitly in that order.
    pub fn clear(&mut self) {
        let mut cursor = self.chrono_head;
        while let Some(idx) = cursor {
            let entry = self.slots[idx].take().unwrap();
            cursor = entry.next_chrono;
            entry.value.ref_count.decrement();
        }
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.free.clear();
        self.chrono_head = None;
        self.chrono_tail = None;
        self.len = 0;
    }
}

impl Drop for OrderedHashMap {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::PointerFlags;

    fn leaf(n: i32) -> Pointer {
        Pointer::boxed(n, PointerFlags::empty())
    }

    #[test]
    fn djb2_matches_known_constants() {
        // hash("") == 5381 (the seed, no bytes folded in).
        assert_eq!(djb2(""), 5381);
    }

    #[test]
    fn insertion_order_is_preserved_through_updates_and_removals() {
        let mut map = OrderedHashMap::with_capacity(8);
        assert_eq!(map.set("a", leaf(1), SetOptions::upsert()), Status::Ok);
        assert_eq!(map.set("b", leaf(2), SetOptions::upsert()), Status::Ok);
        assert_eq!(map.set("c", leaf(3), SetOptions::upsert()), Status::Ok);
        assert_eq!(map.set("b", leaf(20), SetOptions::upsert()), Status::Ok);

        let mut order = Vec::new();
        map.traverse(|k, _| {
            order.push(k.to_string());
            TraverseAction::keep()
        });
        assert_eq!(order, ["a", "b", "c"]);

        assert_eq!(map.unset("a", UnsetOptions::none()), Status::Ok);
        let mut order = Vec::new();
        map.traverse(|k, _| {
            order.push(k.to_string());
            TraverseAction::keep()
        });
        assert_eq!(order, ["b", "c"]);
    }

    #[test]
    fn insert_only_and_update_only_are_honored() {
        let mut map = OrderedHashMap::with_capacity(4);
        assert_eq!(map.set("x", leaf(1), SetOptions::update_only()), Status::SoftMiss);
        assert_eq!(map.set("x", leaf(1), SetOptions::insert_only()), Status::Ok);
        assert_eq!(map.set("x", leaf(2), SetOptions::insert_only()), Status::Exists);
    }

    #[test]
    fn bucket_capacity_bounds_collisions_not_entry_count() {
        // A capacity-1 map has exactly one bucket, so every key collides
        // into the same chain; insertion order must still be exact.
        let mut map = OrderedHashMap::with_capacity(1);
        assert_eq!(map.set("a", leaf(1), SetOptions::upsert()), Status::Ok);
        assert_eq!(map.set("b", leaf(2), SetOptions::upsert()), Status::Ok);
        assert_eq!(map.set("c", leaf(3), SetOptions::upsert()), Status::Ok);
        assert_eq!(map.len(), 3);

        let mut order = Vec::new();
        map.traverse(|k, _| {
            order.push(k.to_string());
            TraverseAction::keep()
        });
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn unset_releases_the_value_reference() {
        let mut map = OrderedHashMap::with_capacity(4);
        let p = leaf(7);
        let rc = p.ref_count.clone();
        map.set("k", p, SetOptions::upsert());
        assert_eq!(rc.count(), 1);
        map.unset("k", UnsetOptions::none());
        assert_eq!(rc.count(), 0);
    }

    #[test]
    fn update_releases_the_displaced_value() {
        let mut map = OrderedHashMap::with_capacity(4);
        let old = leaf(1);
        let old_rc = old.ref_count.clone();
        map.set("k", old, SetOptions::upsert());
        map.set("k", leaf(2), SetOptions::upsert());
        assert_eq!(old_rc.count(), 0);
    }

    #[test]
    fn set_fn_veto_blocks_the_update_and_reports_vetoed() {
        let mut map = OrderedHashMap::with_capacity(4);
        map.set("k", leaf(1), SetOptions::upsert());

        let mut refuse = |_key: &str, _old: &Pointer| false;
        let status = map.set("k", leaf(2), SetOptions::upsert().vetoed_by(&mut refuse));
        assert_eq!(status, Status::Vetoed);

        let (_, v) = map.get("k");
        assert_eq!(unsafe { *v.as_ref::<i32>() }, 1);
    }

    #[test]
    fn set_fn_veto_can_also_block_an_insert() {
        let mut map = OrderedHashMap::with_capacity(4);
        let mut refuse = |_key: &str, _old: &Pointer| false;
        let status = map.set("new", leaf(1), SetOptions::upsert().vetoed_by(&mut refuse));
        assert_eq!(status, Status::Vetoed);
        assert!(!map.contains("new"));
    }

    #[test]
    fn unset_fn_veto_blocks_removal() {
        let mut map = OrderedHashMap::with_capacity(4);
        map.set("k", leaf(1), SetOptions::upsert());

        let mut refuse = |_key: &str, _value: &Pointer| false;
        let status = map.unset("k", UnsetOptions::vetoed_by(&mut refuse));
        assert_eq!(status, Status::Vetoed);
        assert!(map.contains("k"));
    }

    #[test]
    fn traverse_set_replaces_values_in_place() {
        let mut map = OrderedHashMap::with_capacity(4);
        map.set("a", leaf(1), SetOptions::upsert());
        map.set("b", leaf(2), SetOptions::upsert());

        let interrupted = map.traverse(|k, _| {
            if k == "a" {
                TraverseAction::set(leaf(100))
            } else {
                TraverseAction::keep()
            }
        });
        assert!(!interrupted);

        let (_, v) = map.get("a");
        assert_eq!(unsafe { *v.as_ref::<i32>() }, 100);
    }

    #[test]
    fn traverse_unset_mid_walk_is_safe_and_visits_every_remaining_entry() {
        let mut map = OrderedHashMap::with_capacity(4);
        for key in ["a", "b", "c"] {
            map.set(key, leaf(key.as_bytes()[0] as i32), SetOptions::upsert());
        }

        let mut visited = Vec::new();
        let interrupted = map.traverse(|k, _| {
            visited.push(k.to_string());
            if k == "b" {
                TraverseAction::unset()
            } else {
                TraverseAction::keep()
            }
        });
        assert!(!interrupted);
        assert_eq!(visited, ["a", "b", "c"]);
        assert_eq!(map.len(), 2);
        assert!(!map.contains("b"));
    }

    #[test]
    fn traverse_interrupt_stops_early_and_reports_true() {
        let mut map = OrderedHashMap::with_capacity(4);
        for key in ["a", "b", "c"] {
            map.set(key, leaf(1), SetOptions::upsert());
        }

        let mut visited = Vec::new();
        let interrupted = map.traverse(|k, _| {
            visited.push(k.to_string());
            if k == "b" {
                TraverseAction::stop()
            } else {
                TraverseAction::keep()
            }
        });
        assert!(interrupted);
        assert_eq!(visited, ["a", "b"]);
    }
}
