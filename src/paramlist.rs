//! Parameter lists (spec.md §3 "Parameter list node", §4.5 C3).
//!
//! Implemented as an immutable, `Rc`-shared cons list rather than the
//! original's singly-linked owned-head list: prepending a node is still
//! O(1) and allocation-free for the tail, and — unlike an owned list — an
//! `Rc` tail can be *shared* between the scratch list the executor builds
//! per instruction and whatever stored parameter list it was drawn from,
//! which is exactly the "prepend onto an optional dynamic tail... freed at
//! the end of the instruction without affecting the dynamic tail" contract
//! spec.md §3 asks for: dropping the scratch head just decrements `Rc`
//! counts down to the shared tail, never touching it.

use std::borrow::Cow;
use std::rc::Rc;

use crate::pointer::Pointer;

/// One `(name, value)` entry. Names are case-sensitive and not required to
/// be unique; lookup takes the first match (spec.md §3).
pub struct ParamNode<'a> {
    pub name: Cow<'a, str>,
    pub value: Pointer,
    pub next: ParamList<'a>,
}

/// `None` is the empty list.
pub type ParamList<'a> = Option<Rc<ParamNode<'a>>>;

/// Prepends a **view** entry: the name is borrowed (no allocation) and the
/// value's refcount is *not* bumped — valid only for the synchronous
/// duration of the call it is built for (spec.md §4.5 "View semantics").
pub fn view_push<'a>(list: ParamList<'a>, name: &'a str, value: Pointer) -> ParamList<'a> {
    Some(Rc::new(ParamNode {
        name: Cow::Borrowed(name),
        value,
        next: list,
    }))
}

/// Prepends a **view** entry whose name is owned rather than borrowed, but
/// whose value refcount is still *not* bumped — used for the dynamic tail
/// INIT/ACT resolve from a registry-stored parameter list (spec.md §3
/// "prepending static parameters onto an optional dynamic tail drawn from
/// the registry"), where the name comes from a snapshot that does not live
/// as long as the instruction's own borrowed `'a`.
pub fn view_push_owned<'a>(list: ParamList<'a>, name: String, value: Pointer) -> ParamList<'a> {
    Some(Rc::new(ParamNode {
        name: Cow::Owned(name),
        value,
        next: list,
    }))
}

/// Prepends a **store** entry: the name is duplicated and the value's
/// refcount is bumped, for parameter lists that outlive the instruction
/// that built them (spec.md §4.5 "Copy semantics").
pub fn store_push<'a>(list: ParamList<'a>, name: &str, value: Pointer) -> ParamList<'a> {
    let owned = value.cloned_owned();
    Some(Rc::new(ParamNode {
        name: Cow::Owned(name.to_owned()),
        value: owned,
        next: list,
    }))
}

/// First matching entry by name, scanning head-to-tail (most recently
/// prepended first), per the "first match wins" rule.
pub fn find<'a, 'b>(list: &'b ParamList<'a>, name: &str) -> Option<&'b Pointer> {
    let mut cursor = list;
    loop {
        let node = cursor.as_ref()?;
        if node.name.as_ref() == name {
            return Some(&node.value);
        }
        cursor = &node.next;
    }
}

/// Iterates the list head-to-tail.
pub fn iter<'a, 'b>(list: &'b ParamList<'a>) -> ParamListIter<'a, 'b> {
    ParamListIter { cursor: list }
}

pub struct ParamListIter<'a, 'b> {
    cursor: &'b ParamList<'a>,
}

impl<'a, 'b> Iterator for ParamListIter<'a, 'b> {
    type Item = (&'b str, &'b Pointer);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cursor.as_ref()?;
        let item = (node.name.as_ref(), &node.value);
        self.cursor = &node.next;
        Some(item)
    }
}

/// Decrements the refcount of every value reachable from `list` that this
/// caller owns a reference to (i.e. was built with [`store_push`]). Used
/// when a stored parameter list (as held by the `parameters` built-in
/// interface) is replaced or the owning context is finalized. View lists
/// never need this: they never took ownership in the first place.
pub fn release_owned(list: ParamList<'_>) {
    let mut cursor = list;
    while let Some(node) = cursor {
        node.value.ref_count.decrement();
        // `next` may still be shared (Rc) with other lists; only recurse
        // when we are the last owner, mirroring the C destructor's
        // "walking and releasing each" when it truly owns the chain.
        cursor = match Rc::try_unwrap(node) {
            Ok(owned) => owned.next,
            Err(_) => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::PointerFlags;

    fn leaf(addr: usize) -> Pointer {
        Pointer {
            address: crate::pointer::Address::Data(addr),
            ref_count: crate::refcount::RefCount::null(),
            flags: PointerFlags::empty(),
            layout: crate::pointer::ArrayLayout {
                num_of: 1,
                elem_size: 1,
                elem_alignment: 1,
            },
        }
    }

    #[test]
    fn first_match_wins() {
        let list: ParamList = None;
        let list = view_push(list, "a", leaf(1));
        let list = view_push(list, "a", leaf(2));
        let found = find(&list, "a").unwrap();
        assert_eq!(found.address.raw(), 2);
    }

    #[test]
    fn view_list_shares_a_dynamic_tail() {
        let tail: ParamList = view_push(None, "dynamic", leaf(0xD));
        let scratch = view_push(tail.clone(), "static", leaf(0x5));
        assert_eq!(find(&scratch, "dynamic").unwrap().address.raw(), 0xD);
        drop(scratch);
        // tail is still usable; Rc kept it alive.
        assert_eq!(find(&tail, "dynamic").unwrap().address.raw(), 0xD);
    }

    #[test]
    fn iteration_order_is_head_to_tail() {
        let list = view_push(view_push(None, "b", leaf(2)), "a", leaf(1));
        let names: Vec<_> = iter(&list).map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
