//! Keyed sibling reconciliation.
//!
//! [`patch_children`] turns the host children owned by an old entry sequence
//! into the children of a new one with as few structural mutations as it can:
//! cheap fast paths for trivial shapes, then two-end sync, key-map matching
//! and a longest-increasing-subsequence pass that decides which matched
//! entries stay put. Every fast path produces what the general algorithm
//! would for its shape.

use smallvec::SmallVec;

use crate::collections::map::{HashMap, HashSet};
use crate::diagnostics::Diagnostic;
use crate::error::RuntimeError;
use crate::host::HostKind;
use crate::instance::Instance;
use crate::key::Key;
use crate::runtime::Runtime;
use crate::NodeId;

/// One normalized entry of a sibling sequence.
#[derive(Clone, Debug)]
pub enum Child {
    Host(NodeId),
    Component(Instance),
}

impl Child {
    pub fn host_nodes(&self) -> SmallVec<[NodeId; 4]> {
        match self {
            Child::Host(node) => smallvec::smallvec![*node],
            Child::Component(instance) => instance.host_nodes(),
        }
    }

    pub fn first_host(&self) -> Option<NodeId> {
        match self {
            Child::Host(node) => Some(*node),
            Child::Component(instance) => instance.first_host_node(),
        }
    }

    pub fn last_host(&self) -> Option<NodeId> {
        match self {
            Child::Host(node) => Some(*node),
            Child::Component(instance) => instance.host_nodes().last().copied(),
        }
    }

    pub fn as_host(&self) -> Option<NodeId> {
        match self {
            Child::Host(node) => Some(*node),
            Child::Component(_) => None,
        }
    }

    pub fn as_component(&self) -> Option<&Instance> {
        match self {
            Child::Component(instance) => Some(instance),
            Child::Host(_) => None,
        }
    }
}

/// Reference identity.
impl PartialEq for Child {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Child::Host(a), Child::Host(b)) => a == b,
            (Child::Component(a), Child::Component(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<NodeId> for Child {
    fn from(node: NodeId) -> Self {
        Child::Host(node)
    }
}

impl From<Instance> for Child {
    fn from(instance: Instance) -> Self {
        Child::Component(instance)
    }
}

enum HostPatch {
    Keep,
    SetText(String),
    Replace,
}

/// Reconciles one entry against its predecessor and returns the survivor.
pub(crate) fn patch(
    rt: &Runtime,
    parent: NodeId,
    old: &Child,
    new: Child,
) -> Result<Child, RuntimeError> {
    if old == &new {
        return Ok(new);
    }
    match (old, &new) {
        (Child::Host(old_node), Child::Host(new_node)) => {
            let (old_node, new_node) = (*old_node, *new_node);
            let action = {
                let host = rt.host();
                match (host.kind(old_node)?, host.kind(new_node)?) {
                    (HostKind::Text(current), HostKind::Text(next)) if current == next => {
                        HostPatch::Keep
                    }
                    (HostKind::Text(_), HostKind::Text(next)) => HostPatch::SetText(next.to_owned()),
                    _ if host.is_equal_node(old_node, new_node) => HostPatch::Keep,
                    _ => HostPatch::Replace,
                }
            };
            match action {
                HostPatch::Replace => return replace(rt, parent, old, new),
                HostPatch::SetText(text) => rt.host_mut().set_text(old_node, &text)?,
                HostPatch::Keep => {}
            }
            rt.carry_key(new_node, old_node);
            discard(rt, new_node);
            rt.record(|stats| stats.patched += 1);
            Ok(Child::Host(old_node))
        }
        (Child::Component(previous), Child::Component(next))
            if previous.component().same_as(next.component()) =>
        {
            next.update(previous)?;
            rt.record(|stats| stats.patched += 1);
            Ok(new)
        }
        _ => replace(rt, parent, old, new),
    }
}

/// Drops a freshly rendered node that lost to the node it matched.
fn discard(rt: &Runtime, node: NodeId) {
    let attached = rt.host().parent(node).is_some();
    if attached {
        return;
    }
    forget_subtree_keys(rt, node);
    if let Err(err) = rt.host_mut().release(node) {
        rt.host_failure(&err);
    }
}

fn replace(rt: &Runtime, parent: NodeId, old: &Child, new: Child) -> Result<Child, RuntimeError> {
    insert_new(rt, parent, &new, old.first_host())?;
    remove_entry(rt, old);
    Ok(new)
}

/// Places an entry that is not yet part of this sibling list.
fn insert_new(
    rt: &Runtime,
    parent: NodeId,
    child: &Child,
    anchor: Option<NodeId>,
) -> Result<(), RuntimeError> {
    match child {
        Child::Host(node) => rt.host_mut().insert_before(parent, *node, anchor)?,
        Child::Component(instance) => instance.mount(parent, anchor)?,
    }
    rt.record(|stats| stats.created += 1);
    Ok(())
}

/// Relocates every host node of an existing entry before `anchor`.
fn move_entry(
    rt: &Runtime,
    parent: NodeId,
    child: &Child,
    anchor: Option<NodeId>,
) -> Result<(), RuntimeError> {
    {
        let mut host = rt.host_mut();
        for node in child.host_nodes() {
            host.insert_before(parent, node, anchor)?;
        }
    }
    if let Child::Component(instance) = child {
        instance.set_parent_host(parent);
    }
    rt.record(|stats| stats.moved += 1);
    Ok(())
}

fn remove_entry(rt: &Runtime, child: &Child) {
    teardown(rt, child);
    rt.record(|stats| stats.removed += 1);
}

/// Full teardown, then detachment and release.
pub(crate) fn teardown(rt: &Runtime, child: &Child) {
    match child {
        Child::Component(instance) => instance.destroy(),
        Child::Host(node) => {
            forget_subtree_keys(rt, *node);
            let outcome = {
                let mut host = rt.host_mut();
                match host.detach(*node) {
                    Ok(()) => host.release(*node),
                    Err(err) => Err(err),
                }
            };
            if let Err(err) = outcome {
                rt.host_failure(&err);
            }
        }
    }
}

/// Drops the stashed keys of `node` and its descendants before the subtree
/// is released.
fn forget_subtree_keys(rt: &Runtime, node: NodeId) {
    let mut pending = vec![node];
    while let Some(current) = pending.pop() {
        rt.forget_key(current);
        pending.extend(rt.children_of(current));
    }
}

/// Creates `children` under `parent` before `anchor`. Runs of host nodes are
/// gathered in a detached fragment and inserted with one operation;
/// components mount in place so they never run hooks inside a fragment.
fn mount_all(
    rt: &Runtime,
    parent: NodeId,
    children: &[Child],
    anchor: Option<NodeId>,
) -> Result<(), RuntimeError> {
    fn flush(
        rt: &Runtime,
        parent: NodeId,
        fragment: Option<NodeId>,
        anchor: Option<NodeId>,
    ) -> Result<(), RuntimeError> {
        if let Some(fragment) = fragment {
            let mut host = rt.host_mut();
            host.insert_before(parent, fragment, anchor)?;
            host.release(fragment)?;
        }
        Ok(())
    }

    let mut pending: Option<NodeId> = None;
    for child in children {
        match child {
            Child::Host(node) => {
                let fragment = match pending {
                    Some(fragment) => fragment,
                    None => {
                        let fragment = rt.host_mut().create_fragment();
                        pending = Some(fragment);
                        fragment
                    }
                };
                rt.host_mut().insert_before(fragment, *node, None)?;
                rt.record(|stats| stats.created += 1);
            }
            Child::Component(_) => {
                flush(rt, parent, pending.take(), anchor)?;
                insert_new(rt, parent, child, anchor)?;
            }
        }
    }
    flush(rt, parent, pending, anchor)
}

fn identities(rt: &Runtime, children: &[Child], check_duplicates: bool) -> Vec<Key> {
    let keys: Vec<Key> = children
        .iter()
        .enumerate()
        .map(|(position, child)| rt.identity_of(child, position))
        .collect();
    if check_duplicates && rt.config().dev_diagnostics {
        let mut seen: HashSet<&Key> = HashSet::default();
        for key in keys.iter().filter(|key| !key.is_fallback()) {
            if !seen.insert(key) {
                rt.report(Diagnostic::DuplicateKey { key: key.clone() });
            }
        }
    }
    keys
}

fn anchor_at(result: &[Option<Child>], index: usize, fallback: Option<NodeId>) -> Option<NodeId> {
    match result.get(index) {
        Some(Some(child)) => child.first_host().or(fallback),
        _ => fallback,
    }
}

/// Reconciles the host children owned by `old` into `new` and returns `new`
/// with every reused entry substituted in.
pub(crate) fn patch_children(
    rt: &Runtime,
    parent: NodeId,
    old: &[Child],
    new: Vec<Child>,
    anchor: Option<NodeId>,
) -> Result<Vec<Child>, RuntimeError> {
    if old.is_empty() && new.is_empty() {
        return Ok(new);
    }
    if old.is_empty() {
        identities(rt, &new, true);
        mount_all(rt, parent, &new, anchor)?;
        return Ok(new);
    }
    if new.is_empty() {
        for child in old {
            remove_entry(rt, child);
        }
        return Ok(new);
    }

    let old_keys = identities(rt, old, false);
    let new_keys = identities(rt, &new, true);
    let same = |i: usize, j: usize| rt.is_same_node(&old[i], &old_keys[i], &new[j], &new_keys[j]);

    match (old.len(), new.len()) {
        (1, 1) => {
            let survivor = if same(0, 0) {
                patch(rt, parent, &old[0], new[0].clone())?
            } else {
                replace(rt, parent, &old[0], new[0].clone())?
            };
            return Ok(vec![survivor]);
        }
        (2, 2) if same(0, 0) && same(1, 1) => {
            let first = patch(rt, parent, &old[0], new[0].clone())?;
            let second = patch(rt, parent, &old[1], new[1].clone())?;
            return Ok(vec![first, second]);
        }
        (2, 2) if same(1, 0) && same(0, 1) => {
            let first = patch(rt, parent, &old[1], new[0].clone())?;
            let second = patch(rt, parent, &old[0], new[1].clone())?;
            move_entry(rt, parent, &first, second.first_host())?;
            return Ok(vec![first, second]);
        }
        _ => {}
    }

    let mut result: Vec<Option<Child>> = vec![None; new.len()];
    let mut start = 0;
    let mut old_end = old.len();
    let mut new_end = new.len();

    while start < old_end && start < new_end && same(start, start) {
        result[start] = Some(patch(rt, parent, &old[start], new[start].clone())?);
        start += 1;
    }
    while start < old_end && start < new_end && same(old_end - 1, new_end - 1) {
        result[new_end - 1] = Some(patch(
            rt,
            parent,
            &old[old_end - 1],
            new[new_end - 1].clone(),
        )?);
        old_end -= 1;
        new_end -= 1;
    }

    if start == old_end {
        if start < new_end {
            let before = anchor_at(&result, new_end, anchor);
            mount_all(rt, parent, &new[start..new_end], before)?;
            for j in start..new_end {
                result[j] = Some(new[j].clone());
            }
        }
    } else if start == new_end {
        for child in &old[start..old_end] {
            remove_entry(rt, child);
        }
    } else {
        let mut index_of: HashMap<&Key, usize> = HashMap::default();
        for i in start..old_end {
            index_of.entry(&old_keys[i]).or_insert(i);
        }

        let window = new_end - start;
        let mut sources: Vec<Option<usize>> = vec![None; window];
        let mut claimed = vec![false; old.len()];
        for j in start..new_end {
            let Some(&i) = index_of.get(&new_keys[j]) else {
                continue;
            };
            if claimed[i] || !same(i, j) {
                continue;
            }
            claimed[i] = true;
            result[j] = Some(patch(rt, parent, &old[i], new[j].clone())?);
            sources[j - start] = Some(i);
        }

        for i in start..old_end {
            if !claimed[i] {
                remove_entry(rt, &old[i]);
            }
        }

        let stable = stable_offsets(&sources);
        for offset in (0..window).rev() {
            let j = start + offset;
            let before = anchor_at(&result, j + 1, anchor);
            match sources[offset] {
                None => {
                    insert_new(rt, parent, &new[j], before)?;
                    result[j] = Some(new[j].clone());
                }
                Some(_) if !stable[offset] => {
                    if let Some(child) = &result[j] {
                        move_entry(rt, parent, child, before)?;
                    }
                }
                Some(_) => {}
            }
        }
    }

    Ok(result.into_iter().flatten().collect())
}

/// Marks the matched window offsets that belong to the longest increasing
/// run of old indices; those never move.
fn stable_offsets(sources: &[Option<usize>]) -> Vec<bool> {
    let (offsets, old_indices): (Vec<usize>, Vec<usize>) = sources
        .iter()
        .enumerate()
        .filter_map(|(offset, source)| source.map(|index| (offset, index)))
        .unzip();
    let mut stable = vec![false; sources.len()];
    for position in longest_increasing_subsequence(&old_indices) {
        stable[offsets[position]] = true;
    }
    stable
}

/// Positions of one longest strictly increasing subsequence of `sequence`,
/// in ascending order. O(n log n).
pub fn longest_increasing_subsequence(sequence: &[usize]) -> Vec<usize> {
    let mut predecessor: Vec<Option<usize>> = vec![None; sequence.len()];
    // tails[k]: position of the smallest tail of an increasing run of length k + 1.
    let mut tails: Vec<usize> = Vec::new();
    for (position, &value) in sequence.iter().enumerate() {
        let slot = tails.partition_point(|&tail| sequence[tail] < value);
        if slot > 0 {
            predecessor[position] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(position);
        } else {
            tails[slot] = position;
        }
    }

    let mut result = vec![0; tails.len()];
    let mut cursor = tails.last().copied();
    for entry in result.iter_mut().rev() {
        let Some(position) = cursor else {
            break;
        };
        *entry = position;
        cursor = predecessor[position];
    }
    result
}

#[cfg(test)]
#[path = "tests/lis_tests.rs"]
mod lis_tests;
