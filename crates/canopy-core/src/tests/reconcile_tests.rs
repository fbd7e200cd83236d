use super::*;
use pretty_assertions::assert_eq;

fn setup() -> (Runtime, NodeId) {
    let rt = Runtime::with_config(
        MemoryHost::new(),
        RuntimeConfig::default().with_dev_diagnostics(true),
    );
    let root = rt.create_root("ul");
    (rt, root)
}

fn item(rt: &Runtime, key: &str) -> Child {
    Child::Host(rt.element("li").key(key).text(key).build().unwrap())
}

fn items(rt: &Runtime, keys: &[&str]) -> Vec<Child> {
    keys.iter().map(|key| item(rt, key)).collect()
}

fn texts(rt: &Runtime, root: NodeId) -> Vec<String> {
    rt.with_host(|host: &mut MemoryHost| host.texts(root)).unwrap()
}

fn take_ops(rt: &Runtime) -> Vec<HostOp> {
    rt.with_host(|host: &mut MemoryHost| host.take_ops()).unwrap()
}

fn moves(rt: &Runtime) -> usize {
    rt.with_host(|host: &mut MemoryHost| host.move_count()).unwrap()
}

fn mount(rt: &Runtime, root: NodeId, keys: &[&str]) -> Vec<Child> {
    let children = rt.patch_children(root, &[], items(rt, keys), None).unwrap();
    take_ops(rt);
    rt.reset_stats();
    children
}

fn lis_len(sequence: &[usize]) -> usize {
    let mut best = vec![1; sequence.len()];
    for i in 0..sequence.len() {
        for j in 0..i {
            if sequence[j] < sequence[i] {
                best[i] = best[i].max(best[j] + 1);
            }
        }
    }
    best.into_iter().max().unwrap_or(0)
}

#[test]
fn mounting_into_empty_list_creates_only() {
    let (rt, root) = setup();
    rt.patch_children(root, &[], items(&rt, &["x"]), None).unwrap();

    assert_eq!(
        rt.stats(),
        ReconcileStats {
            created: 1,
            removed: 0,
            moved: 0,
            patched: 0,
        }
    );
    assert_eq!(texts(&rt, root), vec!["x"]);
}

#[test]
fn rotation_moves_a_single_entry() {
    let (rt, root) = setup();
    let old = mount(&rt, root, &["a", "b", "c"]);

    let new = rt
        .patch_children(root, &old, items(&rt, &["c", "a", "b"]), None)
        .unwrap();

    assert_eq!(texts(&rt, root), vec!["c", "a", "b"]);
    assert_eq!(rt.stats().moved, 1);
    assert_eq!(moves(&rt), 1);
    assert_eq!(new, vec![old[2].clone(), old[0].clone(), old[1].clone()]);
}

#[test]
fn unchanged_list_performs_no_host_mutations() {
    let (rt, root) = setup();
    let old = mount(&rt, root, &["a", "b", "c", "d"]);

    let same = rt.patch_children(root, &old, old.clone(), None).unwrap();
    assert_eq!(same, old);
    assert!(take_ops(&rt).is_empty());

    let copies = rt
        .patch_children(root, &old, items(&rt, &["a", "b", "c", "d"]), None)
        .unwrap();
    assert_eq!(copies, old);
    assert!(take_ops(&rt).is_empty());
}

#[test]
fn permutations_move_exactly_the_entries_outside_the_lis() {
    let keys = ["a", "b", "c", "d", "e", "f"];
    let permutations: [[usize; 6]; 5] = [
        [5, 4, 3, 2, 1, 0],
        [1, 0, 3, 2, 5, 4],
        [2, 3, 4, 5, 0, 1],
        [0, 5, 1, 4, 2, 3],
        [3, 0, 1, 2, 5, 4],
    ];
    for permutation in permutations {
        let (rt, root) = setup();
        let old = mount(&rt, root, &keys);
        let reordered: Vec<&str> = permutation.iter().map(|&i| keys[i]).collect();

        let new = rt
            .patch_children(root, &old, items(&rt, &reordered), None)
            .unwrap();

        assert_eq!(texts(&rt, root), reordered);
        assert_eq!(
            rt.stats().moved,
            keys.len() - lis_len(&permutation),
            "permutation {permutation:?}"
        );
        for (position, &source) in permutation.iter().enumerate() {
            assert_eq!(new[position], old[source]);
        }
    }
}

#[test]
fn mixed_insert_remove_and_move() {
    let (rt, root) = setup();
    let old = mount(&rt, root, &["a", "b", "c", "d"]);

    let new = rt
        .patch_children(root, &old, items(&rt, &["d", "e", "a"]), None)
        .unwrap();

    assert_eq!(texts(&rt, root), vec!["d", "e", "a"]);
    let stats = rt.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.removed, 2);
    assert_eq!(new[0], old[3]);
    assert_eq!(new[2], old[0]);

    let removed = old[1].as_host().unwrap();
    assert_eq!(rt.key_of(removed), None);
    assert!(!rt.with_host(|host: &mut MemoryHost| host.contains(removed)).unwrap());
}

#[test]
fn growing_and_shrinking_around_kept_entries() {
    let (rt, root) = setup();
    let old = mount(&rt, root, &["b", "c"]);
    let new = rt
        .patch_children(root, &old, items(&rt, &["a", "b", "c", "d"]), None)
        .unwrap();
    assert_eq!(texts(&rt, root), vec!["a", "b", "c", "d"]);
    assert_eq!(rt.stats().moved, 0);
    assert_eq!(rt.stats().created, 2);

    rt.reset_stats();
    rt.patch_children(root, &new, items(&rt, &["b", "c"]), None)
        .unwrap();
    assert_eq!(texts(&rt, root), vec!["b", "c"]);
    assert_eq!(rt.stats().removed, 2);
    assert_eq!(rt.stats().moved, 0);
}

#[test]
fn swapping_two_entries_moves_one() {
    let (rt, root) = setup();
    let old = mount(&rt, root, &["a", "b"]);
    let new = rt
        .patch_children(root, &old, items(&rt, &["b", "a"]), None)
        .unwrap();
    assert_eq!(texts(&rt, root), vec!["b", "a"]);
    assert_eq!(rt.stats().moved, 1);
    assert_eq!(new, vec![old[1].clone(), old[0].clone()]);
}

#[test]
fn clearing_removes_everything() {
    let (rt, root) = setup();
    let old = mount(&rt, root, &["a", "b", "c"]);
    let new = rt.patch_children(root, &old, Vec::new(), None).unwrap();
    assert!(new.is_empty());
    assert!(rt.children_of(root).is_empty());
    assert_eq!(rt.stats().removed, 3);
}

#[test]
fn insertions_respect_the_outer_anchor() {
    let (rt, root) = setup();
    let footer = rt.text("footer");
    rt.with_host(|host: &mut MemoryHost| host.insert_before(root, footer, None))
        .unwrap()
        .unwrap();

    let old = rt
        .patch_children(root, &[], items(&rt, &["a", "c"]), Some(footer))
        .unwrap();
    rt.patch_children(root, &old, items(&rt, &["c", "b", "a"]), Some(footer))
        .unwrap();
    assert_eq!(texts(&rt, root), vec!["c", "b", "a", "footer"]);
}

#[test]
fn text_entries_are_patched_in_place() {
    let (rt, root) = setup();
    let old = rt
        .patch_children(root, &[], vec![Child::Host(rt.text("x"))], None)
        .unwrap();
    take_ops(&rt);

    let new = rt
        .patch_children(root, &old, vec![Child::Host(rt.text("y"))], None)
        .unwrap();
    assert_eq!(new, old);
    assert_eq!(texts(&rt, root), vec!["y"]);
    let node = old[0].as_host().unwrap();
    assert_eq!(take_ops(&rt), vec![HostOp::SetText { node }]);
}

#[test]
fn different_tags_are_replaced() {
    let (rt, root) = setup();
    let old = rt
        .patch_children(root, &[], vec![Child::Host(rt.element("li").build().unwrap())], None)
        .unwrap();
    rt.reset_stats();

    let replacement = rt.element("p").text("p").build().unwrap();
    let new = rt
        .patch_children(root, &old, vec![Child::Host(replacement)], None)
        .unwrap();
    assert_eq!(new, vec![Child::Host(replacement)]);
    assert_eq!(rt.children_of(root), vec![replacement]);
    assert_eq!(rt.stats().created, 1);
    assert_eq!(rt.stats().removed, 1);
}

#[test]
fn unkeyed_siblings_do_not_trip_duplicate_detection() {
    let (rt, root) = setup();
    let children = vec![
        Child::Host(rt.element("li").build().unwrap()),
        Child::Host(rt.element("li").build().unwrap()),
    ];
    rt.patch_children(root, &[], children, None).unwrap();
    assert!(rt.diagnostics().is_empty());
}

#[test]
fn duplicate_keys_are_reported_and_resolved_first_seen() {
    let (rt, root) = setup();
    let old = mount(&rt, root, &["a", "b"]);
    rt.patch_children(root, &old, items(&rt, &["a", "a", "b"]), None)
        .unwrap();

    assert_eq!(texts(&rt, root), vec!["a", "a", "b"]);
    assert_eq!(
        rt.diagnostics().take(),
        vec![Diagnostic::DuplicateKey {
            key: Key::user("a")
        }]
    );
}

#[test]
fn single_patch_keeps_equal_nodes() {
    let (rt, root) = setup();
    let old = mount(&rt, root, &["a"]);
    let survivor = rt.patch(root, &old[0], item(&rt, "a")).unwrap();
    assert_eq!(survivor, old[0]);
    assert!(take_ops(&rt).is_empty());
}

#[test]
fn removed_elements_forget_keys_of_their_descendants() {
    let (rt, root) = setup();
    let inner = rt.element("span").key("inner").text("x").build().unwrap();
    let outer = rt.element("li").key("outer").child(inner).build().unwrap();
    let old = rt
        .patch_children(root, &[], vec![Child::Host(outer)], None)
        .unwrap();
    assert_eq!(rt.key_of(inner), Some(Key::user("inner")));

    rt.patch_children(root, &old, Vec::new(), None).unwrap();

    assert_eq!(rt.key_of(outer), None);
    assert_eq!(rt.key_of(inner), None);
}

#[test]
fn discarded_duplicates_forget_nested_keys() {
    let (rt, root) = setup();
    let build = |rt: &Runtime| {
        let inner = rt.element("span").key("inner").build().unwrap();
        let outer = rt.element("li").key("outer").child(inner).build().unwrap();
        (outer, inner)
    };
    let (kept, _) = build(&rt);
    let old = rt
        .patch_children(root, &[], vec![Child::Host(kept)], None)
        .unwrap();

    let (fresh, fresh_inner) = build(&rt);
    let new = rt
        .patch_children(root, &old, vec![Child::Host(fresh)], None)
        .unwrap();

    assert_eq!(new, vec![Child::Host(kept)]);
    assert_eq!(rt.key_of(fresh_inner), None);
}

#[test]
fn failed_build_reports_a_release_failure() {
    let (rt, root) = setup();
    let missing: NodeId = 9_999;
    let builder = rt.element("li").child(missing);
    rt.with_host(|host: &mut MemoryHost| host.insert_before(root, builder.node(), None))
        .unwrap()
        .unwrap();

    assert_eq!(builder.build(), Err(HostError::Missing { id: missing }));
    assert!(matches!(
        rt.diagnostics().take().as_slice(),
        [Diagnostic::HostFailure { .. }]
    ));
}
