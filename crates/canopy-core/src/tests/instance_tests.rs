use super::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

fn setup() -> (Runtime, NodeId) {
    let rt = Runtime::with_config(
        MemoryHost::new(),
        RuntimeConfig::default().with_dev_diagnostics(true),
    );
    let root = rt.create_root("main");
    (rt, root)
}

fn texts(rt: &Runtime, root: NodeId) -> Vec<String> {
    rt.with_host(|host: &mut MemoryHost| host.texts(root)).unwrap()
}

fn counter() -> Rc<Cell<usize>> {
    Rc::new(Cell::new(0))
}

fn bump(cell: &Rc<Cell<usize>>) {
    cell.set(cell.get() + 1);
}

/// Renders the `text` prop as a text node and counts renders.
fn label(renders: &Rc<Cell<usize>>) -> Component {
    let renders = Rc::clone(renders);
    Component::new("Label", move |cx| {
        bump(&renders);
        Ok(Rendered::node(cx.prop_text("text")))
    })
}

fn text_props(text: &str) -> PropMap {
    PropMap::new().with("text", text)
}

#[test]
fn mount_renders_and_runs_mount_hooks() {
    let (rt, root) = setup();
    let mounted = counter();
    let hook_count = Rc::clone(&mounted);
    let component = Component::new("Hello", move |cx| {
        let hook_count = Rc::clone(&hook_count);
        cx.on_mount(move || bump(&hook_count));
        Ok(Rendered::node("hello"))
    });

    let instance = rt.create(&component, PropMap::new(), ());
    assert_eq!(instance.state(), InstanceState::Initial);
    instance.mount(root, None).unwrap();

    assert_eq!(instance.state(), InstanceState::Mounted);
    assert!(instance.is_connected());
    assert_eq!(texts(&rt, root), vec!["hello"]);
    assert_eq!(instance.first_host_node(), rt.first_child(root));
    assert_eq!(mounted.get(), 1);
}

#[test]
fn update_adopts_scope_props_and_nodes() {
    let (rt, root) = setup();
    let renders = counter();
    let component = label(&renders);
    let first = rt.create(&component, text_props("a"), ());
    first.mount(root, None).unwrap();
    let scope = first.scope().unwrap();
    let props = first.props();
    let node = first.first_host_node();

    let second = rt.create(&component, text_props("b"), ());
    second.update(&first).unwrap();

    assert_eq!(second.scope(), Some(scope));
    assert!(second.props().ptr_eq(&props));
    assert_eq!(second.first_host_node(), node);
    assert_eq!(texts(&rt, root), vec!["b"]);
    assert_eq!(renders.get(), 2);
    assert_eq!(first.state(), InstanceState::Destroyed);
    assert_eq!(second.state(), InstanceState::Mounted);
}

#[test]
fn update_with_equal_props_does_not_rerender() {
    let (rt, root) = setup();
    let renders = counter();
    let updates = counter();
    let update_hooks = Rc::clone(&updates);
    let seen = Rc::clone(&renders);
    let component = Component::new("Static", move |cx| {
        let update_hooks = Rc::clone(&update_hooks);
        cx.on_update(move || bump(&update_hooks));
        bump(&seen);
        Ok(Rendered::node(cx.prop_text("text")))
    });
    let first = rt.create(&component, text_props("same"), ());
    first.mount(root, None).unwrap();

    let second = rt.create(&component, text_props("same"), ());
    second.update(&first).unwrap();

    assert_eq!(updates.get(), 1);
    assert_eq!(renders.get(), 1);
    assert!(!rt.has_pending());
    assert_eq!(texts(&rt, root), vec!["same"]);
}

#[test]
fn composite_props_detect_in_place_mutation() {
    let (rt, root) = setup();
    let renders = counter();
    let seen = Rc::clone(&renders);
    let component = Component::new("Data", move |cx| {
        bump(&seen);
        let n = match cx.prop("data") {
            Some(PropValue::Composite(data)) => {
                let n = data.borrow()["n"].as_f64().unwrap_or_default();
                n
            }
            _ => 0.0,
        };
        Ok(Rendered::node(n))
    });

    let data = shared(json!({ "n": 1 }));
    let first = rt.create(&component, PropMap::new().with("data", &data), ());
    first.mount(root, None).unwrap();
    assert_eq!(texts(&rt, root), vec!["1"]);

    data.borrow_mut()["n"] = json!(2);
    let second = rt.create(&component, PropMap::new().with("data", &data), ());
    second.update(&first).unwrap();
    assert_eq!(texts(&rt, root), vec!["2"]);
    assert_eq!(renders.get(), 2);

    let copy = shared(json!({ "n": 2 }));
    let third = rt.create(&component, PropMap::new().with("data", &copy), ());
    third.update(&second).unwrap();
    let stored = third.props().peek("data").unwrap();
    assert!(Rc::ptr_eq(stored.as_shared().unwrap(), &data));
    assert_eq!(renders.get(), 2);
}

#[test]
fn props_missing_from_the_next_render_are_removed() {
    let (rt, root) = setup();
    let component = label(&counter());
    let first = rt.create(&component, text_props("a").with("extra", true), ());
    first.mount(root, None).unwrap();

    let second = rt.create(&component, text_props("a"), ());
    second.update(&first).unwrap();
    assert!(second.props().peek("extra").is_none());
    assert_eq!(second.props().len(), 1);
}

#[test]
fn key_change_remounts_in_place() {
    let (rt, root) = setup();
    let destroyed = counter();
    let on_destroy = Rc::clone(&destroyed);
    let component = Component::new("Keyed", move |cx| {
        let on_destroy = Rc::clone(&on_destroy);
        cx.on_destroy(move || bump(&on_destroy));
        Ok(Rendered::node(cx.prop_text("text")))
    });
    let tail = rt.text("tail");
    rt.with_host(|host: &mut MemoryHost| host.insert_before(root, tail, None))
        .unwrap()
        .unwrap();

    let first = rt.create(&component, text_props("one"), "1");
    first.mount(root, Some(tail)).unwrap();
    let first_scope = first.scope();
    let second = rt.create(&component, text_props("two"), "2");
    second.update(&first).unwrap();

    assert_ne!(second.scope(), first_scope);
    assert_eq!(first.state(), InstanceState::Destroyed);
    assert_eq!(destroyed.get(), 1);
    assert_eq!(texts(&rt, root), vec!["two", "tail"]);
}

#[test]
fn update_requires_a_connected_predecessor() {
    let (rt, root) = setup();
    let component = label(&counter());
    let first = rt.create(&component, text_props("a"), ());
    first.mount(root, None).unwrap();
    let node = first.first_host_node().unwrap();
    rt.with_host(|host: &mut MemoryHost| host.detach(node))
        .unwrap()
        .unwrap();

    let second = rt.create(&component, text_props("b"), ());
    assert_eq!(
        second.update(&first),
        Err(RuntimeError::NotConnected { id: first.id() })
    );

    second.mount_or_update(&first).unwrap();
    assert_eq!(first.state(), InstanceState::Destroyed);
    assert!(second.is_connected());
    assert_eq!(texts(&rt, root), vec!["b"]);
}

#[test]
fn destroy_runs_hooks_once_and_detaches() {
    let (rt, root) = setup();
    let destroyed = counter();
    let on_destroy = Rc::clone(&destroyed);
    let component = Component::new("Once", move |cx| {
        let on_destroy = Rc::clone(&on_destroy);
        cx.on_destroy(move || bump(&on_destroy));
        Ok(Rendered::node(vec!["a", "b"]))
    });
    let instance = rt.create(&component, text_props("x"), ());
    instance.mount(root, None).unwrap();
    assert_eq!(rt.children_of(root).len(), 2);

    instance.destroy();
    instance.destroy();
    assert_eq!(destroyed.get(), 1);
    assert!(rt.children_of(root).is_empty());
    assert_eq!(instance.state(), InstanceState::Destroyed);
    assert!(instance.props().is_empty());
    assert!(!instance.is_connected());
}

#[test]
fn nested_teardown_runs_children_first_before_detaching() {
    let (rt, root) = setup();
    let events: Log = Rc::new(RefCell::new(Vec::new()));

    let child_events = Rc::clone(&events);
    let child = Component::new("Child", move |cx| {
        let events = Rc::clone(&child_events);
        cx.on_destroy(move || events.borrow_mut().push("child".to_owned()));
        Ok(Rendered::node("child"))
    });

    let parent_events = Rc::clone(&events);
    let parent = Component::new("Parent", move |cx| {
        let events = Rc::clone(&parent_events);
        let runtime = cx.runtime().clone();
        cx.on_destroy(move || {
            let attached = runtime.children_of(root).len();
            events.borrow_mut().push(format!("parent with {attached} attached"));
        });
        let nested = cx.create(&child, PropMap::new(), ());
        Ok(Rendered::node(vec![RenderNode::from("head"), nested.into()]))
    });

    let instance = rt.create(&parent, PropMap::new(), ());
    instance.mount(root, None).unwrap();
    assert_eq!(texts(&rt, root), vec!["head", "child"]);
    let child_scope = instance.scope().unwrap().children();
    assert_eq!(child_scope.len(), 1);

    instance.destroy();
    assert_eq!(
        *events.borrow(),
        vec!["child".to_owned(), "parent with 2 attached".to_owned()]
    );
    assert!(rt.children_of(root).is_empty());
}

#[test]
fn destroy_during_render_aborts_the_mount() {
    let (rt, root) = setup();
    let handle: Rc<RefCell<Option<Instance>>> = Rc::new(RefCell::new(None));
    let fired = counter();

    let this = Rc::clone(&handle);
    let hooks = Rc::clone(&fired);
    let component = Component::new("SelfDestruct", move |cx| {
        let on_mount = Rc::clone(&hooks);
        cx.on_mount(move || bump(&on_mount));
        let on_destroy = Rc::clone(&hooks);
        cx.on_destroy(move || bump(&on_destroy));
        let me = this.borrow().clone();
        if let Some(me) = me {
            me.destroy();
        }
        Ok(Rendered::node("never shown"))
    });

    let instance = rt.create(&component, PropMap::new(), ());
    *handle.borrow_mut() = Some(instance.clone());
    assert_eq!(instance.mount(root, None), Ok(()));
    handle.borrow_mut().take();

    assert_eq!(instance.state(), InstanceState::Destroyed);
    assert_eq!(fired.get(), 0);
    assert!(rt.children_of(root).is_empty());
}

#[test]
fn destroy_from_a_mount_hook_skips_later_hooks() {
    let (rt, root) = setup();
    let handle: Rc<RefCell<Option<Instance>>> = Rc::new(RefCell::new(None));
    let later = counter();

    let this = Rc::clone(&handle);
    let hooks = Rc::clone(&later);
    let component = Component::new("ShortLived", move |cx| {
        let this = Rc::clone(&this);
        cx.on_mount(move || {
            let me = this.borrow_mut().take();
            if let Some(me) = me {
                me.destroy();
            }
        });
        let on_mount = Rc::clone(&hooks);
        cx.on_mount(move || bump(&on_mount));
        let on_destroy = Rc::clone(&hooks);
        cx.on_destroy(move || bump(&on_destroy));
        Ok(Rendered::node("brief"))
    });

    let instance = rt.create(&component, PropMap::new(), ());
    *handle.borrow_mut() = Some(instance.clone());
    instance.mount(root, None).unwrap();
    instance.destroy();

    assert_eq!(later.get(), 0);
    assert_eq!(instance.state(), InstanceState::Destroyed);
    assert!(rt.children_of(root).is_empty());
}

#[test]
fn hooks_registered_in_the_body_run_once_across_rerenders() {
    let (rt, root) = setup();
    let updates = counter();
    let destroyed = counter();
    let count = Signal::new(0);

    let update_hooks = Rc::clone(&updates);
    let destroy_hooks = Rc::clone(&destroyed);
    let signal = count.clone();
    let component = Component::new("Ticker", move |cx| {
        let update_hooks = Rc::clone(&update_hooks);
        cx.on_update(move || bump(&update_hooks));
        let destroy_hooks = Rc::clone(&destroy_hooks);
        cx.on_destroy(move || bump(&destroy_hooks));
        Ok(Rendered::node(ReactiveCell::from(&signal)))
    });
    let first = rt.create(&component, PropMap::new(), ());
    first.mount(root, None).unwrap();

    count.set(1);
    count.set(2);
    count.set(3);
    first.rerender().unwrap();
    assert_eq!(texts(&rt, root), vec!["3"]);

    let scope = first.scope().unwrap();
    assert_eq!(scope.hook_count(HookPhase::Update), 1);
    assert_eq!(scope.hook_count(HookPhase::Destroy), 1);

    let before = updates.get();
    let second = rt.create(&component, PropMap::new(), ());
    second.update(&first).unwrap();
    assert_eq!(updates.get(), before + 1);

    second.destroy();
    assert_eq!(destroyed.get(), 1);
}

#[test]
fn render_error_on_first_mount_rolls_back() {
    let (rt, root) = setup();
    let fail = Rc::new(Cell::new(true));
    let destroyed = counter();

    let should_fail = Rc::clone(&fail);
    let on_destroy = Rc::clone(&destroyed);
    let component = Component::new("Flaky", move |cx| {
        let on_destroy = Rc::clone(&on_destroy);
        cx.on_destroy(move || bump(&on_destroy));
        if should_fail.get() {
            return Err(RenderError::msg("boom"));
        }
        Ok(Rendered::node("ok"))
    });

    let instance = rt.create(&component, PropMap::new(), ());
    assert_eq!(
        instance.mount(root, None),
        Err(RuntimeError::Render(RenderError::Message("boom".to_owned())))
    );
    assert_eq!(instance.state(), InstanceState::Initial);
    assert!(instance.scope().is_none());
    assert!(rt.children_of(root).is_empty());
    assert_eq!(destroyed.get(), 0);

    fail.set(false);
    instance.mount(root, None).unwrap();
    assert_eq!(texts(&rt, root), vec!["ok"]);
}

#[test]
fn failed_rerender_keeps_prior_output() {
    let (rt, root) = setup();
    let fail = Rc::new(Cell::new(false));
    let count = Signal::new(1);

    let should_fail = Rc::clone(&fail);
    let cell = ReactiveCell::from(&count);
    let component = Component::new("Counter", move |_cx| {
        if should_fail.get() {
            return Err(RenderError::msg("stale"));
        }
        Ok(Rendered::node(cell.clone()))
    });
    let instance = rt.create(&component, PropMap::new(), ());
    instance.mount(root, None).unwrap();
    let node = instance.first_host_node();

    count.set(2);
    assert_eq!(texts(&rt, root), vec!["2"]);
    assert_eq!(instance.first_host_node(), node);

    fail.set(true);
    assert!(instance.rerender().is_err());
    count.set(3);
    assert_eq!(texts(&rt, root), vec!["2"]);
    assert!(matches!(
        rt.diagnostics().take().as_slice(),
        [Diagnostic::RenderFailed { .. }]
    ));
}

#[test]
fn signal_writes_batch_into_one_rerender() {
    let (rt, root) = setup();
    let renders = counter();
    let count = Signal::new(0);

    let seen = Rc::clone(&renders);
    let signal = count.clone();
    let component = Component::new("Batched", move |_cx| {
        bump(&seen);
        Ok(Rendered::node(ReactiveCell::from(&signal)))
    });
    let instance = rt.create(&component, PropMap::new(), ());
    instance.mount(root, None).unwrap();

    let parent = rt.create_root("aside");
    let writer = Component::new("Writer", {
        let count = count.clone();
        move |cx| {
            let count = count.clone();
            cx.on_mount(move || {
                count.set(1);
                count.set(2);
            });
            Ok(Rendered::empty())
        }
    });
    rt.create(&writer, PropMap::new(), ())
        .mount(parent, None)
        .unwrap();

    assert_eq!(renders.get(), 2);
    assert_eq!(texts(&rt, root), vec!["2"]);
}

#[test]
fn setup_renderer_is_reused_across_rerenders() {
    let (rt, root) = setup();
    let setups = counter();
    let renders = counter();
    let count = Signal::new(10);

    let setup_count = Rc::clone(&setups);
    let render_count = Rc::clone(&renders);
    let signal = count.clone();
    let component = Component::new("Setup", move |_cx| {
        bump(&setup_count);
        let render_count = Rc::clone(&render_count);
        let signal = signal.clone();
        Ok(Rendered::renderer(move |_cx| {
            bump(&render_count);
            Ok(Rendered::node(ReactiveCell::from(&signal)))
        }))
    });
    let instance = rt.create(&component, PropMap::new(), ());
    instance.mount(root, None).unwrap();
    count.set(11);

    assert_eq!(setups.get(), 1);
    assert_eq!(renders.get(), 2);
    assert_eq!(texts(&rt, root), vec!["11"]);
}

#[test]
fn empty_output_is_anchored_by_a_marker() {
    let (rt, root) = setup();
    let component = Component::new("Nothing", |_cx| Ok(Rendered::empty()));
    let instance = rt.create(&component, PropMap::new(), ());
    instance.mount(root, None).unwrap();

    let marker = instance.first_host_node().unwrap();
    assert_eq!(rt.children_of(root), vec![marker]);
    assert!(texts(&rt, root).is_empty());
    assert!(instance.is_connected());
}

#[test]
fn handlers_and_refs_bind_to_the_first_host_node() {
    let (rt, root) = setup();
    let clicks = counter();
    let slot = NodeRef::new();
    let component = Component::new("Button", |cx| {
        let button = cx.element("button").text("press").build()?;
        Ok(Rendered::host(button))
    });

    let handled = Rc::clone(&clicks);
    let on_click = EventHandler::new(move |_event| bump(&handled));
    let props = PropMap::new()
        .with("onClick", on_click)
        .with("ref", slot.clone());
    let first = rt.create(&component, props, ());
    first.mount(root, None).unwrap();

    let button = first.first_host_node().unwrap();
    assert_eq!(slot.get(), Some(button));
    assert!(rt.dispatch_event(button, "click"));
    assert_eq!(clicks.get(), 1);

    let second = rt.create(&component, PropMap::new().with("ref", slot.clone()), ());
    second.update(&first).unwrap();
    assert!(!rt.dispatch_event(button, "click"));
    assert_eq!(clicks.get(), 1);
}

#[test]
fn inject_reads_values_provided_by_ancestors() {
    let (rt, root) = setup();
    let theme: Provider<String> = Provider::new("theme");

    let child_theme = theme.clone();
    let child = Component::new("Themed", move |cx| {
        let theme = cx.inject(&child_theme)?;
        Ok(Rendered::node(theme))
    });
    let parent_theme = theme.clone();
    let parent = Component::new("Provider", move |cx| {
        cx.provide(&parent_theme, "dark".to_owned());
        Ok(Rendered::node(cx.create(&child, PropMap::new(), ())))
    });
    rt.create(&parent, PropMap::new(), ())
        .mount(root, None)
        .unwrap();
    assert_eq!(texts(&rt, root), vec!["dark"]);

    let orphan = Component::new("Orphan", move |cx| {
        let theme = cx.inject(&theme)?;
        Ok(Rendered::node(theme))
    });
    let err = rt
        .create(&orphan, PropMap::new(), ())
        .mount(root, None)
        .unwrap_err();
    assert_eq!(
        err,
        RuntimeError::Render(RenderError::Scope(ScopeError::ProviderNotFound {
            name: "theme"
        }))
    );
}

#[test]
fn remount_moves_existing_nodes_without_rendering() {
    let (rt, root) = setup();
    let renders = counter();
    let component = label(&renders);
    let instance = rt.create(&component, text_props("moving"), ());
    instance.mount(root, None).unwrap();

    let other = rt.create_root("section");
    instance.mount(other, None).unwrap();
    assert_eq!(renders.get(), 1);
    assert!(rt.children_of(root).is_empty());
    assert_eq!(texts(&rt, other), vec!["moving"]);
    assert_eq!(instance.parent_host(), Some(other));
}
