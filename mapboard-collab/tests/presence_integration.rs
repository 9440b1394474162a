//! Presence validation, echo suppression and removal, end to end through
//! the awareness channel and the cursor controller.

mod common;

use common::TestCursors;
use mapboard_collab::awareness::{Awareness, AwarenessEntry, AwarenessUpdate, UpdateOrigin};
use mapboard_collab::{CursorSync, PresenceDiff, PresenceStore, SessionConfig, WindowEvents};
use mapboard_core::{PresenceEntry, PresenceField, Tool, UserColor};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn local_store(client_id: u64) -> PresenceStore<PresenceEntry> {
    PresenceStore::with_schema(
        Rc::new(Awareness::new(client_id)),
        &PresenceEntry::initial("abc", UserColor::Red),
        || PresenceEntry::initial("fallback", UserColor::Black),
    )
    .unwrap()
}

fn raw_update(client_id: u64, clock: u32, state: Option<Value>) -> AwarenessUpdate {
    AwarenessUpdate {
        entries: vec![AwarenessEntry {
            client_id,
            clock,
            state: state.map(|s| s.to_string()),
        }],
    }
}

fn valid_state(name: &str, color: &str) -> Value {
    json!({
        "username": name,
        "userColor": color,
        "tool": "MOVE",
        "mousePressed": false,
        "mouseContainerPoint": [0.0, 0.0],
    })
}

fn record_diffs(store: &PresenceStore<PresenceEntry>) -> (Rc<RefCell<Vec<PresenceDiff>>>, mapboard_collab::Subscription) {
    let diffs = Rc::new(RefCell::new(Vec::new()));
    let d = diffs.clone();
    let sub = store.subscribe(move |diff| d.borrow_mut().push(diff.clone()));
    (diffs, sub)
}

#[test]
fn test_missing_user_color_never_enters_snapshot() {
    let store = local_store(1);
    let payload = json!({
        "username": "bob",
        "tool": "MOVE",
        "mousePressed": false,
        "mouseContainerPoint": [1.0, 2.0],
    });
    store.awareness().apply_remote(&raw_update(2, 0, Some(payload)));
    assert!(!store.contains(2));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_invalid_update_keeps_previous_entry() {
    let store = local_store(1);
    store
        .awareness()
        .apply_remote(&raw_update(2, 0, Some(valid_state("bob", "Blue"))));
    let before = store.get(2).unwrap();

    for (i, bad) in [
        json!({ "username": "bob" }),
        json!("not an object"),
        json!({ "username": "bob", "userColor": "Mauve", "tool": "MOVE",
                "mousePressed": false, "mouseContainerPoint": [0.0, 0.0] }),
        json!({ "username": "x".repeat(51), "userColor": "Blue", "tool": "MOVE",
                "mousePressed": false, "mouseContainerPoint": [0.0, 0.0] }),
        json!({ "username": "bob", "userColor": "Blue", "tool": "ERASE",
                "mousePressed": false, "mouseContainerPoint": [0.0, 0.0] }),
    ]
    .into_iter()
    .enumerate()
    {
        store
            .awareness()
            .apply_remote(&raw_update(2, i as u32 + 1, Some(bad)));
        assert_eq!(store.get(2), Some(before.clone()));
    }
}

#[test]
fn test_local_write_applied_exactly_once() {
    let store = local_store(1);
    let cursors = Rc::new(TestCursors::default());
    let window = WindowEvents::new();
    let _cursor = CursorSync::attach(store.clone(), cursors.clone(), &window, &SessionConfig::default());
    let (diffs, _sub) = record_diffs(&store);

    store.set_field(PresenceField::Tool(Tool::Draw)).unwrap();

    // Our own broadcast coming back over the channel.
    let echo = store.awareness().encode_local();
    store.awareness().apply_remote(&echo);

    let diffs = diffs.borrow();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].origin, UpdateOrigin::Local);
    assert_eq!(diffs[0].updated, vec![1]);
    assert!(diffs[0].added.is_empty());
    assert_eq!(cursors.adds(1), 1);
    assert_eq!(store.local().unwrap().tool, Tool::Draw);
}

#[test]
fn test_remote_write_to_local_slot_is_ignored() {
    let store = local_store(1);
    store
        .awareness()
        .apply_remote(&raw_update(1, 99, Some(valid_state("impostor", "Blue"))));
    assert_eq!(store.local().unwrap().username, "abc");
}

#[test]
fn test_removal_cleans_up_exactly_once() {
    let store = local_store(1);
    let cursors = Rc::new(TestCursors::default());
    let window = WindowEvents::new();
    let _cursor = CursorSync::attach(store.clone(), cursors.clone(), &window, &SessionConfig::default());

    store
        .awareness()
        .apply_remote(&raw_update(7, 0, Some(valid_state("seven", "Teal"))));
    assert!(store.contains(7));
    assert_eq!(cursors.adds(7), 1);

    store.awareness().apply_remote(&raw_update(7, 1, None));
    store.awareness().apply_remote(&raw_update(7, 1, None));
    store.awareness().remove_states(&[7], UpdateOrigin::Remote);

    assert!(!store.contains(7));
    assert_eq!(cursors.removes(7), 1);
    assert!(!cursors.visible.borrow().contains_key(&7));
}

#[test]
fn test_stale_clock_is_ignored() {
    let store = local_store(1);
    store
        .awareness()
        .apply_remote(&raw_update(3, 5, Some(valid_state("new", "Red"))));
    store
        .awareness()
        .apply_remote(&raw_update(3, 4, Some(valid_state("old", "Red"))));
    assert_eq!(store.get(3).unwrap().username, "new");
}

#[test]
fn test_presence_between_two_awareness_channels() {
    let a = local_store(1);
    let b = local_store(2);

    b.awareness().apply_remote(&a.awareness().encode_local());
    a.awareness().apply_remote(&b.awareness().encode_local());
    assert_eq!(a.len(), 2);
    assert_eq!(b.get(1).unwrap().user_color, UserColor::Red);

    a.set_field(PresenceField::UserColor(UserColor::Indigo)).unwrap();
    b.awareness().apply_remote(&a.awareness().encode_local());
    assert_eq!(b.get(1).unwrap().user_color, UserColor::Indigo);

    a.clear_local();
    b.awareness().apply_remote(&a.awareness().encode_local());
    assert!(!b.contains(1));
}
