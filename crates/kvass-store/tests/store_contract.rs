//! Behavior every `Store` implementation must share, run against both.

use kvass_core::{now_micros, ClockError, Entry, ProcessId, MAX_COUNTER, RESERVED_PROCESS_ID};
use kvass_store::{Store, StoreError};

macro_rules! store_contract {
    ($($name:ident),* $(,)?) => {
        mod sqlite {
            $(
                #[test]
                fn $name() {
                    super::$name(&kvass_store::SqliteStore::in_memory().unwrap());
                }
            )*
        }

        mod memory {
            $(
                #[test]
                fn $name() {
                    super::$name(&kvass_store::MemoryStore::new());
                }
            )*
        }
    };
}

store_contract!(
    sequential_sets_keep_last_value,
    tombstone_is_found_with_empty_value,
    keys_are_sorted_and_skip_tombstones,
    keys_page_and_restart,
    counters_strictly_increase,
    updates_since_excludes_origin,
    remote_entries_raise_remote_counter,
    stale_remote_entry_loses,
    local_write_beats_remote_clock_skew,
    counter_without_successor_is_rejected,
    pending_updates_follow_freshness_marker,
    mark_pushed_skips_rewritten_rows,
    share_token_resolves_current_entry,
    update_state_commits_configuration,
    empty_key_is_rejected,
    applying_updates_to_another_store,
);

fn remote_entry(key: &str, value: &[u8], process_id: ProcessId, counter: u64) -> Entry {
    Entry {
        key: key.to_string(),
        value: value.to_vec(),
        url_token: format!("remote-{key}-{counter}"),
        timestamp_micros: 1,
        process_id,
        counter,
        needs_push: false,
    }
}

fn other_pid<S: Store>(store: &S) -> ProcessId {
    store.state().process_id.wrapping_add(1).max(1)
}

fn sequential_sets_keep_last_value<S: Store>(store: &S) {
    for i in 0..100 {
        store.set("test", i.to_string().into_bytes()).unwrap();
        store.set("foo", b"bar".to_vec()).unwrap();
    }

    assert_eq!(store.get("test").unwrap().unwrap().value, b"99");
    assert_eq!(store.get("foo").unwrap().unwrap().value, b"bar");
    assert!(store.get("nonexistent").unwrap().is_none());
}

fn tombstone_is_found_with_empty_value<S: Store>(store: &S) {
    store.set("k", b"v".to_vec()).unwrap();
    store.delete("k").unwrap();

    let entry = store.get("k").unwrap().expect("tombstone row is present");
    assert!(entry.is_tombstone());
    assert!(store.keys().all(|k| k.unwrap() != "k"));

    store.set("k", b"again".to_vec()).unwrap();
    assert_eq!(store.get("k").unwrap().unwrap().value, b"again");
}

fn keys_are_sorted_and_skip_tombstones<S: Store>(store: &S) {
    for key in ["pear", "apple", "fig", "banana"] {
        store.set(key, key.as_bytes().to_vec()).unwrap();
    }
    store.delete("fig").unwrap();

    let keys: Vec<String> = store.keys().collect::<Result<_, _>>().unwrap();
    assert_eq!(keys, ["apple", "banana", "pear"]);
}

fn keys_page_and_restart<S: Store>(store: &S) {
    for i in 0..7 {
        store.set(&format!("key{i}"), b"x".to_vec()).unwrap();
    }

    let mut keys = store.keys().page_size(3);
    let first: Vec<String> = keys.by_ref().take(4).map(Result::unwrap).collect();
    assert_eq!(first, ["key0", "key1", "key2", "key3"]);

    // Written behind the cursor: not seen until restart
    store.set("key00", b"x".to_vec()).unwrap();
    let rest: Vec<String> = keys.by_ref().map(Result::unwrap).collect();
    assert_eq!(rest, ["key4", "key5", "key6"]);

    keys.restart();
    assert_eq!(keys.count(), 8);
}

fn counters_strictly_increase<S: Store>(store: &S) {
    let mut last = store.state().counter;
    for i in 0..20 {
        let key = format!("k{}", i % 4);
        let stored = if i % 5 == 4 {
            store.delete(&key).unwrap()
        } else {
            store.set(&key, b"v".to_vec()).unwrap()
        };
        assert!(stored.counter > last);
        assert_eq!(store.state().counter, stored.counter);
        last = stored.counter;
    }

    let remote = other_pid(store);
    let merged = store.mutate(remote_entry("k0", b"r", remote, 3)).unwrap();
    assert!(merged.counter > last);
}

fn updates_since_excludes_origin<S: Store>(store: &S) {
    let own = store.state().process_id;
    let remote = other_pid(store);

    store.set("mine", b"a".to_vec()).unwrap();
    store.mutate(remote_entry("theirs", b"b", remote, 1)).unwrap();

    let for_remote: Vec<String> = store
        .updates_since(0, remote)
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(for_remote, ["mine"]);

    let for_self = store.updates_since(0, own).unwrap();
    assert_eq!(for_self.len(), 1);
    assert_eq!(for_self[0].process_id, remote);

    assert_eq!(store.updates_since(0, RESERVED_PROCESS_ID).unwrap().len(), 2);

    let newest = store.state().counter;
    let recent = store.updates_since(newest, RESERVED_PROCESS_ID).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].key, "theirs");
}

fn remote_entries_raise_remote_counter<S: Store>(store: &S) {
    let remote = other_pid(store);

    store.mutate(remote_entry("a", b"1", remote, 40)).unwrap();
    store.mutate(remote_entry("b", b"2", remote, 12)).unwrap();
    assert_eq!(store.state().remote_counter, 40);

    store.set("c", b"3".to_vec()).unwrap();
    assert_eq!(store.state().remote_counter, 40);

    store.raise_remote_counter(30).unwrap();
    assert_eq!(store.state().remote_counter, 40);
    store.raise_remote_counter(55).unwrap();
    assert_eq!(store.state().remote_counter, 55);
}

fn stale_remote_entry_loses<S: Store>(store: &S) {
    for _ in 0..10 {
        store.set("k", b"local".to_vec()).unwrap();
    }
    let remote = other_pid(store);

    let stored = store.mutate(remote_entry("k", b"stale", remote, 2)).unwrap();
    assert_eq!(stored.value, b"local");

    let newer = store.state().counter + 5;
    let stored = store.mutate(remote_entry("k", b"fresh", remote, newer)).unwrap();
    assert_eq!(stored.value, b"fresh");
    assert_eq!(stored.process_id, remote);
    assert!(!stored.needs_push);
}

fn local_write_beats_remote_clock_skew<S: Store>(store: &S) {
    let remote = other_pid(store);
    let mut ahead = remote_entry("k", b"remote", remote, store.state().counter + 1);
    ahead.timestamp_micros = now_micros() + 3_600_000_000;
    store.mutate(ahead).unwrap();

    store.set("k", b"local-after".to_vec()).unwrap();

    let entry = store.get("k").unwrap().unwrap();
    assert_eq!(entry.value, b"local-after");
    assert_eq!(entry.process_id, store.state().process_id);
    assert_eq!(store.pending_updates().unwrap().len(), 1);

    store.delete("k").unwrap();
    assert!(store.get("k").unwrap().unwrap().is_tombstone());
}

fn counter_without_successor_is_rejected<S: Store>(store: &S) {
    store.set("kept", b"v".to_vec()).unwrap();
    let before = store.state();
    let remote = other_pid(store);

    for counter in [u64::MAX, MAX_COUNTER] {
        assert!(matches!(
            store.mutate(remote_entry("huge", b"x", remote, counter)),
            Err(StoreError::Clock(ClockError::Exhausted(c))) if c == counter
        ));
    }
    assert!(store.get("huge").unwrap().is_none());
    assert_eq!(store.state(), before);

    let stored = store
        .mutate(remote_entry("edge", b"y", remote, MAX_COUNTER - 1))
        .unwrap();
    assert_eq!(stored.counter, MAX_COUNTER);
    assert!(store.updates_since(u64::MAX, RESERVED_PROCESS_ID).unwrap().is_empty());
    assert_eq!(
        store.updates_since(MAX_COUNTER, RESERVED_PROCESS_ID).unwrap()[0].key,
        "edge"
    );
    assert!(matches!(
        store.set("kept", b"w".to_vec()),
        Err(StoreError::Clock(_))
    ));
}

fn pending_updates_follow_freshness_marker<S: Store>(store: &S) {
    let remote = other_pid(store);

    store.set("local", b"1".to_vec()).unwrap();
    store.mutate(remote_entry("remote", b"2", remote, 1)).unwrap();

    let pending = store.pending_updates().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, "local");

    assert_eq!(store.mark_pushed(&pending).unwrap(), 1);
    assert!(store.pending_updates().unwrap().is_empty());
}

fn mark_pushed_skips_rewritten_rows<S: Store>(store: &S) {
    store.set("a", b"1".to_vec()).unwrap();
    store.set("b", b"1".to_vec()).unwrap();
    let sent = store.pending_updates().unwrap();

    store.set("a", b"2".to_vec()).unwrap();

    assert_eq!(store.mark_pushed(&sent).unwrap(), 1);
    let pending = store.pending_updates().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].value, b"2");
}

fn share_token_resolves_current_entry<S: Store>(store: &S) {
    let stored = store.set("doc.html", b"<p>hi</p>".to_vec()).unwrap();

    let found = store.entry_by_token(&stored.url_token).unwrap().unwrap();
    assert_eq!(found.key, "doc.html");
    assert_eq!(found.value, b"<p>hi</p>");

    assert!(store.entry_by_token("unknown").unwrap().is_none());
    assert!(store.entry_by_token("").unwrap().is_none());

    store.set("doc.html", b"<p>bye</p>".to_vec()).unwrap();
    let found = store.entry_by_token(&stored.url_token).unwrap().unwrap();
    assert_eq!(found.value, b"<p>bye</p>");

    let deleted = store.delete("doc.html").unwrap();
    assert_eq!(deleted.url_token, stored.url_token);
    let found = store.entry_by_token(&deleted.url_token).unwrap().unwrap();
    assert!(found.is_tombstone());
}

fn update_state_commits_configuration<S: Store>(store: &S) {
    let key = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
    let committed = store
        .update_state(|state| {
            state.process_id = 77;
            state.encryption_key = key.to_string();
        })
        .unwrap();

    assert_eq!(committed.process_id, 77);
    assert_eq!(store.state(), committed);

    let stored = store.set("k", b"v".to_vec()).unwrap();
    assert_eq!(stored.process_id, 77);
}

fn empty_key_is_rejected<S: Store>(store: &S) {
    let before = store.state();
    assert!(matches!(
        store.set("", b"v".to_vec()),
        Err(StoreError::InvalidKey(_))
    ));
    assert_eq!(store.state(), before);
}

fn applying_updates_to_another_store<S: Store>(client: &S) {
    let remote = kvass_store::MemoryStore::new();

    client.set("foo", b"bar".to_vec()).unwrap();

    let state = client.state();
    for update in client
        .updates_since(state.remote_counter, RESERVED_PROCESS_ID)
        .unwrap()
    {
        remote.mutate(update).unwrap();
    }

    assert_eq!(remote.get("foo").unwrap().unwrap().value, b"bar");
}
