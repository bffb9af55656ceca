//! Integration tests for value handles, hidden metadata and JSON

use std::collections::BTreeMap;

use hostjs::{Context, HostError, Key, Value};

#[test]
fn test_scalar_and_container_round_trip() {
    let ctx = Context::new().unwrap();

    let mut scores = BTreeMap::new();
    scores.insert("alice".to_string(), 3);
    scores.insert("bob".to_string(), 5);
    let value = Value::new(&ctx, scores.clone()).unwrap();
    assert!(value.is_map());
    assert_eq!(value.to::<BTreeMap<String, i32>>().unwrap(), scores);

    let list = Value::new(&ctx, vec![1.5, -2.0]).unwrap();
    assert!(list.is_array());
    assert_eq!(list.to::<Vec<f64>>().unwrap(), vec![1.5, -2.0]);
}

#[test]
fn test_nested_write_back() {
    let ctx = Context::new().unwrap();
    let root = Value::new_object(&ctx).unwrap();

    root.get("a").unwrap().set(Value::new_object(&ctx).unwrap()).unwrap();
    root.get("a").unwrap().get("b").unwrap().set("x").unwrap();

    assert_eq!(root.to_json().unwrap(), r#"{"a":{"b":"x"}}"#);
}

#[test]
fn test_assignment_through_index_handles() {
    let ctx = Context::new().unwrap();
    let array = Value::new_array(&ctx).unwrap();
    for index in 0..3u32 {
        array.get(index).unwrap().set(index * 10).unwrap();
    }
    assert_eq!(array.to_json().unwrap(), "[0,10,20]");
    assert_eq!(array.len(), Some(3));
}

#[test]
fn test_missing_property_gives_empty_handle() {
    let ctx = Context::new().unwrap();
    let root = Value::new_object(&ctx).unwrap();
    let missing = root.get("nothing").unwrap();
    assert!(missing.is_empty());
    assert!(matches!(missing.get("deeper"), Err(HostError::EmptyParent)));
}

#[test]
fn test_remove_deletes_from_parent() {
    let ctx = Context::new().unwrap();
    let root = Value::from_json(&ctx, r#"{"keep":1,"drop":2}"#).unwrap();
    root.get("drop").unwrap().remove().unwrap();
    assert_eq!(root.to_json().unwrap(), r#"{"keep":1}"#);
    assert!(!root.has("drop").unwrap());
}

#[test]
fn test_negative_key_is_rejected() {
    let ctx = Context::new().unwrap();
    let array = Value::new_array(&ctx).unwrap();
    assert!(matches!(array.get(-1), Err(HostError::InvalidKey(-1))));
}

#[test]
fn test_iterate_in_insertion_order() {
    let ctx = Context::new().unwrap();
    let object = Value::from_json(&ctx, r#"{"z":1,"a":2,"m":3}"#).unwrap();
    let keys: Vec<String> = object
        .iterate()
        .unwrap()
        .into_iter()
        .map(|(key, _)| key.to_string())
        .collect();
    assert_eq!(keys, ["z", "a", "m"]);
    assert_eq!(object.keys().unwrap()[1], Key::Name("a".to_string()));
}

#[test]
fn test_handle_reference_accounting() {
    let ctx = Context::new().unwrap();
    let object = Value::new_object(&ctx).unwrap();
    assert_eq!(object.ref_count(), 1);
    {
        let copy = object.clone();
        let child_view = object.get("missing").unwrap();
        assert_eq!(copy.ref_count(), 3);
        drop(child_view);
        assert_eq!(object.ref_count(), 2);
    }
    assert_eq!(object.ref_count(), 1);
}

#[test]
fn test_hidden_metadata_is_invisible_to_scripts() {
    let ctx = Context::new().unwrap();
    let object = Value::new_object(&ctx).unwrap();
    object.add("visible", true).unwrap();
    object.add_hidden("secret", "s3cr3t").unwrap();

    assert!(object.has_hidden("secret"));
    assert!(!object.has("secret").unwrap());
    assert_eq!(object.to_json().unwrap(), r#"{"visible":true}"#);
    assert_eq!(
        object.get_hidden("secret").unwrap().to::<String>().unwrap(),
        "s3cr3t"
    );
    assert!(object.get_hidden("other").unwrap().is_undefined());
}

#[test]
fn test_duplicate_hidden_key_fails() {
    let ctx = Context::new().unwrap();
    let object = Value::new_object(&ctx).unwrap();
    object.add_hidden("tag", 1).unwrap();
    let err = object.add_hidden("tag", 2).unwrap_err();
    assert!(matches!(err, HostError::DuplicateHiddenKey(ref key) if key == "tag"));
    assert_eq!(object.get_hidden("tag").unwrap().to::<i32>().unwrap(), 1);
}

#[test]
fn test_hidden_metadata_on_primitive_fails() {
    let ctx = Context::new().unwrap();
    let number = Value::new(&ctx, 7).unwrap();
    assert!(matches!(
        number.add_hidden("tag", 1),
        Err(HostError::TypeMismatch { .. })
    ));
}

#[test]
fn test_compaction_reclaims_dropped_owners() {
    let ctx = Context::new().unwrap();
    let owner = Value::new_object(&ctx).unwrap();
    owner.add_hidden("meta", "data").unwrap();
    assert_eq!(ctx.hidden_entry_count(), 1);

    assert_eq!(ctx.compact_heap_stash(), 0);
    assert_eq!(ctx.hidden_entry_count(), 1);

    drop(owner);
    assert_eq!(ctx.compact_heap_stash(), 1);
    assert_eq!(ctx.hidden_entry_count(), 0);
}

#[test]
fn test_compaction_follows_chains() {
    let ctx = Context::new().unwrap();
    let first = Value::new_object(&ctx).unwrap();
    let second = Value::new_object(&ctx).unwrap();
    first.add_hidden("next", &second).unwrap();
    second.add_hidden("label", "tail").unwrap();

    drop(first);
    drop(second);
    assert_eq!(ctx.compact_heap_stash(), 2);
    assert_eq!(ctx.hidden_entry_count(), 0);
}

#[test]
fn test_json_round_trip_and_malformed_input() {
    let ctx = Context::new().unwrap();
    let text = r#"{"id":"p1","tags":["a","b"],"score":1.5,"meta":null}"#;
    let value = Value::from_json(&ctx, text).unwrap();
    assert_eq!(value.to_json().unwrap(), text);

    let copy = value.stringify_parse().unwrap();
    assert_ne!(copy.identity(), value.identity());
    assert_eq!(copy.to_json().unwrap(), text);

    let err = Value::from_json(&ctx, "{\"open\": ").unwrap_err();
    assert!(err.is_exception());
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_undefined_has_no_json_form() {
    let ctx = Context::new().unwrap();
    assert_eq!(Value::undefined(&ctx).to_json().unwrap(), "undefined");
}

#[test]
fn test_getter_and_setter_dispatch() {
    let ctx = Context::new().unwrap();
    let object = Value::new_object(&ctx).unwrap();
    let getter = ctx
        .new_function("get", |ctx: Context| -> hostjs::HostResult<i32> {
            let stored = ctx.current_this().get("_x")?;
            Ok(stored.to::<Option<i32>>()?.unwrap_or(0) * 2)
        })
        .unwrap();
    let setter = ctx
        .new_function("set", |ctx: Context, value: i32| -> hostjs::HostResult<()> {
            ctx.current_this().add("_x", value)?;
            Ok(())
        })
        .unwrap();
    object.add_getter_setter("x", &getter, &setter).unwrap();

    assert_eq!(object.get("x").unwrap().to::<i32>().unwrap(), 0);
    object.get("x").unwrap().set(21).unwrap();
    assert_eq!(object.get("_x").unwrap().to::<i32>().unwrap(), 21);
    assert_eq!(object.get("x").unwrap().to::<i32>().unwrap(), 42);
}
