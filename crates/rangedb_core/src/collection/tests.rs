use super::*;
use crate::index::FnExtractor;
use crate::range::Range;
use crate::segment::SegmentSizing;
use std::thread;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn small_config() -> CollectionConfig {
    CollectionConfig::new()
        .sync_writes(false)
        .rollup_workers(0)
        .iterator_idle_timeout(None)
        .segment_sizing(SegmentSizing::new(vec![1, 10, 100], vec![1000, 100]).unwrap())
}

fn open(dir: &TempDir) -> Arc<Collection<String>> {
    Collection::open(dir.path().join("people"), small_config()).unwrap()
}

fn values(entities: Vec<Entity<String>>) -> Vec<String> {
    entities.into_iter().map(Entity::into_value).collect()
}

fn initial() -> impl KeyExtractor<String> {
    FnExtractor::new(KeyKind::String, |name: &String| {
        name.chars().next().map(|c| Key::String(c.to_string())).into_iter().collect()
    })
}

#[test]
fn anna_and_bob_survive_rollup() {
    let dir = tempdir().unwrap();
    let people = open(&dir);
    people.insert(Key::Long(1), "Anna".to_string()).unwrap();
    people.insert(Key::Long(2), "Bob".to_string()).unwrap();
    assert_eq!(values(people.get_range(1, 2).unwrap()), vec!["Anna", "Bob"]);

    people.rollup(&RollupTarget::collection(0, Range::new(0, 99))).unwrap();

    let chunks = people.segment_manager().segment_for(0).chunk_files().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(values(people.get_range(1, 2).unwrap()), vec!["Anna", "Bob"]);
    assert!(people.lock_manager().is_idle());
}

#[test]
fn last_write_wins() {
    let dir = tempdir().unwrap();
    let people = open(&dir);
    let key = Key::Long(10);

    people.insert(key.clone(), "a".to_string()).unwrap();
    people.update(key.clone(), "b".to_string()).unwrap();
    assert_eq!(people.get(&key).unwrap().as_deref(), Some("b"));
    assert!(people.contains(&key).unwrap());

    people.delete(&key).unwrap();
    assert_eq!(people.get(&key).unwrap(), None);
    people.delete(&key).unwrap();

    people.insert(key.clone(), "c".to_string()).unwrap();
    assert_eq!(people.get(&key).unwrap().as_deref(), Some("c"));

    people.update(Key::Long(11), "ghost".to_string()).unwrap();
    assert!(!people.contains(&Key::Long(11)).unwrap());
}

#[test]
fn duplicate_insert_fails() {
    let dir = tempdir().unwrap();
    let people = open(&dir);
    people.insert(Key::Long(1), "Anna".to_string()).unwrap();
    let err = people.insert(Key::Long(1), "Other".to_string()).unwrap_err();
    assert!(matches!(err, CoreError::DuplicateKey { .. }));
    assert_eq!(people.get(&Key::Long(1)).unwrap().as_deref(), Some("Anna"));
}

#[test]
fn keys_of_another_kind_are_rejected() {
    let dir = tempdir().unwrap();
    let people = open(&dir);
    let err = people.insert(Key::from("anna"), "Anna".to_string()).unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument { .. }));
}

#[test]
fn batch_delete_ignores_missing_keys() {
    let dir = tempdir().unwrap();
    let people = open(&dir);
    people
        .batch_upsert([3, 5, 7].map(|k| (Key::Long(k), format!("v{k}"))))
        .unwrap();
    people.batch_delete(&[2, 3, 5, 8].map(Key::Long)).unwrap();
    assert_eq!(values(people.get_range(0, 999).unwrap()), vec!["v7"]);
}

#[test]
fn batch_upsert_spans_segments() {
    let dir = tempdir().unwrap();
    let people = open(&dir);
    people
        .batch_upsert([(Key::Long(5), "a".to_string()), (Key::Long(150), "b".to_string())])
        .unwrap();
    people
        .batch_upsert([
            (Key::Long(5), "a2".to_string()),
            (Key::Long(420), "c".to_string()),
            (Key::Long(420), "c2".to_string()),
        ])
        .unwrap();
    assert_eq!(values(people.get_range(i64::MIN, i64::MAX).unwrap()), vec!["a2", "b", "c2"]);
    assert_eq!(people.segment_manager().existing_segments(0, 999).unwrap().len(), 3);
}

#[test]
fn reopen_keeps_data_and_checks_metadata() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("people");
    {
        let people = Collection::<String>::open(&path, small_config()).unwrap();
        people.insert(Key::Long(1), "Anna".to_string()).unwrap();
        assert!(matches!(
            Collection::<String>::open(&path, small_config()),
            Err(CoreError::CollectionLocked)
        ));
    }

    let err = Collection::<String>::open(&path, small_config().key_kind(KeyKind::Integer)).unwrap_err();
    assert!(matches!(err, CoreError::InvalidFormat { .. }));
    let err = Collection::<u64>::open(&path, small_config()).unwrap_err();
    assert!(matches!(err, CoreError::InvalidFormat { .. }));

    let people = Collection::<String>::open(&path, small_config()).unwrap();
    assert_eq!(people.get(&Key::Long(1)).unwrap().as_deref(), Some("Anna"));
}

#[test]
fn pending_changes_are_replayed_once() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("people");
    {
        let people = Collection::<String>::open(&path, small_config()).unwrap();
        people.insert(Key::Long(1), "Anna".to_string()).unwrap();
        let mut pending = Recoverable::new(vec![
            IndividualChange::update(Key::Long(1), "Anna".to_string(), "Anne".to_string()),
            IndividualChange::insert(Key::Long(2), "Bob".to_string()),
        ]);
        people.recovery().save_change(&mut pending).unwrap();
    }

    let people = Collection::<String>::open(&path, small_config()).unwrap();
    assert_eq!(values(people.get_range(0, 99).unwrap()), vec!["Anne", "Bob"]);
    assert!(people.recovery().pending_changes().unwrap().is_empty());
    drop(people);

    let people = Collection::<String>::open(&path, small_config()).unwrap();
    assert_eq!(values(people.get_range(0, 99).unwrap()), vec!["Anne", "Bob"]);
}

#[test]
fn leftover_temp_files_are_removed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("people");
    let segment_dir = {
        let people = Collection::<String>::open(&path, small_config()).unwrap();
        people.insert(Key::Long(1), "Anna".to_string()).unwrap();
        people.segment_manager().segment_for(1).path().to_path_buf()
    };
    let leftover = fs::temp_path_for(&segment_dir.join("0_9"));
    std::fs::write(&leftover, b"half written").unwrap();

    let people = Collection::<String>::open(&path, small_config()).unwrap();
    assert!(!leftover.exists());
    assert_eq!(people.get(&Key::Long(1)).unwrap().as_deref(), Some("Anna"));
}

#[test]
fn index_follows_writes() {
    let dir = tempdir().unwrap();
    let people = open(&dir);
    people.insert(Key::Long(1), "Anna".to_string()).unwrap();
    people.insert(Key::Long(2), "Bob".to_string()).unwrap();

    people.create_index("initial", initial()).unwrap();
    assert!(matches!(
        people.create_index("initial", initial()),
        Err(CoreError::IndexAlreadyExists { .. })
    ));
    let a = Key::from("A");
    assert_eq!(people.get_by_index("initial", &a).unwrap(), vec!["Anna"]);

    people.insert(Key::Long(3), "Alice".to_string()).unwrap();
    people.update(Key::Long(2), "Abe".to_string()).unwrap();
    assert_eq!(people.get_by_index("initial", &a).unwrap(), vec!["Anna", "Abe", "Alice"]);
    assert!(people.get_by_index("initial", &Key::from("B")).unwrap().is_empty());

    people.delete(&Key::Long(1)).unwrap();
    assert_eq!(people.get_by_index("initial", &a).unwrap(), vec!["Abe", "Alice"]);
    assert!(matches!(
        people.get_by_index("missing", &a),
        Err(CoreError::IndexNotFound { .. })
    ));
}

#[test]
fn index_is_rebuilt_after_replay() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("people");
    {
        let people = Collection::<String>::open(&path, small_config()).unwrap();
        people.create_index("initial", initial()).unwrap();
        people.insert(Key::Long(1), "Anna".to_string()).unwrap();
        let mut pending = Recoverable::new(vec![IndividualChange::insert(
            Key::Long(2),
            "Alice".to_string(),
        )]);
        people.recovery().save_change(&mut pending).unwrap();
    }

    let people = Collection::<String>::open(&path, small_config()).unwrap();
    people.create_index("initial", initial()).unwrap();
    assert_eq!(
        people.get_by_index("initial", &Key::from("A")).unwrap(),
        vec!["Anna", "Alice"]
    );
}

#[test]
fn index_rollups_are_routed_by_name() {
    let dir = tempdir().unwrap();
    let people = open(&dir);
    people.create_index("initial", initial()).unwrap();
    people.insert(Key::Long(1), "Anna".to_string()).unwrap();

    let gn = Key::from("A").grouping_number();
    let range = Range::for_value_and_size(gn, 524_288);
    people.rollup(&RollupTarget::index("initial", gn, range)).unwrap();
    assert_eq!(people.get_by_index("initial", &Key::from("A")).unwrap(), vec!["Anna"]);
    assert!(matches!(
        people.rollup(&RollupTarget::index("other", gn, range)),
        Err(CoreError::IndexNotFound { .. })
    ));
}

#[test]
fn iterator_batches_and_close() {
    let dir = tempdir().unwrap();
    let people = open(&dir);
    people
        .batch_upsert((0..25).map(|k| (Key::Long(k * 10), format!("v{k}"))))
        .unwrap();

    let mut iter = people.iter_range(0, 1000);
    assert_eq!(iter.next_batch(10).unwrap().len(), 10);
    assert!(!people.lock_manager().is_idle());
    iter.close();
    assert!(people.lock_manager().is_idle());
    assert!(iter.next_batch(10).unwrap().is_empty());

    let mut iter = people.iter_range(95, 1000);
    let rest: Vec<Entity<String>> = iter.by_ref().collect::<CoreResult<_>>().unwrap();
    assert_eq!(rest.len(), 15);
    assert!(iter.is_closed());
}

#[test]
fn idle_iterator_is_closed() {
    let dir = tempdir().unwrap();
    let config = small_config().iterator_idle_timeout(Some(Duration::from_millis(50)));
    let people = Collection::<String>::open(dir.path().join("people"), config).unwrap();
    people.insert(Key::Long(1), "Anna".to_string()).unwrap();
    people.insert(Key::Long(2), "Bob".to_string()).unwrap();

    let mut iter = people.iter_range(0, 99);
    assert!(iter.next_entity().unwrap().is_some());
    thread::sleep(Duration::from_millis(500));

    assert!(people.lock_manager().is_idle());
    for _ in 0..2 {
        assert!(matches!(iter.next_entity(), Err(CoreError::ClosedResource { .. })));
    }
}

#[test]
fn background_rollups_compact_chunks() {
    let dir = tempdir().unwrap();
    let config = small_config().rollup_workers(1).rollup_threshold(2);
    let people = Collection::<String>::open(dir.path().join("people"), config).unwrap();
    for key in 0..10 {
        people.insert(Key::Long(key), format!("v{key}")).unwrap();
    }
    people.scheduler().wait_idle();

    assert!(people.scheduler().stats().completed > 0);
    let chunks = people.segment_manager().segment_for(0).chunk_files().unwrap();
    assert!(chunks.len() < 10, "{chunks:?}");
    assert_eq!(people.get_range(0, 99).unwrap().len(), 10);
}

#[test]
fn time_frames_cover_every_overlapping_segment() {
    let dir = tempdir().unwrap();
    let config = small_config().key_kind(KeyKind::TimeFrame);
    let meetings = Collection::<String>::open(dir.path().join("meetings"), config).unwrap();
    let long = Key::time_frame(1i64, 50, 250).unwrap();
    let short = Key::time_frame(2i64, 120, 130).unwrap();
    meetings.insert(long.clone(), "long".to_string()).unwrap();
    meetings.insert(short, "short".to_string()).unwrap();

    assert_eq!(values(meetings.get_range(150, 160).unwrap()), vec!["long"]);
    assert_eq!(values(meetings.get_range(125, 125).unwrap()), vec!["long", "short"]);
    assert_eq!(values(meetings.get_range(0, 999).unwrap()), vec!["long", "short"]);
    assert_eq!(meetings.get(&long).unwrap().as_deref(), Some("long"));

    meetings.delete(&long).unwrap();
    assert_eq!(values(meetings.get_range(0, 999).unwrap()), vec!["short"]);
    assert!(meetings.get_range(200, 300).unwrap().is_empty());
}

#[test]
fn history_hold_blocks_cleanup() {
    let dir = tempdir().unwrap();
    let config = small_config().history_retention(1);
    let people = Collection::<String>::open(dir.path().join("people"), config).unwrap();
    people.recovery().place_hold_on_history_cleanup();
    for key in 0..3 {
        people.insert(Key::Long(key), "x".to_string()).unwrap();
    }
    assert_eq!(people.recovery().cleaner().cleanup_history().unwrap(), 0);
    assert_eq!(people.recovery().change_history(i64::MIN, i64::MAX).unwrap().len(), 3);

    people.recovery().remove_hold_on_history_cleanup();
    assert_eq!(people.recovery().cleaner().cleanup_history().unwrap(), 2);
}

fn sign() -> impl KeyExtractor<f64> {
    FnExtractor::new(KeyKind::Integer, |v: &f64| {
        let sign = if v.is_nan() {
            0
        } else if *v < 0.0 {
            -1
        } else {
            1
        };
        vec![Key::Integer(sign)]
    })
}

#[test]
fn unstorable_values_leave_data_and_index_in_agreement() {
    let dir = tempdir().unwrap();
    let readings = Collection::<f64>::open(dir.path().join("readings"), small_config()).unwrap();
    readings.create_index("sign", sign()).unwrap();

    readings.batch_upsert([(Key::Long(1), 1.5)]).unwrap();
    readings.batch_upsert([(Key::Long(1), f64::NAN), (Key::Long(2), -2.0)]).unwrap();

    assert_eq!(readings.get(&Key::Long(1)).unwrap(), Some(1.5));
    assert_eq!(readings.get_by_index("sign", &Key::Integer(1)).unwrap(), vec![1.5]);
    assert!(readings.get_by_index("sign", &Key::Integer(0)).unwrap().is_empty());
    assert_eq!(readings.get_by_index("sign", &Key::Integer(-1)).unwrap(), vec![-2.0]);

    let logged = readings.recovery().change_history(i64::MIN, i64::MAX).unwrap();
    assert_eq!(logged.len(), 2);
    assert!(matches!(
        readings.update(Key::Long(1), f64::NAN),
        Err(CoreError::Serialization { .. })
    ));
    assert_eq!(readings.get_by_index("sign", &Key::Integer(1)).unwrap(), vec![1.5]);
}

#[test]
fn writers_proceed_while_a_rollup_waits_on_an_iterator() {
    let dir = tempdir().unwrap();
    let config = small_config().rollup_lock_timeout(Some(Duration::from_secs(2)));
    let people = Collection::<String>::open(dir.path().join("people"), config).unwrap();
    people.insert(Key::Long(1), "Anna".to_string()).unwrap();
    people.insert(Key::Long(2), "Bob".to_string()).unwrap();

    let mut iter = people.iter_range(0, 99);
    assert_eq!(iter.next_entity().unwrap().map(Entity::into_value).as_deref(), Some("Anna"));

    let target = RollupTarget::collection(0, Range::new(0, 99));
    let rollup = {
        let people = Arc::clone(&people);
        let target = target.clone();
        thread::spawn(move || people.rollup(&target))
    };
    let writer = {
        let people = Arc::clone(&people);
        thread::spawn(move || {
            let started = std::time::Instant::now();
            people.insert(Key::Long(50), "Carl".to_string()).map(|()| started.elapsed())
        })
    };

    let waited = writer.join().unwrap().unwrap();
    assert!(waited < Duration::from_secs(1), "insert waited {waited:?}");
    assert!(matches!(rollup.join().unwrap(), Err(CoreError::LockTimeout { .. })));

    iter.close();
    people.rollup(&target).unwrap();
    assert_eq!(people.segment_manager().segment_for(0).chunk_files().unwrap().len(), 1);
    assert_eq!(values(people.get_range(0, 99).unwrap()), vec!["Anna", "Bob", "Carl"]);
}

#[test]
fn writing_under_an_open_iterator_times_out() {
    let dir = tempdir().unwrap();
    let config = small_config().write_lock_timeout(Some(Duration::from_millis(50)));
    let people = Collection::<String>::open(dir.path().join("people"), config).unwrap();
    people.insert(Key::Long(1), "Anna".to_string()).unwrap();
    people.insert(Key::Long(2), "Bob".to_string()).unwrap();

    let mut iter = people.iter_range(0, 99);
    assert!(iter.next_entity().unwrap().is_some());
    assert!(matches!(
        people.update(Key::Long(1), "Ann".to_string()),
        Err(CoreError::LockTimeout { .. })
    ));
    people.insert(Key::Long(3), "Cleo".to_string()).unwrap();

    iter.close();
    people.update(Key::Long(1), "Ann".to_string()).unwrap();
    assert_eq!(people.get(&Key::Long(1)).unwrap().as_deref(), Some("Ann"));
    assert_eq!(values(people.get_range(0, 99).unwrap()), vec!["Ann", "Bob", "Cleo"]);
}
