// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]
mod common;

use std::sync::{Arc, Mutex};

use common::{co_likers, n, post_count, reply_to_not_friend, seed_scenario, social};
use echo_match::{
    compile_pattern, EngineConfig, MatchEvent, MatchSet, ModelInstance, PatternHandle,
    RetentionPolicy, Version, VersionConflict,
};

fn attach_all(inst: &mut ModelInstance, s: &common::Social) -> Vec<PatternHandle> {
    [reply_to_not_friend(), post_count(), co_likers()]
        .iter()
        .map(|p| inst.attach(&compile_pattern(&s.schema, p).unwrap()).unwrap())
        .collect()
}

fn snapshot(inst: &ModelInstance, handles: &[PatternHandle]) -> Vec<MatchSet> {
    handles
        .iter()
        .map(|h| inst.current_matches(*h).unwrap().clone())
        .collect()
}

#[test]
fn rollback_restores_store_and_match_sets_bit_for_bit() {
    let s = social();
    let mut inst = ModelInstance::new(Arc::clone(&s.schema));
    let sc = seed_scenario(&mut inst, &s);
    let handles = attach_all(&mut inst, &s);
    let v1 = inst.version();
    let root = inst.state_root();
    let before = snapshot(&inst, &handles);

    let mut tx = inst.begin();
    let c = tx.create_node(&[s.person]);
    let p3 = tx.create_node(&[s.post]);
    tx.insert(s.author, &[p3, c]);
    tx.insert(s.reply_to, &[sc.p2, sc.p1]);
    tx.insert(s.likes, &[sc.a, sc.p1]);
    tx.insert(s.likes, &[c, sc.p1]);
    tx.commit().unwrap();

    let mut tx = inst.begin();
    tx.delete(s.friend, &[sc.a, sc.b]);
    tx.delete(s.author, &[sc.p2, sc.b]);
    tx.delete(s.reply_to, &[sc.p2, sc.p1]);
    tx.delete_node(sc.p2);
    tx.commit().unwrap();
    assert!(!inst.is_live(sc.p2));
    assert_ne!(inst.state_root(), root);

    inst.rollback(v1).unwrap();
    assert_eq!(inst.version(), v1);
    assert_eq!(inst.state_root(), root);
    assert_eq!(snapshot(&inst, &handles), before);
    assert!(inst.is_live(sc.p2));
    assert_eq!(inst.node_types(sc.p2), Some(&[s.post][..]));
    assert!(!inst.is_live(c));
}

#[test]
fn rollback_publishes_netted_events_under_the_target_version() {
    let s = social();
    let mut inst = ModelInstance::new(Arc::clone(&s.schema));
    let sc = seed_scenario(&mut inst, &s);
    let h = inst
        .attach(&compile_pattern(&s.schema, &reply_to_not_friend()).unwrap())
        .unwrap();
    let v1 = inst.version();

    let mut tx = inst.begin();
    tx.insert(s.reply_to, &[sc.p2, sc.p1]);
    tx.commit().unwrap();
    let mut tx = inst.begin();
    tx.delete(s.friend, &[sc.a, sc.b]);
    tx.commit().unwrap();
    assert_eq!(inst.match_count(h).unwrap(), 1);

    let log: Arc<Mutex<Vec<(Version, Vec<MatchEvent>)>>> = Arc::default();
    let sink = Arc::clone(&log);
    inst.subscribe(h, move |v, e| sink.lock().unwrap().push((v, e.to_vec())))
        .unwrap();

    inst.rollback(v1).unwrap();
    let log = log.lock().unwrap();
    assert_eq!(
        *log,
        vec![(v1, vec![MatchEvent::Vanished(vec![n(sc.p2), n(sc.p1)])])]
    );
}

#[test]
fn rollback_to_current_version_is_a_no_op() {
    let s = social();
    let mut inst = ModelInstance::new(Arc::clone(&s.schema));
    seed_scenario(&mut inst, &s);
    let h = inst
        .attach(&compile_pattern(&s.schema, &post_count()).unwrap())
        .unwrap();
    let calls = Arc::new(Mutex::new(0_u32));
    let sink = Arc::clone(&calls);
    inst.subscribe(h, move |_, _| *sink.lock().unwrap() += 1)
        .unwrap();

    let v = inst.version();
    let root = inst.state_root();
    inst.rollback(v).unwrap();
    assert_eq!(inst.version(), v);
    assert_eq!(inst.state_root(), root);
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[test]
fn rolled_back_versions_are_not_reachable_again() {
    let s = social();
    let mut inst = ModelInstance::new(Arc::clone(&s.schema));
    let sc = seed_scenario(&mut inst, &s);
    let v1 = inst.version();
    let mut tx = inst.begin();
    tx.insert(s.likes, &[sc.a, sc.p2]);
    let v2 = tx.commit().unwrap();

    inst.rollback(v1).unwrap();
    let root = inst.state_root();
    assert_eq!(
        inst.rollback(v2),
        Err(VersionConflict::NotOnHistory { requested: v2 })
    );
    assert_eq!(
        inst.rollback(Version(99)),
        Err(VersionConflict::NotOnHistory {
            requested: Version(99)
        })
    );

    let mut tx = inst.begin();
    tx.insert(s.likes, &[sc.b, sc.p1]);
    let v3 = tx.commit().unwrap();
    assert!(v3 > v2);
    assert_eq!(inst.version(), v3);
    inst.rollback(v1).unwrap();
    assert_eq!(inst.state_root(), root);
}

#[test]
fn rollback_can_return_to_the_empty_model() {
    let s = social();
    let mut inst = ModelInstance::new(Arc::clone(&s.schema));
    let empty = inst.state_root();
    let handles = attach_all(&mut inst, &s);
    seed_scenario(&mut inst, &s);
    assert_eq!(inst.match_count(handles[1]).unwrap(), 2);

    inst.rollback(Version::INITIAL).unwrap();
    assert_eq!(inst.state_root(), empty);
    for h in handles {
        assert!(inst.current_matches(h).unwrap().is_empty());
        assert_eq!(inst.memory_entries(h).unwrap(), 0);
    }
}

#[test]
fn bounded_retention_reports_pruned_versions() {
    let s = social();
    let config = EngineConfig {
        retention: RetentionPolicy::KeepRecent { window: 2 },
        ..EngineConfig::default()
    };
    let mut inst = ModelInstance::with_config(Arc::clone(&s.schema), config);
    let sc = seed_scenario(&mut inst, &s);
    let v1 = inst.version();

    let mut versions = vec![v1];
    for who in [sc.a, sc.b, sc.a] {
        let mut tx = inst.begin();
        tx.insert(s.likes, &[who, sc.p1]);
        versions.push(tx.commit().unwrap());
    }
    assert_eq!(inst.oldest_retained(), versions[1]);

    let root = inst.state_root();
    assert_eq!(
        inst.rollback(v1),
        Err(VersionConflict::NotRetained {
            requested: v1,
            oldest: versions[1],
        })
    );
    assert_eq!(inst.version(), versions[3]);
    assert_eq!(inst.state_root(), root);

    inst.rollback(versions[1]).unwrap();
    assert_eq!(inst.tuple_count(s.likes, &[sc.a, sc.p1]), 1);
}

#[test]
fn pruned_deletions_purge_tombstones() {
    let s = social();
    let config = EngineConfig {
        retention: RetentionPolicy::KeepRecent { window: 1 },
        ..EngineConfig::default()
    };
    let mut inst = ModelInstance::with_config(Arc::clone(&s.schema), config);
    let mut tx = inst.begin();
    let ghost = tx.create_node(&[s.person]);
    tx.commit().unwrap();

    let mut tx = inst.begin();
    tx.delete_node(ghost);
    let deleted = tx.commit().unwrap();
    assert!(inst.store().node(ghost).is_some());

    let mut tx = inst.begin();
    tx.create_node(&[s.post]);
    tx.commit().unwrap();
    assert_eq!(inst.oldest_retained(), deleted);
    assert!(inst.store().node(ghost).is_none());
    assert!(!inst.is_live(ghost));
}
