// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]
mod common;

use std::sync::Arc;

use common::{
    bindings, n, post_count, random_model, reply_to_not_friend, seed_scenario, social, XorShift64,
};
use echo_match::{compile_pattern, HandleError, ModelInstance, Tuple};

#[test]
fn instances_on_worker_threads_share_one_plan() {
    let s = social();
    let compiled = compile_pattern(&s.schema, &reply_to_not_friend()).unwrap();
    let node_count = compiled.plan().node_count();

    let results: Vec<(u64, Vec<Tuple>, [u8; 32])> = std::thread::scope(|scope| {
        let workers: Vec<_> = (1..=4_u64)
            .map(|seed| {
                let s = &s;
                let compiled = &compiled;
                scope.spawn(move || {
                    let mut inst = ModelInstance::new(Arc::clone(&s.schema));
                    let h = inst.attach(compiled).unwrap();
                    let mut rng = XorShift64::new(seed);
                    random_model(&mut inst, s, &mut rng);
                    (seed, bindings(&inst, h), inst.state_root())
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    // Same seed on the main thread must reproduce each worker's result.
    for (seed, matches, root) in results {
        let mut inst = ModelInstance::new(Arc::clone(&s.schema));
        let h = inst.attach(&compiled).unwrap();
        random_model(&mut inst, &s, &mut XorShift64::new(seed));
        assert_eq!(bindings(&inst, h), matches, "seed {seed}");
        assert_eq!(inst.state_root(), root, "seed {seed}");
    }
    assert_eq!(compiled.plan().node_count(), node_count);
}

#[test]
fn forks_diverge_without_affecting_each_other() {
    let s = social();
    let mut parent = ModelInstance::new(Arc::clone(&s.schema));
    let sc = seed_scenario(&mut parent, &s);
    let h = parent
        .attach(&compile_pattern(&s.schema, &reply_to_not_friend()).unwrap())
        .unwrap();
    let mut tx = parent.begin();
    tx.insert(s.reply_to, &[sc.p2, sc.p1]);
    tx.commit().unwrap();

    let root = parent.state_root();
    let mut child = parent.fork();
    assert_eq!(child.version(), parent.version());
    assert_eq!(child.state_root(), root);

    let mut tx = child.begin();
    tx.delete(s.friend, &[sc.a, sc.b]);
    tx.commit().unwrap();

    assert_eq!(bindings(&child, h), vec![vec![n(sc.p2), n(sc.p1)]]);
    assert_eq!(parent.match_count(h).unwrap(), 0);
    assert_eq!(parent.state_root(), root);
    assert_eq!(parent.tuple_count(s.friend, &[sc.a, sc.b]), 1);
}

#[test]
fn fork_histories_are_independent() {
    let s = social();
    let mut parent = ModelInstance::new(Arc::clone(&s.schema));
    let sc = seed_scenario(&mut parent, &s);
    let base = parent.version();
    let mut child = parent.fork();

    let mut tx = child.begin();
    tx.insert(s.likes, &[sc.a, sc.p2]);
    let child_v = tx.commit().unwrap();

    let mut tx = parent.begin();
    tx.insert(s.likes, &[sc.b, sc.p1]);
    tx.commit().unwrap();

    // Each line sees only its own commits.
    assert_eq!(parent.tuple_count(s.likes, &[sc.a, sc.p2]), 0);
    child.rollback(base).unwrap();
    assert_eq!(child.tuple_count(s.likes, &[sc.a, sc.p2]), 0);
    assert_eq!(parent.tuple_count(s.likes, &[sc.b, sc.p1]), 1);
    assert!(child_v > base);
}

#[test]
fn siblings_never_share_handles_or_versions() {
    let s = social();
    let mut parent = ModelInstance::new(Arc::clone(&s.schema));
    let sc = seed_scenario(&mut parent, &s);
    let mut child = parent.fork();

    let counts = parent
        .attach(&compile_pattern(&s.schema, &post_count()).unwrap())
        .unwrap();
    let replies = child
        .attach(&compile_pattern(&s.schema, &reply_to_not_friend()).unwrap())
        .unwrap();
    assert_ne!(counts, replies);
    assert_eq!(parent.match_count(counts).unwrap(), 2);
    assert_eq!(
        child.match_count(counts),
        Err(HandleError::UnknownPattern(counts))
    );
    assert_eq!(
        parent.match_count(replies),
        Err(HandleError::UnknownPattern(replies))
    );

    let mut tx = parent.begin();
    tx.insert(s.likes, &[sc.a, sc.p2]);
    let parent_v = tx.commit().unwrap();
    let mut tx = child.begin();
    tx.insert(s.likes, &[sc.b, sc.p1]);
    let child_v = tx.commit().unwrap();
    assert_ne!(parent_v, child_v);
    assert_ne!(parent.state_root(), child.state_root());
    assert!(parent.rollback(child_v).is_err());
    assert!(child.rollback(parent_v).is_err());
}

#[test]
fn detached_handles_stop_resolving() {
    let s = social();
    let mut inst = ModelInstance::new(Arc::clone(&s.schema));
    let h = inst
        .attach(&compile_pattern(&s.schema, &reply_to_not_friend()).unwrap())
        .unwrap();
    let fork = inst.fork();
    inst.detach(h).unwrap();
    assert_eq!(inst.detach(h), Err(HandleError::UnknownPattern(h)));
    assert_eq!(
        inst.current_matches(h).unwrap_err(),
        HandleError::UnknownPattern(h)
    );
    assert!(fork.current_matches(h).is_ok());
}
