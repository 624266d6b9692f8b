// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code, missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use echo_match::{
    CmpOp, Expr, ModelInstance, NodeId, Pattern, PatternHandle, RelationId, Schema, Tuple, TypeId,
    Value,
};

/// Social-network schema used across the integration tests.
pub struct Social {
    pub schema: Arc<Schema>,
    pub person: TypeId,
    pub post: TypeId,
    pub friend: RelationId,
    pub author: RelationId,
    pub reply_to: RelationId,
    pub likes: RelationId,
}

pub fn social() -> Social {
    let schema = Schema::builder()
        .node_type("Person")
        .node_type("Post")
        .symmetric_relation("friend", &["Person", "Person"])
        .relation("author", &["Post", "Person"])
        .relation("replyTo", &["Post", "Post"])
        .relation("likes", &["Person", "Post"])
        .build()
        .expect("social schema");
    Social {
        person: schema.node_type("Person").unwrap(),
        post: schema.node_type("Post").unwrap(),
        friend: schema.relation("friend").unwrap(),
        author: schema.relation("author").unwrap(),
        reply_to: schema.relation("replyTo").unwrap(),
        likes: schema.relation("likes").unwrap(),
        schema: Arc::new(schema),
    }
}

/// `replyTo(x,y) ∧ author(x,xa) ∧ author(y,ya) ∧ xa≠ya ∧ ¬friend(xa,ya)`
pub fn reply_to_not_friend() -> Pattern {
    Pattern::builder("replyToNotFriend")
        .parameters(["x", "y"])
        .clause(|c| {
            c.atom("replyTo", ["x", "y"])
                .atom("author", ["x", "xa"])
                .atom("author", ["y", "ya"])
                .compare("xa", CmpOp::Ne, "ya")
                .not(|n| n.atom("friend", ["xa", "ya"]))
        })
        .build()
}

/// Every person with the number of posts they authored.
pub fn post_count() -> Pattern {
    Pattern::builder("postCount")
        .parameters(["a", "n"])
        .clause(|c| {
            c.has_type("Person", "a")
                .count("n", |b| b.atom("author", ["_", "a"]))
        })
        .build()
}

/// Posts with their only author: `author(p,a) ∧ ¬(author(p,z) ∧ z≠a)`.
pub fn sole_author() -> Pattern {
    Pattern::builder("soleAuthor")
        .parameters(["p", "a"])
        .clause(|c| {
            c.atom("author", ["p", "a"])
                .not(|n| n.atom("author", ["p", "z"]).ne("z", "a"))
        })
        .build()
}

/// Each authorship with the number of other authors of the same post.
pub fn co_author_count() -> Pattern {
    Pattern::builder("coAuthorCount")
        .parameters(["p", "a", "k"])
        .clause(|c| {
            c.atom("author", ["p", "a"])
                .count("k", |b| b.atom("author", ["p", "z"]).ne("z", "a"))
        })
        .build()
}

/// People with posts, scored as twice their post count plus the likes on
/// their most liked post.
pub fn engagement() -> Pattern {
    Pattern::builder("engagement")
        .parameters(["a", "score"])
        .clause(|c| {
            c.has_type("Person", "a")
                .count("posts", |b| b.atom("author", ["_", "a"]))
                .max("top", "k", |b| {
                    b.atom("author", ["p", "a"])
                        .count("k", |i| i.atom("likes", ["_", "p"]))
                })
                .assign("score", Expr::from("posts") * 2_i64 + "top")
        })
        .build()
}

/// Pairs of people who like a common post.
pub fn co_likers() -> Pattern {
    Pattern::builder("coLikers")
        .parameters(["a", "b"])
        .clause(|c| {
            c.atom("likes", ["a", "p"])
                .atom("likes", ["b", "p"])
                .ne("a", "b")
        })
        .build()
}

pub fn n(id: NodeId) -> Value {
    Value::Node(id)
}

pub fn bindings(inst: &ModelInstance, h: PatternHandle) -> Vec<Tuple> {
    inst.current_matches(h)
        .expect("attached")
        .iter()
        .cloned()
        .collect()
}

/// The scenario model: `a`,`b` friends (both directions, `friend` is
/// symmetric); `p1` by `a`, `p2` by `b`.
pub struct Scenario {
    pub a: NodeId,
    pub b: NodeId,
    pub p1: NodeId,
    pub p2: NodeId,
}

pub fn seed_scenario(inst: &mut ModelInstance, s: &Social) -> Scenario {
    let mut tx = inst.begin();
    let a = tx.create_node(&[s.person]);
    let b = tx.create_node(&[s.person]);
    let p1 = tx.create_node(&[s.post]);
    let p2 = tx.create_node(&[s.post]);
    tx.insert(s.friend, &[a, b]);
    tx.insert(s.author, &[p1, a]);
    tx.insert(s.author, &[p2, b]);
    tx.commit().expect("seed commit");
    Scenario { a, b, p1, p2 }
}

/// Tiny deterministic RNG (xorshift64*) so tests don't need `rand`.
#[derive(Clone)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Creates a new PRNG; a zero seed is replaced with 1.
    pub fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Returns a value in `[0, upper)` (modulo bias is fine for tests).
    pub fn gen_range_usize(&mut self, upper: usize) -> usize {
        if upper <= 1 {
            return 0;
        }
        (self.next_u64() as usize) % upper
    }

    /// Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.gen_range_usize(i + 1);
            items.swap(i, j);
        }
    }
}

/// A random social model: `people` persons, `posts` posts each with one
/// author, and random friend/replyTo/likes tuples.
pub struct RandomModel {
    pub people: Vec<NodeId>,
    pub posts: Vec<NodeId>,
}

pub fn random_model(inst: &mut ModelInstance, s: &Social, rng: &mut XorShift64) -> RandomModel {
    let mut tx = inst.begin();
    let people: Vec<NodeId> = (0..4).map(|_| tx.create_node(&[s.person])).collect();
    let posts: Vec<NodeId> = (0..4).map(|_| tx.create_node(&[s.post])).collect();
    for p in &posts {
        let who = people[rng.gen_range_usize(people.len())];
        tx.insert(s.author, &[*p, who]);
    }
    for _ in 0..5 {
        let x = people[rng.gen_range_usize(people.len())];
        let y = people[rng.gen_range_usize(people.len())];
        tx.insert(s.friend, &[x, y]);
    }
    for _ in 0..3 {
        let x = posts[rng.gen_range_usize(posts.len())];
        let y = posts[rng.gen_range_usize(posts.len())];
        tx.insert(s.reply_to, &[x, y]);
    }
    tx.commit().expect("random model commit");
    RandomModel { people, posts }
}
