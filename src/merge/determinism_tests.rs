//! Property tests for merge determinism.
//!
//! The merge must be a pure function of its three inputs: running it twice
//! yields byte-identical output, a branch that changed nothing contributes
//! nothing, and branches with disjoint edits commute.
//!
//! Scenarios are built from a small site (a handful of tokens and one
//! component with a flat render tree) and random edit scripts applied to
//! copies of it.

#![allow(clippy::all, clippy::pedantic, clippy::nursery)]

use proptest::prelude::*;

use crate::merge::{MergeOutcome, merge};
use crate::model::{Class, Graph, Node, NodeId, Value};

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

const TOKENS: u128 = 4;
const CHILDREN: u128 = 5;

fn id(n: u128) -> NodeId {
    NodeId::from_u128(n)
}

fn token(i: u128) -> NodeId {
    id(10 + i)
}

fn child(i: u128) -> NodeId {
    id(200 + i)
}

fn root_tag() -> NodeId {
    id(101)
}

fn base() -> Graph {
    let mut g = Graph::new_site(id(1));
    for i in 0..TOKENS {
        g.attach(
            id(1),
            "tokens",
            Node::new(token(i), Class::StyleToken)
                .with("name", format!("t{i}"))
                .with("value", "#000"),
        )
        .unwrap();
    }
    g.attach(id(1), "components", Node::new(id(100), Class::Component).with("name", "C"))
        .unwrap();
    g.attach(id(100), "tpl_tree", Node::new(root_tag(), Class::TplTag).with("name", "root"))
        .unwrap();
    for i in 0..CHILDREN {
        g.attach(
            root_tag(),
            "children",
            Node::new(child(i), Class::TplTag)
                .with("name", format!("c{i}"))
                .with("tag", "div"),
        )
        .unwrap();
    }
    g.normalize();
    g
}

// ---------------------------------------------------------------------------
// Edits
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
enum Edit {
    TokenValue(u128, String),
    AddToken(u128),
    Tag(u128, String),
    Reorder(Vec<usize>),
    DropChild(u128),
}

fn apply(g: &mut Graph, edit: &Edit, salt: u128) {
    match edit {
        Edit::TokenValue(i, v) => {
            g.set_field(token(*i), "value", v.as_str()).unwrap();
        }
        Edit::AddToken(n) => {
            let new = id(1000 * salt + n);
            if !g.contains(new) {
                g.attach(
                    id(1),
                    "tokens",
                    Node::new(new, Class::StyleToken).with("name", format!("s{salt}-{n}")),
                )
                .unwrap();
            }
        }
        Edit::Tag(i, v) => {
            if g.contains(child(*i)) {
                g.set_field(child(*i), "tag", v.as_str()).unwrap();
            }
        }
        Edit::Reorder(order) => {
            let mut current = g.get(root_tag()).unwrap().get("children").ref_ids();
            let mut reordered = Vec::with_capacity(current.len());
            for &k in order {
                if k < current.len() {
                    reordered.push(current.remove(k));
                }
            }
            reordered.extend(current);
            g.set_field(root_tag(), "children", Value::refs(reordered))
                .unwrap();
        }
        Edit::DropChild(i) => {
            if g.contains(child(*i)) {
                g.remove_subtree(child(*i)).unwrap();
            }
        }
    }
}

fn edited(edits: &[Edit], salt: u128) -> Graph {
    let mut g = base();
    for edit in edits {
        apply(&mut g, edit, salt);
    }
    g.normalize();
    g
}

fn arb_value() -> impl Strategy<Value = String> {
    "#[0-9a-f]{3}"
}

fn arb_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0..TOKENS, arb_value()).prop_map(|(i, v)| Edit::TokenValue(i, v)),
        (0..8u128).prop_map(Edit::AddToken),
        (0..CHILDREN, "[a-z]{1,6}").prop_map(|(i, v)| Edit::Tag(i, v)),
        prop::collection::vec(0..CHILDREN as usize, 1..=4).prop_map(Edit::Reorder),
        (0..CHILDREN).prop_map(Edit::DropChild),
    ]
}

/// Edits confined to the token list.
fn arb_token_edit() -> impl Strategy<Value = Edit> {
    (0..TOKENS, arb_value()).prop_map(|(i, v)| Edit::TokenValue(i, v))
}

/// Edits confined to the render tree.
fn arb_tree_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0..CHILDREN, "[a-z]{1,6}").prop_map(|(i, v)| Edit::Tag(i, v)),
        prop::collection::vec(0..CHILDREN as usize, 1..=4).prop_map(Edit::Reorder),
    ]
}

/// Stable fingerprint of an outcome: graph digest plus records, or the
/// sorted conflict keys.
fn fingerprint(outcome: &MergeOutcome) -> String {
    match outcome {
        MergeOutcome::Merged(doc) => format!(
            "merged:{}:{}",
            doc.graph.digest().unwrap(),
            serde_json::to_string(&doc.reconciliations).unwrap()
        ),
        MergeOutcome::NeedsResolution(p) => format!("pending:{:?}", p.keys()),
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// The same inputs always produce the same bytes.
    #[test]
    fn merge_is_deterministic(
        left in prop::collection::vec(arb_edit(), 0..6),
        right in prop::collection::vec(arb_edit(), 0..6),
    ) {
        let a = base();
        let l = edited(&left, 1);
        let r = edited(&right, 2);
        let first = fingerprint(&merge(&a, &l, &r, None).unwrap());
        let second = fingerprint(&merge(&a, &l, &r, None).unwrap());
        prop_assert_eq!(first, second);
    }

    /// A branch equal to the ancestor leaves the other branch untouched.
    #[test]
    fn unchanged_branch_contributes_nothing(
        edits in prop::collection::vec(arb_edit(), 0..6),
    ) {
        let a = base();
        let l = edited(&edits, 1);
        let outcome = merge(&a, &l, &a, None).unwrap();
        let doc = outcome.merged().expect("one-sided merge is clean");
        prop_assert_eq!(doc.graph.digest().unwrap(), l.digest().unwrap());
        prop_assert!(doc.reconciliations.is_empty());
    }

    /// Disjoint edits give the same document whichever side carries them.
    #[test]
    fn disjoint_edits_commute(
        tokens in prop::collection::vec(arb_token_edit(), 1..4),
        tree in prop::collection::vec(arb_tree_edit(), 1..4),
    ) {
        let a = base();
        let l = edited(&tokens, 1);
        let r = edited(&tree, 2);
        let lr = merge(&a, &l, &r, None).unwrap();
        let rl = merge(&a, &r, &l, None).unwrap();
        prop_assert!(lr.merged().is_some());
        prop_assert_eq!(fingerprint(&lr), fingerprint(&rl));
    }
}
