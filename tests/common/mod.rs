//! Shared fixture for docmerge integration tests.
//!
//! [`base`] builds a small but complete site that every scenario starts from.
//! Ids are fixed so expectations can name nodes directly.
//!
//! ```text
//! Site(1)
//! ├─ tokens       Brand(10) "#000", Accent(11) "mix(${token:Brand}, white)"
//! ├─ mixins       Card(20) {color: red}
//! ├─ components
//! │  ├─ Button(100)  params [title(104)]  variant_groups [state(120) → hover(121)]
//! │  │    tpl_tree root(101) → [label(102), icon(103), badge(105)]
//! │  ├─ Home(200) "/"
//! │  │    tpl_tree root(201) → [cta(202) = Button, args [title arg(203)]]
//! │  ├─ Link(400)  params [title(401), body(402, slot)]
//! │  │    tpl_tree root(403) → [slot(404) → default text(405)]
//! │  └─ Page(500)
//! │       tpl_tree inst(501) = Link, args [virtual body arg(502) → copy of 405]
//! ├─ dependencies ["icons"]
//! └─ imports      900 → icons
//! ```

#![allow(dead_code)]

use docmerge::merge::{MergedDocument, PendingConflicts};
use docmerge::model::{Class, Graph, Node, NodeId, PackageId, Value};
use docmerge::MergeOutcome;

pub const SITE: NodeId = NodeId::from_u128(1);
pub const BRAND: NodeId = NodeId::from_u128(10);
pub const ACCENT: NodeId = NodeId::from_u128(11);
pub const CARD_MIXIN: NodeId = NodeId::from_u128(20);

pub const BUTTON: NodeId = NodeId::from_u128(100);
pub const BUTTON_ROOT: NodeId = NodeId::from_u128(101);
pub const LABEL: NodeId = NodeId::from_u128(102);
pub const ICON: NodeId = NodeId::from_u128(103);
pub const BUTTON_TITLE: NodeId = NodeId::from_u128(104);
pub const BADGE: NodeId = NodeId::from_u128(105);
pub const STATE: NodeId = NodeId::from_u128(120);
pub const HOVER: NodeId = NodeId::from_u128(121);

pub const HOME: NodeId = NodeId::from_u128(200);
pub const HOME_ROOT: NodeId = NodeId::from_u128(201);
pub const CTA: NodeId = NodeId::from_u128(202);
pub const CTA_TITLE: NodeId = NodeId::from_u128(203);

pub const LINK: NodeId = NodeId::from_u128(400);
pub const LINK_TITLE: NodeId = NodeId::from_u128(401);
pub const LINK_BODY: NodeId = NodeId::from_u128(402);
pub const LINK_ROOT: NodeId = NodeId::from_u128(403);
pub const BODY_SLOT: NodeId = NodeId::from_u128(404);
pub const BODY_TEXT: NodeId = NodeId::from_u128(405);

pub const PAGE: NodeId = NodeId::from_u128(500);
pub const PAGE_LINK: NodeId = NodeId::from_u128(501);
pub const PAGE_BODY_ARG: NodeId = NodeId::from_u128(502);

pub const ICONS_IMAGE: NodeId = NodeId::from_u128(900);

/// Fixed id for nodes a test creates.
pub const fn id(n: u128) -> NodeId {
    NodeId::from_u128(n)
}

/// The ancestor document every scenario branches from.
pub fn base() -> Graph {
    let mut g = Graph::new_site(SITE);
    g.set_field(SITE, "dependencies", Value::List(vec!["icons".into()]))
        .expect("declare dependency");
    g.import(ICONS_IMAGE, PackageId::new("icons"));

    g.attach(
        SITE,
        "tokens",
        Node::new(BRAND, Class::StyleToken)
            .with("name", "Brand")
            .with("value", "#000"),
    )
    .expect("attach Brand");
    g.attach(
        SITE,
        "tokens",
        Node::new(ACCENT, Class::StyleToken)
            .with("name", "Accent")
            .with("value", "mix(${token:Brand}, white)"),
    )
    .expect("attach Accent");
    g.attach(
        SITE,
        "mixins",
        Node::new(CARD_MIXIN, Class::Mixin)
            .with("name", "Card")
            .with("rules", map([("color", "red")])),
    )
    .expect("attach Card");

    // Button
    g.attach(SITE, "components", Node::new(BUTTON, Class::Component).with("name", "Button"))
        .expect("attach Button");
    g.attach(
        BUTTON,
        "params",
        Node::new(BUTTON_TITLE, Class::Param)
            .with("name", "title")
            .with("kind", "prop"),
    )
    .expect("attach title");
    g.attach(BUTTON, "variant_groups", Node::new(STATE, Class::VariantGroup).with("name", "state"))
        .expect("attach state");
    g.attach(STATE, "variants", Node::new(HOVER, Class::Variant).with("name", "hover"))
        .expect("attach hover");
    g.attach(
        BUTTON,
        "tpl_tree",
        Node::new(BUTTON_ROOT, Class::TplTag)
            .with("name", "root")
            .with("tag", "button"),
    )
    .expect("attach button root");
    for (child, name, tag) in [(LABEL, "label", "span"), (ICON, "icon", "img"), (BADGE, "badge", "i")] {
        g.attach(
            BUTTON_ROOT,
            "children",
            Node::new(child, Class::TplTag).with("name", name).with("tag", tag),
        )
        .expect("attach button child");
    }

    // Home
    g.attach(
        SITE,
        "components",
        Node::new(HOME, Class::Component)
            .with("name", "Home")
            .with("page_path", "/"),
    )
    .expect("attach Home");
    g.attach(HOME, "tpl_tree", Node::new(HOME_ROOT, Class::TplTag).with("name", "root"))
        .expect("attach home root");
    g.attach(
        HOME_ROOT,
        "children",
        Node::new(CTA, Class::TplComponent)
            .with("name", "cta")
            .with("component", BUTTON),
    )
    .expect("attach cta");
    g.attach(
        CTA,
        "args",
        Node::new(CTA_TITLE, Class::Arg)
            .with("param", BUTTON_TITLE)
            .with("code", "\"Go\""),
    )
    .expect("attach cta title");

    // Link
    g.attach(SITE, "components", Node::new(LINK, Class::Component).with("name", "Link"))
        .expect("attach Link");
    g.attach(
        LINK,
        "params",
        Node::new(LINK_TITLE, Class::Param)
            .with("name", "title")
            .with("kind", "prop"),
    )
    .expect("attach link title");
    g.attach(
        LINK,
        "params",
        Node::new(LINK_BODY, Class::Param)
            .with("name", "body")
            .with("kind", "slot"),
    )
    .expect("attach link body");
    g.attach(LINK, "tpl_tree", Node::new(LINK_ROOT, Class::TplTag).with("tag", "a"))
        .expect("attach link root");
    g.attach(
        LINK_ROOT,
        "children",
        Node::new(BODY_SLOT, Class::TplSlot).with("param", LINK_BODY),
    )
    .expect("attach body slot");
    g.attach(
        BODY_SLOT,
        "default_contents",
        Node::new(BODY_TEXT, Class::TplTag)
            .with("name", "text")
            .with("tag", "span"),
    )
    .expect("attach body text");

    // Page
    g.attach(SITE, "components", Node::new(PAGE, Class::Component).with("name", "Page"))
        .expect("attach Page");
    g.attach(
        PAGE,
        "tpl_tree",
        Node::new(PAGE_LINK, Class::TplComponent).with("component", LINK),
    )
    .expect("attach page link");
    g.attach(
        PAGE_LINK,
        "args",
        Node::new(PAGE_BODY_ARG, Class::Arg)
            .with("param", LINK_BODY)
            .with("is_virtual", true),
    )
    .expect("attach virtual arg");
    g.attach(
        PAGE_BODY_ARG,
        "contents",
        Node::new(virtual_copy(PAGE_BODY_ARG, BODY_TEXT), Class::TplTag)
            .with("name", "text")
            .with("tag", "span"),
    )
    .expect("attach virtual copy");

    g.normalize();
    g
}

/// Id of the virtual copy of `source` inside `arg`.
pub fn virtual_copy(arg: NodeId, source: NodeId) -> NodeId {
    NodeId::derive("copy", &[arg, source])
}

/// A string-keyed map value.
pub fn map<const N: usize>(entries: [(&str, &str); N]) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_owned(), Value::from(v)))
            .collect(),
    )
}

/// The merged document, or a panic naming the pending conflicts.
pub fn merged(outcome: MergeOutcome) -> MergedDocument {
    match outcome {
        MergeOutcome::Merged(doc) => doc,
        MergeOutcome::NeedsResolution(p) => panic!("unexpected conflicts: {:?}", p.keys()),
    }
}

/// The pending conflicts, or a panic if the merge completed.
pub fn pending(outcome: MergeOutcome) -> PendingConflicts {
    match outcome {
        MergeOutcome::NeedsResolution(p) => p,
        MergeOutcome::Merged(_) => panic!("expected conflicts, merge completed"),
    }
}

/// Value of `field` on `node`.
pub fn field<'g>(g: &'g Graph, node: NodeId, field: &str) -> &'g Value {
    g.get(node).expect("node present").get(field)
}

/// Ids held by an owned or weak list field.
pub fn refs(g: &Graph, node: NodeId, name: &str) -> Vec<NodeId> {
    field(g, node, name).ref_ids()
}

/// Name of `node`.
pub fn name(g: &Graph, node: NodeId) -> &str {
    g.get(node).and_then(Node::name).expect("named node")
}
