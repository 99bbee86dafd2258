//! Closed node-class schema.
//!
//! Every node class is a variant of [`Class`], and every class maps to a
//! static field table through an exhaustive `match`. Each field declares its
//! shape ([`FieldShape`]), its merge policy ([`FieldMerge`]), and optionally a
//! conflict group, allowed target classes, and a name-uniqueness scope.
//! Adding a class is therefore a compile-checked update of this file alone.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Class
// ---------------------------------------------------------------------------

/// The node classes of a design document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Class {
    /// Document root.
    Site,
    /// A reusable component (or page, when `page_path` is set).
    Component,
    /// A component parameter (prop or slot).
    Param,
    /// A group of variants, global or component-local.
    VariantGroup,
    /// A single variant.
    Variant,
    /// A named design token.
    StyleToken,
    /// A named bundle of style rules.
    Mixin,
    /// A shared image asset.
    ImageAsset,
    /// A plain element in a component's render tree.
    TplTag,
    /// A slot placeholder in a component's render tree.
    TplSlot,
    /// An instance of another component in a render tree.
    TplComponent,
    /// An argument binding on a component instance.
    Arg,
    /// Style and text overrides active under a set of variants.
    VariantSetting,
}

impl Class {
    /// All classes, in declaration order.
    pub const ALL: [Self; 13] = [
        Self::Site,
        Self::Component,
        Self::Param,
        Self::VariantGroup,
        Self::Variant,
        Self::StyleToken,
        Self::Mixin,
        Self::ImageAsset,
        Self::TplTag,
        Self::TplSlot,
        Self::TplComponent,
        Self::Arg,
        Self::VariantSetting,
    ];

    /// The static field table for this class.
    #[must_use]
    pub const fn fields(self) -> &'static [FieldSpec] {
        match self {
            Self::Site => SITE,
            Self::Component => COMPONENT,
            Self::Param => PARAM,
            Self::VariantGroup => VARIANT_GROUP,
            Self::Variant => VARIANT,
            Self::StyleToken => STYLE_TOKEN,
            Self::Mixin => MIXIN,
            Self::ImageAsset => IMAGE_ASSET,
            Self::TplTag => TPL_TAG,
            Self::TplSlot => TPL_SLOT,
            Self::TplComponent => TPL_COMPONENT,
            Self::Arg => ARG,
            Self::VariantSetting => VARIANT_SETTING,
        }
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// The conflict group this class roots, if any.
    #[must_use]
    pub const fn group(self) -> Option<GroupKind> {
        match self {
            Self::Site => Some(GroupKind::Site),
            Self::Component => Some(GroupKind::Component),
            Self::Param => Some(GroupKind::ComponentParam),
            Self::VariantGroup => Some(GroupKind::VariantGroup),
            Self::Variant => Some(GroupKind::Variant),
            Self::StyleToken => Some(GroupKind::StyleToken),
            Self::Mixin => Some(GroupKind::Mixin),
            Self::ImageAsset => Some(GroupKind::ImageAsset),
            Self::TplTag
            | Self::TplSlot
            | Self::TplComponent
            | Self::Arg
            | Self::VariantSetting => None,
        }
    }

    /// Prefix used by `${prefix:Name}` code references to nodes of this class.
    #[must_use]
    pub const fn ref_prefix(self) -> Option<&'static str> {
        match self {
            Self::StyleToken => Some("token"),
            Self::Mixin => Some("mixin"),
            Self::Component => Some("component"),
            Self::ImageAsset => Some("image"),
            Self::VariantGroup => Some("group"),
            Self::Param => Some("prop"),
            Self::TplTag | Self::TplComponent => Some("elem"),
            Self::Site
            | Self::Variant
            | Self::TplSlot
            | Self::Arg
            | Self::VariantSetting => None,
        }
    }

    /// `true` if references by name resolve inside the owning component only.
    #[must_use]
    pub const fn is_component_local(self) -> bool {
        matches!(self, Self::Param | Self::TplTag | Self::TplComponent)
    }

    /// `true` for render-tree node classes.
    #[must_use]
    pub const fn is_tpl(self) -> bool {
        matches!(self, Self::TplTag | Self::TplSlot | Self::TplComponent)
    }

    /// `true` if the class carries a `name` field.
    #[must_use]
    pub fn has_name(self) -> bool {
        self.field("name").is_some()
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Site => "Site",
            Self::Component => "Component",
            Self::Param => "Param",
            Self::VariantGroup => "VariantGroup",
            Self::Variant => "Variant",
            Self::StyleToken => "StyleToken",
            Self::Mixin => "Mixin",
            Self::ImageAsset => "ImageAsset",
            Self::TplTag => "TplTag",
            Self::TplSlot => "TplSlot",
            Self::TplComponent => "TplComponent",
            Self::Arg => "Arg",
            Self::VariantSetting => "VariantSetting",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Conflict groups
// ---------------------------------------------------------------------------

/// The domain object a field change is attributed to for conflict detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Top-level document fields (fallback group).
    Site,
    /// A component's own fields.
    Component,
    /// A component parameter.
    ComponentParam,
    /// A component's render tree.
    TplTree,
    /// A site-level variant group.
    GlobalVariantGroup,
    /// A component-local variant group.
    VariantGroup,
    /// A variant.
    Variant,
    /// A design token.
    StyleToken,
    /// A mixin.
    Mixin,
    /// An image asset.
    ImageAsset,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Site => "site",
            Self::Component => "component",
            Self::ComponentParam => "component-param",
            Self::TplTree => "tpl-tree",
            Self::GlobalVariantGroup => "global-variant-group",
            Self::VariantGroup => "variant-group",
            Self::Variant => "variant",
            Self::StyleToken => "style-token",
            Self::Mixin => "mixin",
            Self::ImageAsset => "image-asset",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Field shapes
// ---------------------------------------------------------------------------

/// Whether list order carries meaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListOrder {
    /// Precedence-ordered; reorders merge via the common-member rule.
    Ordered,
    /// A set; membership merges freely and order is not significant.
    Unordered,
}

/// How two entries of an owned list are matched across branches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeKey {
    /// By node identity.
    Identity,
    /// By the value of a single field of the entry.
    Field(&'static str),
    /// By the set of references in a list field of the entry.
    RefSet(&'static str),
}

/// What happens to a weak reference whose target disappears.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// Null the field, or drop the element from a list.
    Clear,
    /// Remove the referencing node (and its owned subtree).
    RemoveReferrer,
}

/// Declared storage shape of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldShape {
    /// Null, bool, int, or string.
    Scalar,
    /// A string that may embed `${prefix:Name}` references.
    Code,
    /// A map of string keys to scalar or code values.
    Map,
    /// A list of scalars.
    ScalarList(ListOrder),
    /// A non-owning pointer.
    Weak(OnDelete),
    /// A list of non-owning pointers.
    WeakList(ListOrder, OnDelete),
    /// Exclusive ownership of a single child.
    Owned,
    /// Exclusive ownership of a list of children.
    OwnedList(ListOrder, MergeKey),
}

impl FieldShape {
    /// `true` for fields that own their targets.
    #[must_use]
    pub const fn is_owned(self) -> bool {
        matches!(self, Self::Owned | Self::OwnedList(..))
    }

    /// `true` for fields that point at nodes without owning them.
    #[must_use]
    pub const fn is_weak(self) -> bool {
        matches!(self, Self::Weak(_) | Self::WeakList(..))
    }

    /// `true` for list-valued fields.
    #[must_use]
    pub const fn is_list(self) -> bool {
        matches!(
            self,
            Self::ScalarList(_) | Self::WeakList(..) | Self::OwnedList(..)
        )
    }

    /// The list ordering, for list-valued fields.
    #[must_use]
    pub const fn order(self) -> Option<ListOrder> {
        match self {
            Self::ScalarList(o) | Self::WeakList(o, _) | Self::OwnedList(o, _) => Some(o),
            _ => None,
        }
    }

    /// The on-delete policy, for weak fields.
    #[must_use]
    pub const fn on_delete(self) -> Option<OnDelete> {
        match self {
            Self::Weak(p) | Self::WeakList(_, p) => Some(p),
            _ => None,
        }
    }
}

/// Merge policy of a field when both branches changed it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldMerge {
    /// Differing values raise a generic conflict.
    Generic,
    /// Differing values resolve to the configured side without a conflict.
    Harmless,
    /// Structural clashes (order, re-root) raise special conflicts.
    Structural,
}

// ---------------------------------------------------------------------------
// FieldSpec
// ---------------------------------------------------------------------------

/// One entry of a class's static field table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name.
    pub name: &'static str,
    /// Storage shape.
    pub shape: FieldShape,
    /// Conflict policy.
    pub merge: FieldMerge,
    /// Conflict group rooted at the child held by this (owning) field.
    pub group: Option<GroupKind>,
    /// Allowed target classes for reference fields.
    pub targets: &'static [Class],
    /// Children of this owned list must have unique names.
    pub unique_names: bool,
}

impl FieldSpec {
    const fn new(name: &'static str, shape: FieldShape) -> Self {
        Self {
            name,
            shape,
            merge: FieldMerge::Generic,
            group: None,
            targets: &[],
            unique_names: false,
        }
    }

    const fn scalar(name: &'static str) -> Self {
        Self::new(name, FieldShape::Scalar)
    }

    const fn code(name: &'static str) -> Self {
        Self::new(name, FieldShape::Code)
    }

    const fn map(name: &'static str) -> Self {
        Self::new(name, FieldShape::Map)
    }

    const fn weak(name: &'static str, on_delete: OnDelete, targets: &'static [Class]) -> Self {
        Self::new(name, FieldShape::Weak(on_delete)).to(targets)
    }

    const fn owned_list(
        name: &'static str,
        order: ListOrder,
        targets: &'static [Class],
    ) -> Self {
        Self::new(name, FieldShape::OwnedList(order, MergeKey::Identity)).to(targets)
    }

    const fn to(self, targets: &'static [Class]) -> Self {
        Self { targets, ..self }
    }

    const fn keyed(self, key: MergeKey) -> Self {
        let shape = match self.shape {
            FieldShape::OwnedList(order, _) => FieldShape::OwnedList(order, key),
            other => other,
        };
        Self { shape, ..self }
    }

    const fn harmless(self) -> Self {
        Self {
            merge: FieldMerge::Harmless,
            ..self
        }
    }

    const fn structural(self) -> Self {
        Self {
            merge: FieldMerge::Structural,
            ..self
        }
    }

    const fn grouped(self, group: GroupKind) -> Self {
        Self {
            group: Some(group),
            ..self
        }
    }

    const fn unique(self) -> Self {
        Self {
            unique_names: true,
            ..self
        }
    }

    /// The merge key of an owned list, if any.
    #[must_use]
    pub const fn merge_key(&self) -> Option<MergeKey> {
        match self.shape {
            FieldShape::OwnedList(_, key) => Some(key),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Field tables
// ---------------------------------------------------------------------------

const TPL: &[Class] = &[Class::TplTag, Class::TplSlot, Class::TplComponent];

const SITE: &[FieldSpec] = &[
    FieldSpec::owned_list("components", ListOrder::Unordered, &[Class::Component]).unique(),
    FieldSpec::owned_list("tokens", ListOrder::Unordered, &[Class::StyleToken]).unique(),
    FieldSpec::owned_list("mixins", ListOrder::Unordered, &[Class::Mixin]).unique(),
    FieldSpec::owned_list("image_assets", ListOrder::Unordered, &[Class::ImageAsset]).unique(),
    FieldSpec::owned_list(
        "global_variant_groups",
        ListOrder::Ordered,
        &[Class::VariantGroup],
    )
    .grouped(GroupKind::GlobalVariantGroup)
    .unique(),
    FieldSpec::new("dependencies", FieldShape::ScalarList(ListOrder::Unordered)),
    FieldSpec::map("default_styles"),
];

const COMPONENT: &[FieldSpec] = &[
    FieldSpec::scalar("name"),
    FieldSpec::scalar("page_path"),
    FieldSpec::scalar("registered"),
    FieldSpec::new("tpl_tree", FieldShape::Owned)
        .to(TPL)
        .structural()
        .grouped(GroupKind::TplTree),
    FieldSpec::owned_list("params", ListOrder::Ordered, &[Class::Param]),
    FieldSpec::owned_list("variant_groups", ListOrder::Ordered, &[Class::VariantGroup]).unique(),
];

const PARAM: &[FieldSpec] = &[
    FieldSpec::scalar("name"),
    FieldSpec::scalar("kind"),
    FieldSpec::code("default_value"),
];

const VARIANT_GROUP: &[FieldSpec] = &[
    FieldSpec::scalar("name"),
    FieldSpec::scalar("multi"),
    FieldSpec::owned_list("variants", ListOrder::Ordered, &[Class::Variant]).unique(),
];

const VARIANT: &[FieldSpec] = &[FieldSpec::scalar("name")];

const STYLE_TOKEN: &[FieldSpec] = &[
    FieldSpec::scalar("name"),
    FieldSpec::code("value"),
    FieldSpec::scalar("registered"),
];

const MIXIN: &[FieldSpec] = &[FieldSpec::scalar("name"), FieldSpec::map("rules")];

const IMAGE_ASSET: &[FieldSpec] = &[FieldSpec::scalar("name"), FieldSpec::scalar("data")];

const VSETTINGS: FieldSpec =
    FieldSpec::owned_list("vsettings", ListOrder::Unordered, &[Class::VariantSetting])
        .keyed(MergeKey::RefSet("variants"));

const TPL_TAG: &[FieldSpec] = &[
    FieldSpec::scalar("name"),
    FieldSpec::scalar("tag"),
    FieldSpec::scalar("locked").harmless(),
    FieldSpec::owned_list("children", ListOrder::Ordered, TPL).structural(),
    VSETTINGS,
];

const TPL_SLOT: &[FieldSpec] = &[
    FieldSpec::weak("param", OnDelete::RemoveReferrer, &[Class::Param]),
    FieldSpec::scalar("locked").harmless(),
    FieldSpec::owned_list("default_contents", ListOrder::Ordered, TPL).structural(),
];

const TPL_COMPONENT: &[FieldSpec] = &[
    FieldSpec::scalar("name"),
    FieldSpec::weak("component", OnDelete::RemoveReferrer, &[Class::Component]),
    FieldSpec::scalar("locked").harmless(),
    FieldSpec::owned_list("args", ListOrder::Unordered, &[Class::Arg])
        .keyed(MergeKey::Field("param")),
    VSETTINGS,
];

const ARG: &[FieldSpec] = &[
    FieldSpec::weak("param", OnDelete::RemoveReferrer, &[Class::Param]),
    FieldSpec::code("code"),
    FieldSpec::scalar("is_virtual"),
    FieldSpec::owned_list("contents", ListOrder::Ordered, TPL),
];

const VARIANT_SETTING: &[FieldSpec] = &[
    FieldSpec::new(
        "variants",
        FieldShape::WeakList(ListOrder::Unordered, OnDelete::RemoveReferrer),
    )
    .to(&[Class::Variant]),
    FieldSpec::map("rules"),
    FieldSpec::new(
        "mixins",
        FieldShape::WeakList(ListOrder::Ordered, OnDelete::Clear),
    )
    .to(&[Class::Mixin]),
    FieldSpec::weak("image", OnDelete::Clear, &[Class::ImageAsset]),
    FieldSpec::code("text"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_reference_field_declares_targets() {
        for class in Class::ALL {
            for spec in class.fields() {
                if spec.shape.is_owned() || spec.shape.is_weak() {
                    assert!(
                        !spec.targets.is_empty(),
                        "{class}.{} has no target classes",
                        spec.name
                    );
                }
            }
        }
    }

    #[test]
    fn field_names_are_unique_per_class() {
        for class in Class::ALL {
            let mut names: Vec<&str> = class.fields().iter().map(|f| f.name).collect();
            names.sort_unstable();
            let before = names.len();
            names.dedup();
            assert_eq!(before, names.len(), "{class} repeats a field name");
        }
    }

    #[test]
    fn keyed_lists_point_at_existing_fields() {
        for class in Class::ALL {
            for spec in class.fields() {
                let key_field = match spec.merge_key() {
                    Some(MergeKey::Field(f) | MergeKey::RefSet(f)) => f,
                    _ => continue,
                };
                for target in spec.targets {
                    assert!(
                        target.field(key_field).is_some(),
                        "{class}.{} keys on missing {target}.{key_field}",
                        spec.name
                    );
                }
            }
        }
    }

    #[test]
    fn group_table() {
        assert_eq!(Class::TplTag.group(), None);
        assert_eq!(Class::Param.group(), Some(GroupKind::ComponentParam));
        let tree = Class::Component.field("tpl_tree").unwrap();
        assert_eq!(tree.group, Some(GroupKind::TplTree));
        assert_eq!(tree.merge, FieldMerge::Structural);
    }

    #[test]
    fn harmless_fields() {
        let locked = Class::TplTag.field("locked").unwrap();
        assert_eq!(locked.merge, FieldMerge::Harmless);
        assert_eq!(Class::TplTag.field("name").unwrap().merge, FieldMerge::Generic);
    }
}
