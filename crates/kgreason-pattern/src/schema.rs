//! Schema model and the type-context contract the reasoner consumes.
//!
//! A [`Schema`] is an immutable snapshot: single-inheritance type and role
//! hierarchies rooted at the meta types, `relates`/`plays` declarations and
//! attribute value types. It is built through [`SchemaBuilder`], which
//! validates the whole declaration set up front and reports the first
//! violation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::SchemaError;
use crate::term::{Label, ValueType};

pub const THING: &str = "thing";
pub const ENTITY: &str = "entity";
pub const RELATION: &str = "relation";
pub const ATTRIBUTE: &str = "attribute";
pub const ROLE: &str = "role";

const META_LABELS: [&str; 5] = [THING, ENTITY, RELATION, ATTRIBUTE, ROLE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Thing,
    Entity,
    Relation,
    Attribute,
    Role,
}

impl TypeKind {
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::Thing => "thing type",
            TypeKind::Entity => "entity type",
            TypeKind::Relation => "relation type",
            TypeKind::Attribute => "attribute type",
            TypeKind::Role => "role",
        }
    }

    /// Instance-bearing kinds (everything but roles).
    pub fn is_thing(self) -> bool {
        !matches!(self, TypeKind::Role)
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub label: Label,
    pub kind: TypeKind,
    pub supertype: Option<Label>,
    pub value_type: Option<ValueType>,
    /// Roles this relation type declares (not inherited).
    pub relates: BTreeSet<Label>,
    /// Roles instances of this type may play (not inherited).
    pub plays: BTreeSet<Label>,
}

impl TypeDef {
    fn new(label: &str, kind: TypeKind, supertype: Option<&str>) -> Self {
        Self {
            label: Label::new(label),
            kind,
            supertype: supertype.map(Label::new),
            value_type: None,
            relates: BTreeSet::new(),
            plays: BTreeSet::new(),
        }
    }
}

// ============================================================================
// Type context
// ============================================================================

/// Read-only view of the type and role hierarchies.
///
/// `super_types` is ordered nearest first; neither `super_types` nor
/// `sub_types` include the label itself.
pub trait TypeContext {
    fn is_meta(&self, label: &Label) -> bool;

    fn super_type(&self, label: &Label) -> Option<Label>;

    fn super_types(&self, label: &Label) -> Vec<Label>;

    fn sub_types(&self, label: &Label) -> Vec<Label>;

    /// Reflexive subtype check.
    fn is_subtype(&self, sub: &Label, sup: &Label) -> bool {
        sub == sup || self.super_types(sub).iter().any(|s| s == sup)
    }

    /// The label together with all of its subtypes.
    fn sub_types_inclusive(&self, label: &Label) -> BTreeSet<Label> {
        let mut out: BTreeSet<Label> = self.sub_types(label).into_iter().collect();
        out.insert(label.clone());
        out
    }
}

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    types: BTreeMap<Label, TypeDef>,
    /// Proper supertypes, nearest first.
    supertypes_of: BTreeMap<Label, Vec<Label>>,
    /// Proper subtypes.
    subtypes_of: BTreeMap<Label, BTreeSet<Label>>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn get(&self, label: &Label) -> Option<&TypeDef> {
        self.types.get(label)
    }

    pub fn contains(&self, label: &Label) -> bool {
        self.types.contains_key(label)
    }

    pub fn kind(&self, label: &Label) -> Option<TypeKind> {
        self.types.get(label).map(|t| t.kind)
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.types.keys()
    }

    pub fn value_type(&self, label: &Label) -> Option<ValueType> {
        std::iter::once(label.clone())
            .chain(self.super_types(label))
            .find_map(|l| self.types.get(&l).and_then(|t| t.value_type))
    }

    /// Roles related by `relation`, including inherited ones.
    pub fn relates(&self, relation: &Label) -> BTreeSet<Label> {
        self.collect_inherited(relation, |t| &t.relates)
    }

    /// Roles instances of `ty` may play, including inherited ones.
    pub fn plays(&self, ty: &Label) -> BTreeSet<Label> {
        self.collect_inherited(ty, |t| &t.plays)
    }

    fn collect_inherited(&self, label: &Label, field: impl Fn(&TypeDef) -> &BTreeSet<Label>) -> BTreeSet<Label> {
        std::iter::once(label.clone())
            .chain(self.super_types(label))
            .filter_map(|l| self.types.get(&l))
            .flat_map(|t| field(t).iter().cloned())
            .collect()
    }

    /// Could an instance of `relation` have a player in `role`?
    ///
    /// True when either side is meta, or when some relation type in the
    /// hierarchy of `relation` relates `role`, one of its super-roles or one of
    /// its sub-roles.
    pub fn role_fits_relation(&self, relation: &Label, role: &Label) -> bool {
        if self.is_meta(relation) || self.is_meta(role) {
            return true;
        }
        let roles: BTreeSet<Label> = self
            .super_types(role)
            .into_iter()
            .chain(self.sub_types(role))
            .chain(std::iter::once(role.clone()))
            .collect();
        std::iter::once(relation.clone())
            .chain(self.super_types(relation))
            .chain(self.sub_types(relation))
            .any(|r| self.types.get(&r).is_some_and(|t| t.relates.iter().any(|x| roles.contains(x))))
    }

    /// Two types are disjoint when neither is a subtype of the other.
    pub fn are_disjoint(&self, a: &Label, b: &Label) -> bool {
        !self.is_subtype(a, b) && !self.is_subtype(b, a)
    }
}

impl TypeContext for Schema {
    fn is_meta(&self, label: &Label) -> bool {
        META_LABELS.contains(&label.as_str())
    }

    fn super_type(&self, label: &Label) -> Option<Label> {
        self.types.get(label).and_then(|t| t.supertype.clone())
    }

    fn super_types(&self, label: &Label) -> Vec<Label> {
        self.supertypes_of.get(label).cloned().unwrap_or_default()
    }

    fn sub_types(&self, label: &Label) -> Vec<Label> {
        self.subtypes_of
            .get(label)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects declarations; [`SchemaBuilder::build`] validates them together, so
/// declaration order does not matter.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    decls: Vec<TypeDef>,
    plays: Vec<(Label, Label)>,
}

impl SchemaBuilder {
    pub fn entity(mut self, label: &str, supertype: &str) -> Self {
        self.decls.push(TypeDef::new(label, TypeKind::Entity, Some(supertype)));
        self
    }

    pub fn relation(mut self, label: &str, supertype: &str, relates: &[&str]) -> Self {
        let mut def = TypeDef::new(label, TypeKind::Relation, Some(supertype));
        def.relates = relates.iter().map(|r| Label::new(*r)).collect();
        self.decls.push(def);
        self
    }

    pub fn attribute(mut self, label: &str, supertype: &str, value_type: ValueType) -> Self {
        let mut def = TypeDef::new(label, TypeKind::Attribute, Some(supertype));
        def.value_type = Some(value_type);
        self.decls.push(def);
        self
    }

    pub fn role(mut self, label: &str, supertype: &str) -> Self {
        self.decls.push(TypeDef::new(label, TypeKind::Role, Some(supertype)));
        self
    }

    pub fn plays(mut self, ty: &str, roles: &[&str]) -> Self {
        self.plays
            .extend(roles.iter().map(|r| (Label::new(ty), Label::new(*r))));
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut types: BTreeMap<Label, TypeDef> = BTreeMap::new();
        types.insert(Label::new(THING), TypeDef::new(THING, TypeKind::Thing, None));
        types.insert(Label::new(ENTITY), TypeDef::new(ENTITY, TypeKind::Entity, Some(THING)));
        types.insert(Label::new(RELATION), TypeDef::new(RELATION, TypeKind::Relation, Some(THING)));
        types.insert(Label::new(ATTRIBUTE), TypeDef::new(ATTRIBUTE, TypeKind::Attribute, Some(THING)));
        types.insert(Label::new(ROLE), TypeDef::new(ROLE, TypeKind::Role, None));

        for decl in self.decls {
            if types.contains_key(&decl.label) {
                return Err(SchemaError::DuplicateLabel(decl.label));
            }
            types.insert(decl.label.clone(), decl);
        }

        for def in types.values() {
            let Some(sup) = &def.supertype else { continue };
            let Some(sup_def) = types.get(sup) else {
                return Err(SchemaError::UnknownSupertype {
                    label: def.label.clone(),
                    supertype: sup.clone(),
                });
            };
            let kinds_agree = sup_def.kind == def.kind || (sup_def.kind == TypeKind::Thing && def.kind.is_thing());
            if !kinds_agree {
                return Err(SchemaError::SupertypeKindMismatch {
                    label: def.label.clone(),
                    kind: def.kind.to_string(),
                    supertype: sup.clone(),
                    super_kind: sup_def.kind.to_string(),
                });
            }
            if def.kind == TypeKind::Relation {
                for role in &def.relates {
                    if types.get(role).map(|t| t.kind) != Some(TypeKind::Role) {
                        return Err(SchemaError::NotARole {
                            label: def.label.clone(),
                            role: role.clone(),
                        });
                    }
                }
            }
        }

        for (ty, role) in self.plays {
            if types.get(&role).map(|t| t.kind) != Some(TypeKind::Role) {
                return Err(SchemaError::NotARole { label: ty, role });
            }
            match types.get_mut(&ty) {
                Some(def) => {
                    def.plays.insert(role);
                }
                None => return Err(SchemaError::UnknownType(ty)),
            }
        }

        let supertypes_of = compute_supertypes(&types)?;
        for def in types.values() {
            let inherits_value_type = supertypes_of
                .get(&def.label)
                .into_iter()
                .flatten()
                .any(|s| types.get(s).is_some_and(|t| t.value_type.is_some()));
            let is_meta = META_LABELS.contains(&def.label.as_str());
            if def.kind == TypeKind::Attribute && !is_meta && def.value_type.is_none() && !inherits_value_type {
                return Err(SchemaError::MissingValueType(def.label.clone()));
            }
        }

        let mut subtypes_of: BTreeMap<Label, BTreeSet<Label>> = BTreeMap::new();
        for (sub, supers) in &supertypes_of {
            for sup in supers {
                subtypes_of.entry(sup.clone()).or_default().insert(sub.clone());
            }
        }

        Ok(Schema {
            types,
            supertypes_of,
            subtypes_of,
        })
    }
}

fn compute_supertypes(types: &BTreeMap<Label, TypeDef>) -> Result<BTreeMap<Label, Vec<Label>>, SchemaError> {
    let mut supertypes_of = BTreeMap::new();
    for def in types.values() {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::from([def.label.clone()]);
        let mut cursor = def.supertype.clone();
        while let Some(sup) = cursor {
            if !seen.insert(sup.clone()) {
                return Err(SchemaError::CyclicHierarchy(def.label.clone()));
            }
            cursor = types.get(&sup).and_then(|t| t.supertype.clone());
            chain.push(sup);
        }
        supertypes_of.insert(def.label.clone(), chain);
    }
    Ok(supertypes_of)
}
