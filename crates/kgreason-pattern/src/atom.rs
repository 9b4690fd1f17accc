//! Atoms: the single graph constraints a conjunction is made of.
//!
//! Atoms are a closed sum type. Every operation over atoms (equivalence,
//! unification, semantic difference, planning) matches on [`Atom`]
//! exhaustively, so a new kind cannot be added without the compiler pointing
//! at every place that has to learn about it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::term::{ConceptId, Label, Operand, Var, ValueConstraint};

/// Target of a type-level constraint: either a concrete schema label or a
/// variable ranging over schema concepts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum TypeRef {
    Label(Label),
    Var(Var),
}

impl TypeRef {
    pub fn label(&self) -> Option<&Label> {
        match self {
            TypeRef::Label(l) => Some(l),
            TypeRef::Var(_) => None,
        }
    }

    pub fn var(&self) -> Option<&Var> {
        match self {
            TypeRef::Var(v) => Some(v),
            TypeRef::Label(_) => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Label(l) => write!(f, "{l}"),
            TypeRef::Var(v) => write!(f, "{v}"),
        }
    }
}

/// One `role: player` slot of a relation.
///
/// `role == None` means the meta role (any role). A slot may additionally
/// name a role variable, which answers bind to the role actually played.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RolePlayer {
    pub role: Option<Label>,
    pub role_var: Option<Var>,
    pub player: Var,
}

impl RolePlayer {
    pub fn new(role: Option<&str>, player: impl Into<Var>) -> Self {
        Self {
            role: role.map(Label::new),
            role_var: None,
            player: player.into(),
        }
    }

    pub fn with_role_var(role_var: impl Into<Var>, role: Option<&str>, player: impl Into<Var>) -> Self {
        Self {
            role: role.map(Label::new),
            role_var: Some(role_var.into()),
            player: player.into(),
        }
    }
}

impl fmt::Display for RolePlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.role_var, &self.role) {
            (Some(rv), Some(role)) => write!(f, "{rv}<{role}>: {}", self.player),
            (Some(rv), None) => write!(f, "{rv}: {}", self.player),
            (None, Some(role)) => write!(f, "{role}: {}", self.player),
            (None, None) => write!(f, "{}", self.player),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomKind {
    Isa,
    Sub,
    Plays,
    Relates,
    Has,
    Relation,
    Value,
    Id,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "atom", rename_all = "snake_case")]
pub enum Atom {
    /// `$var isa <type>`
    Isa { var: Var, ty: TypeRef },
    /// `$var sub <type>`
    Sub { var: Var, sup: TypeRef },
    /// `$var plays <role>`
    Plays { var: Var, role: TypeRef },
    /// `$var relates <role>`
    Relates { var: Var, role: TypeRef },
    /// `$owner has <attribute_type> $attribute`
    Has {
        owner: Var,
        attribute_type: Label,
        attribute: Var,
    },
    /// `$var (role: $player, ...) isa <ty>`
    ///
    /// The same role may appear in several slots and the same player may fill
    /// several roles; slots are kept as written.
    Relation {
        var: Var,
        ty: Option<Label>,
        players: Vec<RolePlayer>,
    },
    /// `$var <comparator> <operand>`
    Value { var: Var, constraint: ValueConstraint },
    /// `$var id <id>`
    Id { var: Var, id: ConceptId },
}

impl Atom {
    pub fn isa(var: impl Into<Var>, label: &str) -> Self {
        Atom::Isa {
            var: var.into(),
            ty: TypeRef::Label(Label::new(label)),
        }
    }

    pub fn isa_var(var: impl Into<Var>, type_var: impl Into<Var>) -> Self {
        Atom::Isa {
            var: var.into(),
            ty: TypeRef::Var(type_var.into()),
        }
    }

    pub fn has(owner: impl Into<Var>, attribute_type: &str, attribute: impl Into<Var>) -> Self {
        Atom::Has {
            owner: owner.into(),
            attribute_type: Label::new(attribute_type),
            attribute: attribute.into(),
        }
    }

    pub fn relation(var: impl Into<Var>, ty: Option<&str>, players: Vec<RolePlayer>) -> Self {
        Atom::Relation {
            var: var.into(),
            ty: ty.map(Label::new),
            players,
        }
    }

    pub fn value(var: impl Into<Var>, constraint: ValueConstraint) -> Self {
        Atom::Value {
            var: var.into(),
            constraint,
        }
    }

    pub fn id(var: impl Into<Var>, id: &str) -> Self {
        Atom::Id {
            var: var.into(),
            id: ConceptId::new(id),
        }
    }

    pub fn kind(&self) -> AtomKind {
        match self {
            Atom::Isa { .. } => AtomKind::Isa,
            Atom::Sub { .. } => AtomKind::Sub,
            Atom::Plays { .. } => AtomKind::Plays,
            Atom::Relates { .. } => AtomKind::Relates,
            Atom::Has { .. } => AtomKind::Has,
            Atom::Relation { .. } => AtomKind::Relation,
            Atom::Value { .. } => AtomKind::Value,
            Atom::Id { .. } => AtomKind::Id,
        }
    }

    /// The variable the atom is "about": the instance of an isa, the owner of
    /// a has, the relation itself, the predicated variable.
    pub fn subject(&self) -> &Var {
        match self {
            Atom::Isa { var, .. }
            | Atom::Sub { var, .. }
            | Atom::Plays { var, .. }
            | Atom::Relates { var, .. }
            | Atom::Relation { var, .. }
            | Atom::Value { var, .. }
            | Atom::Id { var, .. } => var,
            Atom::Has { owner, .. } => owner,
        }
    }

    /// Every variable mentioned by the atom.
    pub fn vars(&self) -> BTreeSet<Var> {
        let mut out = BTreeSet::new();
        match self {
            Atom::Isa { var, ty: t }
            | Atom::Sub { var, sup: t }
            | Atom::Plays { var, role: t }
            | Atom::Relates { var, role: t } => {
                out.insert(var.clone());
                if let TypeRef::Var(v) = t {
                    out.insert(v.clone());
                }
            }
            Atom::Has { owner, attribute, .. } => {
                out.insert(owner.clone());
                out.insert(attribute.clone());
            }
            Atom::Relation { var, players, .. } => {
                out.insert(var.clone());
                for rp in players {
                    out.insert(rp.player.clone());
                    if let Some(rv) = &rp.role_var {
                        out.insert(rv.clone());
                    }
                }
            }
            Atom::Value { var, constraint } => {
                out.insert(var.clone());
                if let Operand::Var(v) = &constraint.operand {
                    out.insert(v.clone());
                }
            }
            Atom::Id { var, .. } => {
                out.insert(var.clone());
            }
        }
        out
    }

    /// Instance-level variables bound by evaluating the atom (players,
    /// owners, attributes). Excludes type/role variables and the relation
    /// variable itself.
    pub fn player_vars(&self) -> BTreeSet<Var> {
        match self {
            Atom::Relation { players, .. } => players.iter().map(|rp| rp.player.clone()).collect(),
            Atom::Has { owner, attribute, .. } => [owner.clone(), attribute.clone()].into_iter().collect(),
            other => std::iter::once(other.subject().clone()).collect(),
        }
    }

    /// Schema label the atom is about, when it names one.
    pub fn label(&self) -> Option<&Label> {
        match self {
            Atom::Isa { ty: t, .. }
            | Atom::Sub { sup: t, .. }
            | Atom::Plays { role: t, .. }
            | Atom::Relates { role: t, .. } => t.label(),
            Atom::Has { attribute_type, .. } => Some(attribute_type),
            Atom::Relation { ty, .. } => ty.as_ref(),
            Atom::Value { .. } | Atom::Id { .. } => None,
        }
    }

    /// Predicates are guards attached to a variable, never evaluated alone.
    pub fn is_predicate(&self) -> bool {
        matches!(self, Atom::Value { .. } | Atom::Id { .. })
    }

    /// Schema-level atoms: sub/plays/relates and isa with a variable type.
    pub fn is_ontological(&self) -> bool {
        match self {
            Atom::Sub { .. } | Atom::Plays { .. } | Atom::Relates { .. } => true,
            Atom::Isa { ty, .. } => matches!(ty, TypeRef::Var(_)),
            _ => false,
        }
    }

    /// Atoms whose instances can be concluded by a rule head.
    pub fn is_instance_atom(&self) -> bool {
        matches!(self, Atom::Relation { .. } | Atom::Has { .. } | Atom::Isa { ty: TypeRef::Label(_), .. })
    }

    /// Rename every variable through `f`.
    pub fn rename(&self, f: &impl Fn(&Var) -> Var) -> Atom {
        let rt = |t: &TypeRef| match t {
            TypeRef::Var(v) => TypeRef::Var(f(v)),
            TypeRef::Label(l) => TypeRef::Label(l.clone()),
        };
        match self {
            Atom::Isa { var, ty } => Atom::Isa { var: f(var), ty: rt(ty) },
            Atom::Sub { var, sup } => Atom::Sub { var: f(var), sup: rt(sup) },
            Atom::Plays { var, role } => Atom::Plays { var: f(var), role: rt(role) },
            Atom::Relates { var, role } => Atom::Relates { var: f(var), role: rt(role) },
            Atom::Has {
                owner,
                attribute_type,
                attribute,
            } => Atom::Has {
                owner: f(owner),
                attribute_type: attribute_type.clone(),
                attribute: f(attribute),
            },
            Atom::Relation { var, ty, players } => Atom::Relation {
                var: f(var),
                ty: ty.clone(),
                players: players
                    .iter()
                    .map(|rp| RolePlayer {
                        role: rp.role.clone(),
                        role_var: rp.role_var.as_ref().map(f),
                        player: f(&rp.player),
                    })
                    .collect(),
            },
            Atom::Value { var, constraint } => Atom::Value {
                var: f(var),
                constraint: ValueConstraint {
                    comparator: constraint.comparator,
                    operand: match &constraint.operand {
                        Operand::Var(v) => Operand::Var(f(v)),
                        lit => lit.clone(),
                    },
                },
            },
            Atom::Id { var, id } => Atom::Id {
                var: f(var),
                id: id.clone(),
            },
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Isa { var, ty } => write!(f, "{var} isa {ty};"),
            Atom::Sub { var, sup } => write!(f, "{var} sub {sup};"),
            Atom::Plays { var, role } => write!(f, "{var} plays {role};"),
            Atom::Relates { var, role } => write!(f, "{var} relates {role};"),
            Atom::Has {
                owner,
                attribute_type,
                attribute,
            } => write!(f, "{owner} has {attribute_type} {attribute};"),
            Atom::Relation { var, ty, players } => {
                let slots: Vec<String> = players.iter().map(|rp| rp.to_string()).collect();
                write!(f, "{var} ({})", slots.join(", "))?;
                if let Some(ty) = ty {
                    write!(f, " isa {ty}")?;
                }
                f.write_str(";")
            }
            Atom::Value { var, constraint } => write!(f, "{var} {constraint};"),
            Atom::Id { var, id } => write!(f, "{var} id {id};"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Comparator;

    #[test]
    fn relation_keeps_repeated_roles_and_players() {
        let atom = Atom::relation(
            "r",
            Some("ternary"),
            vec![
                RolePlayer::new(Some("baseRole1"), "x"),
                RolePlayer::new(Some("baseRole1"), "x"),
                RolePlayer::new(Some("baseRole2"), "x"),
            ],
        );
        let Atom::Relation { players, .. } = &atom else {
            unreachable!()
        };
        assert_eq!(players.len(), 3);
        assert_eq!(atom.vars().len(), 2);
        assert_eq!(atom.player_vars().len(), 1);
    }

    #[test]
    fn rename_touches_every_variable() {
        let atom = Atom::relation(
            "r",
            None,
            vec![RolePlayer::with_role_var("role", Some("baseRole1"), "x")],
        );
        let renamed = atom.rename(&|v| Var::new(format!("{}2", v.name())));
        let vars: Vec<String> = renamed.vars().into_iter().map(|v| v.name().to_string()).collect();
        assert_eq!(vars, vec!["r2", "role2", "x2"]);

        let cmp = Atom::value("x", ValueConstraint::new(Comparator::Gt, Operand::Var(Var::new("y"))));
        assert_eq!(cmp.rename(&|v| Var::new(format!("{}_", v.name()))).vars().len(), 2);
    }

    #[test]
    fn display_is_readable() {
        let atom = Atom::relation(
            "r",
            Some("ternary"),
            vec![RolePlayer::new(Some("baseRole1"), "x"), RolePlayer::new(None, "y")],
        );
        assert_eq!(atom.to_string(), "$r (baseRole1: $x, $y) isa ternary;");
        assert_eq!(Atom::isa("x", "person").to_string(), "$x isa person;");
    }

    #[test]
    fn ontological_atoms() {
        assert!(Atom::isa_var("x", "t").is_ontological());
        assert!(!Atom::isa("x", "person").is_ontological());
        assert!(Atom::Sub {
            var: Var::new("t"),
            sup: TypeRef::Label(Label::new("entity"))
        }
        .is_ontological());
    }
}
