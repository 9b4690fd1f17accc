//! Matching atoms against individual facts, and guard evaluation.

use kgreason_pattern::{Atom, ConceptId, Label, Operand, RolePlayer, TypeContext, TypeRef, Var};

use crate::concept::{Concept, ConceptMap, RolePlayerRef, Thing};

/// A stored or concluded fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fact {
    Instance(Thing),
    Relation { relation: Thing, players: Vec<(Label, Thing)> },
    Has { owner: Thing, attribute: Thing },
}

impl Fact {
    /// The instance the fact introduces.
    pub fn thing(&self) -> &Thing {
        match self {
            Fact::Instance(t) => t,
            Fact::Relation { relation, .. } => relation,
            Fact::Has { attribute, .. } => attribute,
        }
    }

    /// Identity used to detect a derivation depending on its own conclusion.
    pub fn key(&self) -> String {
        match self {
            Fact::Instance(t) | Fact::Relation { relation: t, .. } => t.id.to_string(),
            Fact::Has { owner, attribute } => format!("{}@{}", attribute.id, owner.id),
        }
    }

    pub fn role_players(&self) -> Vec<RolePlayerRef> {
        match self {
            Fact::Relation { players, .. } => players
                .iter()
                .map(|(role, player)| RolePlayerRef {
                    role: role.clone(),
                    player: player.id.clone(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Every binding of `atom`'s variables under which `fact` satisfies it.
pub fn match_fact(atom: &Atom, fact: &Fact, ctx: &dyn TypeContext) -> Vec<ConceptMap> {
    match (atom, fact) {
        (
            Atom::Isa {
                var,
                ty: TypeRef::Label(label),
            },
            _,
        ) => {
            let thing = fact.thing();
            if ctx.is_subtype(&thing.type_label, label) {
                bind(ConceptMap::new(), var, thing).into_iter().collect()
            } else {
                Vec::new()
            }
        }
        (Atom::Isa { var, ty: TypeRef::Var(tv) }, _) => {
            let thing = fact.thing();
            std::iter::once(thing.type_label.clone())
                .chain(ctx.super_types(&thing.type_label))
                .filter_map(|ty| {
                    bind(ConceptMap::new(), var, thing)?.with(tv.clone(), Concept::of_type(ty))
                })
                .collect()
        }
        (
            Atom::Has {
                owner: ov,
                attribute_type,
                attribute: av,
            },
            Fact::Has { owner, attribute },
        ) => {
            if !ctx.is_subtype(&attribute.type_label, attribute_type) {
                return Vec::new();
            }
            bind(ConceptMap::new(), ov, owner)
                .and_then(|m| bind(m, av, attribute))
                .into_iter()
                .collect()
        }
        (
            Atom::Relation { var, ty, players },
            Fact::Relation {
                relation,
                players: fact_players,
            },
        ) => {
            if ty.as_ref().is_some_and(|t| !ctx.is_subtype(&relation.type_label, t)) {
                return Vec::new();
            }
            if players.len() > fact_players.len() {
                return Vec::new();
            }
            let Some(base) = bind(ConceptMap::new(), var, relation) else {
                return Vec::new();
            };
            let mut out = Vec::new();
            let mut used = vec![false; fact_players.len()];
            assign_players(players, fact_players, &mut used, base, ctx, &mut out);
            out.sort();
            out.dedup();
            out
        }
        _ => Vec::new(),
    }
}

fn bind(map: ConceptMap, var: &Var, thing: &Thing) -> Option<ConceptMap> {
    map.with(var.clone(), Concept::Thing(thing.clone()))
}

fn assign_players(
    slots: &[RolePlayer],
    fact_players: &[(Label, Thing)],
    used: &mut [bool],
    map: ConceptMap,
    ctx: &dyn TypeContext,
    out: &mut Vec<ConceptMap>,
) {
    let Some((slot, rest)) = slots.split_first() else {
        out.push(map);
        return;
    };
    for (i, (role, player)) in fact_players.iter().enumerate() {
        if used[i] || slot.role.as_ref().is_some_and(|r| !ctx.is_subtype(role, r)) {
            continue;
        }
        let Some(mut next) = bind(map.clone(), &slot.player, player) else {
            continue;
        };
        if let Some(rv) = &slot.role_var {
            match next.with(rv.clone(), Concept::of_type(role.clone())) {
                Some(m) => next = m,
                None => continue,
            }
        }
        used[i] = true;
        assign_players(rest, fact_players, used, next, ctx, out);
        used[i] = false;
    }
}

/// Do the bindings in `map` satisfy `guards`? Guards on unbound variables
/// pass; they are checked once the variable is bound.
pub fn satisfies<'a>(guards: impl IntoIterator<Item = &'a Atom>, map: &ConceptMap, ctx: &dyn TypeContext) -> bool {
    guards.into_iter().all(|guard| match guard {
        Atom::Id { var, id } => map.get(var).map_or(true, |c| c.id() == Some(id)),
        Atom::Value { var, constraint } => {
            let Some(concept) = map.get(var) else {
                return true;
            };
            let Some(value) = concept.value() else {
                return false;
            };
            match &constraint.operand {
                Operand::Literal(_) => constraint.test(value),
                Operand::Var(other) => match map.get(other) {
                    Some(rhs) => rhs.value().is_some_and(|rhs| constraint.test_with(value, rhs)),
                    None => true,
                },
            }
        }
        Atom::Isa {
            var,
            ty: TypeRef::Label(label),
        } => map.get(var).map_or(true, |c| ctx.is_subtype(c.label(), label)),
        _ => true,
    })
}

/// Id pinned on `var` by `guards`, if any.
pub(crate) fn pinned_id<'a>(guards: &[&'a Atom], var: &Var) -> Option<&'a ConceptId> {
    guards.iter().copied().find_map(|g| match g {
        Atom::Id { var: v, id } if v == var => Some(id),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgreason_pattern::Schema;

    fn schema() -> Schema {
        Schema::builder()
            .entity("person", "entity")
            .role("parent", "role")
            .role("mother", "parent")
            .role("child", "role")
            .relation("parentship", "relation", &["parent", "mother", "child"])
            .plays("person", &["parent", "mother", "child"])
            .build()
            .unwrap()
    }

    fn parentship() -> Fact {
        Fact::Relation {
            relation: Thing::relation("R", "parentship", Vec::new()),
            players: vec![
                (Label::new("mother"), Thing::entity("M", "person")),
                (Label::new("child"), Thing::entity("C", "person")),
            ],
        }
    }

    #[test]
    fn role_hierarchy_applies_to_facts() {
        let s = schema();
        let atom = Atom::relation(
            "r",
            Some("parentship"),
            vec![RolePlayer::new(Some("parent"), "p"), RolePlayer::new(None, "c")],
        );
        let maps = match_fact(&atom, &parentship(), &s);
        // `$c` has no role, so it takes the slot `$p` left.
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].get(&Var::new("p")).and_then(Concept::id), Some(&ConceptId::new("M")));
    }

    #[test]
    fn role_variables_bind_the_played_role() {
        let s = schema();
        let atom = Atom::relation("r", None, vec![RolePlayer::with_role_var("role", None, "x")]);
        let maps = match_fact(&atom, &parentship(), &s);
        assert_eq!(maps.len(), 2);
        assert!(maps
            .iter()
            .any(|m| m.get(&Var::new("role")) == Some(&Concept::of_type(Label::new("mother")))));
    }

    #[test]
    fn isa_matches_supertypes_of_the_instance() {
        let s = schema();
        let atom = Atom::isa("x", "relation");
        assert_eq!(match_fact(&atom, &parentship(), &s).len(), 1);
        let atom = Atom::isa("x", "person");
        assert!(match_fact(&atom, &parentship(), &s).is_empty());
    }

    #[test]
    fn guards_on_unbound_variables_pass() {
        let s = schema();
        let map: ConceptMap = [(Var::new("x"), Concept::from(Thing::entity("A", "person")))]
            .into_iter()
            .collect();
        let id_a = Atom::id("x", "A");
        let id_b = Atom::id("x", "B");
        let unbound = Atom::id("y", "B");
        assert!(satisfies([&id_a, &unbound], &map, &s));
        assert!(!satisfies([&id_b], &map, &s));
    }
}
