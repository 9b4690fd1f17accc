use kgreason_pattern::schema::{ATTRIBUTE, ENTITY, RELATION, ROLE};
use kgreason_pattern::{Atom, Comparator, Conjunction, ConjunctionBuilder, Schema, ValueType, Var};
use kgreason_reasoner::{
    Equivalence, ReasonerAtomicQuery, ReasonerQuery, ResolutionPlan, RuleGraph, Unifier, UnifierType,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

// ============================================================================
// Fixture
// ============================================================================

fn generic_schema() -> Schema {
    Schema::builder()
        .entity("baseRoleEntity", ENTITY)
        .entity("subRoleEntity", "baseRoleEntity")
        .role("baseRole1", ROLE)
        .role("baseRole2", ROLE)
        .role("baseRole3", ROLE)
        .role("subRole1", "baseRole1")
        .role("subRole2", "baseRole2")
        .role("subSubRole2", "subRole2")
        .relation(
            "ternary",
            RELATION,
            &["baseRole1", "baseRole2", "baseRole3", "subRole1", "subRole2", "subSubRole2"],
        )
        .attribute("resource", ATTRIBUTE, ValueType::String)
        .plays("baseRoleEntity", &["baseRole1", "baseRole2", "baseRole3"])
        .build()
        .expect("generic schema")
}

const PLAYERS: [&str; 4] = ["a", "b", "c", "d"];
const ATTRIBUTES: [&str; 2] = ["n", "m"];
const ROLES: [&str; 3] = ["baseRole1", "subRole1", "baseRole2"];
const ENTITY_TYPES: [&str; 2] = ["baseRoleEntity", "subRoleEntity"];

#[derive(Debug, Clone)]
enum AtomShape {
    Relation(Vec<(&'static str, &'static str)>),
    Has(&'static str, &'static str),
    Isa(&'static str, &'static str),
    Pin(&'static str, &'static str),
}

fn pick(options: &'static [&'static str]) -> impl Strategy<Value = &'static str> {
    proptest::sample::select(options)
}

fn slots(max: usize) -> impl Strategy<Value = Vec<(&'static str, &'static str)>> {
    proptest::collection::vec((pick(&ROLES), pick(&PLAYERS)), 1..=max)
}

fn atom_shape() -> impl Strategy<Value = AtomShape> {
    prop_oneof![
        3 => slots(3).prop_map(AtomShape::Relation),
        2 => (pick(&PLAYERS), pick(&ATTRIBUTES)).prop_map(|(o, a)| AtomShape::Has(o, a)),
        1 => (pick(&PLAYERS), pick(&ENTITY_TYPES)).prop_map(|(v, t)| AtomShape::Isa(v, t)),
        1 => (pick(&ATTRIBUTES), pick(&["v", "w"])).prop_map(|(v, lit)| AtomShape::Pin(v, lit)),
    ]
}

fn add(builder: ConjunctionBuilder, shape: &AtomShape) -> ConjunctionBuilder {
    match shape {
        AtomShape::Relation(slots) => {
            let slots: Vec<(Option<&str>, &str)> = slots.iter().map(|(r, p)| (Some(*r), *p)).collect();
            builder.relation(None, Some("ternary"), &slots)
        }
        AtomShape::Has(owner, attr) => builder.has(owner, "resource", attr),
        AtomShape::Isa(var, ty) => builder.isa(var, ty),
        AtomShape::Pin(var, lit) => builder.value(var, Comparator::Eq, *lit),
    }
}

fn query_of(shapes: &[AtomShape]) -> ReasonerQuery {
    let conj = shapes.iter().fold(Conjunction::builder(), add).build();
    ReasonerQuery::from_conjunction(&conj)
}

fn query() -> impl Strategy<Value = ReasonerQuery> {
    proptest::collection::vec(atom_shape(), 1..6).prop_map(|shapes| query_of(&shapes))
}

/// A permutation of the named variables, as a unifier.
fn renaming() -> impl Strategy<Value = Unifier> {
    (
        Just(PLAYERS.to_vec()).prop_shuffle(),
        Just(ATTRIBUTES.to_vec()).prop_shuffle(),
    )
        .prop_map(|(players, attributes)| {
            PLAYERS
                .iter()
                .zip(players)
                .chain(ATTRIBUTES.iter().zip(attributes))
                .map(|(from, to)| (Var::new(*from), Var::new(to)))
                .collect::<Unifier>()
        })
}

/// A single relation with an optional type guard and id pin on its first
/// player.
fn relation_query() -> impl Strategy<Value = ReasonerAtomicQuery> {
    (
        slots(3),
        proptest::option::of(pick(&ENTITY_TYPES)),
        proptest::option::of(pick(&["V1", "V2"])),
    )
        .prop_map(|(slots, ty, id)| {
            let first = slots[0].1;
            let mut shapes = vec![AtomShape::Relation(slots)];
            if let Some(ty) = ty {
                shapes.push(AtomShape::Isa(first, ty));
            }
            let mut conj = shapes.iter().fold(Conjunction::builder(), add);
            if let Some(id) = id {
                conj = conj.id(first, id);
            }
            ReasonerAtomicQuery::from_query(ReasonerQuery::from_conjunction(&conj.build()))
                .expect("one relation is atomic")
        })
}

fn sorted(atoms: impl IntoIterator<Item = Atom>) -> Vec<Atom> {
    let mut atoms: Vec<Atom> = atoms.into_iter().collect();
    atoms.sort();
    atoms
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn equivalence_is_reflexive(q in query()) {
        for eq in [Equivalence::Alpha, Equivalence::Structural] {
            prop_assert!(q.is_equivalent(&q, eq));
            prop_assert!(q.is_equivalent(&q.clone(), eq));
        }
    }

    #[test]
    fn renaming_preserves_equivalence_and_hash(q in query(), unifier in renaming()) {
        let renamed = q.rename(&unifier);
        for eq in [Equivalence::Alpha, Equivalence::Structural] {
            prop_assert!(q.is_equivalent(&renamed, eq));
            prop_assert!(renamed.is_equivalent(&q, eq));
            prop_assert_eq!(q.equivalence_hash(eq), renamed.equivalence_hash(eq));
        }
    }

    #[test]
    fn alpha_equivalence_implies_structural(a in query(), b in query()) {
        if a.is_equivalent(&b, Equivalence::Alpha) {
            prop_assert!(a.is_equivalent(&b, Equivalence::Structural));
        }
        if a.is_equivalent(&b, Equivalence::Structural) {
            prop_assert_eq!(
                a.equivalence_hash(Equivalence::Structural),
                b.equivalence_hash(Equivalence::Structural)
            );
        }
    }

    #[test]
    fn plan_orders_every_selectable_atom_once(q in query()) {
        let schema = generic_schema();
        let rules = RuleGraph::new(Vec::new(), &schema).unwrap();
        let plan = ResolutionPlan::new(&q, &rules, &schema);
        prop_assert_eq!(
            sorted(plan.atoms().iter().cloned()),
            sorted(q.selectable_atoms().into_iter().cloned())
        );
    }

    #[test]
    fn plan_only_starts_a_new_component_when_nothing_connects(q in query()) {
        let schema = generic_schema();
        let rules = RuleGraph::new(Vec::new(), &schema).unwrap();
        let plan = ResolutionPlan::new(&q, &rules, &schema);
        let atoms = plan.atoms();
        for i in 1..atoms.len() {
            let placed: BTreeSet<Var> = atoms[..i].iter().flat_map(Atom::vars).collect();
            if atoms[i].vars().is_disjoint(&placed) {
                prop_assert!(atoms[i..].iter().all(|a| a.vars().is_disjoint(&placed)));
            }
        }
    }

    #[test]
    fn bijective_unifiers_invert(a in relation_query(), b in relation_query()) {
        let schema = generic_schema();
        for ty in [UnifierType::Exact, UnifierType::Structural] {
            prop_assert_eq!(
                a.multi_unifier(&b, ty, &schema).inverse(),
                b.multi_unifier(&a, ty, &schema)
            );
        }
    }

    #[test]
    fn renamed_copy_unifies_exactly(a in relation_query(), unifier in renaming()) {
        let schema = generic_schema();
        let renamed = ReasonerAtomicQuery::from_query(a.query().rename(&unifier)).unwrap();
        prop_assert!(!a.multi_unifier(&renamed, UnifierType::Exact, &schema).is_empty());
        prop_assert!(a.subsumes(&renamed, &schema));
    }
}
