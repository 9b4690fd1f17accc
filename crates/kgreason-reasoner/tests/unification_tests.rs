//! Unification, equivalence and subsumption over the generic role schema.

use kgreason_pattern::schema::{ATTRIBUTE, ENTITY, RELATION, ROLE};
use kgreason_pattern::{Comparator, Conjunction, Rule, RolePlayer, Schema, ValueType, Var};
use kgreason_reasoner::{Equivalence, ReasonerAtomicQuery, ReasonerQuery, RuleGraph, UnifierType};

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

fn atomic(schema: &Schema, conj: Conjunction) -> ReasonerAtomicQuery {
    ReasonerAtomicQuery::new(&conj, schema).expect("atomic query")
}

fn relation(schema: &Schema, slots: &[(&str, &str)]) -> ReasonerAtomicQuery {
    let slots: Vec<(Option<&str>, &str)> = slots.iter().map(|(r, p)| (Some(*r), *p)).collect();
    atomic(schema, Conjunction::builder().relation(None, Some("ternary"), &slots).build())
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_pinned_resource_does_not_exactly_unify_with_open_resource() {
    let schema = generic_schema();
    let open = atomic(&schema, Conjunction::builder().has("x", "resource", "r").build());
    let pinned = atomic(&schema, Conjunction::builder().has_value("x", "resource", "v").build());

    assert!(open.multi_unifier(&pinned, UnifierType::Exact, &schema).is_empty());
    assert!(!pinned.multi_unifier(&open, UnifierType::Rule, &schema).is_empty());
}

#[test]
fn test_meta_roles_give_one_unifier_per_assignment() {
    let schema = generic_schema();
    let head = relation(&schema, &[("baseRole1", "u"), ("baseRole2", "v")]);
    let query = relation(&schema, &[("role", "x"), ("role", "y")]);

    let unifiers = head.multi_unifier(&query, UnifierType::Rule, &schema);
    assert_eq!(unifiers.len(), 2);
    let straight = unifiers
        .iter()
        .any(|u| u.contains(&Var::new("u"), &Var::new("x")) && u.contains(&Var::new("v"), &Var::new("y")));
    let crossed = unifiers
        .iter()
        .any(|u| u.contains(&Var::new("u"), &Var::new("y")) && u.contains(&Var::new("v"), &Var::new("x")));
    assert!(straight && crossed);
}

#[test]
fn test_reflexive_and_non_reflexive_relations_do_not_subsume() {
    let schema = generic_schema();
    let reflexive = relation(&schema, &[("baseRole1", "x"), ("baseRole2", "x")]);
    let distinct = relation(&schema, &[("baseRole1", "x"), ("baseRole2", "y")]);

    assert!(!reflexive.subsumes(&distinct, &schema));
    assert!(!distinct.subsumes(&reflexive, &schema));
}

#[test]
fn test_disconnected_resolvable_atoms_require_reiteration() {
    let schema = generic_schema();
    let rule = Rule::new(
        "tag-sub-entities",
        Conjunction::builder().isa("x", "subRoleEntity").build(),
        Conjunction::builder().has_value("x", "resource", "tagged").build(),
    )
    .unwrap();
    let rules = RuleGraph::new(vec![rule], &schema).unwrap();
    assert!(!rules.is_recursive(rules.ids().next().unwrap()));

    let disconnected = ReasonerQuery::new(
        &Conjunction::builder().has("x", "resource", "a").has("y", "resource", "b").build(),
        &schema,
    )
    .unwrap();
    assert!(disconnected.requires_reiteration(&rules, &schema));

    let connected = ReasonerQuery::new(
        &Conjunction::builder().has("x", "resource", "a").has("x", "resource", "b").build(),
        &schema,
    )
    .unwrap();
    assert!(!connected.requires_reiteration(&rules, &schema));
}

#[test]
fn test_copies_are_alpha_equivalent_with_equal_hash() {
    let schema = generic_schema();
    let query = atomic(
        &schema,
        Conjunction::builder()
            .relation(Some("r"), Some("ternary"), &[(Some("subRole1"), "x"), (Some("baseRole2"), "y")])
            .isa("x", "subRoleEntity")
            .id("y", "V7")
            .build(),
    );
    let copy = query.clone();
    assert!(query.is_equivalent(&copy, Equivalence::Alpha));
    assert_eq!(
        query.equivalence_hash(Equivalence::Alpha),
        copy.equivalence_hash(Equivalence::Alpha)
    );
}

// ============================================================================
// Properties on concrete cases
// ============================================================================

#[test]
fn test_symmetric_slots_give_factorial_unifiers() {
    let schema = generic_schema();
    let child = relation(&schema, &[("baseRole1", "a"), ("baseRole1", "b"), ("baseRole1", "c")]);
    let parent = relation(&schema, &[("baseRole1", "x"), ("baseRole1", "y"), ("baseRole1", "z")]);
    assert_eq!(child.multi_unifier(&parent, UnifierType::Exact, &schema).len(), 6);

    let pair_child = relation(&schema, &[("baseRole1", "a"), ("baseRole1", "b")]);
    let pair_parent = relation(&schema, &[("baseRole1", "x"), ("baseRole1", "y")]);
    assert_eq!(pair_child.multi_unifier(&pair_parent, UnifierType::Structural, &schema).len(), 2);
}

#[test]
fn test_exact_and_structural_unifiers_invert() {
    let schema = generic_schema();
    let a = atomic(
        &schema,
        Conjunction::builder()
            .relation(None, Some("ternary"), &[(Some("baseRole1"), "x"), (Some("baseRole1"), "y")])
            .id("x", "V1")
            .build(),
    );
    let b = atomic(
        &schema,
        Conjunction::builder()
            .relation(None, Some("ternary"), &[(Some("baseRole1"), "p"), (Some("baseRole1"), "q")])
            .id("q", "V1")
            .build(),
    );
    for ty in [UnifierType::Exact, UnifierType::Structural] {
        let forward = a.multi_unifier(&b, ty, &schema);
        assert!(!forward.is_empty());
        assert_eq!(forward.inverse(), b.multi_unifier(&a, ty, &schema));
    }
}

#[test]
fn test_role_variables_must_match_for_bijective_strengths() {
    let schema = generic_schema();
    let with_var = atomic(
        &schema,
        Conjunction::builder()
            .relation_with(None, Some("ternary"), vec![RolePlayer::with_role_var("rv", Some("baseRole1"), "x")])
            .build(),
    );
    let without = relation(&schema, &[("baseRole1", "x")]);
    assert!(with_var.multi_unifier(&without, UnifierType::Exact, &schema).is_empty());
    assert!(!without.multi_unifier(&with_var, UnifierType::Rule, &schema).is_empty());
}

#[test]
fn test_mutual_subsumption_means_equivalence() {
    let schema = generic_schema();
    let a = atomic(&schema, Conjunction::builder().has("x", "resource", "n").value("n", Comparator::Eq, "v").build());
    let b = atomic(&schema, Conjunction::builder().has("y", "resource", "m").value("m", Comparator::Eq, "v").build());
    assert!(a.subsumes(&b, &schema) && b.subsumes(&a, &schema));
    assert!(a.is_equivalent(&b, Equivalence::Alpha));

    let open = atomic(&schema, Conjunction::builder().has("x", "resource", "n").build());
    assert!(open.subsumes(&a, &schema));
    assert!(!a.subsumes(&open, &schema));
}

#[test]
fn test_sub_roles_are_subsumed_by_their_parents() {
    let schema = generic_schema();
    let general = relation(&schema, &[("baseRole1", "x"), ("baseRole2", "y")]);
    let specific = relation(&schema, &[("subRole1", "x"), ("subSubRole2", "y")]);
    assert!(general.subsumes(&specific, &schema));
    assert!(!specific.subsumes(&general, &schema));

    let diffs = general.multi_unifier_with_semantic_diff(&specific, &schema);
    assert_eq!(diffs.len(), 1);
    let (_, diff) = &diffs[0];
    assert!(!diff.is_trivial());
    assert!(diff.definitions().iter().all(|d| !d.played_roles.is_empty()));
}

#[test]
fn test_alpha_implies_structural_but_not_conversely() {
    let schema = generic_schema();
    let a = atomic(&schema, Conjunction::builder().has_value("x", "resource", "v").build());
    let b = atomic(&schema, Conjunction::builder().has_value("y", "resource", "v").build());
    let c = atomic(&schema, Conjunction::builder().has_value("y", "resource", "w").build());
    assert!(a.is_equivalent(&b, Equivalence::Alpha));
    assert!(a.is_equivalent(&b, Equivalence::Structural));
    assert!(!a.is_equivalent(&c, Equivalence::Alpha));
    assert!(a.is_equivalent(&c, Equivalence::Structural));
    assert_eq!(
        a.equivalence_hash(Equivalence::Structural),
        c.equivalence_hash(Equivalence::Structural)
    );
}

// ============================================================================
// Structural subsumption
// ============================================================================

fn owns(schema: &Schema, owner: &str, attr: &str, constraint: Option<(Comparator, &str)>) -> ReasonerAtomicQuery {
    let mut conj = Conjunction::builder().has(owner, "resource", attr);
    if let Some((comparator, literal)) = constraint {
        conj = conj.value(attr, comparator, literal);
    }
    atomic(schema, conj.build())
}

fn pinned_entity(schema: &Schema, var: &str, id: Option<&str>) -> ReasonerAtomicQuery {
    let mut conj = Conjunction::builder().isa(var, "baseRoleEntity");
    if let Some(id) = id {
        conj = conj.id(var, id);
    }
    atomic(schema, conj.build())
}

#[test]
fn test_structural_subsumption_ignores_literal_identity_only() {
    let schema = generic_schema();
    let v = owns(&schema, "x", "n", Some((Comparator::Eq, "v")));
    let w = owns(&schema, "y", "m", Some((Comparator::Eq, "w")));
    assert!(v.structurally_subsumes(&w, &schema));
    assert!(w.structurally_subsumes(&v, &schema));
    assert!(!v.subsumes(&w, &schema));

    let contains = owns(&schema, "y", "m", Some((Comparator::Contains, "v")));
    assert!(!v.structurally_subsumes(&contains, &schema));
    assert!(!contains.structurally_subsumes(&v, &schema));
}

#[test]
fn test_structural_subsumption_is_one_directional() {
    let schema = generic_schema();
    let open = owns(&schema, "x", "n", None);
    let pinned = owns(&schema, "y", "m", Some((Comparator::Eq, "w")));
    assert!(open.structurally_subsumes(&pinned, &schema));
    assert!(!pinned.structurally_subsumes(&open, &schema));
}

#[test]
fn test_structural_subsumption_needs_an_id_where_the_parent_has_one() {
    let schema = generic_schema();
    let v1 = pinned_entity(&schema, "x", Some("V1"));
    let v2 = pinned_entity(&schema, "y", Some("V2"));
    let any = pinned_entity(&schema, "y", None);

    assert!(v1.structurally_subsumes(&v2, &schema));
    assert!(!v1.subsumes(&v2, &schema));

    assert!(any.structurally_subsumes(&v1, &schema));
    assert!(!v1.structurally_subsumes(&any, &schema));
}
