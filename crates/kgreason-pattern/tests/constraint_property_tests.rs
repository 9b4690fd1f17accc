use kgreason_pattern::{Atom, Comparator, Pattern, Value, ValueConstraint};
use proptest::prelude::*;

fn comparator() -> impl Strategy<Value = Comparator> {
    prop_oneof![
        Just(Comparator::Eq),
        Just(Comparator::Neq),
        Just(Comparator::Gt),
        Just(Comparator::Gte),
        Just(Comparator::Lt),
        Just(Comparator::Lte),
    ]
}

fn long_constraint() -> impl Strategy<Value = ValueConstraint> {
    (comparator(), -5i64..5).prop_map(|(c, n)| ValueConstraint::literal(c, n))
}

fn string_constraint() -> impl Strategy<Value = ValueConstraint> {
    (
        prop_oneof![Just(Comparator::Eq), Just(Comparator::Contains)],
        proptest::string::string_regex("[ab]{0,3}").unwrap(),
    )
        .prop_map(|(c, s)| ValueConstraint::literal(c, s.as_str()))
}

/// A disjunction of `n` single-atom alternatives over distinct variables.
fn alternatives(tag: &'static str, n: usize) -> Pattern {
    Pattern::or((0..n).map(|i| Pattern::from(Atom::isa(format!("{tag}{i}").as_str(), "thing"))))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn implication_is_sound_over_longs(a in long_constraint(), b in long_constraint(), v in -8i64..8) {
        let v = Value::Long(v);
        if a.implies(&b) && a.test(&v) {
            prop_assert!(b.test(&v), "{a} implies {b} but {v} separates them");
        }
    }

    #[test]
    fn implication_is_sound_over_strings(
        a in string_constraint(),
        b in string_constraint(),
        v in proptest::string::string_regex("[ab]{0,4}").unwrap(),
    ) {
        let v = Value::String(v);
        if a.implies(&b) && a.test(&v) {
            prop_assert!(b.test(&v), "{a} implies {b} but {v} separates them");
        }
    }

    #[test]
    fn implication_is_reflexive(a in long_constraint()) {
        prop_assert!(a.implies(&a));
    }

    #[test]
    fn compatibility_never_refutes_a_shared_witness(a in long_constraint(), b in long_constraint(), v in -8i64..8) {
        let v = Value::Long(v);
        if a.test(&v) && b.test(&v) {
            prop_assert!(a.compatible(&b));
            prop_assert!(b.compatible(&a));
        }
    }

    #[test]
    fn conjunction_of_disjunctions_multiplies_out(n in 1usize..4, m in 1usize..4) {
        let pattern = Pattern::and([alternatives("x", n), alternatives("y", m)]);
        let disjuncts = pattern.into_disjuncts().unwrap();
        prop_assert_eq!(disjuncts.len(), n * m);
        prop_assert!(disjuncts.iter().all(|d| d.atoms().len() == 2 && d.negations().is_empty()));
    }
}
