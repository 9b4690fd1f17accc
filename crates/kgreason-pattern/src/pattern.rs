//! Patterns and conjunctions.
//!
//! A [`Pattern`] is the tree the query layer hands over (atoms combined with
//! `and`/`or`/`not`). The reasoner only ever works on [`Conjunction`]s: a flat
//! list of atoms plus negated sub-conjunctions, obtained through
//! [`Pattern::into_disjuncts`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::atom::{Atom, RolePlayer, TypeRef};
use crate::error::PatternError;
use crate::schema::{Schema, TypeKind};
use crate::term::{Comparator, Label, Operand, Value, ValueConstraint, Var};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern", content = "of", rename_all = "snake_case")]
pub enum Pattern {
    Atom(Atom),
    And(Vec<Pattern>),
    Or(Vec<Pattern>),
    Not(Box<Pattern>),
}

type Disjunct = (Vec<Atom>, Vec<Conjunction>);

impl Pattern {
    pub fn and(patterns: impl IntoIterator<Item = Pattern>) -> Self {
        Pattern::And(patterns.into_iter().collect())
    }

    pub fn or(patterns: impl IntoIterator<Item = Pattern>) -> Self {
        Pattern::Or(patterns.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(pattern: Pattern) -> Self {
        Pattern::Not(Box::new(pattern))
    }

    fn contains_disjunction(&self) -> bool {
        match self {
            Pattern::Atom(_) => false,
            Pattern::Or(_) => true,
            Pattern::And(ps) => ps.iter().any(Pattern::contains_disjunction),
            Pattern::Not(p) => p.contains_disjunction(),
        }
    }

    /// Disjunctive normal form: one conjunction per disjunct.
    ///
    /// Negated sub-patterns must be disjunction-free and become negation
    /// blocks of the enclosing conjunction.
    pub fn into_disjuncts(self) -> Result<Vec<Conjunction>, PatternError> {
        Ok(self
            .dnf()?
            .into_iter()
            .map(|(atoms, negations)| Conjunction::new(atoms, negations))
            .collect())
    }

    fn dnf(self) -> Result<Vec<Disjunct>, PatternError> {
        match self {
            Pattern::Atom(atom) => Ok(vec![(vec![atom], Vec::new())]),
            Pattern::And(parts) => {
                let mut acc: Vec<Disjunct> = vec![(Vec::new(), Vec::new())];
                for part in parts {
                    let alternatives = part.dnf()?;
                    let mut next = Vec::with_capacity(acc.len() * alternatives.len());
                    for (atoms, negs) in &acc {
                        for (alt_atoms, alt_negs) in &alternatives {
                            let mut a = atoms.clone();
                            a.extend(alt_atoms.iter().cloned());
                            let mut n = negs.clone();
                            n.extend(alt_negs.iter().cloned());
                            next.push((a, n));
                        }
                    }
                    acc = next;
                }
                Ok(acc)
            }
            Pattern::Or(parts) => {
                let mut out = Vec::new();
                for part in parts {
                    out.extend(part.dnf()?);
                }
                Ok(out)
            }
            Pattern::Not(inner) => {
                if inner.contains_disjunction() {
                    return Err(PatternError::DisjunctionInNegation);
                }
                let mut disjuncts = inner.dnf()?;
                match (disjuncts.pop(), disjuncts.is_empty()) {
                    (Some((atoms, negs)), true) => Ok(vec![(Vec::new(), vec![Conjunction::new(atoms, negs)])]),
                    _ => Err(PatternError::DisjunctionInNegation),
                }
            }
        }
    }
}

impl From<Atom> for Pattern {
    fn from(atom: Atom) -> Self {
        Pattern::Atom(atom)
    }
}

impl From<Conjunction> for Pattern {
    fn from(conj: Conjunction) -> Self {
        let mut parts: Vec<Pattern> = conj.atoms.into_iter().map(Pattern::Atom).collect();
        parts.extend(conj.negations.into_iter().map(|n| Pattern::not(n.into())));
        Pattern::And(parts)
    }
}

// ============================================================================
// Conjunction
// ============================================================================

/// A flat conjunction of atoms with optional negation blocks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conjunction {
    atoms: Vec<Atom>,
    negations: Vec<Conjunction>,
}

impl Conjunction {
    /// Identical atoms are kept once, in first-occurrence order.
    pub fn new(atoms: Vec<Atom>, negations: Vec<Conjunction>) -> Self {
        let mut deduped: Vec<Atom> = Vec::with_capacity(atoms.len());
        for atom in atoms {
            if !deduped.contains(&atom) {
                deduped.push(atom);
            }
        }
        Self {
            atoms: deduped,
            negations,
        }
    }

    pub fn from_atoms(atoms: Vec<Atom>) -> Self {
        Self::new(atoms, Vec::new())
    }

    pub fn builder() -> ConjunctionBuilder {
        ConjunctionBuilder::default()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn negations(&self) -> &[Conjunction] {
        &self.negations
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty() && self.negations.is_empty()
    }

    /// Variables of the positive atoms.
    pub fn vars(&self) -> BTreeSet<Var> {
        self.atoms.iter().flat_map(Atom::vars).collect()
    }

    /// Named (user-written) variables of the positive atoms.
    pub fn named_vars(&self) -> BTreeSet<Var> {
        self.vars().into_iter().filter(|v| !v.is_anonymous()).collect()
    }

    pub fn rename(&self, f: &impl Fn(&Var) -> Var) -> Conjunction {
        Conjunction {
            atoms: self.atoms.iter().map(|a| a.rename(f)).collect(),
            negations: self.negations.iter().map(|n| n.rename(f)).collect(),
        }
    }

    /// Every negation block must share at least one variable with its
    /// enclosing scope; otherwise it negates an unrelated pattern.
    pub fn check_negation_scoping(&self) -> Result<(), PatternError> {
        self.check_scoping_in(&BTreeSet::new())
    }

    fn check_scoping_in(&self, outer: &BTreeSet<Var>) -> Result<(), PatternError> {
        let mut scope = outer.clone();
        scope.extend(self.vars());
        for neg in &self.negations {
            let neg_vars: BTreeSet<Var> = neg
                .vars()
                .into_iter()
                .chain(neg.negations.iter().flat_map(|n| n.vars()))
                .collect();
            if !neg_vars.iter().any(|v| scope.contains(v)) {
                let var = neg_vars
                    .iter()
                    .find(|v| !v.is_anonymous())
                    .or_else(|| neg_vars.iter().next())
                    .cloned()
                    .unwrap_or_else(|| Var::new("_"));
                return Err(PatternError::UnboundNegationVariable { var });
            }
            neg.check_scoping_in(&scope)?;
        }
        Ok(())
    }

    /// Construction-time validation: non-empty, negation scoping, and every
    /// label known to `schema` with the right kind.
    pub fn validate(&self, schema: &Schema) -> Result<(), PatternError> {
        if self.atoms.is_empty() {
            return Err(PatternError::EmptyPattern);
        }
        self.check_negation_scoping()?;
        self.validate_labels(schema)
    }

    fn validate_labels(&self, schema: &Schema) -> Result<(), PatternError> {
        for atom in &self.atoms {
            validate_atom(atom, schema)?;
        }
        for neg in &self.negations {
            if neg.atoms.is_empty() {
                return Err(PatternError::EmptyPattern);
            }
            neg.validate_labels(schema)?;
        }
        Ok(())
    }
}

fn expect_kind(
    schema: &Schema,
    label: &Label,
    expected: &'static str,
    accept: impl Fn(TypeKind) -> bool,
) -> Result<(), PatternError> {
    match schema.kind(label) {
        None => Err(PatternError::UnknownLabel(label.clone())),
        Some(kind) if accept(kind) => Ok(()),
        Some(kind) => Err(PatternError::UnexpectedLabelKind {
            label: label.clone(),
            expected,
            actual: kind.to_string(),
        }),
    }
}

fn validate_atom(atom: &Atom, schema: &Schema) -> Result<(), PatternError> {
    let is_role = |k: TypeKind| k == TypeKind::Role;
    match atom {
        Atom::Isa { ty: TypeRef::Label(l), .. } => expect_kind(schema, l, "thing type", TypeKind::is_thing),
        Atom::Sub { sup: TypeRef::Label(l), .. } => expect_kind(schema, l, "type", |_| true),
        Atom::Plays { role: TypeRef::Label(l), .. } | Atom::Relates { role: TypeRef::Label(l), .. } => {
            expect_kind(schema, l, "role", is_role)
        }
        Atom::Has { attribute_type, .. } => {
            expect_kind(schema, attribute_type, "attribute type", |k| k == TypeKind::Attribute)
        }
        Atom::Relation { ty, players, .. } => {
            if let Some(ty) = ty {
                expect_kind(schema, ty, "relation type", |k| k == TypeKind::Relation)?;
            }
            for role in players.iter().filter_map(|rp| rp.role.as_ref()) {
                expect_kind(schema, role, "role", is_role)?;
                if let Some(ty) = ty {
                    if !schema.role_fits_relation(ty, role) {
                        return Err(PatternError::RoleNotRelated {
                            relation: ty.clone(),
                            role: role.clone(),
                        });
                    }
                }
            }
            Ok(())
        }
        Atom::Isa { .. }
        | Atom::Sub { .. }
        | Atom::Plays { .. }
        | Atom::Relates { .. }
        | Atom::Value { .. }
        | Atom::Id { .. } => Ok(()),
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, atom) in self.atoms.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{atom}")?;
        }
        for neg in &self.negations {
            write!(f, " not {neg};")?;
        }
        f.write_str("}")
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Fluent construction of conjunctions, allocating anonymous variables for
/// unnamed relations and attribute literals.
#[derive(Debug, Default)]
pub struct ConjunctionBuilder {
    atoms: Vec<Atom>,
    negations: Vec<Conjunction>,
    fresh: usize,
}

impl ConjunctionBuilder {
    fn fresh(&mut self, tag: &str) -> Var {
        let v = Var::anonymous(tag, self.fresh);
        self.fresh += 1;
        v
    }

    pub fn atom(mut self, atom: Atom) -> Self {
        self.atoms.push(atom);
        self
    }

    pub fn isa(self, var: &str, label: &str) -> Self {
        self.atom(Atom::isa(var, label))
    }

    pub fn isa_var(self, var: &str, type_var: &str) -> Self {
        self.atom(Atom::isa_var(var, type_var))
    }

    pub fn sub(self, var: &str, label: &str) -> Self {
        self.atom(Atom::Sub {
            var: Var::new(var),
            sup: TypeRef::Label(Label::new(label)),
        })
    }

    pub fn plays(self, var: &str, role: &str) -> Self {
        self.atom(Atom::Plays {
            var: Var::new(var),
            role: TypeRef::Label(Label::new(role)),
        })
    }

    pub fn relates(self, var: &str, role: &str) -> Self {
        self.atom(Atom::Relates {
            var: Var::new(var),
            role: TypeRef::Label(Label::new(role)),
        })
    }

    /// `$owner has <attribute_type> $attribute`
    pub fn has(self, owner: &str, attribute_type: &str, attribute: &str) -> Self {
        self.atom(Atom::has(owner, attribute_type, attribute))
    }

    /// `$owner has <attribute_type> <literal>`: the attribute gets an
    /// anonymous variable pinned by an `==` predicate.
    pub fn has_value(mut self, owner: &str, attribute_type: &str, value: impl Into<Value>) -> Self {
        let attr = self.fresh("a");
        self.atoms.push(Atom::Has {
            owner: Var::new(owner),
            attribute_type: Label::new(attribute_type),
            attribute: attr.clone(),
        });
        self.atom(Atom::value(attr, ValueConstraint::literal(Comparator::Eq, value)))
    }

    /// Relation with `(role, player)` slots; `None` roles are meta roles and a
    /// `None` relation variable is anonymous.
    pub fn relation(self, var: Option<&str>, ty: Option<&str>, players: &[(Option<&str>, &str)]) -> Self {
        let players = players.iter().map(|(role, player)| RolePlayer::new(*role, *player)).collect();
        self.relation_with(var, ty, players)
    }

    pub fn relation_with(mut self, var: Option<&str>, ty: Option<&str>, players: Vec<RolePlayer>) -> Self {
        let var = match var {
            Some(v) => Var::new(v),
            None => self.fresh("r"),
        };
        self.atom(Atom::Relation {
            var,
            ty: ty.map(Label::new),
            players,
        })
    }

    pub fn value(self, var: &str, comparator: Comparator, value: impl Into<Value>) -> Self {
        self.atom(Atom::value(var, ValueConstraint::literal(comparator, value)))
    }

    /// `$var <comparator> $other`
    pub fn compare(self, var: &str, comparator: Comparator, other: &str) -> Self {
        self.atom(Atom::value(
            var,
            ValueConstraint::new(comparator, Operand::Var(Var::new(other))),
        ))
    }

    pub fn id(self, var: &str, id: &str) -> Self {
        self.atom(Atom::id(var, id))
    }

    /// Add a negation block built by `f`.
    pub fn not(mut self, f: impl FnOnce(ConjunctionBuilder) -> ConjunctionBuilder) -> Self {
        let inner = f(ConjunctionBuilder {
            fresh: self.fresh,
            ..Default::default()
        });
        self.fresh = inner.fresh;
        self.negations.push(Conjunction::new(inner.atoms, inner.negations));
        self
    }

    pub fn build(self) -> Conjunction {
        Conjunction::new(self.atoms, self.negations)
    }
}
