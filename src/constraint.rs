//! Constraints over derivation trees and the fitness they assign.
//!
//! A [`Constraint`] is evaluated against a whole tree. Searches select the
//! subtrees it talks about, value expressions turn them into [`Value`]s,
//! and the result is a [`Fitness`]: how many checks passed, partial credit
//! for near misses and the nodes to blame for the rest.
//!
//! ```
//! use evogram::{Comparator, Constraint, DerivationTree, NonTerminal, Scope, Search, ValueExpr};
//!
//! let tree = DerivationTree::new(NonTerminal::new("start"), [DerivationTree::text("42")]);
//! let at_least_fifty = Constraint::compare(
//!     vec![("n".into(), Search::descendants("start"))],
//!     ValueExpr::var("n").int(),
//!     Comparator::Greater,
//!     ValueExpr::constant(50_i64),
//! );
//! let fitness = at_least_fifty.fitness(&tree, &Scope::new());
//! assert!(!fitness.success);
//! assert!(fitness.score() > 0.0 && fitness.score() < 1.0);
//! assert_eq!(fitness.failing_trees.len(), 1);
//! ```

mod expr;
mod fitness;
mod search;
mod soft;
mod value;

pub use expr::{BinOp, Bindings, NamedFn, ValueExpr};
pub use fitness::{FailingTree, Fitness, Side, Suggestion};
pub use search::{Scope, Search};
pub use soft::{DEFAULT_ESTIMATOR_CAPACITY, Goal, RankEstimator, SoftGoal};
pub use value::{Value, partial_fitness};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EvalError;
use crate::symbol::NonTerminal;
use crate::tree::{DerivationTree, NodeId};

/// A binary comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
}

impl Comparator {
    /// The comparator that holds exactly when this one does not.
    #[must_use]
    pub fn invert(self) -> Self {
        match self {
            Self::Equal => Self::NotEqual,
            Self::NotEqual => Self::Equal,
            Self::Less => Self::GreaterEqual,
            Self::LessEqual => Self::Greater,
            Self::Greater => Self::LessEqual,
            Self::GreaterEqual => Self::Less,
        }
    }

    /// Operator as written in constraint text, e.g. `<=`.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
        }
    }

    /// Applies the comparison.
    ///
    /// # Errors
    ///
    /// [`EvalError::TypeMismatch`] when ordering values of unrelated kinds.
    /// Equality between unrelated kinds is simply false.
    pub fn holds(self, left: &Value, right: &Value) -> Result<bool, EvalError> {
        Ok(match self {
            Self::Equal => left.loosely_equals(right),
            Self::NotEqual => !left.loosely_equals(right),
            Self::Less => left.order(right, self.symbol())?.is_lt(),
            Self::LessEqual => left.order(right, self.symbol())?.is_le(),
            Self::Greater => left.order(right, self.symbol())?.is_gt(),
            Self::GreaterEqual => left.order(right, self.symbol())?.is_ge(),
        })
    }

    /// Credit for a failed comparison between `left` and `right`.
    fn partial(self, left: &Value, right: &Value) -> f64 {
        match self {
            // there is no "almost unequal"
            Self::NotEqual => 0.0,
            _ => left.distance(right).map_or(0.0, partial_fitness),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A chain `e0 c0 e1 c1 e2 ...` evaluated for every combination of search
/// matches.
#[derive(Debug, Clone)]
pub struct Comparison {
    /// Variables and the searches that bind them.
    pub searches: Vec<(Arc<str>, Search)>,
    /// At least two operands.
    pub operands: Vec<ValueExpr>,
    /// One fewer than `operands`.
    pub comparators: Vec<Comparator>,
}

impl Comparison {
    /// The negation of a single comparison.
    #[must_use]
    pub fn inverted(&self) -> Option<Self> {
        match self.comparators.as_slice() {
            [comparator] => Some(Self {
                searches: self.searches.clone(),
                operands: self.operands.clone(),
                comparators: vec![comparator.invert()],
            }),
            _ => None,
        }
    }
}

type PredicateFn = dyn Fn(&Bindings<'_>) -> Result<bool, String> + Send + Sync;

/// A named boolean function over bound subtrees.
#[derive(Clone)]
pub struct Predicate {
    name: Arc<str>,
    test: Arc<PredicateFn>,
}

impl Predicate {
    /// Named boolean test over bound variables.
    #[must_use]
    pub fn new(name: &str, test: impl Fn(&Bindings<'_>) -> Result<bool, String> + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            test: Arc::new(test),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A variable ranging over the matches of a search.
#[derive(Debug, Clone)]
pub struct Quantifier {
    /// Symbol the variable binds; inner searches for it see only the
    /// current match.
    pub bound: NonTerminal,
    /// Where to look for matches.
    pub search: Search,
    /// Checked once per match.
    pub statement: Box<Constraint>,
    /// Stop as soon as the outcome is known, at the cost of reporting
    /// fewer failing trees.
    pub lazy: bool,
}

/// A hard requirement on trees.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// A chained comparison.
    Comparison(Comparison),
    /// All hold.
    Conjunction(Vec<Constraint>),
    /// At least one holds.
    Disjunction(Vec<Constraint>),
    /// If the first holds, so must the second.
    Implication(Box<Constraint>, Box<Constraint>),
    /// Some match satisfies the statement.
    Exists(Quantifier),
    /// Every match satisfies the statement.
    Forall(Quantifier),
    /// A predicate over every combination of search matches.
    Expression {
        /// Variables and the searches that bind them.
        searches: Vec<(Arc<str>, Search)>,
        /// The test.
        predicate: Predicate,
    },
}

impl Constraint {
    /// `left comparator right`.
    #[must_use]
    pub fn compare(searches: Vec<(Arc<str>, Search)>, left: ValueExpr, comparator: Comparator, right: ValueExpr) -> Self {
        Self::Comparison(Comparison {
            searches,
            operands: vec![left, right],
            comparators: vec![comparator],
        })
    }

    /// A chain such as `a < b < c`. Returns `None` unless there is exactly
    /// one more operand than comparators, and at least two operands.
    #[must_use]
    pub fn chain(searches: Vec<(Arc<str>, Search)>, operands: Vec<ValueExpr>, comparators: Vec<Comparator>) -> Option<Self> {
        (operands.len() >= 2 && operands.len() == comparators.len() + 1).then(|| {
            Self::Comparison(Comparison {
                searches,
                operands,
                comparators,
            })
        })
    }

    /// Holds when every child holds.
    #[must_use]
    pub fn and(children: Vec<Constraint>) -> Self {
        Self::Conjunction(children)
    }

    /// Holds when any child holds.
    #[must_use]
    pub fn or(children: Vec<Constraint>) -> Self {
        Self::Disjunction(children)
    }

    /// `antecedent -> consequent`; vacuously true when the antecedent fails.
    #[must_use]
    pub fn implies(antecedent: Constraint, consequent: Constraint) -> Self {
        Self::Implication(Box::new(antecedent), Box::new(consequent))
    }

    /// `forall <bound> in search: statement`.
    #[must_use]
    pub fn forall(bound: impl Into<NonTerminal>, search: Search, statement: Constraint) -> Self {
        Self::Forall(Quantifier {
            bound: bound.into(),
            search,
            statement: Box::new(statement),
            lazy: false,
        })
    }

    /// `exists <bound> in search: statement`.
    #[must_use]
    pub fn exists(bound: impl Into<NonTerminal>, search: Search, statement: Constraint) -> Self {
        Self::Exists(Quantifier {
            bound: bound.into(),
            search,
            statement: Box::new(statement),
            lazy: false,
        })
    }

    /// A predicate over the nodes bound by `searches`.
    #[must_use]
    pub fn expression(searches: Vec<(Arc<str>, Search)>, predicate: Predicate) -> Self {
        Self::Expression { searches, predicate }
    }

    /// Makes a quantifier short-circuit. No effect on other constraints.
    #[must_use]
    pub fn lazy(mut self) -> Self {
        if let Self::Exists(q) | Self::Forall(q) = &mut self {
            q.lazy = true;
        }
        self
    }

    /// Whether `tree` satisfies the constraint.
    #[must_use]
    pub fn check(&self, tree: &DerivationTree) -> bool {
        self.fitness(tree, &Scope::new()).success
    }

    /// Evaluates against `tree`, with quantifier variables in `scope`
    /// already bound.
    ///
    /// Evaluation errors never escape: they are logged and the combination
    /// that raised them scores zero.
    #[must_use]
    pub fn fitness(&self, tree: &DerivationTree, scope: &Scope) -> Fitness {
        match self {
            Self::Comparison(comparison) => self.comparison_fitness(comparison, tree, scope),
            Self::Conjunction(children) => {
                if children.is_empty() {
                    return Fitness::solved();
                }
                let mut fitness = Fitness::empty();
                let mut success = true;
                for child in children {
                    let child = child.fitness(tree, scope);
                    success &= child.success;
                    fitness.absorb(child);
                }
                if children.len() > 1 {
                    fitness.total += 1;
                    fitness.solved += usize::from(success);
                }
                fitness.success = success;
                fitness
            }
            Self::Disjunction(children) => {
                let mut fitness = Fitness::empty();
                let mut success = false;
                for child in children {
                    let child = child.fitness(tree, scope);
                    success |= child.success;
                    fitness.absorb(child);
                }
                if children.len() != 1 {
                    fitness.total += 1;
                }
                if success {
                    fitness.saturate();
                } else {
                    fitness.success = false;
                }
                fitness
            }
            Self::Implication(antecedent, consequent) => {
                if antecedent.fitness(tree, scope).success {
                    consequent.fitness(tree, scope)
                } else {
                    Fitness::solved()
                }
            }
            Self::Forall(quantifier) => quantifier.fitness(tree, scope, true),
            Self::Exists(quantifier) => quantifier.fitness(tree, scope, false),
            Self::Expression { searches, predicate } => self.expression_fitness(searches, predicate, tree, scope),
        }
    }

    fn comparison_fitness(&self, comparison: &Comparison, tree: &DerivationTree, scope: &Scope) -> Fitness {
        let combos = combinations(&comparison.searches, tree, scope);
        if combos.is_empty() {
            return Fitness::solved();
        }
        let mut fitness = Fitness::empty();
        let mut label: Option<Arc<str>> = None;
        for vars in &combos {
            fitness.total += 1;
            let bindings = Bindings::new(tree, vars);
            let outcome = comparison
                .operands
                .iter()
                .map(|operand| operand.eval(&bindings))
                .collect::<Result<Vec<_>, _>>()
                .and_then(|values| compare_chain(comparison, &values).map(|result| (values, result)));
            let (values, result) = match outcome {
                Ok(ok) => ok,
                Err(error) => {
                    warn!(constraint = %self, %error, "constraint evaluation failed");
                    fitness.success = false;
                    continue;
                }
            };
            let Some(credit) = result else {
                fitness.solved += 1;
                continue;
            };
            fitness.success = false;
            fitness.partial += credit;
            let label = label.get_or_insert_with(|| self.to_string().into());
            let suggestions = equality_suggestions(comparison, &values, vars);
            for (_, node) in vars {
                fitness.failing_trees.push(FailingTree {
                    node: *node,
                    constraint: Arc::clone(label),
                    suggestions: suggestions
                        .iter()
                        .filter(|(id, _)| id == node)
                        .map(|(_, s)| s.clone())
                        .collect(),
                });
            }
        }
        fitness
    }

    fn expression_fitness(
        &self,
        searches: &[(Arc<str>, Search)],
        predicate: &Predicate,
        tree: &DerivationTree,
        scope: &Scope,
    ) -> Fitness {
        let combos = combinations(searches, tree, scope);
        if combos.is_empty() {
            return Fitness::solved();
        }
        let mut fitness = Fitness::empty();
        let mut label: Option<Arc<str>> = None;
        for vars in &combos {
            fitness.total += 1;
            match (predicate.test)(&Bindings::new(tree, vars)) {
                Ok(true) => fitness.solved += 1,
                Ok(false) => {
                    fitness.success = false;
                    let label = label.get_or_insert_with(|| self.to_string().into());
                    fitness.failing_trees.extend(vars.iter().map(|(_, node)| FailingTree {
                        node: *node,
                        constraint: Arc::clone(label),
                        suggestions: Vec::new(),
                    }));
                }
                Err(message) => {
                    let error = EvalError::Function {
                        name: predicate.name.to_string(),
                        message,
                    };
                    warn!(constraint = %self, %error, "constraint evaluation failed");
                    fitness.success = false;
                }
            }
        }
        fitness
    }
}

impl Quantifier {
    fn fitness(&self, tree: &DerivationTree, scope: &Scope, universal: bool) -> Fitness {
        let matches = self.search.find(tree, scope);
        if matches.is_empty() {
            return Fitness::solved();
        }
        let mut fitness = Fitness::empty();
        let mut any = false;
        let mut all = true;
        for node in matches {
            let inner = self.statement.fitness(tree, &scope.with(self.bound.clone(), node));
            any |= inner.success;
            all &= inner.success;
            fitness.absorb(inner);
            if self.lazy && ((universal && !all) || (!universal && any)) {
                break;
            }
        }
        if universal {
            fitness.success = all;
        } else if any {
            fitness.saturate();
        } else {
            fitness.success = false;
        }
        fitness
    }
}

/// `None` if the whole chain holds, otherwise the credit of its weakest
/// failed link.
fn compare_chain(comparison: &Comparison, values: &[Value]) -> Result<Option<f64>, EvalError> {
    let mut credit: Option<f64> = None;
    for (comparator, pair) in comparison.comparators.iter().zip(values.windows(2)) {
        if !comparator.holds(&pair[0], &pair[1])? {
            let link = comparator.partial(&pair[0], &pair[1]);
            credit = Some(credit.map_or(link, |c| c.min(link)));
        }
    }
    Ok(credit)
}

/// For failed equalities whose one side reads a single variable, the value
/// that variable's node should take.
fn equality_suggestions(comparison: &Comparison, values: &[Value], vars: &[(Arc<str>, NodeId)]) -> Vec<(NodeId, Suggestion)> {
    let node_of = |expr: &ValueExpr| {
        let name = expr.single_var()?;
        vars.iter().find(|(n, _)| &**n == name).map(|&(_, id)| id)
    };
    let mut suggestions = Vec::new();
    for (i, comparator) in comparison.comparators.iter().enumerate() {
        if *comparator != Comparator::Equal || values[i].loosely_equals(&values[i + 1]) {
            continue;
        }
        if let Some(node) = node_of(&comparison.operands[i]) {
            suggestions.push((node, Suggestion {
                op: Comparator::Equal,
                value: values[i + 1].clone(),
                side: Side::Left,
            }));
        }
        if let Some(node) = node_of(&comparison.operands[i + 1]) {
            suggestions.push((node, Suggestion {
                op: Comparator::Equal,
                value: values[i].clone(),
                side: Side::Right,
            }));
        }
    }
    suggestions
}

/// Every assignment of search matches to variables. A search without
/// matches yields no assignment; no searches yield one empty assignment.
pub(crate) fn combinations(
    searches: &[(Arc<str>, Search)],
    tree: &DerivationTree,
    scope: &Scope,
) -> Vec<Vec<(Arc<str>, NodeId)>> {
    let mut combos: Vec<Vec<(Arc<str>, NodeId)>> = vec![Vec::new()];
    for (name, search) in searches {
        let matches = search.find(tree, scope);
        combos = combos
            .into_iter()
            .flat_map(|combo| {
                matches.iter().map(move |&node| {
                    let mut next = combo.clone();
                    next.push((Arc::clone(name), node));
                    next
                })
            })
            .collect();
        if combos.is_empty() {
            break;
        }
    }
    combos
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comparison(comparison) => {
                for (i, operand) in comparison.operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", comparison.comparators[i - 1])?;
                    }
                    write!(f, "{operand}")?;
                }
                Ok(())
            }
            Self::Conjunction(children) => join(f, children, " and "),
            Self::Disjunction(children) => join(f, children, " or "),
            Self::Implication(a, b) => write!(f, "({a}) -> ({b})"),
            Self::Exists(q) => write!(f, "exists {} in {}: {}", q.bound, q.search, q.statement),
            Self::Forall(q) => write!(f, "forall {} in {}: {}", q.bound, q.search, q.statement),
            Self::Expression { predicate, .. } => write!(f, "{}(...)", predicate.name),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, children: &[Constraint], separator: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nt(name: &str) -> NonTerminal {
        NonTerminal::new(name)
    }

    /// `<start>` over two `<a>` children with the given digits.
    fn pair(first: &str, second: &str) -> DerivationTree {
        let a = |d: &str| DerivationTree::new(nt("a"), [DerivationTree::text(d)]);
        DerivationTree::new(nt("start"), [a(first), a(second)])
    }

    fn a_is_one() -> Constraint {
        Constraint::compare(
            vec![("a".into(), Search::descendants("a"))],
            ValueExpr::var("a"),
            Comparator::Equal,
            ValueExpr::constant("1"),
        )
    }

    fn number(n: &str) -> DerivationTree {
        DerivationTree::new(nt("start"), [DerivationTree::text(n)])
    }

    fn greater_than(bound: i64) -> Constraint {
        Constraint::compare(
            vec![("n".into(), Search::descendants("start"))],
            ValueExpr::var("n").int(),
            Comparator::Greater,
            ValueExpr::constant(bound),
        )
    }

    #[test]
    fn test_forall_blames_only_failing_match() {
        let forall = Constraint::forall("a", Search::descendants("start").child("a"), a_is_one());
        assert!(forall.check(&pair("1", "1")));
        let tree = pair("1", "0");
        let fitness = forall.fitness(&tree, &Scope::new());
        assert!(!fitness.success);
        assert_eq!(fitness.failing_trees.len(), 1);
        let blamed = fitness.failing_trees[0].node;
        assert_eq!(tree.text_at(blamed), "0");
        assert_eq!(fitness.failing_trees[0].suggestions, vec![Suggestion {
            op: Comparator::Equal,
            value: Value::from("1"),
            side: Side::Left,
        }]);
    }

    #[test]
    fn test_exists() {
        let exists = Constraint::exists("a", Search::descendants("a"), a_is_one());
        assert!(exists.check(&pair("0", "1")));
        assert!(!exists.check(&pair("0", "0")));
        let fitness = exists.fitness(&pair("0", "1"), &Scope::new());
        assert!((fitness.score() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lazy_quantifiers_stop_early() {
        let forall = Constraint::forall("a", Search::descendants("a"), a_is_one());
        let eager = forall.fitness(&pair("0", "0"), &Scope::new());
        let lazy = forall.clone().lazy().fitness(&pair("0", "0"), &Scope::new());
        assert_eq!(eager.failing_trees.len(), 2);
        assert_eq!(lazy.failing_trees.len(), 1);
        assert!(!lazy.success);
    }

    #[test]
    fn test_no_matches_is_trivially_solved() {
        let tree = number("5");
        let forall = Constraint::forall("a", Search::descendants("a"), a_is_one());
        let exists = Constraint::exists("a", Search::descendants("a"), a_is_one());
        for constraint in [forall, exists, a_is_one()] {
            let fitness = constraint.fitness(&tree, &Scope::new());
            assert!(fitness.success);
            assert_eq!((fitness.solved, fitness.total), (1, 1));
        }
    }

    #[test]
    fn test_partial_fitness_grows_as_values_approach() {
        let constraint = greater_than(50);
        let far = constraint.fitness(&number("10"), &Scope::new()).score();
        let near = constraint.fitness(&number("45"), &Scope::new()).score();
        let equal = constraint.fitness(&number("50"), &Scope::new()).score();
        assert!(far < near && near <= equal && equal < 1.0);
        assert!((constraint.fitness(&number("73"), &Scope::new()).score() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_chain() {
        let chain = Constraint::chain(
            vec![("n".into(), Search::descendants("start"))],
            vec![
                ValueExpr::constant(0_i64),
                ValueExpr::var("n").int(),
                ValueExpr::constant(10_i64),
            ],
            vec![Comparator::Less, Comparator::Less],
        )
        .unwrap();
        assert!(chain.check(&number("5")));
        assert!(!chain.check(&number("15")));
        assert!(Constraint::chain(vec![], vec![ValueExpr::constant(1_i64)], vec![]).is_none());
    }

    #[test]
    fn test_type_mismatch_scores_zero() {
        let constraint = Constraint::compare(
            vec![("n".into(), Search::descendants("start"))],
            ValueExpr::var("n"),
            Comparator::Less,
            ValueExpr::constant(3_i64),
        );
        let fitness = constraint.fitness(&number("abc"), &Scope::new());
        assert!(!fitness.success);
        assert!(fitness.score().abs() < f64::EPSILON);
        assert!(fitness.failing_trees.is_empty());
    }

    #[test]
    fn test_boolean_combinators() {
        let tree = number("60");
        let yes = greater_than(50);
        let no = greater_than(70);
        assert!(Constraint::and(vec![yes.clone(), yes.clone()]).check(&tree));
        assert!(!Constraint::and(vec![yes.clone(), no.clone()]).check(&tree));
        assert!(Constraint::or(vec![no.clone(), yes.clone()]).check(&tree));
        assert!(!Constraint::or(vec![no.clone(), no.clone()]).check(&tree));
        assert!(Constraint::implies(no.clone(), no.clone()).check(&tree));
        assert!(!Constraint::implies(yes.clone(), no.clone()).check(&tree));

        let partly = Constraint::and(vec![yes, no]).fitness(&tree, &Scope::new());
        assert_eq!(partly.solved, 1);
        assert_eq!(partly.total, 3);
    }

    #[test]
    fn test_expression_constraint() {
        let even = Predicate::new("even", |b| {
            let value = b.value("n").map_err(|e| e.to_string())?;
            Ok(value.to_int().map_err(|e| e.to_string())? % 2 == 0)
        });
        let constraint = Constraint::expression(vec![("n".into(), Search::descendants("start"))], even);
        assert!(constraint.check(&number("42")));
        let fitness = constraint.fitness(&number("41"), &Scope::new());
        assert_eq!(fitness.failing_trees.len(), 1);
        assert!(!constraint.check(&number("x")));
    }

    #[test]
    fn test_comparator_invert() {
        for comparator in [
            Comparator::Equal,
            Comparator::NotEqual,
            Comparator::Less,
            Comparator::LessEqual,
            Comparator::Greater,
            Comparator::GreaterEqual,
        ] {
            let (a, b) = (Value::Int(3), Value::Int(4));
            assert_ne!(comparator.holds(&a, &b).unwrap(), comparator.invert().holds(&a, &b).unwrap());
            assert_eq!(comparator.invert().invert(), comparator);
        }
    }

    #[test]
    fn test_display() {
        let forall = Constraint::forall("a", Search::descendants("start").child("a"), a_is_one());
        assert_eq!(forall.to_string(), "forall <a> in <start>.<a>: a == \"1\"");
    }
}
