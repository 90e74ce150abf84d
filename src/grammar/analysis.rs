//! Static checks and distance priming run once when a grammar is built.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use tracing::debug;

use super::generator::Generator;
use super::node::{Bound, GrammarNode, INFINITE_DISTANCE, NodeKind};
use crate::error::{GrammarError, GrammarResult};
use crate::symbol::NonTerminal;

/// Every referenced rule, dynamic-bound source and generator dependency
/// must be defined; repetition bounds must be consistent.
pub(crate) fn validate(
    rules: &BTreeMap<NonTerminal, GrammarNode>,
    generators: &BTreeMap<NonTerminal, Generator>,
    start: &NonTerminal,
) -> GrammarResult<()> {
    if !rules.contains_key(start) {
        return Err(GrammarError::UndefinedStart(start.clone()));
    }

    for (name, body) in rules {
        let mut result = Ok(());
        body.walk(&mut |node| {
            if result.is_err() {
                return;
            }
            result = check_node(node, name, rules);
        });
        result?;
    }

    for (symbol, generator) in generators {
        if !rules.contains_key(symbol) {
            return Err(GrammarError::GeneratorWithoutRule(symbol.clone()));
        }
        if let Some(missing) = generator.dependencies().iter().find(|d| !rules.contains_key(*d)) {
            return Err(GrammarError::UndefinedNonTerminal {
                symbol: missing.clone(),
                referenced_from: symbol.clone(),
            });
        }
    }
    check_generator_cycles(generators)
}

fn check_node(
    node: &GrammarNode,
    rule: &NonTerminal,
    rules: &BTreeMap<NonTerminal, GrammarNode>,
) -> GrammarResult<()> {
    let undefined = |symbol: &NonTerminal| GrammarError::UndefinedNonTerminal {
        symbol: symbol.clone(),
        referenced_from: rule.clone(),
    };
    match node.kind() {
        NodeKind::NonTerminal(r) if !rules.contains_key(&r.symbol) => Err(undefined(&r.symbol)),
        NodeKind::Repetition(rep) => {
            for bound in std::iter::once(rep.min()).chain(rep.max()) {
                if let Bound::Dynamic(d) = bound {
                    if !rules.contains_key(d.source()) {
                        return Err(undefined(d.source()));
                    }
                }
            }
            match (rep.min().fixed(), rep.max().and_then(Bound::fixed)) {
                (Some(min), Some(max)) if min > max => Err(GrammarError::InvalidRepetition {
                    rule: rule.clone(),
                    min,
                    max,
                }),
                _ => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

/// Depth-first search over generator dependencies that are themselves
/// generated.
fn check_generator_cycles(generators: &BTreeMap<NonTerminal, Generator>) -> GrammarResult<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        symbol: &'a NonTerminal,
        generators: &'a BTreeMap<NonTerminal, Generator>,
        marks: &mut FxHashMap<&'a NonTerminal, Mark>,
    ) -> GrammarResult<()> {
        match marks.get(symbol) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(GrammarError::GeneratorCycle(symbol.clone())),
            None => {}
        }
        marks.insert(symbol, Mark::Visiting);
        if let Some(generator) = generators.get(symbol) {
            for dep in generator.dependencies() {
                visit(dep, generators, marks)?;
            }
        }
        marks.insert(symbol, Mark::Done);
        Ok(())
    }

    let mut marks = FxHashMap::default();
    for symbol in generators.keys() {
        visit(symbol, generators, &mut marks)?;
    }
    Ok(())
}

/// Iterates rule distances to a fixed point and stores per-node distances.
///
/// Distances only ever decrease from infinity, so the loop terminates after
/// at most one round per rule.
pub(crate) fn prime(rules: &mut BTreeMap<NonTerminal, GrammarNode>) -> FxHashMap<NonTerminal, usize> {
    let mut distances: FxHashMap<NonTerminal, usize> =
        rules.keys().map(|k| (k.clone(), INFINITE_DISTANCE)).collect();
    let mut rounds = 0usize;
    loop {
        rounds += 1;
        let mut changed = false;
        for (name, body) in rules.iter_mut() {
            let lookup = |nt: &NonTerminal| distances.get(nt).copied().unwrap_or(INFINITE_DISTANCE);
            let distance = body.update_distance(&lookup);
            if distance < distances.get(name).copied().unwrap_or(INFINITE_DISTANCE) {
                distances.insert(name.clone(), distance);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    debug!(rounds, rules = rules.len(), "primed grammar distances");
    distances
}

/// Rules reachable from `start` through rule bodies and dynamic bounds.
pub(crate) fn reachable(
    rules: &BTreeMap<NonTerminal, GrammarNode>,
    generators: &BTreeMap<NonTerminal, Generator>,
    start: &NonTerminal,
) -> BTreeSet<NonTerminal> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![start.clone()];
    while let Some(symbol) = stack.pop() {
        if !seen.insert(symbol.clone()) {
            continue;
        }
        if let Some(body) = rules.get(&symbol) {
            body.walk(&mut |node| match node.kind() {
                NodeKind::NonTerminal(r) => stack.push(r.symbol.clone()),
                NodeKind::Repetition(rep) => {
                    for bound in std::iter::once(rep.min()).chain(rep.max()) {
                        if let Bound::Dynamic(d) = bound {
                            stack.push(d.source().clone());
                        }
                    }
                }
                _ => {}
            });
        }
        if let Some(generator) = generators.get(&symbol) {
            stack.extend(generator.dependencies().iter().cloned());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::generator::GeneratedValue;

    fn rules(entries: Vec<(&str, GrammarNode)>) -> BTreeMap<NonTerminal, GrammarNode> {
        entries
            .into_iter()
            .map(|(name, node)| (NonTerminal::new(name), node))
            .collect()
    }

    #[test]
    fn test_prime_recursive_rule() {
        // <expr> ::= <expr> "+" <num> | <num>; <num> ::= "1"
        let mut grammar = rules(vec![
            (
                "expr",
                GrammarNode::alt([
                    GrammarNode::seq([
                        GrammarNode::non_terminal("expr"),
                        GrammarNode::text("+"),
                        GrammarNode::non_terminal("num"),
                    ]),
                    GrammarNode::non_terminal("num"),
                ]),
            ),
            ("num", GrammarNode::text("1")),
        ]);
        let distances = prime(&mut grammar);
        assert_eq!(distances[&NonTerminal::new("num")], 1);
        // alt(+1) over nonterminal(+1) over num(1)
        assert_eq!(distances[&NonTerminal::new("expr")], 3);
    }

    #[test]
    fn test_prime_leaves_unproductive_infinite() {
        let mut grammar = rules(vec![(
            "loop",
            GrammarNode::seq([GrammarNode::non_terminal("loop"), GrammarNode::text("x")]),
        )]);
        let distances = prime(&mut grammar);
        assert_eq!(distances[&NonTerminal::new("loop")], INFINITE_DISTANCE);
    }

    #[test]
    fn test_validate_undefined_reference() {
        let grammar = rules(vec![("start", GrammarNode::non_terminal("missing"))]);
        let err = validate(&grammar, &BTreeMap::new(), &NonTerminal::new("start")).unwrap_err();
        assert!(matches!(err, GrammarError::UndefinedNonTerminal { .. }));
    }

    #[test]
    fn test_validate_bad_repetition() {
        let grammar = rules(vec![(
            "start",
            GrammarNode::repeat(GrammarNode::text("a"), 3, Some(2)),
        )]);
        let err = validate(&grammar, &BTreeMap::new(), &NonTerminal::new("start")).unwrap_err();
        assert!(matches!(err, GrammarError::InvalidRepetition { min: 3, max: 2, .. }));
    }

    #[test]
    fn test_validate_accepts_empty_repetition() {
        let grammar = rules(vec![(
            "start",
            GrammarNode::repeat(GrammarNode::text("a"), 0, Some(0)),
        )]);
        assert!(validate(&grammar, &BTreeMap::new(), &NonTerminal::new("start")).is_ok());
    }

    #[test]
    fn test_generator_cycle_detected() {
        let grammar = rules(vec![
            ("a", GrammarNode::text("a")),
            ("b", GrammarNode::text("b")),
        ]);
        let constant = |deps: &[&str]| {
            Generator::new(deps.iter().map(|d| NonTerminal::new(*d)), |_| {
                Ok(GeneratedValue::Text("x".into()))
            })
        };
        let generators: BTreeMap<_, _> = [
            (NonTerminal::new("a"), constant(&["b"])),
            (NonTerminal::new("b"), constant(&["a"])),
        ]
        .into_iter()
        .collect();
        let err = validate(&grammar, &generators, &NonTerminal::new("a")).unwrap_err();
        assert!(matches!(err, GrammarError::GeneratorCycle(_)));
    }

    #[test]
    fn test_reachable() {
        let grammar = rules(vec![
            ("start", GrammarNode::non_terminal("a")),
            ("a", GrammarNode::text("a")),
            ("orphan", GrammarNode::text("o")),
        ]);
        let seen = reachable(&grammar, &BTreeMap::new(), &NonTerminal::new("start"));
        assert!(seen.contains(&NonTerminal::new("a")));
        assert!(!seen.contains(&NonTerminal::new("orphan")));
    }
}
