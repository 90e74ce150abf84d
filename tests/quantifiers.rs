//! Quantified constraints evaluated on parsed inputs.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use evogram::{
    Comparator, Constraint, DerivationTree, Grammar, GrammarBuilder, GrammarNode, NonTerminal, ParseInput,
    ParseMode, Scope, Search, Value, ValueExpr,
};

/// `key=value` pairs separated by commas.
fn pairs() -> Grammar {
    GrammarBuilder::new()
        .rule(
            "start",
            GrammarNode::seq([
                GrammarNode::non_terminal("pair"),
                GrammarNode::star(GrammarNode::seq([GrammarNode::text(","), GrammarNode::non_terminal("pair")])),
            ]),
        )
        .rule(
            "pair",
            GrammarNode::seq([
                GrammarNode::non_terminal("key"),
                GrammarNode::text("="),
                GrammarNode::non_terminal("num"),
            ]),
        )
        .rule("key", GrammarNode::char_range('a', 'c'))
        .rule("num", GrammarNode::plus(GrammarNode::char_range('0', '9')))
        .build()
        .unwrap()
}

fn parse(grammar: &Grammar, text: &str) -> DerivationTree {
    grammar
        .parse(ParseInput::text(text), grammar.start(), ParseMode::Complete)
        .next()
        .unwrap()
}

/// `int(<pair>.<num>) < bound`, evaluated inside a pair.
fn num_below(bound: i64) -> Constraint {
    Constraint::compare(
        vec![("n".into(), Search::descendants("pair").child("num"))],
        ValueExpr::var("n").int(),
        Comparator::Less,
        ValueExpr::constant(bound),
    )
}

fn key_is(key: &str) -> Constraint {
    Constraint::compare(
        vec![("k".into(), Search::descendants("pair").child("key"))],
        ValueExpr::var("k"),
        Comparator::Equal,
        ValueExpr::constant(key),
    )
}

#[test]
fn forall_blames_each_offending_pair() {
    let grammar = pairs();
    let tree = parse(&grammar, "a=1,b=70,c=99");
    let all_small = Constraint::forall("pair", Search::descendants("pair"), num_below(50));

    let fitness = all_small.fitness(&tree, &Scope::new());
    assert!(!fitness.success);
    let blamed: Vec<String> = fitness.failing_trees.iter().map(|f| tree.text_at(f.node)).collect();
    assert_eq!(blamed, vec!["70", "99"]);
    assert!(fitness.score() > 0.0 && fitness.score() < 1.0);

    assert!(all_small.check(&parse(&grammar, "a=1,b=2")));
}

#[test]
fn exists_needs_one_witness() {
    let grammar = pairs();
    let has_c = Constraint::exists("pair", Search::descendants("pair"), key_is("c"));
    assert!(has_c.check(&parse(&grammar, "a=1,c=2")));

    let tree = parse(&grammar, "a=1,b=2");
    let fitness = has_c.fitness(&tree, &Scope::new());
    assert!(!fitness.success);
    // every key is a candidate for repair towards "c"
    assert_eq!(fitness.failing_trees.len(), 2);
    for failing in &fitness.failing_trees {
        assert_eq!(failing.suggestions[0].value, Value::from("c"));
    }
}

#[test]
fn implication_inside_forall() {
    let grammar = pairs();
    // every pair keyed "a" must carry a number below 10
    let rule = Constraint::forall(
        "pair",
        Search::descendants("pair"),
        Constraint::implies(key_is("a"), num_below(10)),
    );
    assert!(rule.check(&parse(&grammar, "a=3,b=500")));
    assert!(!rule.check(&parse(&grammar, "b=1,a=30")));
}

#[test]
fn nested_quantifiers_see_the_bound_node() {
    let grammar = pairs();
    // every pair has some digit equal to 7
    let digit_seven = Constraint::compare(
        vec![("n".into(), Search::descendants("num"))],
        ValueExpr::var("n").int(),
        Comparator::Equal,
        ValueExpr::constant(7_i64),
    );
    let rule = Constraint::forall(
        "pair",
        Search::descendants("pair"),
        Constraint::exists("num", Search::descendants("pair").descendant("num"), digit_seven),
    );
    assert!(rule.check(&parse(&grammar, "a=7,b=7")));
    assert!(!rule.check(&parse(&grammar, "a=7,b=8")));
}

#[test]
fn variables_range_over_every_combination() {
    let grammar = pairs();
    // x <= y for every pair of numbers holds only if all numbers are equal
    let constraint = Constraint::compare(
        vec![("x".into(), Search::descendants("num")), ("y".into(), Search::descendants("num"))],
        ValueExpr::var("x").int(),
        Comparator::LessEqual,
        ValueExpr::var("y").int(),
    );
    assert!(constraint.check(&parse(&grammar, "a=5,b=5,c=5")));
    let fitness = constraint.fitness(&parse(&grammar, "a=4,b=5"), &Scope::new());
    assert!(!fitness.success);
    assert_eq!((fitness.solved, fitness.total), (3, 4));
}

#[test]
fn lazy_forall_agrees_on_success() {
    let grammar = pairs();
    let eager = Constraint::forall("pair", Search::descendants("pair"), num_below(50));
    let lazy = eager.clone().lazy();
    for text in ["a=1", "a=1,b=2,c=3", "a=60,b=2", "a=1,b=2,c=300"] {
        let tree = parse(&grammar, text);
        assert_eq!(eager.check(&tree), lazy.check(&tree), "{text}");
    }
}

#[test]
fn quantifier_over_missing_symbol_is_vacuous() {
    let grammar = pairs();
    let tree = parse(&grammar, "a=1");
    let unrelated = Constraint::forall(
        NonTerminal::new("header"),
        Search::descendants("header"),
        num_below(0),
    );
    assert!(unrelated.check(&tree));
}
