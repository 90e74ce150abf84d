#![no_main]

use evogram::{Grammar, GrammarBuilder, GrammarNode, ParseInput, ParseMode};
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

/// Mixed text and byte records: `"k" <byte> ":" digits ";"`.
fn grammar() -> &'static Grammar {
    static GRAMMAR: OnceLock<Grammar> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        GrammarBuilder::new()
            .rule("start", GrammarNode::star(GrammarNode::non_terminal("record")))
            .rule(
                "record",
                GrammarNode::seq([
                    GrammarNode::text("k"),
                    GrammarNode::byte_range(0x00, 0xff),
                    GrammarNode::text(":"),
                    GrammarNode::plus(GrammarNode::char_range('0', '9')),
                    GrammarNode::text(";"),
                ]),
            )
            .build()
            .expect("fuzz grammar is valid")
    })
}

fuzz_target!(|data: &[u8]| {
    // Cap input length to keep chart sizes bounded
    let data = &data[..data.len().min(256)];
    let grammar = grammar();

    let mut forest = grammar.parse(ParseInput::bytes(data), grammar.start(), ParseMode::Complete);
    match forest.next() {
        Some(tree) => assert_eq!(tree.to_bytes(), data, "parse tree does not reproduce input"),
        None => {
            // the reported position never runs past the input
            if let Some(pos) = forest.max_position() {
                assert!(pos <= data.len());
            }
        }
    }

    // any accepted prefix of a complete parse is also an incomplete parse
    for tree in grammar
        .parse(ParseInput::bytes(data), grammar.start(), ParseMode::Incomplete)
        .take(2)
    {
        assert!(tree.to_bytes().len() <= data.len());
    }
});
