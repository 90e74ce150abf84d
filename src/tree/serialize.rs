//! Rendering trees as text, bytes, bits and numbers.

use super::{DerivationTree, NodeId};
use crate::symbol::{Symbol, Terminal};

impl DerivationTree {
    fn leaves(&self, id: NodeId) -> impl Iterator<Item = &Terminal> + '_ {
        self.descendants(id).filter_map(|n| self.symbol(n).as_terminal())
    }

    /// Whether any leaf in the tree is a bit.
    #[must_use]
    pub fn contains_bits(&self) -> bool {
        self.leaves(NodeId::ROOT).any(Terminal::is_bit)
    }

    /// Whether any leaf in the tree holds raw bytes.
    #[must_use]
    pub fn contains_bytes(&self) -> bool {
        self.leaves(NodeId::ROOT).any(Terminal::is_bytes)
    }

    /// Whether the tree's natural serialization is binary.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.contains_bits() || self.contains_bytes()
    }

    /// Concatenated text of the whole tree.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.text_at(NodeId::ROOT)
    }

    /// Concatenated text of the subtree at `id`.
    ///
    /// Byte leaves render as Latin-1 characters and bits as `0`/`1`.
    #[must_use]
    pub fn text_at(&self, id: NodeId) -> String {
        let mut out = String::new();
        for leaf in self.leaves(id) {
            match leaf {
                Terminal::Text(s) => out.push_str(s),
                Terminal::Bytes(b) => out.extend(b.iter().copied().map(char::from)),
                Terminal::Bit(bit) => out.push(if *bit { '1' } else { '0' }),
                Terminal::Regex(re) => out.push_str(re.pattern()),
            }
        }
        out
    }

    /// Byte serialization of the whole tree.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes_at(NodeId::ROOT)
    }

    /// Byte serialization of the subtree at `id`.
    ///
    /// Text is UTF-8 encoded. If the subtree holds any bit, the whole
    /// bit string is packed big-endian with zero padding on the left.
    #[must_use]
    pub fn bytes_at(&self, id: NodeId) -> Vec<u8> {
        if self.leaves(id).any(Terminal::is_bit) {
            return pack_bits(&self.bits_at(id));
        }
        let mut out = Vec::new();
        for leaf in self.leaves(id) {
            if let Some(bytes) = leaf.literal_bytes() {
                out.extend_from_slice(bytes);
            }
        }
        out
    }

    /// Bit string (`0`/`1` characters) of the whole tree.
    #[must_use]
    pub fn to_bits(&self) -> String {
        self.bits_at(NodeId::ROOT)
    }

    /// Bit string of the subtree at `id`; each text or byte leaf contributes
    /// eight bits per byte, most significant first.
    #[must_use]
    pub fn bits_at(&self, id: NodeId) -> String {
        let mut out = String::new();
        for leaf in self.leaves(id) {
            match leaf {
                Terminal::Bit(bit) => out.push(if *bit { '1' } else { '0' }),
                other => {
                    for byte in other.literal_bytes().unwrap_or_default() {
                        out.push_str(&format!("{byte:08b}"));
                    }
                }
            }
        }
        out
    }

    /// Integer value of the subtree at `id`.
    ///
    /// Pure bit subtrees read as unsigned binary; everything else parses its
    /// trimmed text as a decimal integer.
    #[must_use]
    pub fn int_at(&self, id: NodeId) -> Option<i64> {
        let only_bits = self.leaves(id).all(Terminal::is_bit);
        if only_bits && self.leaves(id).next().is_some() {
            return i64::from_str_radix(&self.bits_at(id), 2).ok();
        }
        self.text_at(id).trim().parse().ok()
    }

    /// Floating-point value of the subtree at `id`.
    #[must_use]
    pub fn float_at(&self, id: NodeId) -> Option<f64> {
        self.text_at(id).trim().parse().ok()
    }

    /// Whether the subtree at `id` renders as binary.
    #[must_use]
    pub fn is_binary_at(&self, id: NodeId) -> bool {
        self.leaves(id).any(|t| t.is_bit() || t.is_bytes())
    }

    /// Symbol-level rendering such as `<start>(<digit>("1"))`, for logs.
    #[must_use]
    pub fn to_tree_string(&self) -> String {
        let mut out = String::new();
        self.write_tree(NodeId::ROOT, &mut out);
        out
    }

    fn write_tree(&self, id: NodeId, out: &mut String) {
        match self.symbol(id) {
            Symbol::Terminal(t) => out.push_str(&t.to_string()),
            Symbol::NonTerminal(nt) => {
                out.push_str(nt.name());
                out.push('(');
                for (i, &child) in self.children(id).iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_tree(child, out);
                }
                out.push(')');
            }
        }
    }
}

/// Packs a `0`/`1` string into bytes, padding on the left to a whole byte.
fn pack_bits(bits: &str) -> Vec<u8> {
    let padding = (8 - bits.len() % 8) % 8;
    let padded: Vec<bool> = std::iter::repeat_n(false, padding)
        .chain(bits.chars().map(|c| c == '1'))
        .collect();
    padded
        .chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &bit| (acc << 1) | u8::from(bit)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::NonTerminal;

    fn bits(values: &[bool]) -> DerivationTree {
        DerivationTree::new(
            NonTerminal::new("start"),
            values.iter().map(|&b| DerivationTree::bit(b)),
        )
    }

    #[test]
    fn test_text_of_mixed_leaves() {
        let tree = DerivationTree::new(
            NonTerminal::new("start"),
            [DerivationTree::text("ab"), DerivationTree::bytes([0xe9])],
        );
        assert_eq!(tree.to_text(), "ab\u{e9}");
        assert_eq!(tree.to_bytes(), vec![b'a', b'b', 0xe9]);
        assert!(tree.contains_bytes());
        assert!(tree.is_binary());
    }

    #[test]
    fn test_bits_pack_with_left_padding() {
        let tree = bits(&[true, false, true]);
        assert_eq!(tree.to_bits(), "101");
        assert_eq!(tree.to_bytes(), vec![0b0000_0101]);
        assert_eq!(tree.int_at(NodeId::ROOT), Some(5));
    }

    #[test]
    fn test_bits_of_text() {
        let tree = DerivationTree::text("A");
        assert_eq!(tree.to_bits(), "01000001");
    }

    #[test]
    fn test_numeric_values() {
        let tree = DerivationTree::new(NonTerminal::new("n"), [DerivationTree::text(" 42")]);
        assert_eq!(tree.int_at(NodeId::ROOT), Some(42));
        assert_eq!(tree.float_at(NodeId::ROOT), Some(42.0));
        assert_eq!(DerivationTree::text("x").int_at(NodeId::ROOT), None);
    }

    #[test]
    fn test_tree_string() {
        let tree = DerivationTree::new(NonTerminal::new("start"), [DerivationTree::text("1")]);
        assert_eq!(tree.to_tree_string(), "<start>(\"1\")");
    }
}
