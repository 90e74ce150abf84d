//! Random instances of regular expressions, generated from their HIR.
//!
//! Classes are narrowed to printable ASCII whenever they contain any, so `.`
//! or `\w` produce readable text. Look-around assertions are ignored.

use rand::Rng;
use rand::seq::SliceRandom;
use regex_syntax::hir::{Class, Hir, HirKind};

const PRINTABLE: (u32, u32) = (0x20, 0x7e);

/// Appends one random instance of `hir` to `out`. Unbounded repetitions
/// add at most `max_repeat` copies beyond their minimum.
pub(crate) fn generate<R: Rng + ?Sized>(hir: &Hir, max_repeat: u32, rng: &mut R, out: &mut Vec<u8>) {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => {}
        HirKind::Literal(literal) => out.extend_from_slice(&literal.0),
        HirKind::Class(Class::Unicode(class)) => {
            let ranges: Vec<(u32, u32)> = class
                .ranges()
                .iter()
                .map(|r| (u32::from(r.start()), u32::from(r.end())))
                .collect();
            if let Some(code) = pick(&ranges, rng) {
                let c = char::from_u32(code).unwrap_or_else(|| class.ranges()[0].start());
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
        HirKind::Class(Class::Bytes(class)) => {
            let ranges: Vec<(u32, u32)> = class
                .ranges()
                .iter()
                .map(|r| (u32::from(r.start()), u32::from(r.end())))
                .collect();
            if let Some(byte) = pick(&ranges, rng).and_then(|b| u8::try_from(b).ok()) {
                out.push(byte);
            }
        }
        HirKind::Repetition(rep) => {
            let upper = rep.max.unwrap_or_else(|| rep.min.saturating_add(max_repeat));
            let count = rng.gen_range(rep.min..=upper.max(rep.min));
            for _ in 0..count {
                generate(&rep.sub, max_repeat, rng, out);
            }
        }
        HirKind::Capture(capture) => generate(&capture.sub, max_repeat, rng, out),
        HirKind::Concat(parts) => {
            for part in parts {
                generate(part, max_repeat, rng, out);
            }
        }
        HirKind::Alternation(branches) => {
            if let Some(branch) = branches.choose(rng) {
                generate(branch, max_repeat, rng, out);
            }
        }
    }
}

/// Uniform pick over the union of inclusive ranges, preferring the
/// printable ASCII part when there is one.
fn pick<R: Rng + ?Sized>(ranges: &[(u32, u32)], rng: &mut R) -> Option<u32> {
    let printable: Vec<(u32, u32)> = ranges
        .iter()
        .filter_map(|&(lo, hi)| {
            let (lo, hi) = (lo.max(PRINTABLE.0), hi.min(PRINTABLE.1));
            (lo <= hi).then_some((lo, hi))
        })
        .collect();
    let ranges = if printable.is_empty() { ranges } else { &printable };

    let total: u64 = ranges.iter().map(|&(lo, hi)| u64::from(hi - lo) + 1).sum();
    if total == 0 {
        return None;
    }
    let mut index = rng.gen_range(0..total);
    for &(lo, hi) in ranges {
        let width = u64::from(hi - lo) + 1;
        if index < width {
            return u32::try_from(u64::from(lo) + index).ok();
        }
        index -= width;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use regex::Regex;

    fn instances(pattern: &str, n: usize) -> Vec<String> {
        let hir = regex_syntax::parse(pattern).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        (0..n)
            .map(|_| {
                let mut out = Vec::new();
                generate(&hir, 5, &mut rng, &mut out);
                String::from_utf8(out).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_instances_match_pattern() {
        for pattern in ["[a-z]{3}", "(foo|bar)+", "[0-9]+\\.[0-9]?", "x*y", "\\w+@\\w+"] {
            let re = Regex::new(&format!("^(?:{pattern})$")).unwrap();
            for instance in instances(pattern, 20) {
                assert!(re.is_match(&instance), "{instance:?} !~ {pattern}");
            }
        }
    }

    #[test]
    fn test_dot_prefers_printable() {
        for instance in instances(".", 50) {
            let c = instance.chars().next().unwrap();
            assert!((' '..='~').contains(&c));
        }
    }

    #[test]
    fn test_unbounded_repetition_is_capped() {
        for instance in instances("a*", 50) {
            assert!(instance.len() <= 5);
        }
    }
}
