//! AST (Abstract Syntax Tree) for compiled ABNF grammars.
//!
//! This module defines the operator AST produced by the grammar parser and
//! the rule-set container the interpreter walks.

use indexmap::IndexMap;

/// Spelling of a `num-val` in the grammar source (`%b`, `%d`, `%x`).
///
/// Matching only uses the decoded integer values; the base is kept for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    Bin,
    Dec,
    Hex,
}

/// One node in a rule's right-hand side.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// Ordered alternatives; the first that lets the enclosing match
    /// complete wins.
    Alternation(Vec<Element>),
    /// Elements matched left to right.
    Concatenation(Vec<Element>),
    /// `inner` repeated between `min` and `max` times; `None` max is
    /// unbounded. Greedy with backtracking.
    Repetition {
        min: u32,
        max: Option<u32>,
        inner: Box<Element>,
    },
    /// Reference to another rule by case-folded name.
    RuleRef(String),
    /// A literal byte string. Quoted strings compare ASCII
    /// case-insensitively; numeric literals compare exactly.
    Literal {
        bytes: Vec<u8>,
        case_insensitive: bool,
    },
    /// A single byte in `[lo, hi]` inclusive.
    NumRange { base: Base, lo: u8, hi: u8 },
    /// An exact sequence of byte values (`%x30.31.32`).
    NumConcat { base: Base, bytes: Vec<u8> },
    /// `<free text>` placeholder; unresolvable at match time.
    ProseVal(String),
}

impl Element {
    /// Quoted-string literal (ASCII case-insensitive).
    pub fn literal(text: &str) -> Self {
        Element::Literal {
            bytes: text.as_bytes().to_vec(),
            case_insensitive: true,
        }
    }

    /// Exact byte-string literal.
    pub fn exact(bytes: &[u8]) -> Self {
        Element::Literal {
            bytes: bytes.to_vec(),
            case_insensitive: false,
        }
    }

    /// Reference to `name`, case-folded.
    pub fn rule_ref(name: &str) -> Self {
        Element::RuleRef(fold_name(name))
    }

    /// `min*max` repetition of `inner`.
    pub fn repeat(min: u32, max: Option<u32>, inner: Element) -> Self {
        Element::Repetition {
            min,
            max,
            inner: Box::new(inner),
        }
    }

    /// `[inner]` — zero or one occurrence.
    pub fn optional(inner: Element) -> Self {
        Element::repeat(0, Some(1), inner)
    }
}

/// Case-fold a rule name for lookup. ABNF rule names are ASCII, so this is
/// plain ASCII lowercasing.
pub fn fold_name(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// A named grammar production.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Original spelling, preserved for diagnostics.
    pub name: String,
    /// Compiled right-hand side.
    pub element: Element,
    /// Verbatim source of the rule's `!!!` action block, if any. Opaque to
    /// the compiler; execution goes through the interpreter's callback
    /// registry.
    pub action: Option<String>,
}

/// A compiled grammar: case-folded rule name to [`Rule`], insertion order
/// preserved. Built once by the parser and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleSet {
    rules: IndexMap<String, Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        RuleSet {
            rules: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Look up a rule; `name` is case-folded first.
    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.get(&fold_name(name))
    }

    /// Stable index of a rule in definition order. Used by the interpreter's
    /// recursion guard.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.rules.get_index_of(&fold_name(name))
    }

    /// Rules in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    /// Insert a new rule. Returns `false` if a rule with the same folded
    /// name already exists (the set is left unchanged).
    pub(crate) fn insert(&mut self, rule: Rule) -> bool {
        let key = fold_name(&rule.name);
        if self.rules.contains_key(&key) {
            return false;
        }
        self.rules.insert(key, rule);
        true
    }

    /// Append alternatives to an existing rule (ABNF `=/`). A non-alternation
    /// body is wrapped as the first alternative. Returns `false` if the rule
    /// is not defined.
    pub(crate) fn append_alternatives(&mut self, name: &str, element: Element) -> bool {
        let rule = match self.rules.get_mut(&fold_name(name)) {
            Some(rule) => rule,
            None => return false,
        };
        let mut new_alts = match element {
            Element::Alternation(alts) => alts,
            other => vec![other],
        };
        match &mut rule.element {
            Element::Alternation(alts) => alts.append(&mut new_alts),
            other => {
                let previous = std::mem::replace(other, Element::Alternation(Vec::new()));
                let mut alts = vec![previous];
                alts.append(&mut new_alts);
                *other = Element::Alternation(alts);
            }
        }
        true
    }

    /// Attach (or replace) a rule's action source.
    pub(crate) fn set_action(&mut self, name: &str, source: String) {
        if let Some(rule) = self.rules.get_mut(&fold_name(name)) {
            rule.action = Some(source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(name: &str, element: Element) -> Rule {
        Rule {
            name: name.to_string(),
            element,
            action: None,
        }
    }

    #[test]
    fn test_insert_and_lookup_case_folded() {
        let mut rules = RuleSet::new();
        assert!(rules.insert(plain("Greeting", Element::literal("hi"))));

        let rule = rules.get("GREETING").expect("lookup should fold case");
        assert_eq!(rule.name, "Greeting"); // original spelling preserved
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut rules = RuleSet::new();
        assert!(rules.insert(plain("a", Element::literal("x"))));
        assert!(!rules.insert(plain("A", Element::literal("y"))));

        // First definition untouched
        assert_eq!(rules.get("a").unwrap().element, Element::literal("x"));
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut rules = RuleSet::new();
        for name in ["zeta", "alpha", "mid"] {
            rules.insert(plain(name, Element::literal("x")));
        }
        let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(rules.index_of("ALPHA"), Some(1));
    }

    #[test]
    fn test_append_wraps_non_alternation() {
        let mut rules = RuleSet::new();
        rules.insert(plain("r", Element::literal("a")));
        assert!(rules.append_alternatives("r", Element::literal("b")));

        match &rules.get("r").unwrap().element {
            Element::Alternation(alts) => {
                assert_eq!(alts.len(), 2);
                assert_eq!(alts[0], Element::literal("a"));
                assert_eq!(alts[1], Element::literal("b"));
            }
            other => panic!("expected alternation, got {:?}", other),
        }
    }

    #[test]
    fn test_append_extends_existing_alternation() {
        let mut rules = RuleSet::new();
        rules.insert(plain(
            "r",
            Element::Alternation(vec![Element::literal("a"), Element::literal("b")]),
        ));
        assert!(rules.append_alternatives(
            "r",
            Element::Alternation(vec![Element::literal("c"), Element::literal("d")]),
        ));

        match &rules.get("r").unwrap().element {
            Element::Alternation(alts) => assert_eq!(alts.len(), 4),
            other => panic!("expected alternation, got {:?}", other),
        }
    }

    #[test]
    fn test_append_to_undefined_fails() {
        let mut rules = RuleSet::new();
        assert!(!rules.append_alternatives("missing", Element::literal("x")));
    }

    #[test]
    fn test_element_constructors() {
        assert_eq!(
            Element::literal("ab"),
            Element::Literal {
                bytes: b"ab".to_vec(),
                case_insensitive: true
            }
        );
        assert_eq!(
            Element::rule_ref("DIGIT"),
            Element::RuleRef("digit".to_string())
        );
        assert_eq!(
            Element::optional(Element::literal("x")),
            Element::Repetition {
                min: 0,
                max: Some(1),
                inner: Box::new(Element::literal("x")),
            }
        );
    }
}
