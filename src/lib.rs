//! rustabnf: compiler and interpreter for ABNF grammars (RFC 4234 / RFC 5234)
//!
//! This library compiles ABNF grammar text to a [`RuleSet`] and matches
//! rules against byte inputs with a backtracking interpreter that walks the
//! compiled AST directly:
//! - quoted literals match ASCII case-insensitively, numeric values exactly
//! - repetition is greedy with backtracking, alternatives are tried in
//!   source order
//! - incremental alternatives (`=/`) extend previously defined rules
//! - each rule may carry an inline semantic action, written between `!!!`
//!   lines after the rule and executed through a callback registry
//!   ([`Matcher::bind`]) whenever the rule reduces
//!
//! ```
//! use rustabnf::{apply, load};
//!
//! let rules = load(b"greeting = \"hello\" \" \" \"world\"\n").unwrap();
//! let result = apply(&rules, "greeting", b"Hello world!", ()).unwrap();
//! assert_eq!(result.string_text, b"Hello world".to_vec());
//! assert_eq!(result.rest, b"!".to_vec());
//! ```

pub mod ast;
pub mod capture;
pub mod core_rules;
pub mod grammar_parser;
pub mod input_stream;
pub mod matcher;

pub use ast::{Base, Element, Rule, RuleSet};
pub use capture::{Capture, CaptureResult};
pub use grammar_parser::{parse_rulelist, GrammarError};
pub use matcher::{ActionFn, ActionResult, MatchError, Matcher};

/// Compile ABNF grammar text into an immutable [`RuleSet`].
pub fn load(text: &[u8]) -> Result<RuleSet, GrammarError> {
    grammar_parser::parse_grammar(text)
}

/// Match `rule` against a prefix of `input`, threading `state` through any
/// semantic actions. For action callbacks, build a [`Matcher`] and register
/// them with [`Matcher::bind`] before applying.
pub fn apply<S: Clone>(
    rules: &RuleSet,
    rule: &str,
    input: &[u8],
    state: S,
) -> Result<CaptureResult<S>, MatchError> {
    Matcher::new(rules).apply(rule, input, state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facade_load_and_apply() {
        let rules = load(b"ab = \"a\" \"b\"\n").unwrap();
        let result = apply(&rules, "ab", b"abc", ()).unwrap();
        assert_eq!(result.string_text, b"ab".to_vec());
        assert_eq!(result.rest, b"c".to_vec());
        assert_eq!(result.string_tokens, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    /// The self-describing grammar of RFC 5234 section 4.
    const ABNF_GRAMMAR: &str = r#"rulelist = 1*( rule / (*WSP c-nl) )
rule = rulename defined-as elements c-nl
rulename = ALPHA *(ALPHA / DIGIT / "-")
defined-as = *c-wsp ("=" / "=/") *c-wsp
elements = alternation *c-wsp
c-wsp = WSP / (c-nl WSP)
c-nl = comment / CRLF
comment = ";" *(WSP / VCHAR) CRLF
alternation = concatenation *(*c-wsp "/" *c-wsp concatenation)
concatenation = repetition *(1*c-wsp repetition)
repetition = [repeat] element
repeat = 1*DIGIT / (*DIGIT "*" *DIGIT)
element = rulename / group / option / char-val / num-val / prose-val
group = "(" *c-wsp alternation *c-wsp ")"
option = "[" *c-wsp alternation *c-wsp "]"
char-val = DQUOTE *(%x20-21 / %x23-7E) DQUOTE
num-val = "%" (bin-val / dec-val / hex-val)
bin-val = "b" 1*BIT [ 1*("." 1*BIT) / ("-" 1*BIT) ]
dec-val = "d" 1*DIGIT [ 1*("." 1*DIGIT) / ("-" 1*DIGIT) ]
hex-val = "x" 1*HEXDIG [ 1*("." 1*HEXDIG) / ("-" 1*HEXDIG) ]
prose-val = "<" *(%x20-3D / %x3F-7E) ">"
"#;

    #[test]
    fn test_round_trip_self_description() {
        // Load the grammar that describes ABNF itself (plus the core rules
        // it references), then use it to recognize a small grammar text.
        let mut text = String::from(ABNF_GRAMMAR);
        text.push_str(core_rules::CORE_RULES);
        let rules = load(text.as_bytes()).expect("RFC 5234 grammar should compile");
        assert!(rules.get("rulelist").is_some());

        let input = b"a = \"x\"\r\nb = %x20\r\n";
        let result = apply(&rules, "rulelist", input, ()).unwrap();
        assert_eq!(result.string_text, input.to_vec());
        assert_eq!(result.rest, Vec::<u8>::new());
        // One token per rule line (iterations of the rulelist repetition)
        assert_eq!(
            result.string_tokens,
            vec![b"a = \"x\"\r\n".to_vec(), b"b = %x20\r\n".to_vec()]
        );
    }

    #[test]
    fn test_round_trip_rejects_malformed_input() {
        let mut text = String::from(ABNF_GRAMMAR);
        text.push_str(core_rules::CORE_RULES);
        let rules = load(text.as_bytes()).unwrap();

        // A lone rule name with no defined-as never forms a rule
        let result = apply(&rules, "rulelist", b"nonsense", ());
        assert!(matches!(result, Err(MatchError::NoMatch { .. })));
    }
}
