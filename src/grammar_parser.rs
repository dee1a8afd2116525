//! Handwritten recursive descent parser for the ABNF meta-grammar.
//!
//! Accepts the rule-list syntax of RFC 5234 section 4 (CRLF or bare LF line
//! endings, comments, continuation lines) plus inline semantic-action blocks
//! delimited by `!!!` lines, and produces a [`RuleSet`].

use crate::ast::{fold_name, Base, Element, Rule, RuleSet};
use crate::input_stream::InputStream;
use log::debug;
use thiserror::Error;

/// Compile-time errors from grammar loading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GrammarError {
    /// Grammar text remained after the last parseable rule.
    #[error("grammar text remains unparsed at offset {offset}: {}", String::from_utf8_lossy(.tail))]
    IncompleteParse { offset: usize, tail: Vec<u8> },

    /// No rules could be parsed at all.
    #[error("no rules could be parsed from the grammar text")]
    InvalidGrammar,

    /// A rule reference (or an `=/` target) has no definition.
    #[error("rule '{name}' is referenced but never defined")]
    UnresolvedRule { name: String },

    /// A second bare `=` definition for an existing rule.
    #[error("rule '{name}' is defined more than once")]
    DuplicateRule { name: String },

    /// A `num-val` component does not fit in an octet.
    #[error("numeric value {value} exceeds the octet range at offset {offset}")]
    ValueOutOfRange { value: u64, offset: usize },

    /// A reversed range: `%x39-30`, or a repeat with `min > max`.
    #[error("range {lo}-{hi} is reversed at offset {offset}")]
    InvalidRange { lo: u32, hi: u32, offset: usize },
}

/// Internal parse failure: `Mismatch` backtracks (or stops the rule list),
/// `Fatal` aborts compilation with a diagnostic.
enum Fail {
    Mismatch,
    Fatal(GrammarError),
}

type PResult<T> = Result<T, Fail>;

/// Parse as many rules as possible. Returns the rule set and the unconsumed
/// tail (empty when the whole text parsed). Duplicate definitions and `=/`
/// on undefined rules fail; reference resolution is left to [`parse_grammar`].
pub fn parse_rulelist(text: &[u8]) -> Result<(RuleSet, Vec<u8>), GrammarError> {
    let mut parser = Parser {
        s: InputStream::new(text),
    };
    let mut rules = RuleSet::new();

    loop {
        parser.skip_blank_lines();
        if parser.s.is_eof() {
            break;
        }
        let mark = parser.s.position();
        match parser.parse_rule() {
            Ok(parsed) => {
                let ParsedRule {
                    name,
                    incremental,
                    element,
                    action,
                } = parsed;
                if incremental {
                    let folded = fold_name(&name);
                    if !rules.append_alternatives(&folded, element) {
                        return Err(GrammarError::UnresolvedRule { name });
                    }
                    if let Some(source) = action {
                        rules.set_action(&folded, source);
                    }
                } else if !rules.insert(Rule {
                    name: name.clone(),
                    element,
                    action,
                }) {
                    return Err(GrammarError::DuplicateRule { name });
                }
            }
            Err(Fail::Mismatch) => {
                parser.s.set_position(mark);
                break;
            }
            Err(Fail::Fatal(error)) => return Err(error),
        }
    }

    if rules.is_empty() {
        return Err(GrammarError::InvalidGrammar);
    }
    let tail = parser.s.remaining().to_vec();
    debug!("parsed {} rules, {} tail bytes", rules.len(), tail.len());
    Ok((rules, tail))
}

/// Compile a grammar: parse the full text, reject leftovers, and check that
/// every rule reference resolves.
pub fn parse_grammar(text: &[u8]) -> Result<RuleSet, GrammarError> {
    let (rules, tail) = parse_rulelist(text)?;
    if !tail.is_empty() {
        return Err(GrammarError::IncompleteParse {
            offset: text.len() - tail.len(),
            tail,
        });
    }
    check_resolved(&rules)?;
    Ok(rules)
}

fn check_resolved(rules: &RuleSet) -> Result<(), GrammarError> {
    for rule in rules.iter() {
        let mut pending = vec![&rule.element];
        while let Some(element) = pending.pop() {
            match element {
                Element::RuleRef(name) => {
                    if rules.get(name).is_none() {
                        return Err(GrammarError::UnresolvedRule { name: name.clone() });
                    }
                }
                Element::Alternation(items) | Element::Concatenation(items) => {
                    pending.extend(items.iter());
                }
                Element::Repetition { inner, .. } => pending.push(inner),
                _ => {}
            }
        }
    }
    Ok(())
}

struct ParsedRule {
    name: String,
    incremental: bool,
    element: Element,
    action: Option<String>,
}

struct Parser<'a> {
    s: InputStream<'a>,
}

impl Parser<'_> {
    /// Skip `*WSP c-nl` lines (blank lines and whole-line comments) between
    /// rules.
    fn skip_blank_lines(&mut self) {
        loop {
            let mark = self.s.position();
            while matches!(self.s.current(), Some(b' ') | Some(b'\t')) {
                self.s.advance();
            }
            if !self.eat_c_nl() {
                self.s.set_position(mark);
                break;
            }
        }
    }

    /// `c-nl = comment / CRLF` (bare LF accepted).
    fn eat_c_nl(&mut self) -> bool {
        match self.s.current() {
            Some(b';') => {
                while let Some(byte) = self.s.current() {
                    if byte == b'\r' || byte == b'\n' {
                        break;
                    }
                    self.s.advance();
                }
                // A comment on the last line may end at EOF.
                self.eat_newline() || self.s.is_eof()
            }
            Some(b'\r') | Some(b'\n') => self.eat_newline(),
            _ => false,
        }
    }

    fn eat_newline(&mut self) -> bool {
        match self.s.current() {
            Some(b'\r') => {
                self.s.advance();
                self.s.eat(b'\n');
                true
            }
            Some(b'\n') => {
                self.s.advance();
                true
            }
            _ => false,
        }
    }

    /// `*c-wsp`: whitespace, including newlines followed by whitespace
    /// (continuation lines) and comments within them. Returns whether
    /// anything was consumed.
    fn skip_c_wsp(&mut self) -> bool {
        let start = self.s.position();
        loop {
            match self.s.current() {
                Some(b' ') | Some(b'\t') => {
                    self.s.advance();
                }
                Some(b';') | Some(b'\r') | Some(b'\n') => {
                    let mark = self.s.position();
                    if self.eat_c_nl() && matches!(self.s.current(), Some(b' ') | Some(b'\t')) {
                        self.s.advance();
                    } else {
                        self.s.set_position(mark);
                        break;
                    }
                }
                _ => break,
            }
        }
        self.s.position() > start
    }

    /// `rule = rulename defined-as elements c-nl [action-block]`
    fn parse_rule(&mut self) -> PResult<ParsedRule> {
        let name = self.parse_rulename()?;
        self.skip_c_wsp();
        let incremental = if self.s.starts_with(b"=/") {
            self.s.advance_by(2);
            true
        } else if self.s.eat(b'=') {
            false
        } else {
            return Err(Fail::Mismatch);
        };
        self.skip_c_wsp();
        let element = self.parse_alternation()?;
        self.skip_c_wsp();
        if !self.eat_c_nl() && !self.s.is_eof() {
            return Err(Fail::Mismatch);
        }
        let action = self.parse_action_block()?;
        Ok(ParsedRule {
            name,
            incremental,
            element,
            action,
        })
    }

    /// `rulename = ALPHA *(ALPHA / DIGIT / "-")`
    fn parse_rulename(&mut self) -> PResult<String> {
        let start = self.s.position();
        match self.s.current() {
            Some(byte) if byte.is_ascii_alphabetic() => {
                self.s.advance();
            }
            _ => return Err(Fail::Mismatch),
        }
        while let Some(byte) = self.s.current() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                self.s.advance();
            } else {
                break;
            }
        }
        let name = self.s.slice(start, self.s.position());
        Ok(String::from_utf8_lossy(name).into_owned())
    }

    /// `alternation = concatenation *( *c-wsp "/" *c-wsp concatenation )`
    ///
    /// A single alternative collapses to its concatenation.
    fn parse_alternation(&mut self) -> PResult<Element> {
        let mut alts = vec![self.parse_concatenation()?];
        loop {
            let mark = self.s.position();
            self.skip_c_wsp();
            if !self.s.eat(b'/') {
                self.s.set_position(mark);
                break;
            }
            self.skip_c_wsp();
            alts.push(self.parse_concatenation()?);
        }
        Ok(if alts.len() == 1 {
            alts.remove(0)
        } else {
            Element::Alternation(alts)
        })
    }

    /// `concatenation = repetition *( 1*c-wsp repetition )`
    ///
    /// A single item collapses to itself.
    fn parse_concatenation(&mut self) -> PResult<Element> {
        let mut items = vec![self.parse_repetition()?];
        loop {
            let mark = self.s.position();
            if !self.skip_c_wsp() {
                break;
            }
            match self.parse_repetition() {
                Ok(item) => items.push(item),
                Err(Fail::Mismatch) => {
                    self.s.set_position(mark);
                    break;
                }
                Err(fatal) => return Err(fatal),
            }
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Element::Concatenation(items)
        })
    }

    /// `repetition = [repeat] element` with
    /// `repeat = 1*DIGIT / (*DIGIT "*" *DIGIT)`.
    ///
    /// Bare `n` means exactly n; `*` alone 0..inf; `m*` m..inf; `*n` 0..n;
    /// `m*n` m..n. An exactly-once repeat collapses to the element.
    fn parse_repetition(&mut self) -> PResult<Element> {
        let offset = self.s.position();
        let lo = self.parse_decimal_opt()?;
        if self.s.eat(b'*') {
            let hi = self.parse_decimal_opt()?;
            let min = lo.unwrap_or(0);
            if let Some(max) = hi {
                if max < min {
                    return Err(Fail::Fatal(GrammarError::InvalidRange {
                        lo: min,
                        hi: max,
                        offset,
                    }));
                }
            }
            let inner = self.parse_element()?;
            Ok(Element::repeat(min, hi, inner))
        } else if let Some(count) = lo {
            let inner = self.parse_element()?;
            Ok(if count == 1 {
                inner
            } else {
                Element::repeat(count, Some(count), inner)
            })
        } else {
            self.parse_element()
        }
    }

    /// Optional run of decimal digits.
    fn parse_decimal_opt(&mut self) -> PResult<Option<u32>> {
        let offset = self.s.position();
        let mut value: u64 = 0;
        let mut seen = false;
        while let Some(byte) = self.s.current() {
            if byte.is_ascii_digit() {
                seen = true;
                value = value * 10 + u64::from(byte - b'0');
                if value > u64::from(u32::MAX) {
                    return Err(Fail::Fatal(GrammarError::ValueOutOfRange { value, offset }));
                }
                self.s.advance();
            } else {
                break;
            }
        }
        Ok(if seen { Some(value as u32) } else { None })
    }

    /// `element = rulename / group / option / char-val / num-val / prose-val`
    fn parse_element(&mut self) -> PResult<Element> {
        match self.s.current() {
            Some(byte) if byte.is_ascii_alphabetic() => {
                let name = self.parse_rulename()?;
                Ok(Element::RuleRef(fold_name(&name)))
            }
            Some(b'(') => self.parse_group(),
            Some(b'[') => self.parse_option(),
            Some(b'"') => self.parse_char_val(),
            Some(b'%') => self.parse_num_val(),
            Some(b'<') => self.parse_prose_val(),
            _ => Err(Fail::Mismatch),
        }
    }

    /// `group = "(" *c-wsp alternation *c-wsp ")"`
    fn parse_group(&mut self) -> PResult<Element> {
        self.s.advance();
        self.skip_c_wsp();
        let inner = self.parse_alternation()?;
        self.skip_c_wsp();
        if !self.s.eat(b')') {
            return Err(Fail::Mismatch);
        }
        Ok(inner)
    }

    /// `option = "[" *c-wsp alternation *c-wsp "]"` — zero or one.
    fn parse_option(&mut self) -> PResult<Element> {
        self.s.advance();
        self.skip_c_wsp();
        let inner = self.parse_alternation()?;
        self.skip_c_wsp();
        if !self.s.eat(b']') {
            return Err(Fail::Mismatch);
        }
        Ok(Element::optional(inner))
    }

    /// `char-val = DQUOTE *(%x20-21 / %x23-7E) DQUOTE`, stored as an
    /// ASCII-case-insensitive literal. Empty literals are rejected.
    fn parse_char_val(&mut self) -> PResult<Element> {
        self.s.advance();
        let start = self.s.position();
        while let Some(byte) = self.s.current() {
            match byte {
                0x20..=0x21 | 0x23..=0x7E => {
                    self.s.advance();
                }
                _ => break,
            }
        }
        let bytes = self.s.slice(start, self.s.position()).to_vec();
        if bytes.is_empty() || !self.s.eat(b'"') {
            return Err(Fail::Mismatch);
        }
        Ok(Element::Literal {
            bytes,
            case_insensitive: true,
        })
    }

    /// `num-val = "%" (bin-val / dec-val / hex-val)`: a dot list becomes an
    /// exact byte sequence, a dash a single-byte range.
    fn parse_num_val(&mut self) -> PResult<Element> {
        let offset = self.s.position();
        self.s.advance();
        let base = match self.s.advance() {
            Some(b'b') | Some(b'B') => Base::Bin,
            Some(b'd') | Some(b'D') => Base::Dec,
            Some(b'x') | Some(b'X') => Base::Hex,
            _ => return Err(Fail::Mismatch),
        };
        let first = self.parse_base_digits(base, offset)?;
        if self.s.eat(b'-') {
            let second = self.parse_base_digits(base, offset)?;
            let lo = octet(first, offset)?;
            let hi = octet(second, offset)?;
            if lo > hi {
                return Err(Fail::Fatal(GrammarError::InvalidRange {
                    lo: first,
                    hi: second,
                    offset,
                }));
            }
            Ok(Element::NumRange { base, lo, hi })
        } else {
            let mut bytes = vec![octet(first, offset)?];
            while self.s.eat(b'.') {
                let value = self.parse_base_digits(base, offset)?;
                bytes.push(octet(value, offset)?);
            }
            Ok(Element::NumConcat { base, bytes })
        }
    }

    /// One or more digits in `base`.
    fn parse_base_digits(&mut self, base: Base, offset: usize) -> PResult<u32> {
        let radix = match base {
            Base::Bin => 2,
            Base::Dec => 10,
            Base::Hex => 16,
        };
        let mut value: u64 = 0;
        let mut seen = false;
        while let Some(byte) = self.s.current() {
            let digit = match (byte as char).to_digit(radix) {
                Some(digit) => digit,
                None => break,
            };
            seen = true;
            value = value * u64::from(radix) + u64::from(digit);
            if value > u64::from(u32::MAX) {
                return Err(Fail::Fatal(GrammarError::ValueOutOfRange { value, offset }));
            }
            self.s.advance();
        }
        if !seen {
            return Err(Fail::Mismatch);
        }
        Ok(value as u32)
    }

    /// `prose-val = "<" *(%x20-3D / %x3F-7E) ">"`
    fn parse_prose_val(&mut self) -> PResult<Element> {
        self.s.advance();
        let start = self.s.position();
        while let Some(byte) = self.s.current() {
            match byte {
                0x20..=0x3D | 0x3F..=0x7E => {
                    self.s.advance();
                }
                _ => break,
            }
        }
        let text = String::from_utf8_lossy(self.s.slice(start, self.s.position())).into_owned();
        if !self.s.eat(b'>') {
            return Err(Fail::Mismatch);
        }
        Ok(Element::ProseVal(text))
    }

    /// Optional semantic-action block directly after a rule: a line starting
    /// with `!!!` opens the block, everything up to the next `!!!` is the
    /// verbatim action source, and the remainder of the closing line is
    /// discarded.
    fn parse_action_block(&mut self) -> PResult<Option<String>> {
        if !self.s.starts_with(b"!!!") {
            return Ok(None);
        }
        self.s.advance_by(3);
        while matches!(self.s.current(), Some(b' ') | Some(b'\t')) {
            self.s.advance();
        }
        if !self.eat_newline() {
            return Err(Fail::Mismatch);
        }
        let start = self.s.position();
        while !self.s.starts_with(b"!!!") {
            if self.s.is_eof() {
                return Err(Fail::Mismatch);
            }
            self.s.advance();
        }
        let source = String::from_utf8_lossy(self.s.slice(start, self.s.position())).into_owned();
        self.s.advance_by(3);
        while matches!(self.s.current(), Some(b' ') | Some(b'\t')) {
            self.s.advance();
        }
        self.eat_newline();
        Ok(Some(source))
    }
}

fn octet(value: u32, offset: usize) -> PResult<u8> {
    if value > 0xFF {
        return Err(Fail::Fatal(GrammarError::ValueOutOfRange {
            value: u64::from(value),
            offset,
        }));
    }
    Ok(value as u8)
}
