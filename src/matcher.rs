//! Backtracking interpreter for compiled ABNF grammars.
//!
//! Walks the operator AST directly against a byte input. Matching is
//! continuation-passing: every element enumerates its candidate matches in
//! order (alternatives in source order, repetitions greediest first) and
//! hands each to a continuation covering the rest of the enclosing match.
//! A candidate is committed only when the continuation succeeds, so a later
//! failure re-tries earlier unexplored branches.
//!
//! Match failures are ordinary control flow; only exhaustion of every
//! candidate at the top level surfaces as [`MatchError::NoMatch`].

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use log::trace;
use thiserror::Error;

use crate::ast::{fold_name, Element, RuleSet};
use crate::capture::{Capture, CaptureResult};

/// Runtime errors from `apply`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    /// The start rule is not defined in the grammar.
    #[error("rule '{name}' is not defined in the grammar")]
    UnknownRule { name: String },

    /// No candidate match covered a prefix of the input.
    #[error("rule '{rule}' did not match the input")]
    NoMatch { rule: String },

    /// A prose value is reachable from the start rule and cannot be matched.
    #[error("rule '{rule}' reaches a prose value, which cannot be matched")]
    ProseUnresolvable { rule: String },
}

/// Outcome of a semantic action.
pub enum ActionResult<S> {
    /// Accept the match, keeping the rule's own capture.
    Keep(S),
    /// Accept the match, substituting the rule's capture.
    Replace(S, Capture),
    /// Fail this match candidate of the rule; backtracking resumes.
    Reject,
}

/// A registered reducer: receives the rule's consumed bytes, its capture
/// tree, and the current state.
pub type ActionFn<S> = Box<dyn Fn(&[u8], &Capture, S) -> ActionResult<S>>;

/// Default bound on rule-application nesting.
const DEFAULT_MAX_DEPTH: usize = 1024;

/// Interpreter for one rule set, with an optional semantic-action registry.
///
/// The rule set itself is immutable and may back any number of matchers;
/// a matcher is cheap and carries only the registry and limits.
pub struct Matcher<'g, S> {
    rules: &'g RuleSet,
    actions: HashMap<String, ActionFn<S>>,
    max_depth: usize,
}

impl<'g, S: Clone> Matcher<'g, S> {
    pub fn new(rules: &'g RuleSet) -> Self {
        Matcher {
            rules,
            actions: HashMap::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Cap rule-application nesting; exceeding the cap fails the branch.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Register a semantic action for `rule` (case-folded). The action runs
    /// whenever the rule matches; its state effects survive only if the
    /// surrounding match commits the candidate.
    pub fn bind<F>(&mut self, rule: &str, action: F) -> Result<(), MatchError>
    where
        F: Fn(&[u8], &Capture, S) -> ActionResult<S> + 'static,
    {
        let folded = fold_name(rule);
        if self.rules.get(&folded).is_none() {
            return Err(MatchError::UnknownRule {
                name: rule.to_string(),
            });
        }
        self.actions.insert(folded, Box::new(action));
        Ok(())
    }

    /// Match `rule` against a prefix of `input`, threading `state` through
    /// semantic actions.
    pub fn apply(
        &self,
        rule_name: &str,
        input: &[u8],
        state: S,
    ) -> Result<CaptureResult<S>, MatchError> {
        let folded = fold_name(rule_name);
        let rule = self.rules.get(&folded).ok_or_else(|| MatchError::UnknownRule {
            name: rule_name.to_string(),
        })?;
        self.check_prose(&folded)?;

        let run = MatchRun {
            matcher: self,
            input,
            depth: Cell::new(0),
            active: RefCell::new(HashSet::new()),
        };

        // The start rule's body is matched here rather than through the
        // generic rule path so the end positions of its immediate children
        // are available for `string_tokens`.
        let outcome: Option<(usize, Capture, Vec<usize>, S)> = match &rule.element {
            Element::Concatenation(items) => {
                let mut caps = Vec::new();
                let mut ends = Vec::new();
                run.seq(items, 0, state, &mut caps, &mut ends, &mut |p, caps, ends, st| {
                    Some((p, Capture::List(caps.clone()), ends.clone(), st))
                })
            }
            Element::Repetition { min, max, inner } => {
                let mut caps = Vec::new();
                let mut ends = Vec::new();
                run.repeat(
                    inner,
                    *min,
                    *max,
                    0,
                    0,
                    state,
                    &mut caps,
                    &mut ends,
                    &mut |p, caps, ends, st| {
                        Some((p, Capture::List(caps.clone()), ends.clone(), st))
                    },
                )
            }
            other => run.element(other, 0, state, &mut |p, cap, st| Some((p, cap, vec![p], st))),
        };

        let (end, body, ends, state) = outcome.ok_or_else(|| MatchError::NoMatch {
            rule: rule_name.to_string(),
        })?;

        let text = &input[..end];
        let (values, state) = match self.actions.get(&folded) {
            None => (Capture::List(vec![body]), state),
            Some(action) => match action(text, &body, state) {
                ActionResult::Keep(state) => (body, state),
                ActionResult::Replace(state, value) => (value, state),
                ActionResult::Reject => {
                    return Err(MatchError::NoMatch {
                        rule: rule_name.to_string(),
                    })
                }
            },
        };

        let mut string_tokens = Vec::new();
        let mut prev = 0;
        for &token_end in &ends {
            string_tokens.push(input[prev..token_end].to_vec());
            prev = token_end;
        }

        Ok(CaptureResult {
            input: input.to_vec(),
            string_text: text.to_vec(),
            rest: input[end..].to_vec(),
            string_tokens,
            values,
            state,
        })
    }

    /// A rule set reached through a prose value at match time is
    /// unresolvable; reject it up front by walking the rules reachable from
    /// the start rule. Prose in unreachable rules is permitted.
    fn check_prose(&self, start: &str) -> Result<(), MatchError> {
        let mut seen = HashSet::new();
        let mut rule_stack = vec![start.to_string()];
        while let Some(name) = rule_stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let rule = match self.rules.get(&name) {
                Some(rule) => rule,
                None => continue,
            };
            let mut pending = vec![&rule.element];
            while let Some(element) = pending.pop() {
                match element {
                    Element::ProseVal(_) => {
                        return Err(MatchError::ProseUnresolvable {
                            rule: rule.name.clone(),
                        })
                    }
                    Element::Alternation(items) | Element::Concatenation(items) => {
                        pending.extend(items.iter());
                    }
                    Element::Repetition { inner, .. } => pending.push(inner),
                    Element::RuleRef(target) => {
                        if !seen.contains(target) {
                            rule_stack.push(target.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// Continuation over single-element candidates.
type Cont<'c, S, R> = &'c mut dyn FnMut(usize, Capture, S) -> Option<R>;

/// Continuation over accumulated sequence candidates (child captures plus
/// per-child end positions).
type SeqCont<'c, S, R> = &'c mut dyn FnMut(usize, &mut Vec<Capture>, &mut Vec<usize>, S) -> Option<R>;

/// State for one `apply` call.
struct MatchRun<'a, S> {
    matcher: &'a Matcher<'a, S>,
    input: &'a [u8],
    depth: Cell<usize>,
    /// `(rule index, position)` pairs currently being applied; re-entering
    /// one is unbounded recursion and fails the branch.
    active: RefCell<HashSet<(usize, usize)>>,
}

impl<S: Clone> MatchRun<'_, S> {
    /// Enumerate candidate matches of `element` at `pos`, feeding each to
    /// `k` until one is accepted.
    fn element<R>(&self, element: &Element, pos: usize, state: S, k: Cont<'_, S, R>) -> Option<R> {
        match element {
            Element::Literal {
                bytes,
                case_insensitive,
            } => {
                let end = pos + bytes.len();
                if end > self.input.len() {
                    return None;
                }
                let found = &self.input[pos..end];
                let matched = if *case_insensitive {
                    found.eq_ignore_ascii_case(bytes)
                } else {
                    found == bytes.as_slice()
                };
                if matched {
                    k(end, Capture::Bytes(found.to_vec()), state)
                } else {
                    None
                }
            }
            Element::NumConcat { bytes, .. } => {
                let end = pos + bytes.len();
                if end > self.input.len() {
                    return None;
                }
                let found = &self.input[pos..end];
                if found == bytes.as_slice() {
                    k(end, Capture::Bytes(found.to_vec()), state)
                } else {
                    None
                }
            }
            Element::NumRange { lo, hi, .. } => match self.input.get(pos) {
                Some(&byte) if *lo <= byte && byte <= *hi => {
                    k(pos + 1, Capture::Bytes(vec![byte]), state)
                }
                _ => None,
            },
            Element::RuleRef(name) => self.rule(name, pos, state, k),
            Element::Alternation(alts) => {
                for alt in alts {
                    let result = self.element(alt, pos, state.clone(), &mut |p, cap, st| {
                        k(p, Capture::List(vec![cap]), st)
                    });
                    if result.is_some() {
                        return result;
                    }
                }
                None
            }
            Element::Concatenation(items) => {
                let mut caps = Vec::new();
                let mut ends = Vec::new();
                self.seq(items, pos, state, &mut caps, &mut ends, &mut |p, caps, _ends, st| {
                    k(p, Capture::List(caps.clone()), st)
                })
            }
            Element::Repetition { min, max, inner } => {
                let mut caps = Vec::new();
                let mut ends = Vec::new();
                self.repeat(
                    inner,
                    *min,
                    *max,
                    0,
                    pos,
                    state,
                    &mut caps,
                    &mut ends,
                    &mut |p, caps, _ends, st| k(p, Capture::List(caps.clone()), st),
                )
            }
            // Unreachable: apply rejects rule sets with reachable prose.
            Element::ProseVal(_) => None,
        }
    }

    /// Match `items` left to right, accumulating child captures and end
    /// positions, backtracking into earlier items when later ones fail.
    fn seq<R>(
        &self,
        items: &[Element],
        pos: usize,
        state: S,
        caps: &mut Vec<Capture>,
        ends: &mut Vec<usize>,
        k: SeqCont<'_, S, R>,
    ) -> Option<R> {
        let (first, rest) = match items.split_first() {
            Some(split) => split,
            None => return k(pos, caps, ends, state),
        };
        self.element(first, pos, state, &mut |p, cap, st| {
            caps.push(cap);
            ends.push(p);
            let result = self.seq(rest, p, st, caps, ends, k);
            if result.is_none() {
                caps.pop();
                ends.pop();
            }
            result
        })
    }

    /// Greedy-with-backtracking repetition: try to extend to another
    /// iteration first, fall back to stopping here once `min` is met.
    /// Iterations that consume nothing are not counted, so zero-width inner
    /// matches cannot loop.
    #[allow(clippy::too_many_arguments)]
    fn repeat<R>(
        &self,
        inner: &Element,
        min: u32,
        max: Option<u32>,
        count: u32,
        pos: usize,
        state: S,
        caps: &mut Vec<Capture>,
        ends: &mut Vec<usize>,
        k: SeqCont<'_, S, R>,
    ) -> Option<R> {
        if max.map_or(true, |m| count < m) {
            let extended = self.element(inner, pos, state.clone(), &mut |p, cap, st| {
                if p == pos {
                    return None;
                }
                caps.push(cap);
                ends.push(p);
                let result = self.repeat(inner, min, max, count + 1, p, st, caps, ends, k);
                if result.is_none() {
                    caps.pop();
                    ends.pop();
                }
                result
            });
            if extended.is_some() {
                return extended;
            }
        }
        if count >= min {
            k(pos, caps, ends, state)
        } else {
            None
        }
    }

    /// Apply a rule at `pos`: match its body, then run its bound action (if
    /// any) on the consumed bytes before handing the capture on. Without an
    /// action the body capture is wrapped in a one-element list.
    fn rule<R>(&self, name: &str, pos: usize, state: S, k: Cont<'_, S, R>) -> Option<R> {
        let idx = match self.matcher.rules.index_of(name) {
            Some(idx) => idx,
            None => return None,
        };
        let rule = match self.matcher.rules.get(name) {
            Some(rule) => rule,
            None => return None,
        };
        if self.depth.get() >= self.matcher.max_depth {
            return None;
        }
        if !self.active.borrow_mut().insert((idx, pos)) {
            return None;
        }
        self.depth.set(self.depth.get() + 1);
        trace!("applying rule '{}' at {}", rule.name, pos);

        let action = self.matcher.actions.get(name);
        let result = self.element(&rule.element, pos, state, &mut |p, cap, st| {
            // The rule's own matching is done; release the re-entrancy
            // guard while the continuation explores the enclosing match.
            self.active.borrow_mut().remove(&(idx, pos));
            let result = match action {
                None => k(p, Capture::List(vec![cap]), st),
                Some(action) => match action(&self.input[pos..p], &cap, st) {
                    ActionResult::Keep(st) => k(p, cap, st),
                    ActionResult::Replace(st, value) => k(p, value, st),
                    ActionResult::Reject => None,
                },
            };
            if result.is_none() {
                self.active.borrow_mut().insert((idx, pos));
            }
            result
        });

        self.depth.set(self.depth.get() - 1);
        self.active.borrow_mut().remove(&(idx, pos));
        result
    }
}
