//! Capture trees produced by successful matches.
//!
//! The nesting of captures is an observable contract: semantic actions
//! destructure it. Terminals capture their matched bytes; concatenations,
//! alternations, repetitions and rule applications capture lists.

use std::fmt;

/// Structured value produced by matching one element.
#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    /// Bytes consumed by a literal, numeric range, or numeric concatenation.
    Bytes(Vec<u8>),
    /// Child captures of a compound element, or the single-element wrapper
    /// around an action-less rule's body capture.
    List(Vec<Capture>),
    /// Integer produced by a semantic action.
    Int(i64),
    /// Text produced by a semantic action.
    Text(String),
}

impl Capture {
    /// Concatenated leaf bytes of the tree, in match order. Action-produced
    /// values contribute their textual form.
    pub fn flatten(&self) -> Vec<u8> {
        match self {
            Capture::Bytes(bytes) => bytes.clone(),
            Capture::List(items) => items.iter().flat_map(|item| item.flatten()).collect(),
            Capture::Int(value) => value.to_string().into_bytes(),
            Capture::Text(text) => text.clone().into_bytes(),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Capture::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Capture::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Capture]> {
        match self {
            Capture::List(items) => Some(items),
            _ => None,
        }
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for &byte in bytes {
        match byte {
            b'"' | b'\\' => write!(f, "\\{}", byte as char)?,
            0x20..=0x7E => write!(f, "{}", byte as char)?,
            b'\n' => write!(f, "\\n")?,
            b'\r' => write!(f, "\\r")?,
            b'\t' => write!(f, "\\t")?,
            other => write!(f, "\\x{:02X}", other)?,
        }
    }
    Ok(())
}

impl fmt::Display for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capture::Bytes(bytes) => {
                write!(f, "\"")?;
                write_escaped(f, bytes)?;
                write!(f, "\"")
            }
            Capture::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Capture::Int(value) => write!(f, "{}", value),
            Capture::Text(text) => write!(f, "{:?}", text),
        }
    }
}

/// Everything a successful top-level match produces.
///
/// `input` is always `string_text` followed by `rest`.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResult<S> {
    /// The original input.
    pub input: Vec<u8>,
    /// The consumed prefix.
    pub string_text: Vec<u8>,
    /// The unconsumed suffix.
    pub rest: Vec<u8>,
    /// Consumed slices of the start rule's immediate children.
    pub string_tokens: Vec<Vec<u8>>,
    /// The capture tree, after the start rule's action if one is bound.
    pub values: Capture,
    /// User state after the last semantic action.
    pub state: S,
}
