//! Structured-output repair: coercing a model's loosely-formed text into
//! valid JSON.
//!
//! Four stages, sequential, no backtracking across stages: locate the
//! JSON-like span, normalize quoting mistakes, attempt a strict parse,
//! and finally salvage recognizable question objects from text the parser
//! rejected. Every normalization pass is a string-aware character scanner,
//! so content inside correctly double-quoted values is never rewritten.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{json, Value};

use crate::schema::{MultipleChoiceQuestion, RecoveredQuestion, TrueFalseOptions, TrueFalseQuestion};

/// Terminal repair failures. Anything short of these yields a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairError {
    /// The raw text holds no `{`...`}` span at all; nothing to repair.
    NoStructureFound,
    /// Normalized text failed strict parsing and contained no
    /// recognizable question objects.
    SalvageExhausted,
}

impl fmt::Display for RepairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStructureFound => write!(f, "no JSON-like structure found in the output"),
            Self::SalvageExhausted => {
                write!(f, "no question objects could be salvaged from the output")
            }
        }
    }
}

impl std::error::Error for RepairError {}

/// A successful repair.
#[derive(Debug, Clone, PartialEq)]
pub enum Repaired {
    /// The normalized span parsed as strict JSON.
    Parsed(Value),
    /// Strict parsing failed; these question objects were recovered by
    /// targeted extraction. Lower confidence than `Parsed` — callers may
    /// warn the end user. Duplicates are kept; de-duplication is a caller
    /// concern.
    Salvaged(Vec<RecoveredQuestion>),
}

impl Repaired {
    /// True when this result came from stage-4 salvage.
    pub fn is_salvaged(&self) -> bool {
        matches!(self, Self::Salvaged(_))
    }

    /// Collapses the result into a JSON value: the parsed object as-is,
    /// or `{"questions": [...]}` for a salvage.
    pub fn into_value(self) -> Value {
        match self {
            Self::Parsed(value) => value,
            Self::Salvaged(questions) => json!({ "questions": questions }),
        }
    }
}

/// Runs the full locate → normalize → parse → salvage sequence.
pub fn repair(raw: &str) -> Result<Repaired, RepairError> {
    let span = locate(raw).ok_or(RepairError::NoStructureFound)?;
    let normalized = normalize(span);
    match serde_json::from_str::<Value>(&normalized) {
        Ok(value) => Ok(Repaired::Parsed(value)),
        Err(parse_err) => {
            crate::debug_log!("repair: strict parse failed ({parse_err}), salvaging");
            let recovered = salvage(&normalized);
            if recovered.is_empty() {
                Err(RepairError::SalvageExhausted)
            } else {
                Ok(Repaired::Salvaged(recovered))
            }
        }
    }
}

/// Stage 1: the span from the first `{` to the last `}`, commentary
/// stripped.
fn locate(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..end + 1])
}

/// Stage 2: textual normalization, three passes in fixed order.
fn normalize(span: &str) -> String {
    let requoted = requote_single_quoted(span);
    let keyed = quote_bare_keys(&requoted);
    strip_trailing_commas(&keyed)
}

/// Rewrites single-quoted string literals as double-quoted ones. Content
/// already inside double quotes passes through untouched; a lone `'` with
/// no closing partner is left as-is.
fn requote_single_quoted(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_double = false;
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if in_double {
            out.push(ch);
            if ch == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if ch == '"' {
                in_double = false;
            }
            i += 1;
            continue;
        }
        match ch {
            '"' => {
                in_double = true;
                out.push(ch);
                i += 1;
            }
            '\'' => match closing_single_quote(&chars, i + 1) {
                Some(end) => {
                    out.push('"');
                    let mut k = i + 1;
                    while k < end {
                        let inner = chars[k];
                        if inner == '\\' && k + 1 < end {
                            // \' needs no escape once double-quoted.
                            if chars[k + 1] == '\'' {
                                out.push('\'');
                            } else {
                                out.push('\\');
                                out.push(chars[k + 1]);
                            }
                            k += 2;
                        } else if inner == '"' {
                            out.push('\\');
                            out.push('"');
                            k += 1;
                        } else {
                            out.push(inner);
                            k += 1;
                        }
                    }
                    out.push('"');
                    i = end + 1;
                }
                None => {
                    out.push(ch);
                    i += 1;
                }
            },
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }
    out
}

fn closing_single_quote(chars: &[char], from: usize) -> Option<usize> {
    let mut j = from;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            '\'' => return Some(j),
            _ => j += 1,
        }
    }
    None
}

/// Wraps any bare word immediately followed by a colon in double quotes.
/// Words inside double-quoted strings are never touched, so sentence text
/// containing a colon survives.
fn quote_bare_keys(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut in_string = false;
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            out.push(ch);
            if ch == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if ch == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if ch == '"' {
            in_string = true;
            out.push(ch);
            i += 1;
            continue;
        }
        if ch.is_alphanumeric() || ch == '_' {
            let mut j = i;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let mut k = j;
            while k < chars.len() && chars[k].is_whitespace() {
                k += 1;
            }
            let word: String = chars[i..j].iter().collect();
            if k < chars.len() && chars[k] == ':' {
                out.push('"');
                out.push_str(&word);
                out.push('"');
            } else {
                out.push_str(&word);
            }
            i = j;
            continue;
        }
        out.push(ch);
        i += 1;
    }
    out
}

/// Drops commas that immediately precede a closing `]` or `}`.
fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            out.push(ch);
            if ch == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if ch == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if ch == '"' {
            in_string = true;
            out.push(ch);
            i += 1;
            continue;
        }
        if ch == ',' {
            let mut k = i + 1;
            while k < chars.len() && chars[k].is_whitespace() {
                k += 1;
            }
            if k < chars.len() && (chars[k] == '}' || chars[k] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(ch);
        i += 1;
    }
    out
}

/// Stage 4: targeted extraction of the two known question shapes.
///
/// Recovery is order-independent and duplicate-tolerant: every match is
/// kept, MCQ shapes first, then statement shapes, mirroring how many
/// structurally-intact objects surrounded them in the (possibly
/// truncated) text.
fn salvage(text: &str) -> Vec<RecoveredQuestion> {
    let mut recovered = Vec::new();
    salvage_multiple_choice(text, &mut recovered);
    salvage_true_false(text, &mut recovered);
    crate::debug_log!("repair: salvage recovered {} question objects", recovered.len());
    recovered
}

fn salvage_multiple_choice(text: &str, out: &mut Vec<RecoveredQuestion>) {
    let mut cursor = Cursor::new(text);
    loop {
        if !cursor.seek_after("\"question\"") {
            break;
        }
        let resume = cursor.pos;
        match read_mcq_after_question_key(&mut cursor) {
            Some(question) => out.push(RecoveredQuestion::MultipleChoice(question)),
            None => cursor.pos = resume,
        }
    }
}

fn read_mcq_after_question_key(cursor: &mut Cursor<'_>) -> Option<MultipleChoiceQuestion> {
    cursor.skip_ws();
    cursor.eat(':').then_some(())?;
    cursor.skip_ws();
    let question = cursor.read_string()?;

    cursor.seek_after("\"options\"").then_some(())?;
    cursor.skip_ws();
    cursor.eat(':').then_some(())?;
    cursor.skip_ws();
    cursor.eat('{').then_some(())?;
    let mut options = BTreeMap::new();
    loop {
        cursor.skip_ws();
        if cursor.eat('}') {
            break;
        }
        if cursor.eat(',') {
            continue;
        }
        let label = cursor.read_string()?;
        cursor.skip_ws();
        cursor.eat(':').then_some(())?;
        cursor.skip_ws();
        let option_text = cursor.read_string()?;
        // Only the A-D labels are part of the shape; anything else in the
        // object is noise.
        if matches!(label.as_str(), "A" | "B" | "C" | "D") {
            options.insert(label, option_text);
        }
    }

    cursor.seek_after("\"correct_option\"").then_some(())?;
    cursor.skip_ws();
    cursor.eat(':').then_some(())?;
    cursor.skip_ws();
    let correct_option = cursor.read_string()?;
    Some(MultipleChoiceQuestion {
        question,
        options,
        correct_option,
    })
}

fn salvage_true_false(text: &str, out: &mut Vec<RecoveredQuestion>) {
    let mut cursor = Cursor::new(text);
    loop {
        if !cursor.seek_after("\"statement\"") {
            break;
        }
        let resume = cursor.pos;
        match read_tf_after_statement_key(&mut cursor) {
            Some(question) => out.push(RecoveredQuestion::TrueFalse(question)),
            None => cursor.pos = resume,
        }
    }
}

fn read_tf_after_statement_key(cursor: &mut Cursor<'_>) -> Option<TrueFalseQuestion> {
    cursor.skip_ws();
    cursor.eat(':').then_some(())?;
    cursor.skip_ws();
    let statement = cursor.read_string()?;

    // The shape requires an options object between statement and answer.
    cursor.seek_after("\"options\"").then_some(())?;
    cursor.skip_ws();
    cursor.eat(':').then_some(())?;
    cursor.skip_ws();
    cursor.eat('{').then_some(())?;
    cursor.seek_after("}").then_some(())?;

    // Advance past correct_option keys until one carries a True/False
    // value; intervening MCQ answers are not this question's answer.
    loop {
        cursor.seek_after("\"correct_option\"").then_some(())?;
        cursor.skip_ws();
        if !cursor.eat(':') {
            continue;
        }
        cursor.skip_ws();
        let Some(value) = cursor.read_string() else {
            continue;
        };
        if value == "True" || value == "False" {
            return Some(TrueFalseQuestion {
                statement,
                options: TrueFalseOptions::default(),
                correct_option: value,
            });
        }
    }
}

/// Byte-position scanner over normalized text, shared by the salvage
/// readers.
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    /// Advances to just past the next occurrence of `needle`.
    fn seek_after(&mut self, needle: &str) -> bool {
        match self.text[self.pos..].find(needle) {
            Some(offset) => {
                self.pos += offset + needle.len();
                true
            }
            None => false,
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    /// Reads a double-quoted string literal starting at the cursor,
    /// resolving standard escapes. `None` when the literal never closes.
    fn read_string(&mut self) -> Option<String> {
        if !self.eat('"') {
            return None;
        }
        let rest = &self.text[self.pos..];
        let mut out = String::new();
        let mut iter = rest.char_indices();
        while let Some((offset, ch)) = iter.next() {
            match ch {
                '"' => {
                    self.pos += offset + 1;
                    return Some(out);
                }
                '\\' => match iter.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, 'b')) => out.push('\u{0008}'),
                    Some((_, 'f')) => out.push('\u{000C}'),
                    Some((_, 'u')) => {
                        let mut code = String::new();
                        for _ in 0..4 {
                            if let Some((_, digit)) = iter.next() {
                                code.push(digit);
                            }
                        }
                        match u32::from_str_radix(&code, 16).ok().and_then(char::from_u32) {
                            Some(decoded) => out.push(decoded),
                            None => {
                                out.push_str("\\u");
                                out.push_str(&code);
                            }
                        }
                    }
                    Some((_, other)) => out.push(other),
                    None => return None,
                },
                _ => out.push(ch),
            }
        }
        None
    }
}
