//! Heuristic block-nesting scan that locates module and function definitions in Elixir
//! source without a full parse.
//!
//! The scanner walks the file line by line, tracking string/heredoc/sigil/comment state so
//! that keyword-like text inside literals never affects nesting. `do` and `fn` open a block,
//! `end` closes one. A definition is recognised when its definer keyword is the first token
//! on a line at top level or directly inside an open module body; definitions nested in
//! function bodies stay part of their enclosing function.
//!
//! The result is a partition of the file's lines: gap lines (blank lines, attributes,
//! comments, loose code) attach to the following definition, or to the last one at the end
//! of a scope. Module boundaries carry their own partition in `children`, headed by a
//! module-header segment.

use std::fmt;

const MODULE_DEFINERS: &[&str] = &["defmodule", "defprotocol", "defimpl"];
const FUNCTION_DEFINERS: &[&str] = &[
    "def",
    "defp",
    "defmacro",
    "defmacrop",
    "defguard",
    "defguardp",
    "defdelegate",
    "defn",
    "defnp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundaryKind {
    Module,
    Function,
    Other,
}

impl fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Module => "module",
            Self::Function => "function",
            Self::Other => "other",
        })
    }
}

/// A detected syntactic unit. Line numbers are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    pub kind: BoundaryKind,
    pub name: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    /// Contiguous partition of `start_line..=end_line` for module boundaries whose body
    /// contains detected definitions; empty otherwise.
    pub children: Vec<Boundary>,
}

impl Boundary {
    fn leaf(kind: BoundaryKind, name: Option<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            kind,
            name,
            start_line,
            end_line,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.end_line + 1 - self.start_line
    }

    fn extend_start(&mut self, line: usize) {
        if line < self.start_line {
            self.start_line = line;
            if let Some(first) = self.children.first_mut() {
                first.extend_start(line);
            }
        }
    }

    fn extend_end(&mut self, line: usize) {
        if line > self.end_line {
            self.end_line = line;
            if let Some(last) = self.children.last_mut() {
                last.extend_end(line);
            }
        }
    }
}

/// Detect boundaries in one file.
///
/// Returns an empty list for empty input. When nesting never balances the whole file is
/// returned as a single `Other` boundary and a warning is logged.
#[must_use]
pub fn detect_boundaries(source: &str) -> Vec<Boundary> {
    if source.is_empty() {
        return Vec::new();
    }
    let lines: Vec<&str> = source.split_inclusive('\n').collect();
    match Detector::default().run(&lines) {
        Ok(boundaries) => boundaries,
        Err(unbalanced) => {
            tracing::warn!(
                line = unbalanced.line,
                reason = unbalanced.reason,
                "nesting did not balance, treating file as a single boundary"
            );
            vec![Boundary::leaf(BoundaryKind::Other, None, 1, lines.len())]
        }
    }
}

#[derive(Debug)]
struct Unbalanced {
    line: usize,
    reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineClass {
    Blank,
    Comment,
    Attribute,
    /// Line begins inside a multi-line string, heredoc or sigil.
    Literal,
    Code,
}

impl LineClass {
    fn leads_definition(self) -> bool {
        matches!(self, Self::Comment | Self::Attribute | Self::Literal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Do,
    Fn,
    End,
    /// The `do:` keyword-list form of a block.
    DoKeyword,
}

struct LineScan {
    class: LineClass,
    definer: Option<(BoundaryKind, Option<String>)>,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Mode {
    #[default]
    Code,
    Literal {
        close: char,
        interpolates: bool,
    },
    Heredoc {
        quote: char,
    },
}

#[derive(Default)]
struct Lexer {
    mode: Mode,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Index just past an identifier starting at `i`, including a trailing `?` or `!`.
fn ident_end(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && is_ident_char(chars[i]) {
        i += 1;
    }
    if i < chars.len() && matches!(chars[i], '?' | '!') {
        i += 1;
    }
    i
}

fn starts_with_triple(chars: &[char], i: usize, quote: char) -> bool {
    chars.len() >= i + 3 && chars[i..i + 3].iter().all(|c| *c == quote)
}

fn closing_delimiter(open: char) -> Option<char> {
    match open {
        '(' => Some(')'),
        '[' => Some(']'),
        '{' => Some('}'),
        '<' => Some('>'),
        '/' | '|' | '"' | '\'' => Some(open),
        _ => None,
    }
}

/// Skip a `#{...}` interpolation body starting just after the opening brace.
fn skip_interpolation(chars: &[char], mut i: usize) -> usize {
    let mut depth = 1usize;
    while i < chars.len() {
        match chars[i] {
            '"' => {
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    chars.len()
}

fn detect_definer(chars: &[char]) -> Option<(BoundaryKind, Option<String>)> {
    let start = chars.iter().position(|c| !c.is_whitespace())?;
    if !is_ident_start(chars[start]) {
        return None;
    }
    let mut end = start;
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    if end >= chars.len() || !chars[end].is_whitespace() {
        return None;
    }
    let word: String = chars[start..end].iter().collect();
    let kind = if MODULE_DEFINERS.contains(&word.as_str()) {
        BoundaryKind::Module
    } else if FUNCTION_DEFINERS.contains(&word.as_str()) {
        BoundaryKind::Function
    } else {
        return None;
    };

    let name_start = end + chars[end..].iter().take_while(|c| c.is_whitespace()).count();
    let name_end = match kind {
        BoundaryKind::Module => {
            name_start
                + chars[name_start..]
                    .iter()
                    .take_while(|c| is_ident_char(**c) || **c == '.')
                    .count()
        }
        _ if name_start < chars.len() && is_ident_start(chars[name_start]) => {
            ident_end(chars, name_start)
        }
        _ => name_start,
    };
    let name: String = chars[name_start..name_end].iter().collect();
    Some((kind, (!name.is_empty()).then_some(name)))
}

impl Lexer {
    fn scan(&mut self, raw: &str) -> LineScan {
        let chars: Vec<char> = raw.trim_end_matches(['\n', '\r']).chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;

        let started_in_code = match self.mode {
            Mode::Code => true,
            Mode::Literal { .. } => false,
            Mode::Heredoc { quote } => {
                let indent = chars.iter().take_while(|c| c.is_whitespace()).count();
                if !starts_with_triple(&chars, indent, quote) {
                    return LineScan {
                        class: LineClass::Literal,
                        definer: None,
                        tokens,
                    };
                }
                self.mode = Mode::Code;
                i = indent + 3;
                false
            }
        };

        let (class, definer) = if started_in_code {
            match chars.iter().find(|c| !c.is_whitespace()) {
                None => (LineClass::Blank, None),
                Some('#') => (LineClass::Comment, None),
                Some('@') => (LineClass::Attribute, None),
                Some(_) => (LineClass::Code, detect_definer(&chars)),
            }
        } else {
            (LineClass::Literal, None)
        };

        let mut prev_significant: Option<char> = None;
        while i < chars.len() {
            match self.mode {
                Mode::Heredoc { .. } => break,
                Mode::Literal {
                    close,
                    interpolates,
                } => {
                    i = self.scan_literal(&chars, i, close, interpolates);
                    prev_significant = Some(close);
                    continue;
                }
                Mode::Code => {}
            }

            let c = chars[i];
            if c.is_whitespace() {
                i += 1;
                continue;
            }
            match c {
                '#' => break,
                '"' | '\'' => {
                    if starts_with_triple(&chars, i, c) {
                        self.mode = Mode::Heredoc { quote: c };
                        break;
                    }
                    self.mode = Mode::Literal {
                        close: c,
                        interpolates: true,
                    };
                    i += 1;
                }
                '~' => i = self.scan_sigil(&chars, i),
                '?' => {
                    i += match chars.get(i + 1) {
                        Some('\\') => 3,
                        Some(_) => 2,
                        None => 1,
                    };
                }
                ':' => i = self.scan_colon(&chars, i),
                c if is_ident_start(c) => {
                    let end = ident_end(&chars, i);
                    let word: String = chars[i..end].iter().collect();
                    let keyword_key = chars.get(end) == Some(&':') && chars.get(end + 1) != Some(&':');
                    if keyword_key {
                        if word == "do" {
                            tokens.push(Token::DoKeyword);
                        }
                        i = end + 1;
                        prev_significant = Some(':');
                        continue;
                    }
                    if prev_significant != Some('.') {
                        match word.as_str() {
                            "do" => tokens.push(Token::Do),
                            "fn" => tokens.push(Token::Fn),
                            "end" => tokens.push(Token::End),
                            _ => {}
                        }
                    }
                    i = end;
                }
                c if c.is_ascii_digit() => {
                    while i < chars.len() && (is_ident_char(chars[i]) || chars[i] == '.') {
                        if chars[i] == '.' && chars.get(i + 1).is_none_or(|n| !n.is_ascii_digit()) {
                            break;
                        }
                        i += 1;
                    }
                }
                _ => i += 1,
            }
            prev_significant = Some(c);
        }

        LineScan {
            class,
            definer,
            tokens,
        }
    }

    fn scan_literal(&mut self, chars: &[char], mut i: usize, close: char, interpolates: bool) -> usize {
        while i < chars.len() {
            let c = chars[i];
            if c == '\\' {
                i += 2;
                continue;
            }
            if interpolates && c == '#' && chars.get(i + 1) == Some(&'{') {
                i = skip_interpolation(chars, i + 2);
                continue;
            }
            if c == close {
                self.mode = Mode::Code;
                return i + 1;
            }
            i += 1;
        }
        chars.len()
    }

    fn scan_sigil(&mut self, chars: &[char], i: usize) -> usize {
        let Some(&letter) = chars.get(i + 1) else {
            return i + 1;
        };
        if !letter.is_ascii_alphabetic() {
            return i + 1;
        }
        let mut j = i + 2;
        if letter.is_ascii_uppercase() {
            while j < chars.len() && chars[j].is_ascii_uppercase() {
                j += 1;
            }
        }
        let Some(&delim) = chars.get(j) else {
            return j;
        };
        if matches!(delim, '"' | '\'') && starts_with_triple(chars, j, delim) {
            self.mode = Mode::Heredoc { quote: delim };
            return chars.len();
        }
        match closing_delimiter(delim) {
            Some(close) => {
                self.mode = Mode::Literal {
                    close,
                    interpolates: letter.is_ascii_lowercase(),
                };
                j + 1
            }
            None => j,
        }
    }

    fn scan_colon(&mut self, chars: &[char], i: usize) -> usize {
        match chars.get(i + 1) {
            Some(':') => i + 2,
            Some(&c) if is_ident_start(c) => ident_end(chars, i + 1),
            Some(&q @ ('"' | '\'')) => {
                self.mode = Mode::Literal {
                    close: q,
                    interpolates: true,
                };
                i + 2
            }
            _ => i + 1,
        }
    }
}

struct Frame {
    kind: BoundaryKind,
    name: Option<String>,
    start_line: usize,
    /// Nesting depth at the start of the definer line.
    base_depth: usize,
    /// Set once the definition's `do` block opens.
    open_depth: Option<usize>,
    last_content_line: usize,
    children: Vec<Boundary>,
}

#[derive(Default)]
struct Detector {
    depth: usize,
    frames: Vec<Frame>,
    top_level: Vec<Boundary>,
    classes: Vec<LineClass>,
}

impl Detector {
    fn run(mut self, lines: &[&str]) -> Result<Vec<Boundary>, Unbalanced> {
        let mut lexer = Lexer::default();

        for (idx, raw) in lines.iter().enumerate() {
            let line = idx + 1;
            let scan = lexer.scan(raw);
            self.classes.push(scan.class);

            if let Some((kind, name)) = scan.definer {
                self.on_definer(kind, name, line);
            }
            if scan.class == LineClass::Code
                && let Some(top) = self.frames.last_mut()
                && top.open_depth.is_none()
            {
                top.last_content_line = line;
            }
            for token in scan.tokens {
                self.on_token(token, line)?;
            }
        }

        let total = lines.len();
        if lexer.mode != Mode::Code {
            return Err(Unbalanced {
                line: total,
                reason: "unterminated literal",
            });
        }
        let depth = self.depth;
        self.close_pending(|base| base >= depth);
        if self.depth != 0 || !self.frames.is_empty() {
            return Err(Unbalanced {
                line: total,
                reason: "unclosed block",
            });
        }

        if self.top_level.is_empty() {
            return Ok(vec![Boundary::leaf(BoundaryKind::Other, None, 1, total)]);
        }
        let top_level = std::mem::take(&mut self.top_level);
        Ok(partition(top_level, 1, total, None, &self.classes))
    }

    fn on_definer(&mut self, kind: BoundaryKind, name: Option<String>, line: usize) {
        let depth = self.depth;
        self.close_pending(|base| base >= depth);

        let eligible = match self.frames.last() {
            None => depth == 0,
            Some(top) => {
                top.kind == BoundaryKind::Module && top.open_depth.is_some_and(|d| depth == d + 1)
            }
        };
        if eligible {
            self.frames.push(Frame {
                kind,
                name,
                start_line: line,
                base_depth: depth,
                open_depth: None,
                last_content_line: line,
                children: Vec::new(),
            });
        }
    }

    fn on_token(&mut self, token: Token, line: usize) -> Result<(), Unbalanced> {
        match token {
            Token::Do | Token::Fn => {
                if token == Token::Do
                    && let Some(top) = self.frames.last_mut()
                    && top.open_depth.is_none()
                    && top.base_depth == self.depth
                {
                    top.open_depth = Some(self.depth);
                }
                self.depth += 1;
            }
            Token::End => {
                let depth = self.depth.checked_sub(1).ok_or(Unbalanced {
                    line,
                    reason: "unexpected end",
                })?;
                self.close_pending(|base| base > depth);
                self.depth = depth;
                if self
                    .frames
                    .last()
                    .is_some_and(|top| top.open_depth == Some(depth))
                {
                    self.finalize(line);
                }
            }
            Token::DoKeyword => {
                if self
                    .frames
                    .last()
                    .is_some_and(|top| top.open_depth.is_none() && top.base_depth == self.depth)
                {
                    self.finalize(line);
                }
            }
        }
        Ok(())
    }

    /// Close definitions that never opened a `do` block, ending them at their last code line.
    fn close_pending(&mut self, should_close: impl Fn(usize) -> bool) {
        while let Some(top) = self.frames.last()
            && top.open_depth.is_none()
            && should_close(top.base_depth)
        {
            let end = top.last_content_line;
            self.finalize(end);
        }
    }

    fn finalize(&mut self, end_line: usize) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        let children = if frame.kind == BoundaryKind::Module {
            partition(
                frame.children,
                frame.start_line,
                end_line,
                Some(frame.name.clone()),
                &self.classes,
            )
        } else {
            Vec::new()
        };
        let boundary = Boundary {
            kind: frame.kind,
            name: frame.name,
            start_line: frame.start_line,
            end_line,
            children,
        };
        match self.frames.last_mut() {
            Some(parent) => parent.children.push(boundary),
            None => self.top_level.push(boundary),
        }
    }
}

/// First line of the attribute/comment/doc run that directly precedes `line`, not going
/// below `floor`.
fn leading_run_start(classes: &[LineClass], line: usize, floor: usize) -> usize {
    let mut start = line;
    while start > floor && classes[start - 2].leads_definition() {
        start -= 1;
    }
    start
}

/// Turn detected definitions inside `start..=end` into a contiguous partition of that range.
///
/// `module` is `Some` when the range is a module body; the lines before the first
/// definition (minus its leading doc run) become a module-header segment.
fn partition(
    mut kids: Vec<Boundary>,
    start: usize,
    end: usize,
    module: Option<Option<String>>,
    classes: &[LineClass],
) -> Vec<Boundary> {
    if kids.is_empty() {
        return kids;
    }

    let mut out = Vec::with_capacity(kids.len() + 1);
    let first_start = kids[0].start_line;
    match module {
        Some(name) => {
            let lead = leading_run_start(classes, first_start, start + 1);
            out.push(Boundary::leaf(BoundaryKind::Module, name, start, lead - 1));
            kids[0].extend_start(lead);
        }
        None => kids[0].extend_start(start),
    }
    for i in 1..kids.len() {
        let prev_end = kids[i - 1].end_line;
        kids[i].extend_start(prev_end + 1);
    }
    if let Some(last) = kids.last_mut() {
        last.extend_end(end);
    }

    for kid in kids {
        match out.last_mut() {
            Some(prev)
                if prev.kind == BoundaryKind::Function
                    && kid.kind == BoundaryKind::Function
                    && prev.name.is_some()
                    && prev.name == kid.name =>
            {
                prev.end_line = kid.end_line;
            }
            _ => out.push(kid),
        }
    }
    out
}
