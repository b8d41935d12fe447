//! Line-level model of description-file text.
//!
//! [`DescriptionText`] keeps the raw lines untouched and layers a statement index on top of
//! them: assignments (with `\` continuations), `include()` calls, and the scope conditions
//! (colon prefixes and `cond { ... }` blocks) that enclose each statement. Every value token
//! remembers its byte range, so edits splice the affected lines and leave every other line
//! byte-identical. After each edit the statement index is rebuilt from the new lines.
//!
//! The grammar covered here is deliberately small:
//!
//! ```text
//! # comment
//! VAR = a b "c d"         VAR += a \
//!                             b
//! unix:VAR -= a           win32|macx:debug:VAR *= a
//! !static {               } else {
//! include(common.pri)     CONFIG(debug, debug|release):VAR += d
//! ```
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:(?P<scope>[^=#{}]*?)\s*:\s*)?(?P<var>[A-Za-z_][A-Za-z0-9_.]*)\s*(?P<op>\+=|-=|\*=|~=|=)",
    )
    .expect("assignment pattern is valid")
});

static INCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?P<scope>[^=#{}]*?)\s*:\s*)?include\s*\(\s*(?P<arg>[^)]*?)\s*\)\s*$")
        .expect("include pattern is valid")
});

static CONFIG_TEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^CONFIG\s*\(\s*(?P<name>[^,)\s]+)").expect("config test pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// `=`
    Set,
    /// `+=`
    Append,
    /// `*=`
    AppendUnique,
    /// `-=`
    Remove,
    /// `~=`, kept in the model but not evaluated
    Replace,
}

impl Operator {
    fn parse(op: &str) -> Operator {
        match op {
            "+=" => Operator::Append,
            "*=" => Operator::AppendUnique,
            "-=" => Operator::Remove,
            "~=" => Operator::Replace,
            _ => Operator::Set,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Set => "=",
            Operator::Append => "+=",
            Operator::AppendUnique => "*=",
            Operator::Remove => "-=",
            Operator::Replace => "~=",
        }
    }

    /// Operators whose values end up in the variable.
    pub fn adds_values(&self) -> bool {
        matches!(
            self,
            Operator::Set | Operator::Append | Operator::AppendUnique
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Atom {
    negated: bool,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConditionKind {
    /// Conjunction (`:`) of disjunctions (`|`).
    Terms(Vec<Vec<Atom>>),
    /// `else` branch of the block condition it follows.
    Else(Box<Condition>),
}

/// One scope condition, either a colon prefix or the head of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    text: String,
    kind: ConditionKind,
}

impl Condition {
    pub fn parse(text: &str) -> Condition {
        let text = text.trim();
        let terms = split_outside_parens(text, ':')
            .into_iter()
            .map(|term| {
                split_outside_parens(term, '|')
                    .into_iter()
                    .map(|atom| {
                        let atom = atom.trim();
                        let (negated, body) = match atom.strip_prefix('!') {
                            Some(rest) => (true, rest.trim()),
                            None => (false, atom),
                        };
                        let name = match CONFIG_TEST.captures(body) {
                            Some(caps) => caps["name"].to_string(),
                            None => body.to_string(),
                        };
                        Atom { negated, name }
                    })
                    .collect()
            })
            .collect();
        Condition {
            text: text.to_string(),
            kind: ConditionKind::Terms(terms),
        }
    }

    fn else_of(previous: Condition) -> Condition {
        Condition {
            text: "else".to_string(),
            kind: ConditionKind::Else(Box::new(previous)),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the condition holds for the given set of active scope names.
    pub fn is_active(&self, active: &BTreeSet<String>) -> bool {
        match &self.kind {
            ConditionKind::Terms(terms) => terms.iter().all(|alternatives| {
                alternatives
                    .iter()
                    .any(|atom| active.contains(&atom.name) != atom.negated)
            }),
            ConditionKind::Else(previous) => !previous.is_active(active),
        }
    }
}

fn split_outside_parens(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(&text[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// One whitespace-separated value with its position in the raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueToken {
    /// Value with quotes removed.
    pub value: String,
    /// 0-based line index.
    pub line: usize,
    /// Byte range of the raw token (quotes included) within the line.
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub variable: String,
    pub op: Operator,
    pub values: Vec<ValueToken>,
    /// Byte offset on the first line where the variable name starts. Everything before it
    /// is indentation plus any inline scope prefix.
    head: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Assignment(Assignment),
    Include { file: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// 0-based, inclusive.
    pub first_line: usize,
    pub last_line: usize,
    /// Enclosing block conditions, outermost first, followed by an inline prefix if any.
    pub scope: Vec<Condition>,
    pub kind: StatementKind,
}

impl Statement {
    pub fn assignment(&self) -> Option<&Assignment> {
        match &self.kind {
            StatementKind::Assignment(assignment) => Some(assignment),
            _ => None,
        }
    }

    /// The scope chain rendered as a colon-separated condition, `None` at top level.
    pub fn scope_text(&self) -> Option<String> {
        scope_text(&self.scope)
    }

    pub fn is_active(&self, active: &BTreeSet<String>) -> bool {
        self.scope.iter().all(|c| c.is_active(active))
    }
}

fn scope_text(scope: &[Condition]) -> Option<String> {
    if scope.is_empty() {
        None
    } else {
        Some(
            scope
                .iter()
                .map(|c| c.text())
                .collect::<Vec<_>>()
                .join(":"),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    scope: Vec<Condition>,
    open_line: usize,
    close_line: Option<usize>,
}

/// Structural problem found while indexing the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// 1-based line number.
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct DescriptionText {
    lines: Vec<String>,
    trailing_newline: bool,
    statements: Vec<Statement>,
    blocks: Vec<Block>,
    errors: Vec<SyntaxError>,
}

impl DescriptionText {
    pub fn parse(text: &str) -> DescriptionText {
        let trailing_newline = text.ends_with('\n');
        let body = text.strip_suffix('\n').unwrap_or(text);
        let lines = if text.is_empty() {
            Vec::new()
        } else {
            body.split('\n').map(|l| l.to_string()).collect()
        };
        let mut parsed = DescriptionText {
            lines,
            trailing_newline,
            ..Default::default()
        };
        parsed.reindex();
        parsed
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn errors(&self) -> &[SyntaxError] {
        &self.errors
    }

    /// Assignments to `variable`, in text order.
    pub fn assignments<'a>(
        &'a self,
        variable: &'a str,
    ) -> impl Iterator<Item = (&'a Statement, &'a Assignment)> + 'a {
        self.statements.iter().filter_map(move |stmt| match &stmt.kind {
            StatementKind::Assignment(a) if a.variable == variable => Some((stmt, a)),
            _ => None,
        })
    }

    fn reindex(&mut self) {
        self.statements.clear();
        self.blocks.clear();
        self.errors.clear();

        let mut open_blocks: Vec<usize> = Vec::new();
        let mut last_closed: Option<Condition> = None;
        let mut pending: Option<Statement> = None;

        for (idx, line) in self.lines.iter().enumerate() {
            let code_end = comment_start(line);
            let (body_end, continues) = continuation(line, code_end);

            if let Some(mut stmt) = pending.take() {
                if let StatementKind::Assignment(assignment) = &mut stmt.kind {
                    assignment
                        .values
                        .extend(tokenize(line, 0, body_end, idx));
                }
                stmt.last_line = idx;
                if continues {
                    pending = Some(stmt);
                } else {
                    self.statements.push(stmt);
                }
                continue;
            }

            let code = line[..body_end].trim();
            if code.is_empty() {
                continue;
            }

            let enclosing: Vec<Condition> = open_blocks
                .last()
                .map(|b| self.blocks[*b].scope.clone())
                .unwrap_or_default();

            if let Some(caps) = ASSIGNMENT.captures(&line[..body_end]) {
                let mut scope = enclosing;
                if let Some(prefix) = caps.name("scope") {
                    if !prefix.as_str().trim().is_empty() {
                        scope.push(Condition::parse(prefix.as_str()));
                    }
                }
                let op = &caps["op"];
                let value_start = caps.get(0).map(|m| m.end()).unwrap_or(body_end);
                let head = caps.name("var").map(|m| m.start()).unwrap_or(0);
                let stmt = Statement {
                    first_line: idx,
                    last_line: idx,
                    scope,
                    kind: StatementKind::Assignment(Assignment {
                        variable: caps["var"].to_string(),
                        op: Operator::parse(op),
                        values: tokenize(line, value_start, body_end, idx),
                        head,
                    }),
                };
                if continues {
                    pending = Some(stmt);
                } else {
                    self.statements.push(stmt);
                }
                continue;
            }

            if let Some(caps) = INCLUDE.captures(&line[..body_end]) {
                let mut scope = enclosing;
                if let Some(prefix) = caps.name("scope") {
                    if !prefix.as_str().trim().is_empty() {
                        scope.push(Condition::parse(prefix.as_str()));
                    }
                }
                self.statements.push(Statement {
                    first_line: idx,
                    last_line: idx,
                    scope,
                    kind: StatementKind::Include {
                        file: unquote(&caps["arg"]),
                    },
                });
                continue;
            }

            let mut rest = code;
            if let Some(after) = rest.strip_prefix('}') {
                match open_blocks.pop() {
                    Some(block) => {
                        self.blocks[block].close_line = Some(idx);
                        last_closed = self.blocks[block].scope.last().cloned();
                    }
                    None => self.errors.push(SyntaxError {
                        line: idx + 1,
                        message: "unexpected '}'".to_string(),
                    }),
                }
                rest = after.trim();
                if rest.is_empty() {
                    continue;
                }
            }

            if let Some(head) = rest.strip_suffix('{') {
                let head = head.trim();
                let condition = if head == "else" {
                    match last_closed.take() {
                        Some(previous) => Condition::else_of(previous),
                        None => {
                            self.errors.push(SyntaxError {
                                line: idx + 1,
                                message: "'else' without a preceding block".to_string(),
                            });
                            Condition::parse(head)
                        }
                    }
                } else {
                    Condition::parse(head)
                };
                let mut scope: Vec<Condition> = open_blocks
                    .last()
                    .map(|b| self.blocks[*b].scope.clone())
                    .unwrap_or_default();
                scope.push(condition);
                self.blocks.push(Block {
                    scope,
                    open_line: idx,
                    close_line: None,
                });
                open_blocks.push(self.blocks.len() - 1);
            }
            // Anything else (function calls, messages, tests) is not part of the model.
        }

        if let Some(stmt) = pending.take() {
            self.statements.push(stmt);
        }
        for block in open_blocks {
            self.errors.push(SyntaxError {
                line: self.blocks[block].open_line + 1,
                message: "unbalanced braces: block is never closed".to_string(),
            });
        }
    }

    /// Append `values` to the last assignment of `variable` in `scope`, creating the
    /// statement (and the scope block) when none exists.
    pub fn append_values(&mut self, variable: &str, values: &[String], scope: Option<&str>) {
        if values.is_empty() {
            return;
        }
        let target = self
            .statements
            .iter()
            .rev()
            .find(|stmt| {
                stmt.assignment()
                    .is_some_and(|a| a.variable == variable && a.op.adds_values())
                    && stmt.scope_text().as_deref() == scope
            })
            .cloned();

        match target {
            Some(stmt) => {
                let last = stmt.last_line;
                let last_text = self.lines[last].clone();
                let has_comment = comment_start(&last_text) < last_text.len();
                let (_, already_continues) = continuation(&last_text, last_text.len());
                if has_comment || already_continues {
                    let head = stmt.assignment().map(|a| a.head).unwrap_or(0);
                    let prefix = self.lines[stmt.first_line][..head].to_string();
                    let new_lines = format_assignment(&prefix, variable, Operator::Append, values);
                    self.insert_lines(last + 1, new_lines);
                } else {
                    let indent = if stmt.first_line == last {
                        format!("{}    ", leading_whitespace(&self.lines[stmt.first_line]))
                    } else {
                        leading_whitespace(&last_text).to_string()
                    };
                    self.lines[last] = format!("{} \\", last_text.trim_end());
                    let count = values.len();
                    let new_lines = values
                        .iter()
                        .enumerate()
                        .map(|(i, v)| {
                            let sep = if i + 1 < count { " \\" } else { "" };
                            format!("{indent}{}{sep}", quote_value(v))
                        })
                        .collect();
                    self.insert_lines(last + 1, new_lines);
                }
            }
            None => self.insert_new_statement(variable, Operator::Append, values, scope),
        }
        self.reindex();
    }

    /// Remove every value accepted by `matches` from the adding assignments of `variables`.
    /// Returns the raw values that were removed, in text order.
    pub fn remove_values(
        &mut self,
        variables: &[&str],
        matches: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let mut removed = Vec::new();
        let targets: Vec<Statement> = self
            .statements
            .iter()
            .filter(|stmt| {
                stmt.assignment().is_some_and(|a| {
                    a.op.adds_values() && variables.contains(&a.variable.as_str())
                })
            })
            .cloned()
            .collect();

        // Back to front so earlier line indices stay valid.
        for stmt in targets.iter().rev() {
            let Some(assignment) = stmt.assignment() else {
                continue;
            };
            let doomed: Vec<&ValueToken> = assignment
                .values
                .iter()
                .filter(|t| matches(&t.value))
                .collect();
            if doomed.is_empty() {
                continue;
            }
            let mut values: Vec<String> = doomed.iter().map(|t| t.value.clone()).collect();
            values.append(&mut removed);
            removed = values;

            if doomed.len() == assignment.values.len() {
                self.lines.drain(stmt.first_line..=stmt.last_line);
                continue;
            }

            for token in doomed.iter().rev() {
                let line = &mut self.lines[token.line];
                let floor = if token.line == stmt.first_line {
                    assignment.head
                } else {
                    0
                };
                let mut start = token.start;
                while start > floor && line[..start].ends_with([' ', '\t']) {
                    start -= 1;
                }
                line.replace_range(start..token.end, "");
            }

            let mut last = stmt.last_line;
            for idx in (stmt.first_line + 1..=stmt.last_line).rev() {
                let text = &self.lines[idx];
                let code_end = comment_start(text);
                let (body_end, _) = continuation(text, code_end);
                if text[..body_end].trim().is_empty() && code_end == text.len() {
                    self.lines.remove(idx);
                    last -= 1;
                }
            }
            let text = self.lines[last].clone();
            let code_end = comment_start(&text);
            let (body_end, continues) = continuation(&text, code_end);
            if continues {
                self.lines[last] = format!("{}{}", text[..body_end].trim_end(), &text[code_end..]);
            }
        }
        self.reindex();
        removed
    }

    /// Replace every value accepted by `matches` in the assignments of `variables` with
    /// `replacement`. Returns whether anything changed.
    pub fn rename_value(
        &mut self,
        variables: &[&str],
        matches: impl Fn(&str) -> bool,
        replacement: &str,
    ) -> bool {
        let mut tokens: Vec<ValueToken> = self
            .statements
            .iter()
            .filter_map(|stmt| stmt.assignment())
            .filter(|a| variables.contains(&a.variable.as_str()))
            .flat_map(|a| a.values.iter().filter(|t| matches(&t.value)).cloned())
            .collect();
        if tokens.is_empty() {
            return false;
        }
        tokens.sort_by_key(|t| (t.line, t.start));
        let quoted = quote_value(replacement);
        for token in tokens.iter().rev() {
            self.lines[token.line].replace_range(token.start..token.end, &quoted);
        }
        self.reindex();
        true
    }

    /// Make `variable` hold exactly `values` within `scope`: the first assignment in that
    /// scope is rewritten as `VAR = values` and any later ones are dropped.
    pub fn set_values(&mut self, variable: &str, values: &[String], scope: Option<&str>) {
        let targets: Vec<Statement> = self
            .assignments(variable)
            .filter(|(stmt, _)| stmt.scope_text().as_deref() == scope)
            .map(|(stmt, _)| stmt.clone())
            .collect();

        match targets.first() {
            Some(first) => {
                let head = first.assignment().map(|a| a.head).unwrap_or(0);
                let prefix = self.lines[first.first_line][..head].to_string();
                for stmt in targets.iter().rev() {
                    self.lines.drain(stmt.first_line..=stmt.last_line);
                }
                let replacement = format_assignment(&prefix, variable, Operator::Set, values);
                self.insert_lines(first.first_line, replacement);
            }
            None => self.insert_new_statement(variable, Operator::Set, values, scope),
        }
        self.reindex();
    }

    fn insert_new_statement(
        &mut self,
        variable: &str,
        op: Operator,
        values: &[String],
        scope: Option<&str>,
    ) {
        match scope {
            None => {
                let lines = format_assignment("", variable, op, values);
                self.append_paragraph(lines);
            }
            Some(scope) => {
                let block = self
                    .blocks
                    .iter()
                    .rev()
                    .find(|b| b.close_line.is_some() && scope_text(&b.scope).as_deref() == Some(scope))
                    .map(|b| (b.open_line, b.close_line));
                match block {
                    Some((open, Some(close))) => {
                        let indent = format!("{}    ", leading_whitespace(&self.lines[open]));
                        let lines = format_assignment(&indent, variable, op, values);
                        self.insert_lines(close, lines);
                    }
                    _ => {
                        let mut lines = vec![format!("{scope} {{")];
                        lines.extend(format_assignment("    ", variable, op, values));
                        lines.push("}".to_string());
                        self.append_paragraph(lines);
                    }
                }
            }
        }
    }

    fn append_paragraph(&mut self, lines: Vec<String>) {
        if self.lines.last().is_some_and(|l| !l.trim().is_empty()) {
            self.lines.push(String::new());
        }
        if self.lines.is_empty() {
            self.trailing_newline = true;
        }
        self.lines.extend(lines);
    }

    fn insert_lines(&mut self, at: usize, lines: Vec<String>) {
        let at = at.min(self.lines.len());
        self.lines.splice(at..at, lines);
    }
}

/// Quote a value for writing when it contains whitespace.
pub fn quote_value(value: &str) -> String {
    if value.chars().any(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

fn unquote(raw: &str) -> String {
    raw.replace('"', "")
}

fn format_assignment(prefix: &str, variable: &str, op: Operator, values: &[String]) -> Vec<String> {
    let op = op.as_str();
    match values {
        [] => vec![format!("{prefix}{variable} {op}")],
        [single] => vec![format!("{prefix}{variable} {op} {}", quote_value(single))],
        _ => {
            let indent = format!("{}    ", leading_whitespace(prefix));
            let mut lines = vec![format!("{prefix}{variable} {op} \\")];
            let count = values.len();
            for (i, value) in values.iter().enumerate() {
                let sep = if i + 1 < count { " \\" } else { "" };
                lines.push(format!("{indent}{}{sep}", quote_value(value)));
            }
            lines
        }
    }
}

fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

/// Byte offset of the first `#` outside quotes, or the line length.
fn comment_start(line: &str) -> usize {
    let mut quoted = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '#' if !quoted => return idx,
            _ => {}
        }
    }
    line.len()
}

/// End of the value region before `code_end` and whether the line continues.
fn continuation(line: &str, code_end: usize) -> (usize, bool) {
    let code = line[..code_end].trim_end();
    match code.strip_suffix('\\') {
        Some(body) => (body.len(), true),
        None => (code_end, false),
    }
}

fn tokenize(line: &str, from: usize, to: usize, line_idx: usize) -> Vec<ValueToken> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut quoted = false;
    let region = &line[from..to];
    for (offset, ch) in region.char_indices() {
        let idx = from + offset;
        if ch == '"' {
            quoted = !quoted;
            if start.is_none() {
                start = Some(idx);
            }
            continue;
        }
        if ch.is_whitespace() && !quoted {
            if let Some(s) = start.take() {
                push_token(&mut tokens, line, s, idx, line_idx);
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        push_token(&mut tokens, line, s, to, line_idx);
    }
    tokens
}

fn push_token(tokens: &mut Vec<ValueToken>, line: &str, start: usize, end: usize, line_idx: usize) {
    let value = unquote(&line[start..end]);
    if value.is_empty() {
        return;
    }
    tokens.push(ValueToken {
        value,
        line: line_idx,
        start,
        end,
    });
}
