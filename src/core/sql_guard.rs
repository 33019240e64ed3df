//! 只读 SQL 安全校验
//!
//! 词法级校验器，不是完整解析器：无法确定归类的输入一律按不安全处理。
//! 校验顺序：
//! 1. 去掉注释与空白后必须以 SELECT / WITH 开头
//! 2. 不允许多语句 (字符串与注释之外的分号后面还有内容)
//! 3. 关键字 / 管理函数黑名单
//! 4. 顶层行数限制：缺失则追加，超过上限则压到上限

use crate::config::QueryLimits;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

/// 任意位置出现即拒绝的关键字 (数据修改型 CTE、SELECT INTO、会话与权限操作)
const DENIED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "DROP", "CREATE", "ALTER", "TRUNCATE",
    "GRANT", "REVOKE", "COPY", "INTO", "SET", "RESET", "EXECUTE", "EXEC", "CALL", "LOCK",
    "VACUUM", "ATTACH", "DETACH", "PRAGMA",
];

/// 管理函数 / 系统目录标识符
static DENIED_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(pg_|lo_|dblink|query_to_|cursor_to_|set_config$|nextval$|setval$|load_extension$|readfile$|writefile$|fts3_tokenizer$)",
    )
    .expect("denied identifier pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsafeReason {
    Empty,
    NotReadOnly,
    MultipleStatements,
    DeniedKeyword,
    DeniedFunction,
    UnterminatedLiteral,
    AmbiguousSyntax,
    AmbiguousLimit,
}

impl UnsafeReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::NotReadOnly => "not_read_only",
            Self::MultipleStatements => "multiple_statements",
            Self::DeniedKeyword => "denied_keyword",
            Self::DeniedFunction => "denied_function",
            Self::UnterminatedLiteral => "unterminated_literal",
            Self::AmbiguousSyntax => "ambiguous_syntax",
            Self::AmbiguousLimit => "ambiguous_limit",
        }
    }
}

impl fmt::Display for UnsafeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {detail}")]
pub struct UnsafeQuery {
    pub reason: UnsafeReason,
    pub detail: String,
}

impl UnsafeQuery {
    pub fn new(reason: UnsafeReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// 通过全部检查的语句。只能由 [`validate`] 产生，交给执行器后即被消费。
#[derive(Debug, PartialEq, Eq)]
pub struct ValidatedQuery {
    sql: String,
    row_limit: u64,
    limit_imposed: bool,
}

impl ValidatedQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// 顶层生效的行数上限
    pub fn row_limit(&self) -> u64 {
        self.row_limit
    }

    /// 行数上限是否由校验器追加或压低
    pub fn limit_imposed(&self) -> bool {
        self.limit_imposed
    }
}

pub fn validate(sql: &str, limits: &QueryLimits) -> Result<ValidatedQuery, UnsafeQuery> {
    let result = check(sql, limits.max_rows);
    match &result {
        Ok(v) => debug!(sql = %v.sql, row_limit = v.row_limit, "SQL 校验通过"),
        Err(e) => warn!(reason = %e.reason, detail = %e.detail, "SQL 校验拒绝"),
    }
    result
}

fn check(sql: &str, max_rows: u64) -> Result<ValidatedQuery, UnsafeQuery> {
    let lexed = Lexer::new(sql).tokenize()?;
    let tokens = &lexed.tokens;

    // 1. 白名单
    let first = tokens
        .first()
        .ok_or_else(|| UnsafeQuery::new(UnsafeReason::Empty, "no statement found"))?;
    let head = lexed.text(first).to_ascii_uppercase();
    if first.kind != TokenKind::Word || (head != "SELECT" && head != "WITH") {
        return Err(UnsafeQuery::new(
            UnsafeReason::NotReadOnly,
            format!("statement must begin with SELECT or WITH, found '{}'", lexed.text(first)),
        ));
    }

    // 2. 多语句：只允许末尾的分号
    let body_len = match tokens.iter().position(|t| t.kind == TokenKind::Symbol(';')) {
        Some(idx) => {
            if tokens[idx..].iter().any(|t| t.kind != TokenKind::Symbol(';')) {
                return Err(UnsafeQuery::new(
                    UnsafeReason::MultipleStatements,
                    "more than one statement in a single request",
                ));
            }
            idx
        }
        None => tokens.len(),
    };
    let body = &tokens[..body_len];

    // 3. 黑名单
    for (idx, token) in body.iter().enumerate() {
        match token.kind {
            TokenKind::Word => {
                let word = lexed.text(token).to_ascii_uppercase();
                if DENIED_KEYWORDS.contains(&word.as_str()) {
                    return Err(UnsafeQuery::new(
                        UnsafeReason::DeniedKeyword,
                        format!("keyword '{}' is not allowed", word),
                    ));
                }
                if word == "FOR" {
                    if let Some(next) = body.get(idx + 1) {
                        let lock = lexed.text(next).to_ascii_uppercase();
                        if matches!(lock.as_str(), "SHARE" | "NO" | "KEY") {
                            return Err(UnsafeQuery::new(
                                UnsafeReason::DeniedKeyword,
                                format!("row locking clause 'FOR {}' is not allowed", lock),
                            ));
                        }
                    }
                }
                check_identifier(lexed.text(token))?;
            }
            TokenKind::QuotedIdent => {
                let raw = lexed.text(token);
                check_identifier(&raw[1..raw.len() - 1])?;
            }
            _ => {}
        }
    }

    // 4. 行数限制
    let limit = find_row_limit(&lexed, body)?;
    let body_end = body.last().map(|t| t.end).unwrap_or(0);
    let mut text = lexed.text[..body_end].to_string();

    let (row_limit, limit_imposed) = match limit {
        RowLimit::Absent => {
            text = format!("{} LIMIT {}", text.trim_end(), max_rows);
            (max_rows, true)
        }
        RowLimit::Literal { value, span } if value > max_rows => {
            if let Some((start, end)) = span {
                text.replace_range(start..end, &max_rows.to_string());
            }
            (max_rows, true)
        }
        RowLimit::Literal { value, .. } => (value, false),
    };

    Ok(ValidatedQuery {
        sql: text.trim().to_string(),
        row_limit,
        limit_imposed,
    })
}

fn check_identifier(name: &str) -> Result<(), UnsafeQuery> {
    if DENIED_IDENTIFIER.is_match(name) {
        return Err(UnsafeQuery::new(
            UnsafeReason::DeniedFunction,
            format!("administrative function or catalog '{}' is not allowed", name),
        ));
    }
    Ok(())
}

enum RowLimit {
    Absent,
    /// span 为需要改写的行数字面量位置；FETCH FIRST ROW ONLY 这类隐式 1 行没有 span
    Literal {
        value: u64,
        span: Option<(usize, usize)>,
    },
}

fn find_row_limit(lexed: &Lexed, body: &[Token]) -> Result<RowLimit, UnsafeQuery> {
    let clauses: Vec<usize> = body
        .iter()
        .enumerate()
        .filter(|(_, t)| t.depth == 0 && t.kind == TokenKind::Word)
        .filter(|(_, t)| {
            let w = lexed.text(t);
            w.eq_ignore_ascii_case("LIMIT") || w.eq_ignore_ascii_case("FETCH")
        })
        .map(|(idx, _)| idx)
        .collect();

    let idx = match clauses.as_slice() {
        [] => return Ok(RowLimit::Absent),
        [idx] => *idx,
        _ => {
            return Err(UnsafeQuery::new(
                UnsafeReason::AmbiguousLimit,
                "more than one top-level row-limit clause",
            ))
        }
    };

    if lexed.text(&body[idx]).eq_ignore_ascii_case("LIMIT") {
        // SQLite 允许 LIMIT offset, count
        let (count, follow) = match (body.get(idx + 1), body.get(idx + 2), body.get(idx + 3)) {
            (Some(first), Some(comma), Some(second))
                if first.kind == TokenKind::Number && comma.kind == TokenKind::Symbol(',') =>
            {
                (second, body.get(idx + 4))
            }
            (Some(first), follow, _) => (first, follow),
            (None, _, _) => {
                return Err(UnsafeQuery::new(
                    UnsafeReason::AmbiguousLimit,
                    "LIMIT without a row count",
                ))
            }
        };
        let limit = literal_count(lexed, count)?;
        // 行数之后只能是语句结尾或 OFFSET，否则行数可能是表达式的一部分
        return match follow {
            None => Ok(limit),
            Some(t) if is_word(lexed, t, "OFFSET") => Ok(limit),
            Some(t) => Err(trailing_limit_token(lexed, t)),
        };
    }

    // FETCH { FIRST | NEXT } [ n ] { ROW | ROWS } ...
    let direction = body.get(idx + 1).map(|t| lexed.text(t).to_ascii_uppercase());
    if !matches!(direction.as_deref(), Some("FIRST") | Some("NEXT")) {
        return Err(UnsafeQuery::new(
            UnsafeReason::AmbiguousLimit,
            "unrecognized FETCH clause",
        ));
    }
    match body.get(idx + 2) {
        Some(t) if is_row_unit(lexed, t) => Ok(RowLimit::Literal {
            value: 1,
            span: None,
        }),
        Some(t) => {
            let limit = literal_count(lexed, t)?;
            match body.get(idx + 3) {
                Some(unit) if is_row_unit(lexed, unit) => Ok(limit),
                Some(other) => Err(trailing_limit_token(lexed, other)),
                None => Err(UnsafeQuery::new(
                    UnsafeReason::AmbiguousLimit,
                    "FETCH without ROW or ROWS",
                )),
            }
        }
        None => Err(UnsafeQuery::new(
            UnsafeReason::AmbiguousLimit,
            "FETCH without a row count",
        )),
    }
}

fn is_word(lexed: &Lexed, token: &Token, word: &str) -> bool {
    token.kind == TokenKind::Word && lexed.text(token).eq_ignore_ascii_case(word)
}

fn is_row_unit(lexed: &Lexed, token: &Token) -> bool {
    is_word(lexed, token, "ROW") || is_word(lexed, token, "ROWS")
}

fn trailing_limit_token(lexed: &Lexed, token: &Token) -> UnsafeQuery {
    UnsafeQuery::new(
        UnsafeReason::AmbiguousLimit,
        format!("unexpected '{}' after the row count", lexed.text(token)),
    )
}

fn literal_count(lexed: &Lexed, token: &Token) -> Result<RowLimit, UnsafeQuery> {
    let raw = lexed.text(token);
    let span = Some((token.start, token.end));
    match token.kind {
        TokenKind::Number if raw.bytes().all(|b| b.is_ascii_digit()) => Ok(RowLimit::Literal {
            // 超出 u64 的字面量必然大于上限
            value: raw.parse::<u64>().unwrap_or(u64::MAX),
            span,
        }),
        TokenKind::Word if raw.eq_ignore_ascii_case("ALL") => Ok(RowLimit::Literal {
            value: u64::MAX,
            span,
        }),
        _ => Err(UnsafeQuery::new(
            UnsafeReason::AmbiguousLimit,
            format!("row limit '{}' is not an integer literal", raw),
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    QuotedIdent,
    StringLit,
    Number,
    Param,
    Symbol(char),
}

/// start/end 为规范化文本中的字节偏移；depth 为所在括号层级
#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
    depth: usize,
}

/// 注释替换为单个空格后的文本及其词法单元
struct Lexed {
    text: String,
    tokens: Vec<Token>,
}

impl Lexed {
    fn text(&self, token: &Token) -> &str {
        &self.text[token.start..token.end]
    }
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    out: String,
    tokens: Vec<Token>,
    depth: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            out: String::with_capacity(input.len() + 16),
            tokens: Vec::new(),
            depth: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) {
        if let Some(c) = self.current() {
            self.out.push(c);
        }
        self.pos += 1;
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            start,
            end: self.out.len(),
            depth: self.depth,
        });
    }

    fn tokenize(mut self) -> Result<Lexed, UnsafeQuery> {
        while let Some(c) = self.current() {
            let next = self.peek();
            if c.is_whitespace() {
                self.bump();
                continue;
            }
            if c == '-' && next == Some('-') {
                self.skip_line_comment();
                continue;
            }
            if c == '/' && next == Some('*') {
                self.skip_block_comment()?;
                continue;
            }

            let start = self.out.len();
            match c {
                '\'' => {
                    // E'...' 转义字符串：去掉前面的 E 标识符
                    let escaped = matches!(
                        self.tokens.last(),
                        Some(t) if t.kind == TokenKind::Word
                            && t.end == start
                            && self.out[t.start..t.end].eq_ignore_ascii_case("e")
                    );
                    let token_start = if escaped {
                        self.tokens.pop().map(|t| t.start).unwrap_or(start)
                    } else {
                        start
                    };
                    self.read_quoted('\'', escaped)?;
                    self.push(TokenKind::StringLit, token_start);
                }
                '"' | '`' => {
                    self.read_quoted(c, false)?;
                    self.push(TokenKind::QuotedIdent, start);
                }
                '$' if next.is_some_and(|n| n.is_ascii_digit()) => {
                    self.bump();
                    while self.current().is_some_and(|d| d.is_ascii_digit()) {
                        self.bump();
                    }
                    self.push(TokenKind::Param, start);
                }
                '$' if self.at_dollar_quote() => {
                    // $tag$...$tag$ 仅 Postgres 支持，其他方言下边界不同
                    return Err(UnsafeQuery::new(
                        UnsafeReason::AmbiguousSyntax,
                        "dollar-quoted strings are not supported",
                    ));
                }
                '?' => {
                    self.bump();
                    self.push(TokenKind::Param, start);
                }
                c if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) => {
                    self.read_number()?;
                    self.push(TokenKind::Number, start);
                }
                c if c.is_alphabetic() || c == '_' => {
                    while self
                        .current()
                        .is_some_and(|w| w.is_alphanumeric() || w == '_' || w == '$')
                    {
                        self.bump();
                    }
                    self.push(TokenKind::Word, start);
                }
                '(' => {
                    self.bump();
                    self.push(TokenKind::Symbol('('), start);
                    self.depth += 1;
                }
                ')' => {
                    if self.depth == 0 {
                        return Err(UnsafeQuery::new(
                            UnsafeReason::AmbiguousSyntax,
                            "unbalanced parentheses",
                        ));
                    }
                    self.depth -= 1;
                    self.bump();
                    self.push(TokenKind::Symbol(')'), start);
                }
                other => {
                    self.bump();
                    self.push(TokenKind::Symbol(other), start);
                }
            }
        }

        if self.depth != 0 {
            return Err(UnsafeQuery::new(
                UnsafeReason::AmbiguousSyntax,
                "unbalanced parentheses",
            ));
        }
        Ok(Lexed {
            text: self.out,
            tokens: self.tokens,
        })
    }

    fn skip_line_comment(&mut self) {
        while self.current().is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
        self.out.push(' ');
    }

    fn skip_block_comment(&mut self) -> Result<(), UnsafeQuery> {
        self.pos += 2;
        loop {
            match (self.current(), self.peek()) {
                (Some('*'), Some('/')) => {
                    self.pos += 2;
                    break;
                }
                // Postgres 支持嵌套注释而 SQLite 不支持，两者结束位置不同
                (Some('/'), Some('*')) => {
                    return Err(UnsafeQuery::new(
                        UnsafeReason::AmbiguousSyntax,
                        "nested block comment",
                    ))
                }
                (Some(_), _) => self.pos += 1,
                (None, _) => {
                    return Err(UnsafeQuery::new(
                        UnsafeReason::UnterminatedLiteral,
                        "unterminated block comment",
                    ))
                }
            }
        }
        self.out.push(' ');
        Ok(())
    }

    fn read_quoted(&mut self, quote: char, escaped: bool) -> Result<(), UnsafeQuery> {
        self.bump(); // 开引号
        loop {
            match self.current() {
                None => {
                    return Err(UnsafeQuery::new(
                        UnsafeReason::UnterminatedLiteral,
                        format!("unterminated {} literal", quote),
                    ))
                }
                Some('\\') if escaped => match self.peek() {
                    Some('\'') => {
                        return Err(UnsafeQuery::new(
                            UnsafeReason::AmbiguousSyntax,
                            "backslash-escaped quote in string literal",
                        ))
                    }
                    Some(_) => {
                        self.bump();
                        self.bump();
                    }
                    None => {
                        return Err(UnsafeQuery::new(
                            UnsafeReason::UnterminatedLiteral,
                            "unterminated ' literal",
                        ))
                    }
                },
                Some(c) if c == quote => {
                    self.bump();
                    if self.current() == Some(quote) {
                        self.bump(); // 双写引号
                    } else {
                        return Ok(());
                    }
                }
                Some(_) => self.bump(),
            }
        }
    }

    fn bump_while(&mut self, accept: impl Fn(char) -> bool) {
        while self.current().is_some_and(&accept) {
            self.bump();
        }
    }

    /// 十六进制，或 整数[.小数][e[+-]指数]
    fn read_number(&mut self) -> Result<(), UnsafeQuery> {
        if self.current() == Some('0') && matches!(self.peek(), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            self.bump_while(|c| c.is_ascii_hexdigit());
        } else {
            self.bump_while(|c| c.is_ascii_digit());
            if self.current() == Some('.') {
                self.bump();
                self.bump_while(|c| c.is_ascii_digit());
            }
            if matches!(self.current(), Some('e') | Some('E')) {
                let signed = matches!(self.peek(), Some('+') | Some('-'));
                let digit_at = self.pos + if signed { 2 } else { 1 };
                if self.chars.get(digit_at).is_some_and(|d| d.is_ascii_digit()) {
                    self.bump();
                    if signed {
                        self.bump();
                    }
                    self.bump_while(|c| c.is_ascii_digit());
                }
            }
        }

        // 1into 之类：各引擎对数字与标识符的切分不一致
        if self
            .current()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            return Err(UnsafeQuery::new(
                UnsafeReason::AmbiguousSyntax,
                "numeric literal directly followed by an identifier",
            ));
        }
        Ok(())
    }

    fn at_dollar_quote(&self) -> bool {
        let mut idx = self.pos + 1;
        while let Some(c) = self.chars.get(idx) {
            if *c == '$' {
                return true;
            }
            if !(c.is_alphanumeric() || *c == '_') {
                return false;
            }
            idx += 1;
        }
        false
    }
}
