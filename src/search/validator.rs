//! Lexical read-only policy for ad-hoc queries.
//!
//! This is deliberately not a SQL parser. The text is split into tokens and
//! checked against explicit lists: a leading-keyword allow list, a keyword
//! denylist, and the catalog's table allow list. Anything the tokenizer does
//! not recognize is rejected rather than guessed at.

use std::collections::HashSet;
use std::ops::Range;

use thiserror::Error;

use crate::search::catalog::SchemaCatalog;

/// Keywords that may open an accepted statement.
const LEADING_KEYWORDS: &[&str] = &["SELECT", "WITH"];

/// Words that reject a query wherever they appear, literals and quoted names included.
pub const DENIED_KEYWORDS: &[&str] = &[
    "INSERT",
    "UPDATE",
    "DELETE",
    "REPLACE",
    "UPSERT",
    "MERGE",
    "DROP",
    "ALTER",
    "CREATE",
    "TRUNCATE",
    "ATTACH",
    "DETACH",
    "PRAGMA",
    "VACUUM",
    "REINDEX",
    "ANALYZE",
    "BEGIN",
    "COMMIT",
    "ROLLBACK",
    "SAVEPOINT",
    "RELEASE",
    "GRANT",
    "REVOKE",
    "LOAD_EXTENSION",
    "READFILE",
    "WRITEFILE",
    "EDIT",
    "FTS3_TOKENIZER",
];

/// Words that cannot stand in a table slot.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE",
    "GROUP",
    "ORDER",
    "LIMIT",
    "OFFSET",
    "HAVING",
    "UNION",
    "INTERSECT",
    "EXCEPT",
    "JOIN",
    "LEFT",
    "RIGHT",
    "FULL",
    "INNER",
    "OUTER",
    "CROSS",
    "NATURAL",
    "ON",
    "USING",
    "WINDOW",
    "INDEXED",
    "NOT",
    "RETURNING",
    "SELECT",
    "FROM",
];

/// Keywords that open a subquery directly after `(`.
const SUBQUERY_KEYWORDS: &[&str] = &["SELECT", "WITH", "VALUES"];

/// Keywords that close the FROM list at their depth.
const FROM_TERMINATORS: &[&str] = &[
    "WHERE",
    "GROUP",
    "HAVING",
    "ORDER",
    "LIMIT",
    "WINDOW",
    "UNION",
    "INTERSECT",
    "EXCEPT",
    "SELECT",
    "VALUES",
    "WITH",
];

/// Why a query was refused. The message always names the offending construct.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("query is empty")]
    Empty,
    #[error("multiple statements are not allowed: found ';' before the end of the query")]
    MultipleStatements,
    #[error("forbidden keyword {keyword} {location}: only read-only SELECT statements are accepted")]
    ForbiddenKeyword {
        keyword: String,
        location: KeywordLocation,
    },
    #[error("statement must begin with SELECT or WITH, found {0:?}")]
    NotRetrieval(String),
    #[error("table {0:?} is not in the allowed set of tables")]
    DisallowedTable(String),
    #[error("schema-qualified table {0:?} is not allowed")]
    QualifiedTable(String),
    #[error("table-valued function {0:?} is not allowed")]
    TableFunction(String),
    #[error("comments are not allowed in ad-hoc queries")]
    Comment,
    #[error("bind parameter {0:?} is not allowed; inline the value instead")]
    BindParameter(String),
    #[error("unterminated string literal or quoted identifier")]
    UnterminatedLiteral,
    #[error("unbalanced parentheses")]
    UnbalancedParentheses,
    #[error("unsupported character {0:?}")]
    UnsupportedCharacter(char),
    #[error("malformed {0}")]
    MalformedClause(String),
    #[error("the engine reports the statement is not read-only")]
    NotReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordLocation {
    Statement,
    Literal,
}

impl std::fmt::Display for KeywordLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeywordLocation::Statement => f.write_str("in statement"),
            KeywordLocation::Literal => f.write_str("inside a quoted literal"),
        }
    }
}

/// An accepted query, ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    /// Original text with whitespace runs collapsed and a trailing `;` dropped.
    pub normalized: String,
    /// Catalog tables the statement references, lower-cased, in first-seen order.
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Word(String),
    Number,
    StringLit(String),
    QuotedIdent(String),
    Punct(&'static str),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    span: Range<usize>,
}

impl Token {
    fn keyword(&self) -> Option<String> {
        match &self.kind {
            TokenKind::Word(w) => Some(w.to_ascii_uppercase()),
            _ => None,
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(w) if w.eq_ignore_ascii_case(kw))
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.kind, TokenKind::Punct(q) if q == p)
    }

    fn identifier(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Word(w) | TokenKind::QuotedIdent(w) => Some(w),
            _ => None,
        }
    }
}

const MULTI_CHAR_PUNCT: &[&str] = &["->>", "||", "<=", ">=", "<>", "!=", "==", "<<", ">>", "->"];
const SINGLE_CHAR_PUNCT: &[&str] = &[
    "(", ")", ",", ".", ";", "*", "+", "-", "/", "%", "<", ">", "=", "&", "|", "~",
];

fn tokenize(sql: &str) -> Result<Vec<Token>, RejectReason> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut chars = sql.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let rest = &sql[start..];
        if rest.starts_with("--") || rest.starts_with("/*") {
            return Err(RejectReason::Comment);
        }

        if c.is_alphabetic() || c == '_' {
            let mut end = start;
            while let Some(&(i, ch)) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                    end = i + ch.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Word(sql[start..end].to_string()),
                span: start..end,
            });
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && bytes.get(start + 1).is_some_and(u8::is_ascii_digit)) {
            let mut end = start;
            while let Some(&(i, ch)) = chars.peek() {
                if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' {
                    end = i + 1;
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Number,
                span: start..end,
            });
            continue;
        }

        match c {
            '\'' | '"' | '`' | '[' => {
                let close = match c {
                    '[' => ']',
                    other => other,
                };
                chars.next();
                let mut content = String::new();
                let mut end = None;
                while let Some((i, ch)) = chars.next() {
                    if ch == close {
                        // Doubled delimiter escapes itself, except for [brackets].
                        if close != ']' && chars.peek().is_some_and(|&(_, n)| n == close) {
                            content.push(ch);
                            chars.next();
                            continue;
                        }
                        end = Some(i + 1);
                        break;
                    }
                    content.push(ch);
                }
                let end = end.ok_or(RejectReason::UnterminatedLiteral)?;
                let kind = if c == '\'' {
                    TokenKind::StringLit(content)
                } else {
                    TokenKind::QuotedIdent(content)
                };
                tokens.push(Token {
                    kind,
                    span: start..end,
                });
            }
            '?' | ':' | '@' | '$' => {
                let end = rest
                    .char_indices()
                    .skip(1)
                    .find(|&(_, ch)| !(ch.is_alphanumeric() || ch == '_'))
                    .map_or(rest.len(), |(i, _)| i);
                return Err(RejectReason::BindParameter(rest[..end].to_string()));
            }
            _ => {
                let punct = MULTI_CHAR_PUNCT
                    .iter()
                    .chain(SINGLE_CHAR_PUNCT)
                    .find(|p| rest.starts_with(**p))
                    .copied()
                    .ok_or(RejectReason::UnsupportedCharacter(c))?;
                for _ in 0..punct.len() {
                    chars.next();
                }
                tokens.push(Token {
                    kind: TokenKind::Punct(punct),
                    span: start..start + punct.len(),
                });
            }
        }
    }

    Ok(tokens)
}

fn denied_word(word: &str) -> Option<String> {
    let upper = word.to_ascii_uppercase();
    DENIED_KEYWORDS.contains(&upper.as_str()).then_some(upper)
}

/// Words inside a literal, split on anything that cannot be part of an identifier.
fn literal_words(content: &str) -> impl Iterator<Item = &str> {
    content
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
        .filter(|w| !w.is_empty())
}

/// Checks ad-hoc query text against the read-only policy.
#[derive(Debug, Clone, Copy)]
pub struct QueryValidator<'a> {
    catalog: &'a SchemaCatalog,
}

impl<'a> QueryValidator<'a> {
    pub fn new(catalog: &'a SchemaCatalog) -> Self {
        Self { catalog }
    }

    pub fn validate(&self, raw: &str) -> Result<ValidatedQuery, RejectReason> {
        let mut tokens = tokenize(raw.trim())?;
        let trimmed = raw.trim();

        if let Some(pos) = tokens.iter().position(|t| t.is_punct(";")) {
            if pos + 1 != tokens.len() {
                return Err(RejectReason::MultipleStatements);
            }
            tokens.pop();
        }
        if tokens.is_empty() {
            return Err(RejectReason::Empty);
        }

        check_denylist(&tokens)?;

        let leading = tokens[0]
            .keyword()
            .unwrap_or_else(|| trimmed[tokens[0].span.clone()].to_string());
        if !LEADING_KEYWORDS.contains(&leading.as_str()) {
            return Err(RejectReason::NotRetrieval(leading));
        }

        check_parentheses(&tokens)?;

        let cte_names = if tokens[0].is_keyword("WITH") {
            collect_cte_names(&tokens)?
        } else {
            HashSet::new()
        };
        let tables = self.check_table_references(&tokens, &cte_names)?;

        Ok(ValidatedQuery {
            normalized: normalize(trimmed, &tokens),
            tables,
        })
    }

    /// Walks every FROM clause, one frame per parenthesis depth, and checks each
    /// table slot: after `FROM`, after `JOIN`, and after every `,` at FROM depth,
    /// including commas that follow a subquery or a join condition.
    fn check_table_references(
        &self,
        tokens: &[Token],
        cte_names: &HashSet<String>,
    ) -> Result<Vec<String>, RejectReason> {
        let mut referenced: Vec<String> = Vec::new();
        let mut frames = vec![FromFrame::default()];

        for (i, tok) in tokens.iter().enumerate() {
            let depth = frames.len() - 1;
            let frame = &mut frames[depth];

            if let Some(clause) = frame.expecting {
                if tok.is_punct("(") {
                    // Subquery or parenthesized join list fills the slot.
                    frame.expecting = None;
                    frames.push(FromFrame {
                        in_from: true,
                        expecting: Some(clause),
                    });
                    continue;
                }
                let opens_subquery = i > 0
                    && tokens[i - 1].is_punct("(")
                    && SUBQUERY_KEYWORDS.iter().any(|k| tok.is_keyword(k));
                if opens_subquery {
                    *frame = FromFrame::default();
                    continue;
                }
                let name = self.table_reference(tokens, i, clause, cte_names)?;
                if let Some(name) = name
                    && !referenced.contains(&name)
                {
                    referenced.push(name);
                }
                frame.expecting = None;
                continue;
            }

            if tok.is_punct("(") {
                frames.push(FromFrame::default());
            } else if tok.is_punct(")") {
                if frames.len() > 1 {
                    frames.pop();
                }
            } else if tok.is_keyword("FROM") {
                frame.in_from = true;
                frame.expecting = Some("FROM");
            } else if tok.is_keyword("JOIN") {
                frame.in_from = true;
                frame.expecting = Some("JOIN");
            } else if tok.is_punct(",") && frame.in_from {
                frame.expecting = Some("FROM");
            } else if FROM_TERMINATORS.iter().any(|k| tok.is_keyword(k)) {
                *frame = FromFrame::default();
            } else if tok.is_keyword("IN")
                && tokens
                    .get(i + 1)
                    .is_some_and(|t| t.identifier().is_some())
            {
                // `expr IN table` names a table without FROM.
                frame.expecting = Some("IN");
            }
        }

        if let Some(clause) = frames.last().and_then(|f| f.expecting) {
            return Err(RejectReason::MalformedClause(format!(
                "{clause} clause without a table"
            )));
        }
        Ok(referenced)
    }

    /// Checks the table named at `tokens[i]`. Returns the lower-cased catalog
    /// table, or `None` for a CTE name.
    fn table_reference(
        &self,
        tokens: &[Token],
        i: usize,
        clause: &str,
        cte_names: &HashSet<String>,
    ) -> Result<Option<String>, RejectReason> {
        let tok = &tokens[i];
        let malformed = || RejectReason::MalformedClause(format!("{clause} clause without a table"));
        let name = tok.identifier().ok_or_else(malformed)?;
        if matches!(tok.kind, TokenKind::Word(_))
            && tok
                .keyword()
                .is_some_and(|k| CLAUSE_KEYWORDS.contains(&k.as_str()))
        {
            return Err(malformed());
        }
        if tokens.get(i + 1).is_some_and(|t| t.is_punct(".")) {
            let qualified = tokens
                .get(i + 2)
                .and_then(Token::identifier)
                .map_or_else(|| name.to_string(), |rest| format!("{name}.{rest}"));
            return Err(RejectReason::QualifiedTable(qualified));
        }
        if tokens.get(i + 1).is_some_and(|t| t.is_punct("(")) {
            return Err(RejectReason::TableFunction(name.to_string()));
        }

        let lowered = name.to_lowercase();
        if cte_names.contains(&lowered) {
            return Ok(None);
        }
        if !self.catalog.is_table_allowed(name) {
            return Err(RejectReason::DisallowedTable(name.to_string()));
        }
        Ok(Some(lowered))
    }
}

/// FROM-clause state for one parenthesis depth.
#[derive(Debug, Default, Clone, Copy)]
struct FromFrame {
    /// Inside a FROM list, so a `,` opens another table slot.
    in_from: bool,
    /// A table reference must come next; holds the clause name for messages.
    expecting: Option<&'static str>,
}

fn check_denylist(tokens: &[Token]) -> Result<(), RejectReason> {
    for tok in tokens {
        match &tok.kind {
            TokenKind::Word(w) => {
                if let Some(keyword) = denied_word(w) {
                    return Err(RejectReason::ForbiddenKeyword {
                        keyword,
                        location: KeywordLocation::Statement,
                    });
                }
            }
            TokenKind::StringLit(content) | TokenKind::QuotedIdent(content) => {
                if let Some(keyword) = literal_words(content).find_map(denied_word) {
                    return Err(RejectReason::ForbiddenKeyword {
                        keyword,
                        location: KeywordLocation::Literal,
                    });
                }
            }
            TokenKind::Number | TokenKind::Punct(_) => {}
        }
    }
    Ok(())
}

fn check_parentheses(tokens: &[Token]) -> Result<(), RejectReason> {
    let mut depth: i64 = 0;
    for tok in tokens {
        if tok.is_punct("(") {
            depth += 1;
        } else if tok.is_punct(")") {
            depth -= 1;
            if depth < 0 {
                return Err(RejectReason::UnbalancedParentheses);
            }
        }
    }
    if depth == 0 {
        Ok(())
    } else {
        Err(RejectReason::UnbalancedParentheses)
    }
}

/// Index just past the balanced group opening at `open`.
fn skip_group(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, tok) in tokens[open..].iter().enumerate() {
        if tok.is_punct("(") {
            depth += 1;
        } else if tok.is_punct(")") {
            depth -= 1;
            if depth == 0 {
                return Some(open + offset + 1);
            }
        }
    }
    None
}

/// Names declared by `WITH [RECURSIVE] name [(cols)] AS [NOT] [MATERIALIZED] (...)`, comma separated.
fn collect_cte_names(tokens: &[Token]) -> Result<HashSet<String>, RejectReason> {
    let malformed = || RejectReason::MalformedClause("WITH clause".to_string());
    let mut names = HashSet::new();
    let mut i = 1;
    if tokens.get(i).is_some_and(|t| t.is_keyword("RECURSIVE")) {
        i += 1;
    }
    loop {
        let name = tokens.get(i).and_then(Token::identifier).ok_or_else(malformed)?;
        names.insert(name.to_lowercase());
        i += 1;
        if tokens.get(i).is_some_and(|t| t.is_punct("(")) {
            i = skip_group(tokens, i).ok_or_else(malformed)?;
        }
        if !tokens.get(i).is_some_and(|t| t.is_keyword("AS")) {
            return Err(malformed());
        }
        i += 1;
        if tokens.get(i).is_some_and(|t| t.is_keyword("NOT")) {
            i += 1;
        }
        if tokens.get(i).is_some_and(|t| t.is_keyword("MATERIALIZED")) {
            i += 1;
        }
        if !tokens.get(i).is_some_and(|t| t.is_punct("(")) {
            return Err(malformed());
        }
        i = skip_group(tokens, i).ok_or_else(malformed)?;
        if tokens.get(i).is_some_and(|t| t.is_punct(",")) {
            i += 1;
            continue;
        }
        break;
    }
    match tokens.get(i) {
        Some(t) if t.is_keyword("SELECT") => Ok(names),
        _ => Err(malformed()),
    }
}

fn normalize(sql: &str, tokens: &[Token]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut prev_end: Option<usize> = None;
    for tok in tokens {
        if let Some(end) = prev_end
            && tok.span.start > end
        {
            out.push(' ');
        }
        out.push_str(&sql[tok.span.clone()]);
        prev_end = Some(tok.span.end);
    }
    out
}
