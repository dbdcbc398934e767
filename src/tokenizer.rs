//! Convert raw PL/SQL source into a series of tokens.
//!
//! This is essentially a lexer, separate from our actual grammar in
//! [`crate::ast`]. Compare and contrast Rust's
//! [`proc_macro2::TokenTree`][TokenTree], and [`peg`'s own `Token`
//! type][Token].
//!
//! Every token remembers the exact text it was parsed from, including any
//! whitespace and comments that follow it. Concatenating the raw text of all
//! tokens reproduces the input byte for byte, which we check in our tests.
//! Every token also remembers its [`Span`], which is what we use to identify
//! syntax tree nodes across our two passes.
//!
//! [TokenTree]: https://doc.rust-lang.org/proc_macro/enum.TokenTree.html
//! [Token]:
//!     https://github.com/kevinmehall/rust-peg/blob/master/peg-macros/tokens.rs

use std::{fmt, ops::Range};

use codespan_reporting::diagnostic::Label;
use derive_visitor::Drive;
use peg::{Parse, ParseElem, RuleResult};

use crate::{
    errors::{Result, SourceError},
    known_files::{FileId, KnownFiles},
};

/// A source location, used by `peg` to report errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    /// The file we're parsing.
    pub file_id: FileId,

    /// The byte offset of this location.
    pub offset: usize,
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file_id={} offset={}", self.file_id, self.offset)
    }
}

/// A span of source code.
///
/// Spans double as node identities: two syntax tree nodes produced by the
/// parser never share both a start and an end, unless one directly wraps the
/// other.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Span {
    /// We don't know where this came from.
    #[default]
    Unknown,
    /// A byte range in a known file.
    Known {
        file_id: FileId,
        start: usize,
        end: usize,
    },
}

impl Span {
    /// Build a span from a byte range.
    pub fn new(file_id: FileId, range: Range<usize>) -> Self {
        Span::Known {
            file_id,
            start: range.start,
            end: range.end,
        }
    }

    /// The smallest span covering both `self` and `other`. Spans in different
    /// files can't be merged, so we keep `self`.
    pub fn combined(&self, other: &Span) -> Span {
        match (self, other) {
            (Span::Unknown, _) => *other,
            (_, Span::Unknown) => *self,
            (
                Span::Known {
                    file_id: f1,
                    start: s1,
                    end: e1,
                },
                Span::Known {
                    file_id: f2,
                    start: s2,
                    end: e2,
                },
            ) if f1 == f2 => Span::Known {
                file_id: *f1,
                start: *s1.min(s2),
                end: *e1.max(e2),
            },
            _ => *self,
        }
    }

    /// Is this span known?
    pub fn is_known(&self) -> bool {
        matches!(self, Span::Known { .. })
    }

    /// Build a primary diagnostic label pointing at this span.
    pub fn to_label(&self, message: String) -> Option<Label<FileId>> {
        match self {
            Span::Unknown => None,
            Span::Known {
                file_id,
                start,
                end,
            } => Some(Label::primary(*file_id, *start..*end).with_message(message)),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Span::Unknown => write!(f, "?"),
            Span::Known {
                file_id,
                start,
                end,
            } => write!(f, "{}:{}..{}", file_id, start, end),
        }
    }
}

/// Anything with a location in the source code.
pub trait Spanned {
    /// Our source span.
    fn span(&self) -> Span;
}

impl Spanned for Span {
    fn span(&self) -> Span {
        *self
    }
}

impl<T: Spanned> Spanned for Box<T> {
    fn span(&self) -> Span {
        self.as_ref().span()
    }
}

impl<T: Spanned> Spanned for Option<T> {
    fn span(&self) -> Span {
        match self {
            Some(t) => t.span(),
            None => Span::Unknown,
        }
    }
}

impl<T: Spanned> Spanned for Vec<T> {
    fn span(&self) -> Span {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => first.span().combined(&last.span()),
            _ => Span::Unknown,
        }
    }
}

impl<T: Spanned + ?Sized> Spanned for &T {
    fn span(&self) -> Span {
        (*self).span()
    }
}

/// A token.
#[derive(Clone, Drive, PartialEq)]
pub enum Token {
    /// Whitespace in an empty file.
    EmptyFile(EmptyFile),

    /// An identifier.
    Ident(Ident),

    /// A literal.
    Literal(Literal),

    /// A punctuation token.
    Punct(Punct),
}

impl Token {
    /// Get the raw token for this token.
    pub fn raw(&self) -> &RawToken {
        match self {
            Token::EmptyFile(empty_file) => &empty_file.token,
            Token::Ident(ident) => &ident.token,
            Token::Literal(literal) => &literal.token,
            Token::Punct(punct) => &punct.token,
        }
    }

    /// Get the mutable raw token for this token.
    pub fn raw_mut(&mut self) -> &mut RawToken {
        match self {
            Token::EmptyFile(empty_file) => &mut empty_file.token,
            Token::Ident(ident) => &mut ident.token,
            Token::Literal(literal) => &mut literal.token,
            Token::Punct(punct) => &mut punct.token,
        }
    }
}

impl Spanned for Token {
    fn span(&self) -> Span {
        self.raw().span()
    }
}

// We want to simplify the debug output of `Token`, because it will normally
// appear as part of a vector of many tokens, or as part of a larger parse tree.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::EmptyFile(_) => write!(f, "$EMPTY_FILE"),
            Token::Ident(ident) => write!(f, "I:{}", ident.name),
            Token::Literal(literal) => write!(f, "L:{}", literal.value),
            Token::Punct(punct) => write!(f, "P:{}", punct.token.as_str()),
        }
    }
}

/// A raw token. This contains both the text of the token itself, and any
/// whitespace around it.
#[derive(Debug, Drive, Eq, Clone)]
pub struct RawToken {
    /// The raw text of the token, including any surrounding whitespace.
    #[drive(skip)]
    raw: String,

    /// Indices into `raw` pointing to the real text.
    #[drive(skip)]
    token_range: Range<usize>,

    /// The span of the token text itself, without whitespace.
    #[drive(skip)]
    source_span: Span,
}

impl RawToken {
    /// Create a new token with no source location.
    pub fn new(s: &str) -> Self {
        Self {
            raw: s.to_string(),
            token_range: 0..s.len(),
            source_span: Span::Unknown,
        }
    }

    /// Leading whitespace.
    pub fn leading_whitespace(&self) -> &str {
        &self.raw[..self.token_range.start]
    }

    /// Get the token, including any whitespace.
    pub fn as_raw_str(&self) -> &str {
        &self.raw
    }

    /// Get the token without any whitespace.
    pub fn as_str(&self) -> &str {
        &self.raw[self.token_range.clone()]
    }

    /// Trailing whitespace.
    pub fn trailing_whitespace(&self) -> &str {
        &self.raw[self.token_range.end..]
    }

    /// Prepend whitespace to this token.
    fn prepend_whitespace(&mut self, ws: &str) {
        let mut raw = String::with_capacity(ws.len() + self.raw.len());
        raw.push_str(ws);
        raw.push_str(&self.raw);
        self.raw = raw;
        self.token_range.start += ws.len();
        self.token_range.end += ws.len();
    }
}

impl PartialEq for RawToken {
    /// Two tokens are equal if they have the same text.
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Spanned for RawToken {
    fn span(&self) -> Span {
        self.source_span
    }
}

/// The start of a file.
#[derive(Clone, Drive, Debug, PartialEq)]
pub struct EmptyFile {
    /// Our token, which should contain nothing but (maybe) whitespace.
    pub token: RawToken,
}

/// Fold an identifier to its canonical form. This is the only place where we
/// decide how case works.
///
/// Unquoted identifiers are case-insensitive, and Oracle stores them in
/// uppercase. So we fold unquoted names to lowercase, and we also fold quoted
/// names that are entirely uppercase, since `"EMP"` and `emp` name the same
/// object. Any other quoted name keeps its exact case.
pub fn fold_identifier(name: &str, quoted: bool) -> String {
    if !quoted || name.chars().all(|c| !c.is_lowercase()) {
        name.to_lowercase()
    } else {
        name.to_owned()
    }
}

/// An identifier token.
#[derive(Clone, Debug, Drive, Eq)]
pub struct Identifier {
    /// Our token.
    pub token: RawToken,

    /// The identifier as written, without any quotes.
    #[drive(skip)]
    pub name: String,

    /// Was this identifier quoted?
    #[drive(skip)]
    pub quoted: bool,
}

/// We mostly refer to identifiers by this shorter name.
pub type Ident = Identifier;

impl Identifier {
    /// Create a new, unquoted `Ident` with no source location.
    pub fn new(name: &str) -> Self {
        Self {
            token: RawToken::new(name),
            name: name.to_owned(),
            quoted: false,
        }
    }

    /// The canonical, case-folded form of this name. All name lookups go
    /// through this.
    pub fn canonical_name(&self) -> String {
        fold_identifier(&self.name, self.quoted)
    }

    /// Does this identifier match `s`, ignoring case? Quoted identifiers
    /// never match keywords.
    pub fn is(&self, s: &str) -> bool {
        !self.quoted && self.name.eq_ignore_ascii_case(s)
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_name() == other.canonical_name()
    }
}

impl Spanned for Identifier {
    fn span(&self) -> Span {
        self.token.span()
    }
}

/// A keyword. This is just a thin wrapper over an `Ident` to change the
/// equality semantics.
#[derive(Debug, Drive, Clone, Eq)]
pub struct Keyword {
    /// Our keyword.
    pub ident: Ident,
}

impl Keyword {
    /// Create a new `Keyword` with no source location.
    pub fn new(name: &str) -> Self {
        Self {
            ident: Ident::new(name),
        }
    }

    /// The keyword in uppercase, regardless of how it was written.
    pub fn to_uppercase(&self) -> String {
        self.ident.name.to_ascii_uppercase()
    }

    /// Is this keyword `s`?
    pub fn is(&self, s: &str) -> bool {
        self.ident.is(s)
    }
}

impl PartialEq for Keyword {
    fn eq(&self, other: &Self) -> bool {
        self.ident.name.eq_ignore_ascii_case(&other.ident.name)
    }
}

impl Spanned for Keyword {
    fn span(&self) -> Span {
        self.ident.span()
    }
}

/// A literal token.
#[derive(Debug, Drive, Clone, PartialEq)]
pub struct Literal {
    /// Our token.
    pub token: RawToken,

    /// The actual literal value.
    #[drive(skip)]
    pub value: LiteralValue,
}

impl Spanned for Literal {
    fn span(&self) -> Span {
        self.token.span()
    }
}

/// A literal value.
///
/// Does not include `TRUE`, `FALSE` or `NULL`, which are parsed as
/// identifiers at this level.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    /// An integer that fits in an `i64`.
    Integer(i64),

    /// Any other number, kept as written so that we never lose precision.
    Number(String),

    /// A string, with quoting removed.
    String(String),
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Integer(i) => write!(f, "{}", i),
            LiteralValue::Number(n) => write!(f, "{}", n),
            LiteralValue::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// A punctuation token.
#[derive(Debug, Drive, Clone, PartialEq)]
pub struct Punct {
    /// Our token.
    pub token: RawToken,
}

impl Punct {
    /// Create a new `Punct` with no source location.
    pub fn new(s: &str) -> Self {
        Self {
            token: RawToken::new(s),
        }
    }
}

impl Spanned for Punct {
    fn span(&self) -> Span {
        self.token.span()
    }
}

/// A token stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenStream {
    /// The file these tokens came from.
    file_id: FileId,

    /// The tokens.
    tokens: Vec<Token>,
}

impl TokenStream {
    /// The tokens in this stream.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// The file this stream was read from.
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Parse a literal.
    pub fn literal(&self, pos: usize) -> RuleResult<Literal> {
        match self.tokens.get(pos) {
            Some(Token::Literal(literal)) => RuleResult::Matched(pos + 1, literal.clone()),
            _ => RuleResult::Failed,
        }
    }

    /// Parse an identifier. This preserves case, and whether the identifier
    /// was quoted. The grammar decides which words are reserved.
    pub fn ident(&self, pos: usize) -> RuleResult<Ident> {
        match self.tokens.get(pos) {
            Some(Token::Ident(ident)) => RuleResult::Matched(pos + 1, ident.clone()),
            _ => RuleResult::Failed,
        }
    }

    /// Parse a keyword matching a specific string, ignoring case. Quoted
    /// identifiers are never keywords.
    pub fn keyword(&self, pos: usize, s: &'static str) -> RuleResult<Keyword> {
        match self.tokens.get(pos) {
            Some(Token::Ident(ident)) if ident.is(s) => RuleResult::Matched(
                pos + 1,
                Keyword {
                    ident: ident.clone(),
                },
            ),
            _ => RuleResult::Failed,
        }
    }

    /// Parse a punctuation token matching a specific string.
    pub fn punct_eq(&self, pos: usize, s: &'static str) -> RuleResult<Punct> {
        match self.tokens.get(pos) {
            Some(Token::Punct(punct)) if punct.token.as_str() == s => {
                RuleResult::Matched(pos + 1, punct.clone())
            }
            _ => RuleResult::Failed,
        }
    }

    /// Match the end of the useful input. Empty files are represented by a
    /// single [`Token::EmptyFile`], which we also treat as the end.
    pub fn end_of_input(&self, pos: usize) -> RuleResult<()> {
        match self.tokens.get(pos) {
            None | Some(Token::EmptyFile(_)) => RuleResult::Matched(pos, ()),
            _ => RuleResult::Failed,
        }
    }
}

impl Parse for TokenStream {
    type PositionRepr = Loc;

    fn start(&self) -> usize {
        0
    }

    fn is_eof(&self, pos: usize) -> bool {
        pos >= self.tokens.len()
    }

    fn position_repr(&self, pos: usize) -> Self::PositionRepr {
        let span = if pos < self.tokens.len() {
            self.tokens[pos].span()
        } else if pos > 0 {
            match self.tokens[pos - 1].span() {
                Span::Known { file_id, end, .. } => Span::Known {
                    file_id,
                    start: end,
                    end,
                },
                Span::Unknown => Span::Unknown,
            }
        } else {
            Span::Unknown
        };
        match span {
            Span::Known { file_id, start, .. } => Loc {
                file_id,
                offset: start,
            },
            // We have no tokens at all, so point at the start of the file.
            Span::Unknown => Loc {
                file_id: self.file_id,
                offset: 0,
            },
        }
    }
}

impl<'input> ParseElem<'input> for TokenStream {
    type Element = &'input Token;

    fn parse_elem(&'input self, pos: usize) -> peg::RuleResult<Self::Element> {
        match self.tokens.get(pos) {
            Some(c) => RuleResult::Matched(pos + 1, c),
            None => RuleResult::Failed,
        }
    }
}

// We don't implement `ParseLiteral` for `TokenStream` because all our
// literal-matching rules need to return a token, and `ParseLiteral` returns
// `()`.

/// Convert the source of `file_id` into a series of tokens.
pub fn tokenize_plsql(files: &KnownFiles, file_id: FileId) -> Result<TokenStream> {
    let source = files.source_code(file_id)?;
    match lexer::tokens(source, file_id) {
        Ok(tokens) => Ok(TokenStream { file_id, tokens }),
        Err(err) => {
            let span = Span::new(file_id, err.location.offset..err.location.offset);
            Err(SourceError::parse_error("failed to tokenize PL/SQL", span, err.expected).into())
        }
    }
}

/// Build a numeric literal value from its text.
fn number_value(text: &str) -> LiteralValue {
    match text.parse::<i64>() {
        Ok(i) => LiteralValue::Integer(i),
        Err(_) => LiteralValue::Number(text.to_owned()),
    }
}

peg::parser! {
    grammar lexer(file_id: FileId) for str {
        pub rule tokens() -> Vec<Token>
            = leading_ws:whitespace_only() tokens:(token()*) {
                if tokens.is_empty() {
                    vec![Token::EmptyFile(EmptyFile { token: leading_ws })]
                } else {
                    // Merge leading whitespace with the first token.
                    let mut tokens = tokens;
                    tokens[0].raw_mut().prepend_whitespace(leading_ws.as_raw_str());
                    tokens
                }
            }

        pub rule token() -> Token
            = literal:literal() { Token::Literal(literal) }
            / ident:ident() { Token::Ident(ident) }
            / punct:punct() { Token::Punct(punct) }

        rule whitespace_only() -> RawToken
            = ws:$(_) {
                RawToken {
                    raw: ws.to_string(),
                    token_range: 0..0,
                    source_span: Span::Unknown,
                }
            }

        rule ident() -> Ident
            = name_and_token:t(<plain_ident()>) {
                let (name, token) = name_and_token;
                Ident { token, name, quoted: false }
            }
            / name_and_token:t(<quoted_ident_name()>) {
                let (name, token) = name_and_token;
                Ident { token, name, quoted: true }
            }

        rule quoted_ident_name() -> String
            = "\"" name:$([^ '"']+) "\"" { name.to_owned() }

        /// Unquoted identifiers may contain `$` and `#` after the first
        /// character.
        rule plain_ident() -> String
            = quiet! { id:$(ident_start() ident_cont()*) !ident_cont() { id.to_string() } }
            / expected!("identifier")
        rule ident_start() = ['a'..='z' | 'A'..='Z']
        rule ident_cont() = ['a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '$' | '#']

        rule literal() -> Literal
            = quiet! { nothing_and_token:t(<number()>) {
                let (_, token) = nothing_and_token;
                let value = number_value(token.as_str());
                Literal { token, value }
            } }
            / quiet! { s_and_token:t(<national_string()>) {
                let (s, token) = s_and_token;
                Literal { token, value: LiteralValue::String(s) }
            } }
            / quiet! { s_and_token:t(<national_q_string()>) {
                let (s, token) = s_and_token;
                Literal { token, value: LiteralValue::String(s) }
            } }

        /// Numbers never include a sign, and a trailing `.` is only part of
        /// the number when it isn't the start of a `..` range operator.
        rule number()
            = ['0'..='9']+ ("." !"." ['0'..='9']*)? exponent()?
            / "." ['0'..='9']+ exponent()?
        rule exponent() = ['e' | 'E'] ['+' | '-']? ['0'..='9']+

        rule national_string() -> String
            = ['n' | 'N']? s:quoted_string() { s }
        rule national_q_string() -> String
            = ['n' | 'N']? ['q' | 'Q'] s:q_quoted_string() { s }

        /// A string with `''` escapes.
        rule quoted_string() -> String
            = "'" parts:(quoted_string_part()*) "'" { parts.concat() }
        rule quoted_string_part() -> &'input str
            = "''" { "'" }
            / s:$([^ '\'']+) { s }

        /// Alternative quoting, like `q'[it's]'`.
        rule q_quoted_string() -> String
            = "'[" s:$((!"]'" [_])*) "]'" { s.to_owned() }
            / "'{" s:$((!"}'" [_])*) "}'" { s.to_owned() }
            / "'(" s:$((!")'" [_])*) ")'" { s.to_owned() }
            / "'<" s:$((!">'" [_])*) ">'" { s.to_owned() }
            / "'!" s:$((!"!'" [_])*) "!'" { s.to_owned() }
            / "'|" s:$((!"|'" [_])*) "|'" { s.to_owned() }

        rule punct() -> Punct
            // When multiple tokens start with the same first character(s), we
            // need to list them in order of longest to shortest.
            = p:t(<":=">) { Punct { token: p.1 } }
            / p:t(<"=>">) { Punct { token: p.1 } }
            / p:t(<"..">) { Punct { token: p.1 } }
            / p:t(<"||">) { Punct { token: p.1 } }
            / p:t(<"**">) { Punct { token: p.1 } }
            / p:t(<"<>">) { Punct { token: p.1 } }
            / p:t(<"!=">) { Punct { token: p.1 } }
            / p:t(<"^=">) { Punct { token: p.1 } }
            / p:t(<"~=">) { Punct { token: p.1 } }
            / p:t(<"<=">) { Punct { token: p.1 } }
            / p:t(<">=">) { Punct { token: p.1 } }
            / p:t(<"<<">) { Punct { token: p.1 } }
            / p:t(<">>">) { Punct { token: p.1 } }
            / p:t(<"(">) { Punct { token: p.1 } }
            / p:t(<")">) { Punct { token: p.1 } }
            / p:t(<",">) { Punct { token: p.1 } }
            / p:t(<";">) { Punct { token: p.1 } }
            / p:t(<".">) { Punct { token: p.1 } }
            / p:t(<"=">) { Punct { token: p.1 } }
            / p:t(<"<">) { Punct { token: p.1 } }
            / p:t(<">">) { Punct { token: p.1 } }
            / p:t(<"+">) { Punct { token: p.1 } }
            / p:t(<"-">) { Punct { token: p.1 } }
            / p:t(<"*">) { Punct { token: p.1 } }
            / p:t(<"/">) { Punct { token: p.1 } }
            / p:t(<"%">) { Punct { token: p.1 } }
            / p:t(<":">) { Punct { token: p.1 } }
            / p:t(<"@">) { Punct { token: p.1 } }

        /// Complex tokens matching a grammar rule.
        rule t<T>(r: rule<T>) -> (T, RawToken)
            = s:position!() parsed_and_slice:with_slice(<r()>) ws:$(_) {
                let (parsed, slice) = parsed_and_slice;
                (parsed, RawToken {
                    raw: format!("{}{}", slice, ws),
                    token_range: 0..slice.len(),
                    source_span: Span::new(file_id, s..s + slice.len()),
                })
            }

        // Whitespace, including comments. We don't normally want whitespace to
        // show up as an "expected" token in error messages, so we carefully
        // enclose _most_ of this in `quiet!`. The exception is the closing "*/"
        // in a block comment, which we want to mention explicitly.

        /// Optional whitespace.
        rule _ = whitespace()?

        /// Mandatory whitespace.
        rule whitespace()
            = (whitespace_char() / line_comment() / block_comment())+

        rule whitespace_char() = quiet! { [' ' | '\t' | '\r' | '\n'] }
        rule line_comment() = quiet! { "--" (!['\n'][_])* ( "\n" / ![_] ) }
        rule block_comment() = quiet! { "/*"(!"*/"[_])* } "*/"

        /// Return both the value and slice matched by the rule. See
        /// https://github.com/kevinmehall/rust-peg/issues/283.
        rule with_slice<T>(r: rule<T>) -> (T, &'input str)
            = value:&r() input:$(r()) { (value, input) }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn tokenize(source: &str) -> TokenStream {
        let mut files = KnownFiles::new();
        let file_id = files.add_string("test.sql", source);
        match tokenize_plsql(&files, file_id) {
            Ok(tokens) => tokens,
            Err(err) => {
                err.emit(&files);
                panic!("failed to tokenize {:?}", source);
            }
        }
    }

    fn token_texts(source: &str) -> Vec<String> {
        tokenize(source)
            .tokens()
            .iter()
            .map(|t| t.raw().as_str().to_owned())
            .collect()
    }

    #[test]
    fn tokenize_fixture_files() {
        // Get the path to `tests/`.
        let tests_path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests");
        let tests_str = tests_path.to_str().expect("tests path is not valid UTF-8");

        // Use `glob` to find all the PL/SQL fixtures.
        let mut count = 0;
        for pattern in ["sql", "pks", "pkb"] {
            for entry in glob::glob(&format!("{}/**/*.{}", tests_str, pattern))
                .expect("failed to read glob pattern")
            {
                let path = entry.expect("failed to read glob entry");
                println!("Tokenizing {:?}", path);
                count += 1;

                let mut files = KnownFiles::new();
                let file_id = files.add(&path).expect("failed to read fixture");
                let tokens = match tokenize_plsql(&files, file_id) {
                    Ok(tokens) => tokens,
                    Err(err) => {
                        err.emit(&files);
                        panic!("failed to tokenize fixture");
                    }
                };

                // Reconstruct the original text from the tokens.
                let mut reconstructed = String::new();
                for token in tokens.tokens() {
                    reconstructed.push_str(token.raw().as_raw_str());
                }
                let source = files.source_code(file_id).expect("fixture source");
                assert_eq!(source, reconstructed, "failed to reproduce input text");
            }
        }
        assert!(count > 0, "no fixtures found");
    }

    #[test]
    fn range_operator_is_not_part_of_a_number() {
        assert_eq!(token_texts("FOR i IN 1..10"), vec!["FOR", "i", "IN", "1", "..", "10"]);
        assert_eq!(token_texts("x := 1.5;"), vec!["x", ":=", "1.5", ";"]);
    }

    #[test]
    fn strings_unescape_quotes() {
        let tokens = tokenize("'it''s' q'[don't]'");
        let values = tokens
            .tokens()
            .iter()
            .map(|t| match t {
                Token::Literal(l) => l.value.clone(),
                other => panic!("unexpected token {:?}", other),
            })
            .collect::<Vec<_>>();
        assert_eq!(
            values,
            vec![
                LiteralValue::String("it's".to_owned()),
                LiteralValue::String("don't".to_owned()),
            ]
        );
    }

    #[test]
    fn comments_attach_to_previous_token() {
        let tokens = tokenize("-- header\nBEGIN /* body */ NULL; END;");
        assert_eq!(tokens.tokens()[0].raw().as_raw_str(), "-- header\nBEGIN /* body */ ");
        assert_eq!(tokens.tokens().len(), 5);
    }

    #[test]
    fn multi_character_punctuation() {
        assert_eq!(
            token_texts("a := b || c ** 2 <> d => e <<lbl>> f%TYPE"),
            vec![
                "a", ":=", "b", "||", "c", "**", "2", "<>", "d", "=>", "e", "<<", "lbl", ">>",
                "f", "%", "TYPE"
            ]
        );
    }

    #[test]
    fn identifier_case_folding() {
        assert_eq!(fold_identifier("Counter", false), "counter");
        assert_eq!(fold_identifier("COUNTER", true), "counter");
        assert_eq!(fold_identifier("Counter", true), "Counter");
        let tokens = tokenize("v_Total \"v_Total\"");
        match (&tokens.tokens()[0], &tokens.tokens()[1]) {
            (Token::Ident(a), Token::Ident(b)) => {
                assert_eq!(a.canonical_name(), "v_total");
                assert_eq!(b.canonical_name(), "v_Total");
                assert!(b.quoted);
            }
            other => panic!("unexpected tokens {:?}", other),
        }
    }

    #[test]
    fn spans_cover_token_text_only() {
        let tokens = tokenize("x   := 1;");
        match tokens.tokens()[0].span() {
            Span::Known { start, end, .. } => assert_eq!((start, end), (0, 1)),
            Span::Unknown => panic!("token should have a span"),
        }
    }
}
