//! Quote-aware scanning over SQL text.
//!
//! Single-quoted literals (with `''` escapes) and double-quoted identifiers
//! are skipped, so parentheses and keywords inside them never count.

/// Byte offsets of characters that are outside any quoted section, with the
/// paren depth at that position (depth before an opening paren is applied).
fn unquoted_chars(sql: &str) -> Vec<(usize, char, usize)> {
    let mut out = Vec::with_capacity(sql.len());
    let mut depth = 0usize;
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = sql.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        if in_single {
            if ch == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    chars.next();
                } else {
                    in_single = false;
                }
            }
            continue;
        }
        if in_double {
            if ch == '"' {
                in_double = false;
            }
            continue;
        }
        match ch {
            '\'' => in_single = true,
            '"' => in_double = true,
            '(' => {
                out.push((index, ch, depth));
                depth += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                out.push((index, ch, depth));
            }
            _ => out.push((index, ch, depth)),
        }
    }
    out
}

/// Offset of the `)` matching the `(` at `open`.
pub(crate) fn matching_paren(sql: &str, open: usize) -> Option<usize> {
    if sql.as_bytes().get(open) != Some(&b'(') {
        return None;
    }
    let scanned = unquoted_chars(sql);
    let start = scanned.iter().position(|(index, _, _)| *index == open)?;
    let open_depth = scanned[start].2;
    scanned[start + 1..]
        .iter()
        .find(|(_, ch, depth)| *ch == ')' && *depth == open_depth)
        .map(|(index, _, _)| *index)
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Offsets of `keyword` (case-insensitive, whole word, outside quotes).
/// `top_level_only` restricts matches to paren depth zero.
pub(crate) fn find_keyword_positions(sql: &str, keyword: &str, top_level_only: bool) -> Vec<usize> {
    let bytes = sql.as_bytes();
    let keyword_len = keyword.len();
    let mut positions = Vec::new();
    for (index, _, depth) in unquoted_chars(sql) {
        if top_level_only && depth != 0 {
            continue;
        }
        let end = index + keyword_len;
        if end > bytes.len() || !sql.is_char_boundary(end) {
            continue;
        }
        if !sql[index..end].eq_ignore_ascii_case(keyword) {
            continue;
        }
        let before_ok = index == 0 || !is_word_byte(bytes[index - 1]);
        let after_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        if before_ok && after_ok {
            positions.push(index);
        }
    }
    positions
}

pub(crate) fn contains_keyword(sql: &str, keyword: &str) -> bool {
    !find_keyword_positions(sql, keyword, false).is_empty()
}

/// Splits on a top-level keyword such as `AND`, trimming each part.
pub(crate) fn split_top_level<'a>(sql: &'a str, keyword: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut cursor = 0;
    for position in find_keyword_positions(sql, keyword, true) {
        parts.push(sql[cursor..position].trim());
        cursor = position + keyword.len();
    }
    parts.push(sql[cursor..].trim());
    parts
}

/// Removes parentheses that wrap the whole expression, repeatedly.
pub(crate) fn strip_outer_parens(sql: &str) -> &str {
    let mut current = sql.trim();
    while current.starts_with('(') {
        match matching_paren(current, 0) {
            Some(close) if close == current.len() - 1 => {
                current = current[1..close].trim();
            }
            _ => break,
        }
    }
    current
}

/// Splits a list on commas at paren depth zero, outside quotes.
pub(crate) fn split_top_level_commas(sql: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut cursor = 0;
    for (index, ch, depth) in unquoted_chars(sql) {
        if ch == ',' && depth == 0 {
            parts.push(sql[cursor..index].trim());
            cursor = index + 1;
        }
    }
    parts.push(sql[cursor..].trim());
    parts
}

pub(crate) fn collapse_whitespace(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Count of unmatched closing parens outside quotes.
pub(crate) fn unbalanced_closing_parens(sql: &str) -> usize {
    let mut depth = 0isize;
    let mut unmatched = 0usize;
    for (_, ch, _) in unquoted_chars(sql) {
        match ch {
            '(' => depth += 1,
            ')' if depth == 0 => unmatched += 1,
            ')' => depth -= 1,
            _ => {}
        }
    }
    unmatched
}

/// Non-empty statements separated by `;` outside quotes.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut cursor = 0;
    for (index, ch, _) in unquoted_chars(sql) {
        if ch == ';' {
            statements.push(sql[cursor..index].trim());
            cursor = index + 1;
        }
    }
    statements.push(sql[cursor..].trim());
    statements.retain(|statement| !statement.is_empty());
    statements
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// Bare word or number, as written.
    Word(String),
    /// Double-quoted identifier with `""` unescaped.
    Quoted(String),
    /// Single-quoted string literal; its content is dropped.
    Literal,
    Symbol(char),
}

impl Token {
    pub(crate) fn identifier(&self) -> Option<&str> {
        match self {
            Token::Word(text) | Token::Quoted(text) => Some(text.as_str()),
            Token::Literal | Token::Symbol(_) => None,
        }
    }

    pub(crate) fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(word) if word.eq_ignore_ascii_case(keyword))
    }
}

pub(crate) fn tokenize(sql: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                while let Some(inner) = chars.next() {
                    if inner == '\'' {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                tokens.push(Token::Literal);
            }
            '"' => {
                let mut ident = String::new();
                while let Some(inner) = chars.next() {
                    if inner != '"' {
                        ident.push(inner);
                    } else if chars.peek() == Some(&'"') {
                        chars.next();
                        ident.push('"');
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Quoted(ident));
            }
            ch if ch.is_whitespace() => {}
            ch if ch.is_alphanumeric() || ch == '_' => {
                let mut word = String::from(ch);
                while let Some(&next) = chars.peek() {
                    if !(next.is_alphanumeric() || next == '_') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            other => tokens.push(Token::Symbol(other)),
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::{
        find_keyword_positions, matching_paren, split_statements, split_top_level,
        split_top_level_commas, strip_outer_parens, tokenize, unbalanced_closing_parens, Token,
    };

    #[test]
    fn matching_paren_skips_quoted_parens() {
        let sql = "(a = ')' AND \"b(\" > 1) OR c";
        assert_eq!(matching_paren(sql, 0), Some(21));
    }

    #[test]
    fn keywords_are_whole_words_outside_quotes() {
        let sql = "band = 'AND' AND \"AND\" = 1 AND (x AND y)";
        assert_eq!(find_keyword_positions(sql, "and", false).len(), 3);
        assert_eq!(find_keyword_positions(sql, "AND", true).len(), 2);
    }

    #[test]
    fn splits_and_strips() {
        assert_eq!(
            split_top_level("a = 1 AND (b = 2 AND c = 3)", "AND"),
            vec!["a = 1", "(b = 2 AND c = 3)"]
        );
        assert_eq!(strip_outer_parens("((a = 1))"), "a = 1");
        assert_eq!(strip_outer_parens("(a = 1) AND (b = 2)"), "(a = 1) AND (b = 2)");
    }

    #[test]
    fn splits_commas_outside_quotes_and_parens() {
        assert_eq!(
            split_top_level_commas("1, 'a,b', f(2, 3)"),
            vec!["1", "'a,b'", "f(2, 3)"]
        );
    }

    #[test]
    fn counts_unbalanced_closing_parens() {
        assert_eq!(unbalanced_closing_parens("a IN (1, 2))"), 1);
        assert_eq!(unbalanced_closing_parens("(a = ')')"), 0);
    }

    #[test]
    fn statements_split_outside_literals() {
        assert_eq!(split_statements("SELECT 'a;b' AS x"), vec!["SELECT 'a;b' AS x"]);
        assert_eq!(split_statements("SELECT 1;"), vec!["SELECT 1"]);
        assert_eq!(
            split_statements("CREATE TABLE t (x); INSERT INTO \"t;\" VALUES (1);"),
            vec!["CREATE TABLE t (x)", "INSERT INTO \"t;\" VALUES (1)"]
        );
    }

    #[test]
    fn tokens_keep_identifiers_and_drop_literal_text() {
        assert_eq!(
            tokenize("\"a\"\"b\".c = 'mv_x' OR n >= 1"),
            vec![
                Token::Quoted("a\"b".to_string()),
                Token::Symbol('.'),
                Token::Word("c".to_string()),
                Token::Symbol('='),
                Token::Literal,
                Token::Word("OR".to_string()),
                Token::Word("n".to_string()),
                Token::Symbol('>'),
                Token::Symbol('='),
                Token::Word("1".to_string()),
            ]
        );
    }
}
