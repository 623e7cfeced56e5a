//! Translation of QGIS field expressions (as used for dynamic buffer
//! distances) into PostGIS SQL.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::layer::FieldInfo;
use crate::sql::scan::{find_keyword_positions, matching_paren, split_top_level_commas};

fn geometry_variable_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\$(area|length|perimeter|x|y|geometry)\b")
            .expect("geometry variable regex is valid")
    })
}

fn function_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(^|[^A-Za-z0-9_.])(area|perimeter|centroid|buffer|to_real|to_int)\s*\(")
            .expect("function regex is valid")
    })
}

fn numeric_comparison_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""([^"]+)"(\s*)(<=|>=|<>|!=|=|<|>)(\s*)(-?\d+(?:\.\d+)?)\b"#)
            .expect("numeric comparison regex is valid")
    })
}

fn text_comparison_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""([^"]+)"(\s*)(<>|!=|=)(\s*)'"#).expect("text comparison regex is valid")
    })
}

/// Translates `expression`. Field references are qualified with
/// `qualifier` when given; `geometry` is the SQL for the feature geometry.
pub fn qgis_to_postgis(
    expression: &str,
    qualifier: Option<&str>,
    geometry: &str,
    fields: &[FieldInfo],
) -> String {
    let translated = translate_conditionals(expression.trim());
    let translated = geometry_variable_regex().replace_all(&translated, |captures: &Captures| {
        match captures[1].to_ascii_lowercase().as_str() {
            "area" => format!("ST_Area({geometry})"),
            "length" => format!("ST_Length({geometry})"),
            "perimeter" => format!("ST_Perimeter({geometry})"),
            "x" => format!("ST_X(ST_Centroid({geometry}))"),
            "y" => format!("ST_Y(ST_Centroid({geometry}))"),
            _ => geometry.to_string(),
        }
    });
    let translated = translate_functions(&translated);
    let translated = inject_casts(&translated, fields);
    match qualifier {
        Some(qualifier) => qualify_fields(&translated, qualifier),
        None => translated,
    }
}

/// `if(cond, a, b)` becomes `CASE WHEN cond THEN a ELSE b END`.
fn translate_conditionals(expression: &str) -> String {
    for position in find_keyword_positions(expression, "if", false) {
        let after = position + 2;
        let rest = &expression[after..];
        let open = after + (rest.len() - rest.trim_start().len());
        if expression.as_bytes().get(open) != Some(&b'(') {
            continue;
        }
        let Some(close) = matching_paren(expression, open) else {
            continue;
        };
        let args: Vec<String> = split_top_level_commas(&expression[open + 1..close])
            .into_iter()
            .map(translate_conditionals)
            .collect();
        let case = match args.as_slice() {
            [condition, then] => format!("CASE WHEN {condition} THEN {then} END"),
            [condition, then, otherwise] => {
                format!("CASE WHEN {condition} THEN {then} ELSE {otherwise} END")
            }
            _ => continue,
        };
        let tail = translate_conditionals(&expression[close + 1..]);
        return format!("{}{case}{tail}", &expression[..position]);
    }
    expression.to_string()
}

fn translate_functions(expression: &str) -> String {
    function_regex()
        .replace_all(expression, |captures: &Captures| {
            let function = match captures[2].to_ascii_lowercase().as_str() {
                "area" => "ST_Area(",
                "perimeter" => "ST_Perimeter(",
                "centroid" => "ST_Centroid(",
                "buffer" => "ST_Buffer(",
                "to_int" => "trunc(",
                _ => "(0.0 + ",
            };
            format!("{}{function}", &captures[1])
        })
        .into_owned()
}

fn field_kind<'a>(fields: &'a [FieldInfo], name: &str) -> Option<&'a FieldInfo> {
    fields
        .iter()
        .find(|field| field.name.eq_ignore_ascii_case(name))
}

/// Text columns compared to numbers get `::numeric`, numeric columns
/// compared to string literals get `::text`.
fn inject_casts(expression: &str, fields: &[FieldInfo]) -> String {
    if fields.is_empty() {
        return expression.to_string();
    }
    let numeric = numeric_comparison_regex().replace_all(expression, |captures: &Captures| {
        let column = &captures[1];
        let cast = field_kind(fields, column).is_some_and(|field| field.kind.is_textual());
        format!(
            "\"{column}\"{}{}{}{}{}",
            if cast { "::numeric" } else { "" },
            &captures[2],
            &captures[3],
            &captures[4],
            &captures[5]
        )
    });
    text_comparison_regex()
        .replace_all(&numeric, |captures: &Captures| {
            let column = &captures[1];
            let cast = field_kind(fields, column).is_some_and(|field| field.kind.is_numeric());
            format!(
                "\"{column}\"{}{}{}{}'",
                if cast { "::text" } else { "" },
                &captures[2],
                &captures[3],
                &captures[4]
            )
        })
        .into_owned()
}

/// Prefixes bare `"field"` references with `qualifier.`, outside string
/// literals and leaving already-qualified references alone.
fn qualify_fields(expression: &str, qualifier: &str) -> String {
    let mut out = String::with_capacity(expression.len() + 16);
    let mut chars = expression.char_indices().peekable();
    let mut in_single = false;
    while let Some((index, ch)) = chars.next() {
        if in_single {
            out.push(ch);
            if ch == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                } else {
                    in_single = false;
                }
            }
            continue;
        }
        match ch {
            '\'' => {
                in_single = true;
                out.push(ch);
            }
            '"' => {
                let Some(length) = expression[index + 1..].find('"') else {
                    out.push_str(&expression[index..]);
                    break;
                };
                let end = index + 1 + length;
                let identifier = &expression[index..=end];
                let qualified_before = expression[..index].trim_end().ends_with('.');
                let qualified_after = expression[end + 1..].trim_start().starts_with('.');
                if !qualified_before && !qualified_after {
                    out.push_str(qualifier);
                    out.push('.');
                }
                out.push_str(identifier);
                while chars.peek().is_some_and(|(next, _)| *next <= end) {
                    chars.next();
                }
            }
            _ => out.push(ch),
        }
    }
    out
}
