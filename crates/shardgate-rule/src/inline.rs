//! Inline expressions
//!
//! Inline expressions describe lists of names compactly:
//!
//! - `ds_${0..2}` expands a numeric range: `ds_0, ds_1, ds_2`
//! - `t_${['a', 'b']}` expands a list: `t_a, t_b`
//! - `$->{...}` is accepted as an alternative placeholder opener
//! - several placeholders in one segment expand as a cartesian product
//! - top-level commas separate independent segments
//!
//! `pr_ds.table_${0..1}` therefore yields `pr_ds.table_0, pr_ds.table_1`.
//!
//! An expression expands to at most [`MAX_EXPANSION`] values; larger
//! ranges or products are rejected as invalid.

use shardgate_common::{Error, Result};

/// Upper bound on the number of values one expression may expand to
pub const MAX_EXPANSION: usize = 65_536;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Choices(Vec<String>),
}

fn invalid(expression: &str, reason: impl Into<String>) -> Error {
    Error::InvalidInlineExpression {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

/// Expand an inline expression into its list of values
pub fn expand(expression: &str) -> Result<Vec<String>> {
    let mut result = Vec::new();
    for segment in split_top_level(expression)? {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let parts = parse_segment(expression, segment)?;
        let size = product_size(&parts)
            .and_then(|size| size.checked_add(result.len()))
            .filter(|total| *total <= MAX_EXPANSION)
            .ok_or_else(|| too_large(expression))?;
        result.reserve(size - result.len());
        result.extend(cartesian(&parts));
    }
    if result.is_empty() {
        return Err(invalid(expression, "expression expands to nothing"));
    }
    Ok(result)
}

fn split_top_level(expression: &str) -> Result<Vec<&str>> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in expression.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(expression, "unbalanced '}'"))?;
            }
            ',' if depth == 0 => {
                segments.push(&expression[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(invalid(expression, "unclosed placeholder"));
    }
    segments.push(&expression[start..]);
    Ok(segments)
}

fn parse_segment(expression: &str, segment: &str) -> Result<Vec<Part>> {
    let mut parts = Vec::new();
    let mut rest = segment;
    while let Some((prefix, open_len)) = find_placeholder(rest) {
        if prefix > 0 {
            parts.push(Part::Literal(rest[..prefix].to_string()));
        }
        let body_start = prefix + open_len;
        let close = rest[body_start..]
            .find('}')
            .ok_or_else(|| invalid(expression, "unclosed placeholder"))?;
        let body = &rest[body_start..body_start + close];
        parts.push(Part::Choices(parse_placeholder(expression, body)?));
        rest = &rest[body_start + close + 1..];
    }
    if !rest.is_empty() {
        parts.push(Part::Literal(rest.to_string()));
    }
    Ok(parts)
}

/// Offset of the next placeholder and the length of its opener
fn find_placeholder(s: &str) -> Option<(usize, usize)> {
    let dollar = s.find("${");
    let arrow = s.find("$->{");
    match (dollar, arrow) {
        (Some(d), Some(a)) if a < d => Some((a, 4)),
        (Some(d), _) => Some((d, 2)),
        (None, Some(a)) => Some((a, 4)),
        (None, None) => None,
    }
}

fn parse_placeholder(expression: &str, body: &str) -> Result<Vec<String>> {
    let body = body.trim();
    if let Some(list) = body.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
        let values: Vec<String> = list
            .split(',')
            .map(|v| v.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            return Err(invalid(expression, "empty list placeholder"));
        }
        return Ok(values);
    }
    if let Some((lower, upper)) = body.split_once("..") {
        let lower: i64 = lower
            .trim()
            .parse()
            .map_err(|_| invalid(expression, format!("range bound is not an integer: {lower}")))?;
        let upper: i64 = upper
            .trim()
            .parse()
            .map_err(|_| invalid(expression, format!("range bound is not an integer: {upper}")))?;
        if lower > upper {
            return Err(invalid(expression, format!("empty range {lower}..{upper}")));
        }
        let len = upper
            .checked_sub(lower)
            .and_then(|span| usize::try_from(span).ok())
            .and_then(|span| span.checked_add(1))
            .filter(|len| *len <= MAX_EXPANSION);
        if len.is_none() {
            return Err(too_large(expression));
        }
        return Ok((lower..=upper).map(|i| i.to_string()).collect());
    }
    if body.is_empty() {
        return Err(invalid(expression, "empty placeholder"));
    }
    Ok(vec![body.to_string()])
}

fn too_large(expression: &str) -> Error {
    invalid(expression, format!("expands to more than {MAX_EXPANSION} values"))
}

/// Number of values `parts` expand to, `None` on overflow
fn product_size(parts: &[Part]) -> Option<usize> {
    parts.iter().try_fold(1usize, |size, part| match part {
        Part::Literal(_) => Some(size),
        Part::Choices(choices) => size.checked_mul(choices.len()),
    })
}

fn cartesian(parts: &[Part]) -> Vec<String> {
    let mut acc = vec![String::new()];
    for part in parts {
        acc = match part {
            Part::Literal(lit) => acc.into_iter().map(|mut s| {
                s.push_str(lit);
                s
            }).collect(),
            Part::Choices(choices) => acc
                .iter()
                .flat_map(|prefix| choices.iter().map(move |c| format!("{prefix}{c}")))
                .collect(),
        };
    }
    acc
}
