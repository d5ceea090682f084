//! Normalisation of extracted tables into one canonical text block.
//!
//! The table extractor hands over raw cell grids where a single logical row
//! is often wrapped across several physical rows, cells carry `\r` line
//! breaks, and numbers use Kazakh/Russian conventions.
//!
//! # Number conventions
//!
//! - Decimal comma: `4675,08` is 4675.08
//! - Space thousands groups (also NBSP / narrow NBSP): `52 690 700`, `4 675,08`
//! - Mixed separators: the last one is the decimal mark, so `1.234.567,89`
//!   and `1,234,567.89` both read as 1234567.89
//! - Hyphenated runs (`1706-0201-01`) are price-book codes, not numbers
//! - Digits glued to a letter (`м2`, `K3`) are units or identifiers

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

use crate::error::InputError;
use crate::payload::{NormalizedTable, RawTablePayload};

static CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:[-\u{2010}\u{2011}\u{2013}\u{2014}]\d+)+").expect("valid regex"));

/// Digit runs separated by single (possibly non-breaking) spaces; split into
/// numbers by [`group_runs`].
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+(?:[.,]\d+)*(?:[ \u{00A0}\u{202F}]\d+(?:[.,]\d+)*)*").expect("valid regex")
});

const GROUP_SPACES: [char; 3] = [' ', '\u{00A0}', '\u{202F}'];

/// Cell values the table extractor emits for empty cells.
const EMPTY_MARKERS: &[&str] = &["nan", "NaN", "None", "null"];

/// Flatten one table payload into canonical text and numeric tokens.
///
/// Fails only when the payload has no textual content at all.
pub fn normalize_table(payload: &RawTablePayload) -> Result<NormalizedTable, InputError> {
    let no_text = || InputError::NoText {
        table_index: payload.table_index,
    };

    if let Some(raw) = payload.raw_text.as_deref()
        && !raw.trim().is_empty()
    {
        let (canonical_text, numeric_tokens, code_candidates) = scan_block(raw);
        return Ok(NormalizedTable {
            table_index: payload.table_index,
            page_number: payload.page_number,
            canonical_text,
            numeric_tokens,
            code_candidates,
        });
    }

    let rows = merge_wrapped_rows(&payload.cells);
    if rows.is_empty() {
        return Err(no_text());
    }

    let mut rendered = Vec::with_capacity(rows.len());
    let mut numeric_tokens = Vec::new();
    let mut code_candidates = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        let row_text = row
            .iter()
            .filter(|c| !c.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        // Tokens are taken from the row body so the "n." prefix never counts.
        let (body, tokens, codes) = scan_block(&row_text);
        numeric_tokens.extend(tokens);
        for code in codes {
            if !code_candidates.contains(&code) {
                code_candidates.push(code);
            }
        }
        rendered.push(format!("{}. {}", idx + 1, body));
    }

    Ok(NormalizedTable {
        table_index: payload.table_index,
        page_number: payload.page_number,
        canonical_text: rendered.join(" "),
        numeric_tokens,
        code_candidates,
    })
}

/// Canonicalise a free text block and return it with its numeric tokens.
pub fn normalize_text(text: &str) -> Result<(String, Vec<Decimal>), InputError> {
    if text.trim().is_empty() {
        return Err(InputError::EmptyText);
    }
    let (canonical, tokens, _) = scan_block(text);
    Ok((canonical, tokens))
}

/// All numeric tokens in `text`, in reading order.
pub fn numeric_tokens(text: &str) -> Vec<Decimal> {
    let blanked = CODE_RE.replace_all(text, |caps: &regex::Captures<'_>| " ".repeat(caps[0].len()));
    let mut tokens = Vec::new();
    for m in NUMBER_RE.find_iter(&blanked) {
        let mut runs: Vec<&str> = m.as_str().split(GROUP_SPACES).collect();
        let glued_to_letter = blanked[..m.start()]
            .chars()
            .next_back()
            .is_some_and(char::is_alphabetic);
        if glued_to_letter {
            runs.remove(0);
        }
        tokens.extend(group_runs(&runs).iter().filter_map(|n| parse_token(n)));
    }
    tokens
}

/// Join space-separated digit runs into numbers.
///
/// A run continues the previous number only when that number started with
/// 1-3 digits, has had no decimal mark yet, and the run's integer part is
/// exactly three digits. `52 690 700` is one number, `1 12` is two.
fn group_runs(runs: &[&str]) -> Vec<String> {
    let mut numbers: Vec<String> = Vec::new();
    let mut open = false;
    for run in runs {
        let lead = run.find(['.', ',']).unwrap_or(run.len());
        match numbers.last_mut() {
            Some(last) if open && lead == 3 => {
                last.push_str(run);
                open = lead == run.len();
            }
            _ => {
                open = lead == run.len() && (1..=3).contains(&run.len());
                numbers.push(run.to_string());
            }
        }
    }
    numbers
}

/// Parse a string holding exactly one number, e.g. `"52 690 700 тенге"`.
///
/// Returns `None` when the string holds no number or several.
pub fn parse_number(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    let tokens = numeric_tokens(trimmed);
    match tokens.as_slice() {
        [value] if trimmed.starts_with('-') => Some(-*value),
        [value] => Some(*value),
        _ => None,
    }
}

/// Hyphenated code-like runs, dashes unified to `-`.
pub fn code_candidates(text: &str) -> Vec<String> {
    CODE_RE
        .find_iter(text)
        .map(|m| unify_dashes(m.as_str()))
        .collect()
}

/// Reduce a claimed table code such as `"табл. 1706–0201–01"` to the bare
/// price-book code. Text without a code-like run is only whitespace-collapsed.
pub fn normalize_code(raw: &str) -> String {
    match code_candidates(raw).into_iter().next() {
        Some(code) => code,
        None => collapse_whitespace(raw),
    }
}

fn unify_dashes(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{2010}' | '\u{2011}' | '\u{2013}' | '\u{2014}' => '-',
            other => other,
        })
        .collect()
}

fn scan_block(text: &str) -> (String, Vec<Decimal>, Vec<String>) {
    let canonical = collapse_whitespace(text);
    let tokens = numeric_tokens(&canonical);
    let codes = code_candidates(&canonical);
    (canonical, tokens, codes)
}

/// Trim and collapse `\r`, `\n` and runs of whitespace to single spaces.
///
/// NBSP between digits is kept so thousands groups still parse.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        let is_group_space = c == '\u{00A0}' || c == '\u{202F}';
        if c.is_whitespace() && !is_group_space {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }
    out
}

fn clean_cell(cell: &str) -> String {
    let collapsed = collapse_whitespace(cell);
    if EMPTY_MARKERS.contains(&collapsed.as_str()) {
        String::new()
    } else {
        collapsed
    }
}

/// Fold continuation rows into the logical row above them.
///
/// A row whose first column is empty continues the previous row: its cells
/// are appended column by column. Fully empty rows are dropped.
fn merge_wrapped_rows(rows: &[Vec<String>]) -> Vec<Vec<String>> {
    let mut logical: Vec<Vec<String>> = Vec::new();

    for row in rows {
        let cleaned: Vec<String> = row.iter().map(|c| clean_cell(c)).collect();
        if cleaned.iter().all(String::is_empty) {
            continue;
        }

        let continues_previous = cleaned.first().is_some_and(String::is_empty);
        match logical.last_mut() {
            Some(previous) if continues_previous => {
                for (col, cell) in cleaned.into_iter().enumerate() {
                    if cell.is_empty() {
                        continue;
                    }
                    if previous.len() <= col {
                        previous.resize(col + 1, String::new());
                    }
                    let target = &mut previous[col];
                    if !target.is_empty() {
                        target.push(' ');
                    }
                    target.push_str(&cell);
                }
            }
            _ => logical.push(cleaned),
        }
    }

    logical
}

/// Parse one regex match into a decimal, resolving which separator is the
/// decimal mark.
fn parse_token(raw: &str) -> Option<Decimal> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{00A0}' | '\u{202F}'))
        .collect();

    let commas = compact.matches(',').count();
    let dots = compact.matches('.').count();

    let canonical = match (commas, dots) {
        (0, 0) => compact,
        (_, 0) | (0, _) => {
            let sep = if commas > 0 { ',' } else { '.' };
            if commas + dots == 1 {
                compact.replace(sep, ".")
            } else if thousands_grouped(&compact, sep) {
                compact.replace(sep, "")
            } else {
                return None;
            }
        }
        _ => {
            // Both present: the last one is the decimal mark.
            let last_comma = compact.rfind(',')?;
            let last_dot = compact.rfind('.')?;
            let (decimal, thousands, decimal_count) = if last_comma > last_dot {
                (',', '.', commas)
            } else {
                ('.', ',', dots)
            };
            if decimal_count != 1 {
                return None;
            }
            compact.replace(thousands, "").replace(decimal, ".")
        }
    };

    Decimal::from_str(&canonical).ok()
}

/// True when every group after the first has exactly three digits.
fn thousands_grouped(s: &str, sep: char) -> bool {
    let mut groups = s.split(sep);
    let first_ok = groups.next().is_some_and(|g| (1..=3).contains(&g.len()));
    first_ok && groups.all(|g| g.len() == 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn decimal_comma_and_space_thousands() {
        let tokens = numeric_tokens("м2 4675,08 стоимость 52 690 700 тенге");
        assert_eq!(tokens, vec![d("4675.08"), d("52690700")]);
    }

    #[test]
    fn grouped_decimal() {
        assert_eq!(numeric_tokens("4 675,08"), vec![d("4675.08")]);
        assert_eq!(numeric_tokens("52\u{00A0}690\u{00A0}700"), vec![d("52690700")]);
    }

    #[test]
    fn mixed_separators() {
        assert_eq!(numeric_tokens("1.234.567,89"), vec![d("1234567.89")]);
        assert_eq!(numeric_tokens("1,234,567.89"), vec![d("1234567.89")]);
    }

    #[test]
    fn codes_are_not_numbers() {
        let text = "Сборник цен табл. 1706-0201-01 поз.7";
        assert_eq!(numeric_tokens(text), vec![d("7")]);
        assert_eq!(code_candidates(text), vec!["1706-0201-01".to_string()]);
    }

    #[test]
    fn en_dash_codes_are_unified() {
        assert_eq!(code_candidates("табл. 1706–0201–01"), vec!["1706-0201-01".to_string()]);
    }

    #[test]
    fn claimed_code_is_reduced_to_bare_code() {
        assert_eq!(normalize_code("табл. 1706–0201–01 поз. 7"), "1706-0201-01");
        assert_eq!(normalize_code("  СЦП\n 17 "), "СЦП 17");
    }

    #[test]
    fn unit_suffix_digits_are_skipped() {
        assert_eq!(numeric_tokens("м2 K3 12 этажей"), vec![d("12")]);
    }

    #[test]
    fn four_digit_years_do_not_group() {
        assert_eq!(numeric_tokens("2024 100"), vec![d("2024"), d("100")]);
    }

    #[test]
    fn parse_number_single_value_only() {
        assert_eq!(parse_number("52 690 700 тенге"), Some(d("52690700")));
        assert_eq!(parse_number("  4675,08 "), Some(d("4675.08")));
        assert_eq!(parse_number("-1,5"), Some(d("-1.5")));
        assert_eq!(parse_number("четыре"), None);
        assert_eq!(parse_number("1 и 2"), None);
    }

    #[test]
    fn wrapped_rows_merge_into_one_logical_row() {
        let payload = RawTablePayload::from_cells(
            1,
            Some(3),
            vec![
                row(&["1", "Жилой дом Секция 1", "м2", "4 675,08"]),
                row(&["", "12 этажей", "", ""]),
                row(&["nan", "", "", ""]),
                row(&["2", "Сейсмичность 7 баллов", "", "52 690 700"]),
            ],
        );
        let table = normalize_table(&payload).unwrap();
        assert_eq!(
            table.canonical_text,
            "1. 1 Жилой дом Секция 1 12 этажей м2 4 675,08 2. 2 Сейсмичность 7 баллов 52 690 700"
        );
        assert_eq!(table.page_number, Some(3));
        assert!(table.numeric_tokens.contains(&d("4675.08")));
        assert!(table.numeric_tokens.contains(&d("52690700")));
    }

    #[test]
    fn carriage_returns_inside_cells_collapse() {
        let payload = RawTablePayload::from_cells(
            0,
            None,
            vec![row(&["7", "Жилой\rдом\n  Секция 1", "  табл.\r1706-0201-01"])],
        );
        let table = normalize_table(&payload).unwrap();
        assert_eq!(table.canonical_text, "1. 7 Жилой дом Секция 1 табл. 1706-0201-01");
        assert_eq!(table.code_candidates, vec!["1706-0201-01".to_string()]);
    }

    #[test]
    fn raw_text_payload_is_used_verbatim() {
        let payload = RawTablePayload::from_text(
            4,
            "Жилой дом  м2 4675,08\nтабл. 1706-0201-01 стоимость 52690700 тенге",
        );
        let table = normalize_table(&payload).unwrap();
        assert_eq!(
            table.canonical_text,
            "Жилой дом м2 4675,08 табл. 1706-0201-01 стоимость 52690700 тенге"
        );
        assert_eq!(table.numeric_tokens, vec![d("4675.08"), d("52690700")]);
    }

    #[test]
    fn empty_payload_is_input_error() {
        let payload = RawTablePayload::from_cells(9, None, vec![row(&["", " ", "nan"])]);
        assert_eq!(
            normalize_table(&payload),
            Err(InputError::NoText { table_index: 9 })
        );
        assert_eq!(normalize_text(" \n "), Err(InputError::EmptyText));
    }

    #[test]
    fn normalize_text_collapses_and_tokenizes() {
        let (canonical, tokens) = normalize_text("a\r\n 4675,08\t b").unwrap();
        assert_eq!(canonical, "a 4675,08 b");
        assert_eq!(tokens, vec![d("4675.08")]);
    }
}
