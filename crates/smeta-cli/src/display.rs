//! Vertical card display for audit results and reference entries.
//!
//! Each card is grouped into sections; empty fields and empty sections are
//! skipped.

use smeta_core::{NormalizedTable, ReferenceEntry};
use smeta_pipeline::{DocumentReport, JobStatus, TableJobResult};

const MAX_LIST_ITEMS: usize = 10;

type Rows = Vec<(&'static str, String)>;

// ── Public API ──

/// Print every table result as a card, then the document summary.
pub fn print_report(report: &DocumentReport) {
    for result in &report.results {
        print_result_card(result);
    }
    println!("=== Summary ===");
    println!("  {:<26} {}", "tables_processed", report.tables_processed);
    println!("  {:<26} {}", "succeeded", report.succeeded);
    println!("  {:<26} {}", "approved", report.approved);
    println!("  {:<26} {}", "failed", report.failed);
    println!("  {:<26} {}", "cancelled", report.cancelled);
}

pub fn print_result_card(result: &TableJobResult) {
    let badge = match (&result.status, &result.output) {
        (JobStatus::Success, Some(o)) if o.verdict.is_approved => "APPROVED",
        (JobStatus::Success, _) => "REJECTED",
        (JobStatus::Failed, _) => "FAILED",
    };
    match result.page_number {
        Some(page) => println!("=== Table {} (page {page}) === {badge}", result.table_index),
        None => println!("=== Table {} === {badge}", result.table_index),
    }
    println!();

    if let Some(error) = &result.error {
        print_section(
            "Error",
            vec![
                ("stage", error.stage.as_str().to_string()),
                ("kind", error.kind.as_str().to_string()),
                ("message", error.message.clone()),
            ],
        );
        return;
    }
    let Some(output) = &result.output else {
        return;
    };

    let claim = &output.claim;
    print_section(
        "Claim",
        vec![
            ("text_description", claim.text_description().to_string()),
            ("table_code_claimed", claim.table_code_claimed().to_string()),
            ("position_number", opt(claim.position_number())),
            ("X_claimed", claim.x_claimed().to_string()),
            ("total_claimed", claim.total_claimed().to_string()),
            ("year", claim.year().to_string()),
            ("extracted_tags", list(claim.extracted_tags().iter())),
            (
                "defaulted_fields",
                list(claim.defaulted_fields().iter().map(|f| format!("{f:?}"))),
            ),
        ],
    );

    print_section("Reference", entry_rows(&output.reference_snapshot));

    if let Some(tb) = &output.tie_break {
        print_section(
            "Tie Break",
            vec![
                ("rule", format!("{:?}", tb.rule)),
                ("candidates", list(tb.candidates.iter())),
            ],
        );
    }

    let verdict = &output.verdict;
    let mut rows: Rows = vec![
        ("reason", verdict.reason.clone()),
        ("formula", verdict.formula.as_str().to_string()),
        ("base_cost", verdict.base_cost.to_string()),
        ("coefficient_product", verdict.coefficient_product.to_string()),
        ("calculated_total", verdict.calculated_total.round_dp(2).to_string()),
        ("total_claimed", claim.total_claimed().to_string()),
        ("deviation", opt(verdict.deviation)),
    ];
    for applied in &verdict.applied_coefficients {
        rows.push(("applied", format!("{} = {}", applied.id, applied.value)));
    }
    for unapplied in &verdict.unapplied_coefficients {
        rows.push((
            "unapplied",
            format!(
                "{} = {} ({})",
                unapplied.id,
                opt(unapplied.value),
                unapplied.reason.as_str()
            ),
        ));
    }
    for suggested in &output.suggested_coefficients {
        rows.push((
            "suggested",
            format!(
                "{} = {} (tag \"{}\" matches \"{}\")",
                suggested.id, suggested.value, suggested.tag, suggested.condition
            ),
        ));
    }
    print_section("Verdict", rows);
}

/// Print a single reference entry as a card.
pub fn print_entry_card(entry: &ReferenceEntry) {
    println!("=== {} ===", entry.entry_id);
    println!();
    print_section("Reference", entry_rows(entry));
    if !entry.valid_coefficients.is_empty() {
        println!("Allowed Coefficients");
        for c in entry.valid_coefficients.iter().take(MAX_LIST_ITEMS) {
            let label = format!("{} = {}", c.id, c.value);
            println!("  {:<26} {}", label, c.conditions.join("; "));
        }
        if entry.valid_coefficients.len() > MAX_LIST_ITEMS {
            println!(
                "  {:<26} ... and {} more",
                "",
                entry.valid_coefficients.len() - MAX_LIST_ITEMS
            );
        }
        println!();
    }
}

pub fn print_normalized(table: &NormalizedTable) {
    println!("=== Table {} ===", table.table_index);
    println!();
    print_section(
        "Normalized",
        vec![
            ("page_number", opt(table.page_number)),
            ("code_candidates", list(table.code_candidates.iter())),
            ("numeric_tokens", list(table.numeric_tokens.iter())),
            ("canonical_text", table.canonical_text.clone()),
        ],
    );
}

// ── Section rendering ──

fn entry_rows(entry: &ReferenceEntry) -> Rows {
    vec![
        ("entry_id", entry.entry_id.clone()),
        ("code", entry.code.clone()),
        ("position_id", opt(entry.position_id.as_deref())),
        (
            "year_range",
            format!("{}..={}", entry.year_range.from, entry.year_range.to),
        ),
        ("effective_from", entry.effective_from.to_string()),
        ("ref_A", entry.ref_a.to_string()),
        ("ref_B", entry.ref_b.to_string()),
        (
            "x_range",
            entry
                .x_range
                .map(|r| format!("{}..={}", r.min, r.max))
                .unwrap_or_default(),
        ),
    ]
}

fn print_section(header: &str, rows: Rows) {
    if rows.iter().all(|(_, value)| value.is_empty()) {
        return;
    }
    println!("{header}");
    for (label, value) in rows {
        if value.is_empty() {
            continue;
        }
        println!("  {:<26} {}", label, value);
    }
    println!();
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn list<T: ToString>(items: impl Iterator<Item = T>) -> String {
    let items: Vec<String> = items.map(|i| i.to_string()).collect();
    if items.len() > MAX_LIST_ITEMS {
        format!(
            "{} ... and {} more",
            items[..MAX_LIST_ITEMS].join(", "),
            items.len() - MAX_LIST_ITEMS
        )
    } else {
        items.join(", ")
    }
}
