//! Session report rendering

use crate::crawler::SessionReport;

/// Renders a finished session as plain text
pub fn format_report(report: &SessionReport) -> String {
    let totals = &report.totals;
    let mut out = String::from("=== Crawl Session ===\n\n");

    out.push_str(&format!("Run: {}\n", report.run_id));
    out.push_str(&format!("Website: {} ({})\n", report.website, report.mode));
    out.push_str(&format!("Stopped: {}\n", report.stop_reason));
    out.push_str(&format!("Duration: {:.1}s\n\n", report.elapsed.as_secs_f64()));

    out.push_str("Listing pages:\n");
    out.push_str(&format!("  Last page: {}\n", report.last_page));
    out.push_str(&format!("  Fetched: {}\n", totals.pages_fetched));
    out.push_str(&format!("  Skipped: {}\n", totals.pages_skipped));
    out.push_str(&format!(
        "  Ads listed: {} ({} new, {} known beforehand)\n\n",
        totals.items_listed, totals.new_items, report.seeded_ids
    ));

    out.push_str("Records:\n");
    out.push_str(&format!("  Saved: {}\n", totals.records_saved));
    out.push_str(&format!("  Dropped: {}\n", totals.records_dropped));
    out.push_str(&format!("  Abandoned after retries: {}\n", totals.details_abandoned));
    if report.records_failed > 0 {
        out.push_str(&format!("  Lost to write errors: {}\n", report.records_failed));
    }
    out.push_str(&format!("  Retries: {}\n", totals.retries));

    if report.proxies.total > 0 {
        out.push_str(&format!(
            "\nProxies: {} active, {} blacklisted (generation {})\n",
            report.proxies.active, report.proxies.blacklisted, report.proxies.generation
        ));
    }

    out
}

/// Prints a session report to stdout
pub fn print_report(report: &SessionReport) {
    print!("{}", format_report(report));
}
