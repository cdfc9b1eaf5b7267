//! Renders a batch of execution reports into a human-readable alert
//! message — no `Debug`/`derive` artifacts, just text an operator reads.

use std::fmt::Write as _;

use crate::model::{ExecutionReport, ReportStatus};

pub fn format_alert(reports: &[ExecutionReport]) -> String {
    let total = reports.len();
    let filled = reports
        .iter()
        .filter(|r| r.status() == ReportStatus::Filled)
        .count();
    let timed_out = reports.iter().filter(|r| r.timed_out()).count();
    let rejected = reports
        .iter()
        .filter(|r| r.status() == ReportStatus::Rejected)
        .count();

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{filled}/{total} filled ({timed_out} timed out, {rejected} rejected)"
    );

    for report in reports {
        match report.status() {
            ReportStatus::Filled => {
                let marker = if report.timed_out() { " (after maker timeout)" } else { "" };
                let _ = writeln!(
                    out,
                    "{}@{} {:.2} {}ms{marker}",
                    report.symbol(),
                    report.exchange_id(),
                    report.fill_price().unwrap_or(0.0),
                    report.latency_ms()
                );
            }
            ReportStatus::Failed => {
                if report.reason() == Some("exchange_not_found") {
                    let _ = writeln!(
                        out,
                        "orphaned {}@{} — no session for this exchange",
                        report.symbol(),
                        report.exchange_id()
                    );
                } else {
                    let marker = if report.timed_out() { " (after maker timeout)" } else { "" };
                    let _ = writeln!(
                        out,
                        "failed {}@{}: {}{marker}",
                        report.symbol(),
                        report.exchange_id(),
                        report.reason().unwrap_or("unknown error")
                    );
                }
            }
            ReportStatus::Rejected => {
                let _ = writeln!(
                    out,
                    "rejected {}@{}: {}",
                    report.symbol(),
                    report.exchange_id(),
                    report.reason().unwrap_or("rejected")
                );
            }
            ReportStatus::Cancelled => {
                let _ = writeln!(out, "cancelled {}@{}", report.symbol(), report.exchange_id());
            }
            ReportStatus::PartiallyFilled => {
                let _ = writeln!(
                    out,
                    "partial {}@{}: {}/{}",
                    report.symbol(),
                    report.exchange_id(),
                    report.filled_amount(),
                    report.requested_amount()
                );
            }
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Side;

    #[test]
    fn formats_filled_and_orphaned_lines() {
        let filled = ExecutionReport::builder()
            .order_id("o1")
            .symbol("BTC/USDT")
            .exchange_id("bybit")
            .side(Side::Buy)
            .status(ReportStatus::Filled)
            .requested_amount(0.1)
            .filled_amount(0.1)
            .fill_price(43200.0)
            .latency_ms(120)
            .build()
            .unwrap();

        let orphaned = ExecutionReport::builder()
            .order_id("o2")
            .symbol("BTC/USDT")
            .exchange_id("kucoin")
            .side(Side::Buy)
            .status(ReportStatus::Failed)
            .requested_amount(0.1)
            .filled_amount(0.0)
            .latency_ms(0)
            .reason("exchange_not_found")
            .build()
            .unwrap();

        let text = format_alert(&[filled, orphaned]);
        assert!(text.contains("1/2 filled"));
        assert!(text.contains("BTC/USDT@bybit 43200.00 120ms"));
        assert!(text.contains("orphaned BTC/USDT@kucoin"));
        assert!(!text.contains('{'));
    }
}
