use crate::analysis::{DashboardRun, Pipeline, Selection, TickerReport, TickerSection};
use crate::storage_utils::AppConfig;
use anyhow::Result;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};
use tracing::info;

const COMBINED_TAIL_ROWS: usize = 10;

/// `1234567` -> `1,234,567`
pub fn format_volume(volume: u64) -> String {
    let digits = volume.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn format_optional(value: Option<f64>, suffix: &str) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}{}", v, suffix))
}

fn change_color(pct: f64) -> Color {
    if pct > 0.0 {
        Color::Green
    } else if pct < 0.0 {
        Color::Red
    } else {
        Color::DarkGrey
    }
}

fn styled_table(header: Vec<Cell>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn bold(text: &str) -> Cell {
    Cell::new(text).add_attribute(Attribute::Bold)
}

fn summary_row(report: &TickerReport) -> Vec<Cell> {
    let snap = &report.analytics.snapshot;
    let metrics = &report.analytics.metrics;
    let last_signal = report
        .analytics
        .signals
        .last()
        .map_or_else(|| "-".to_string(), |s| s.date.to_string());

    vec![
        Cell::new(&report.ticker).fg(Color::Cyan),
        Cell::new(format!("${:.2}", snap.last_close)).set_alignment(CellAlignment::Right),
        Cell::new(format!("{:.2}%", snap.pct_change))
            .fg(change_color(snap.pct_change))
            .set_alignment(CellAlignment::Right),
        Cell::new(format_volume(snap.latest_volume)).set_alignment(CellAlignment::Right),
        Cell::new(format_optional(metrics.latest_ma20(), "")).set_alignment(CellAlignment::Right),
        Cell::new(format_optional(metrics.latest_ma50(), "")).set_alignment(CellAlignment::Right),
        Cell::new(format_optional(metrics.latest_volatility().map(|v| v * 100.0), "%"))
            .set_alignment(CellAlignment::Right),
        Cell::new(report.analytics.signals.len()).set_alignment(CellAlignment::Right),
        Cell::new(last_signal).fg(Color::Green),
    ]
}

/// Per-ticker summary of a finished run.
pub fn summary_table(run: &DashboardRun) -> Table {
    let mut table = styled_table(vec![
        bold("Ticker"),
        bold("Last Close").set_alignment(CellAlignment::Right),
        bold("Change").set_alignment(CellAlignment::Right),
        bold("Volume").set_alignment(CellAlignment::Right),
        bold("MA20").set_alignment(CellAlignment::Right),
        bold("MA50").set_alignment(CellAlignment::Right),
        bold("Volatility").set_alignment(CellAlignment::Right),
        bold("Buy Signals").set_alignment(CellAlignment::Right),
        bold("Last Signal"),
    ]);

    for section in &run.sections {
        if let TickerSection::Ready(report) = section {
            table.add_row(summary_row(report));
        }
    }
    table
}

/// Latest rows of the date-aligned close table, `-` marking gaps.
pub fn combined_table(run: &DashboardRun) -> Table {
    let mut header = vec![bold("Date")];
    header.extend(
        run.combined
            .tickers()
            .iter()
            .map(|t| bold(t).set_alignment(CellAlignment::Right)),
    );
    let mut table = styled_table(header);

    for (date, closes) in run.combined.tail(COMBINED_TAIL_ROWS) {
        let mut row = vec![Cell::new(date).fg(Color::DarkGrey)];
        row.extend(
            closes
                .iter()
                .map(|c| Cell::new(format_optional(*c, "")).set_alignment(CellAlignment::Right)),
        );
        table.add_row(row);
    }
    table
}

pub fn render_report(run: &DashboardRun) -> String {
    let mut out = format!("\nGrowlio ({} lookback)\n{}\n", run.period, summary_table(run));

    for warning in run.warnings() {
        out.push_str(&format!("warning: {}\n", warning));
    }

    for section in &run.sections {
        if let TickerSection::Ready(report) = section {
            out.push_str(&format!("\nLatest News for {} ({})\n", report.ticker, report.period));
            for item in &report.news.items {
                out.push_str(&format!("- {} ({})\n", item.title, item.link));
            }
            if let Some(note) = report.news.note() {
                out.push_str(&format!("  {}\n", note));
            }
        }
    }

    if !run.combined.is_empty() {
        out.push_str(&format!(
            "\nCombined Stock Performance (last {} of {} days)\n{}\n",
            COMBINED_TAIL_ROWS.min(run.combined.len()),
            run.combined.len(),
            combined_table(run)
        ));
    }
    out
}

/// One-shot run over the configured default selection, printed to stdout.
pub async fn run(config: &AppConfig) -> Result<()> {
    let pipeline = Pipeline::from_config(config)?;
    let selection = Selection {
        tickers: config.selection.default_tickers.clone(),
        period: config.selection.default_period,
    };

    info!(tickers = ?selection.tickers, period = %selection.period, "report run");
    let run = pipeline.run_dashboard(&selection).await?;

    // Not fatal: stdout may be a pipe.
    let _ = clearscreen::clear();
    println!("{}", render_report(&run));
    Ok(())
}
