use anyhow::Result;
use chrono::NaiveDate;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    symbols::Marker,
    text::Line,
    widgets::{Axis, Block, Borders, Chart, Clear, Dataset, GraphType, Paragraph, Tabs, Wrap},
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::analysis::{DashboardRun, Pipeline, Selection, TickerReport, TickerSection};
use crate::comfy_table::format_volume;
use crate::errors::PipelineError;
use crate::models::Period;
use crate::storage_utils::AppConfig;

const SERIES_COLORS: [Color; 6] = [
    Color::Cyan,
    Color::Yellow,
    Color::Magenta,
    Color::Green,
    Color::LightBlue,
    Color::LightRed,
];

// --- App State ---

struct App {
    universe: Vec<String>,
    // Kept in the order the user picked them.
    selected: Vec<String>,
    cursor: usize,
    period: Period,
    run: Option<DashboardRun>,
    view: usize,
    is_refreshing: bool,
    last_error: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Action {
    None,
    Refresh,
    Quit,
}

impl App {
    fn new(config: &AppConfig) -> Self {
        Self {
            universe: config.selection.universe.clone(),
            selected: config.selection.default_tickers.clone(),
            cursor: 0,
            period: config.selection.default_period,
            run: None,
            view: 0,
            is_refreshing: false,
            last_error: None,
        }
    }

    fn selection(&self) -> Selection {
        Selection {
            tickers: self.selected.clone(),
            period: self.period,
        }
    }

    fn toggle_cursor(&mut self) {
        let Some(ticker) = self.universe.get(self.cursor) else {
            return;
        };
        if let Some(pos) = self.selected.iter().position(|t| t == ticker) {
            self.selected.remove(pos);
        } else {
            self.selected.push(ticker.clone());
        }
    }

    /// Per-ticker views plus the trailing Combined view.
    fn view_count(&self) -> usize {
        self.run.as_ref().map_or(0, |r| r.sections.len() + 1)
    }

    fn set_run(&mut self, result: Result<DashboardRun, PipelineError>) {
        self.is_refreshing = false;
        match result {
            Ok(run) => {
                self.run = Some(run);
                self.view = 0;
                self.last_error = None;
            }
            Err(e) => {
                error!(error = %e, "dashboard run failed");
                self.last_error = Some(e.to_string());
            }
        }
    }
}

// --- TUI ---

pub async fn run_tui(config: AppConfig) -> Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(&config)?);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &config, pipeline).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    config: &AppConfig,
    pipeline: Arc<Pipeline>,
) -> Result<()> {
    let (data_tx, mut data_rx) = mpsc::channel::<Result<DashboardRun, PipelineError>>(1);
    let mut app = App::new(config);

    // Render the default selection straight away.
    spawn_refresh(&mut app, &pipeline, &data_tx);

    loop {
        terminal.draw(|f| ui(f, &app))?;

        if let Ok(result) = data_rx.try_recv() {
            app.set_run(result);
        }

        if event::poll(Duration::from_millis(50))? {
            // Resize events fall through; the next draw picks up the new size.
            if let Event::Key(key) = event::read()? {
                match handle_key_event(key, &mut app) {
                    Action::Quit => return Ok(()),
                    Action::Refresh => spawn_refresh(&mut app, &pipeline, &data_tx),
                    Action::None => {}
                }
            }
        }
    }
}

fn spawn_refresh(
    app: &mut App,
    pipeline: &Arc<Pipeline>,
    tx: &mpsc::Sender<Result<DashboardRun, PipelineError>>,
) {
    if app.is_refreshing {
        return;
    }
    app.is_refreshing = true;
    let selection = app.selection();
    info!(tickers = ?selection.tickers, period = %selection.period, "dashboard refresh");

    let pipeline = Arc::clone(pipeline);
    let tx_clone = tx.clone();
    tokio::spawn(async move {
        let result = pipeline.run_dashboard(&selection).await;
        let _ = tx_clone.send(result).await;
    });
}

fn handle_key_event(key: KeyEvent, app: &mut App) -> Action {
    if key.kind == KeyEventKind::Release {
        return Action::None;
    }
    match key.code {
        KeyCode::Char('q') => return Action::Quit,
        KeyCode::Enter | KeyCode::F(5) if !app.is_refreshing => return Action::Refresh,
        KeyCode::Up => {
            if !app.universe.is_empty() {
                app.cursor = app.cursor.checked_sub(1).unwrap_or(app.universe.len() - 1);
            }
        }
        KeyCode::Down => {
            if !app.universe.is_empty() {
                app.cursor = (app.cursor + 1) % app.universe.len();
            }
        }
        KeyCode::Char(' ') => app.toggle_cursor(),
        KeyCode::Left => app.period = app.period.prev(),
        KeyCode::Right => app.period = app.period.next(),
        KeyCode::Tab => {
            let count = app.view_count();
            if count > 0 {
                app.view = (app.view + 1) % count;
            }
        }
        KeyCode::BackTab => {
            let count = app.view_count();
            if count > 0 {
                app.view = app.view.checked_sub(1).unwrap_or(count - 1);
            }
        }
        KeyCode::Char(c) => {
            if let Some(digit) = c.to_digit(10) {
                if digit > 0 && (digit as usize) <= app.view_count() {
                    app.view = digit as usize - 1;
                }
            }
        }
        _ => {}
    }
    Action::None
}

// --- Rendering ---

fn ui(f: &mut Frame, app: &App) {
    let main_layout = Layout::horizontal([Constraint::Percentage(18), Constraint::Percentage(82)])
        .split(f.size());

    render_sidebar(f, app, main_layout[0]);

    let right = Layout::vertical([Constraint::Length(3), Constraint::Min(0)]).split(main_layout[1]);

    match &app.run {
        None => {
            f.render_widget(
                Block::default()
                    .borders(Borders::ALL)
                    .title_alignment(Alignment::Center)
                    .title("Growlio: Investment Learning App"),
                right[0],
            );
            f.render_widget(
                Paragraph::new("Press Enter or F5 to load the selected stocks.")
                    .alignment(Alignment::Center)
                    .block(Block::default().borders(Borders::ALL)),
                right[1],
            );
        }
        Some(run) => {
            let mut titles: Vec<String> = run.sections.iter().map(|s| s.ticker().to_string()).collect();
            titles.push("Combined".to_string());
            f.render_widget(
                Tabs::new(titles)
                    .select(app.view)
                    .highlight_style(Style::default().fg(Color::Yellow).bg(Color::DarkGray))
                    .block(
                        Block::default()
                            .borders(Borders::ALL)
                            .title(format!("Growlio ({} lookback)", run.period)),
                    ),
                right[0],
            );

            match run.sections.get(app.view) {
                Some(TickerSection::Ready(report)) => render_report(f, report, right[1]),
                Some(TickerSection::Missing { ticker }) => {
                    f.render_widget(
                        Paragraph::new(format!("No data found for {}", ticker))
                            .style(Style::default().fg(Color::Yellow))
                            .alignment(Alignment::Center)
                            .block(Block::default().borders(Borders::ALL).title("Warning")),
                        right[1],
                    );
                }
                None => render_combined(f, run, right[1]),
            }
        }
    }

    if app.is_refreshing {
        let area = centered_rect(60, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new("Fetching market data and news...\nPlease wait.")
                .block(Block::default().title("Refreshing").borders(Borders::ALL))
                .alignment(Alignment::Center),
            area,
        );
    } else if let Some(err) = &app.last_error {
        let area = centered_rect(60, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new(err.as_str())
                .style(Style::default().fg(Color::Red))
                .wrap(Wrap { trim: true })
                .block(Block::default().title("Run failed").borders(Borders::ALL)),
            area,
        );
    }
}

fn render_sidebar(f: &mut Frame, app: &App, area: Rect) {
    let sidebar_block = Block::default()
        .borders(Borders::ALL)
        .title("Choose Stocks")
        .title_alignment(Alignment::Center);
    let inner = sidebar_block.inner(area);
    f.render_widget(sidebar_block, area);

    let chunks = Layout::vertical([
        Constraint::Min(1),    // ticker list
        Constraint::Length(3), // period selector
        Constraint::Length(3), // key help
    ])
    .split(inner);

    let ticker_lines: Vec<Line> = app
        .universe
        .iter()
        .enumerate()
        .map(|(i, ticker)| {
            let mark = if app.selected.contains(ticker) { "[x]" } else { "[ ]" };
            let mut line = Line::from(format!("{} {}", mark, ticker));
            if i == app.cursor {
                line = line.style(Style::default().fg(Color::Yellow).bg(Color::DarkGray));
            }
            line
        })
        .collect();
    f.render_widget(Paragraph::new(ticker_lines), chunks[0]);

    f.render_widget(
        Paragraph::new(format!("< {} >", app.period))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::TOP).title("Select Period")),
        chunks[1],
    );

    f.render_widget(
        Paragraph::new("Space select, </> period\nEnter/F5 run, Tab view, q quit")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true }),
        chunks[2],
    );
}

fn render_report(f: &mut Frame, report: &TickerReport, area: Rect) {
    let rows = Layout::vertical([
        Constraint::Length(3),
        Constraint::Percentage(40),
        Constraint::Percentage(30),
        Constraint::Min(4),
    ])
    .split(area);

    // Metrics
    let snap = &report.analytics.snapshot;
    let metric_cols = Layout::horizontal([
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
    ])
    .split(rows[0]);
    let change_color = if snap.pct_change >= 0.0 { Color::Green } else { Color::Red };
    let metrics = [
        (format!("{} Last Close", report.ticker), format!("${:.2}", snap.last_close), Color::White),
        ("Change".to_string(), format!("{:.2}%", snap.pct_change), change_color),
        ("Volume".to_string(), format_volume(snap.latest_volume), Color::White),
    ];
    for (i, (title, value, color)) in metrics.into_iter().enumerate() {
        f.render_widget(
            Paragraph::new(value)
                .style(Style::default().fg(color).add_modifier(Modifier::BOLD))
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).title(title)),
            metric_cols[i],
        );
    }

    let dates = report.series.dates();
    let closes: Vec<Option<f64>> = report.series.closes().into_iter().map(Some).collect();
    let m = &report.analytics.metrics;

    // Price & moving averages
    let close_pts = points(&closes);
    let ma20_pts = points(&m.ma20);
    let ma50_pts = points(&m.ma50);
    let price_sets = vec![
        line_dataset("Close", Color::Cyan, &close_pts),
        line_dataset("MA20", Color::Yellow, &ma20_pts),
        line_dataset("MA50", Color::Magenta, &ma50_pts),
    ];
    f.render_widget(
        chart(
            price_sets,
            &[close_pts.as_slice(), ma20_pts.as_slice(), ma50_pts.as_slice()],
            &dates,
            format!("{} Price & Moving Averages ({})", report.ticker, report.period),
        ),
        rows[1],
    );

    let lower = Layout::horizontal([Constraint::Percentage(50), Constraint::Percentage(50)]).split(rows[2]);

    // Volatility
    let vol_pts = points(&m.volatility);
    f.render_widget(
        chart(
            vec![line_dataset("Volatility", Color::Red, &vol_pts)],
            &[vol_pts.as_slice()],
            &dates,
            format!("{} 20-Day Rolling Volatility", report.ticker),
        ),
        lower[0],
    );

    // Buy signals
    let signal_pts: Vec<(f64, f64)> = report
        .analytics
        .signals
        .iter()
        .map(|s| (s.index as f64, s.close))
        .collect();
    let signal_sets = vec![
        line_dataset("Close", Color::Cyan, &close_pts),
        Dataset::default()
            .name("Buy Signal")
            .marker(Marker::Dot)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
            .data(&signal_pts),
    ];
    f.render_widget(
        chart(
            signal_sets,
            &[close_pts.as_slice()],
            &dates,
            format!("{} Buy Signals (MA Cross)", report.ticker),
        ),
        lower[1],
    );

    // News
    let mut news_lines: Vec<Line> = report
        .news
        .items
        .iter()
        .map(|item| {
            Line::from(vec![
                Span::raw("- "),
                Span::styled(item.title.clone(), Style::default().add_modifier(Modifier::BOLD)),
                Span::styled(format!("  {}", item.link), Style::default().fg(Color::DarkGray)),
            ])
        })
        .collect();
    if let Some(note) = report.news.note() {
        let color = if report.news.failure.is_some() { Color::Red } else { Color::Gray };
        news_lines.push(Line::from(note).style(Style::default().fg(color)));
    }
    f.render_widget(
        Paragraph::new(news_lines)
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("Latest News for {}", report.ticker)),
            ),
        rows[3],
    );
}

fn render_combined(f: &mut Frame, run: &DashboardRun, area: Rect) {
    if run.combined.is_empty() {
        f.render_widget(
            Paragraph::new("No stock data to combine.")
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).title("Combined Stock Performance")),
            area,
        );
        return;
    }

    let dates = run.combined.dates();
    let columns: Vec<(String, Vec<(f64, f64)>)> = run
        .combined
        .tickers()
        .iter()
        .map(|t| {
            let col = run.combined.column(t).unwrap_or_default();
            (t.clone(), points(&col))
        })
        .collect();

    let datasets = columns
        .iter()
        .enumerate()
        .map(|(i, (ticker, pts))| line_dataset(ticker, SERIES_COLORS[i % SERIES_COLORS.len()], pts))
        .collect();
    let all_points: Vec<&[(f64, f64)]> = columns.iter().map(|(_, pts)| pts.as_slice()).collect();

    f.render_widget(
        chart(datasets, &all_points, &dates, "Combined Stock Performance".to_string()),
        area,
    );
}

// --- Chart helpers ---

/// `(index, value)` pairs for the defined entries only.
fn points(values: &[Option<f64>]) -> Vec<(f64, f64)> {
    values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i as f64, v)))
        .collect()
}

/// Min/max over every point with 5% padding; a flat or empty range is widened.
fn y_bounds(sets: &[&[(f64, f64)]]) -> [f64; 2] {
    let (lo, hi) = sets
        .iter()
        .flat_map(|s| s.iter().map(|p| p.1))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| (lo.min(y), hi.max(y)));
    if !lo.is_finite() || !hi.is_finite() {
        return [0.0, 1.0];
    }
    let pad = ((hi - lo) * 0.05).max(hi.abs() * 0.01).max(1e-6);
    [lo - pad, hi + pad]
}

/// First, middle and last date of the x axis.
fn date_labels(dates: &[NaiveDate]) -> Vec<Span<'static>> {
    match dates {
        [] => Vec::new(),
        [only] => vec![Span::raw(only.to_string())],
        _ => vec![
            Span::raw(dates[0].to_string()),
            Span::raw(dates[dates.len() / 2].to_string()),
            Span::raw(dates[dates.len() - 1].to_string()),
        ],
    }
}

fn line_dataset<'a>(name: &str, color: Color, data: &'a [(f64, f64)]) -> Dataset<'a> {
    Dataset::default()
        .name(name.to_string())
        .marker(Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(data)
}

fn chart<'a>(
    datasets: Vec<Dataset<'a>>,
    bounds_from: &[&[(f64, f64)]],
    dates: &[NaiveDate],
    title: String,
) -> Chart<'a> {
    let [lo, hi] = y_bounds(bounds_from);
    let x_max = dates.len().saturating_sub(1).max(1) as f64;

    Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(title))
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, x_max])
                .labels(date_labels(dates)),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([lo, hi])
                .labels(vec![
                    Span::raw(format!("{:.2}", lo)),
                    Span::raw(format!("{:.2}", (lo + hi) / 2.0)),
                    Span::raw(format!("{:.2}", hi)),
                ]),
        )
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combined::CombinedTable;
    use crossterm::event::KeyModifiers;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn app() -> App {
        App::new(&AppConfig::default())
    }

    #[test]
    fn selection_keeps_pick_order() {
        let mut app = app();
        assert_eq!(app.selection().tickers, vec!["AAPL".to_string()]);

        // cursor to TSLA (index 4), select it, then deselect AAPL
        for _ in 0..4 {
            handle_key_event(key(KeyCode::Down), &mut app);
        }
        handle_key_event(key(KeyCode::Char(' ')), &mut app);
        app.cursor = 0;
        handle_key_event(key(KeyCode::Char(' ')), &mut app);
        handle_key_event(key(KeyCode::Char(' ')), &mut app);

        assert_eq!(app.selection().tickers, vec!["TSLA".to_string(), "AAPL".to_string()]);
    }

    #[test]
    fn period_keys_cycle() {
        let mut app = app();
        assert_eq!(app.period, Period::SixMonths);
        handle_key_event(key(KeyCode::Right), &mut app);
        assert_eq!(app.selection().period, Period::OneYear);
        handle_key_event(key(KeyCode::Left), &mut app);
        handle_key_event(key(KeyCode::Left), &mut app);
        assert_eq!(app.period, Period::ThreeMonths);
    }

    #[test]
    fn refresh_and_quit_actions() {
        let mut app = app();
        assert_eq!(handle_key_event(key(KeyCode::Enter), &mut app), Action::Refresh);
        assert_eq!(handle_key_event(key(KeyCode::F(5)), &mut app), Action::Refresh);
        app.is_refreshing = true;
        assert_eq!(handle_key_event(key(KeyCode::Enter), &mut app), Action::None);
        assert_eq!(handle_key_event(key(KeyCode::Char('q')), &mut app), Action::Quit);
    }

    #[test]
    fn tab_cycles_through_sections_and_combined() {
        let mut app = app();
        app.set_run(Ok(DashboardRun {
            period: Period::SixMonths,
            sections: vec![
                TickerSection::Missing { ticker: "ZZZZ".into() },
                TickerSection::Missing { ticker: "YYYY".into() },
            ],
            combined: CombinedTable::new(),
        }));
        assert_eq!(app.view_count(), 3);
        handle_key_event(key(KeyCode::Tab), &mut app);
        handle_key_event(key(KeyCode::Tab), &mut app);
        assert_eq!(app.view, 2);
        handle_key_event(key(KeyCode::Tab), &mut app);
        assert_eq!(app.view, 0);
        handle_key_event(key(KeyCode::BackTab), &mut app);
        assert_eq!(app.view, 2);
        handle_key_event(key(KeyCode::Char('2')), &mut app);
        assert_eq!(app.view, 1);
    }

    #[test]
    fn failed_run_keeps_previous_data() {
        let mut app = app();
        app.is_refreshing = true;
        app.set_run(Err(PipelineError::NoDataAvailable("X".into())));
        assert!(!app.is_refreshing);
        assert!(app.run.is_none());
        assert_eq!(app.last_error.as_deref(), Some("No data found for X"));
    }

    #[test]
    fn points_skip_undefined_entries() {
        let pts = points(&[None, Some(2.0), None, Some(4.0)]);
        assert_eq!(pts, vec![(1.0, 2.0), (3.0, 4.0)]);
    }

    #[test]
    fn y_bounds_pad_and_handle_empty() {
        assert_eq!(y_bounds(&[]), [0.0, 1.0]);
        let [lo, hi] = y_bounds(&[&[(0.0, 10.0), (1.0, 20.0)][..]]);
        assert!(lo < 10.0 && hi > 20.0);
        let [lo, hi] = y_bounds(&[&[(0.0, 5.0)][..]]);
        assert!(lo < 5.0 && hi > 5.0);
    }

    #[test]
    fn date_labels_pick_ends_and_middle() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
        let labels = date_labels(&[d(1), d(2), d(3), d(4), d(5)]);
        let text: Vec<String> = labels.iter().map(|s| s.content.to_string()).collect();
        assert_eq!(text, vec!["2024-05-01", "2024-05-03", "2024-05-05"]);
        assert!(date_labels(&[]).is_empty());
    }

    #[test]
    fn dashboard_renders_into_test_backend() {
        use crate::analysis::analyze_series;
        use crate::models::{Observation, Series};
        use crate::news::NewsOutcome;
        use ratatui::backend::TestBackend;

        let obs = (0..80)
            .map(|i| Observation {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i),
                open: 10.0,
                high: 10.0,
                low: 10.0,
                close: 10.0 + (i as f64 * 0.3).sin(),
                volume: 1_000,
            })
            .collect();
        let series = Series::new("AAPL", obs);
        let report = TickerReport {
            ticker: "AAPL".into(),
            period: Period::SixMonths,
            analytics: analyze_series(&series).unwrap(),
            series: series.clone(),
            news: NewsOutcome::default(),
        };
        let mut combined = CombinedTable::new();
        combined.add_series(&series);

        let mut app = app();
        app.set_run(Ok(DashboardRun {
            period: Period::SixMonths,
            sections: vec![TickerSection::Ready(Box::new(report))],
            combined,
        }));

        let mut terminal = Terminal::new(TestBackend::new(160, 60)).unwrap();
        terminal.draw(|f| ui(f, &app)).unwrap();
        let screen: String = terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(screen.contains("AAPL Price & Moving Averages (6mo)"));
        app.view = 1;
        terminal.draw(|f| ui(f, &app)).unwrap();
    }
}
