use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};
use spendtrace_scanner::{EventBatch, GraphSnapshot, TraceHandle};
use std::collections::HashSet;
use std::io;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(100);
const PAGE: usize = 10;

/// Renderer state for a running trace.
///
/// Everything shown comes from the last snapshot and event batch taken through
/// the [`TraceHandle`]; the monitor never touches the crawl state directly.
pub struct TraceMonitor {
    handle: TraceHandle,
    snapshot: GraphSnapshot,
    status: String,
    last_unspent: Option<String>,
    highlight: Option<String>,
    pending: usize,
    is_complete: bool,
    scroll_graph: usize,
    scroll_findings: usize,
}

impl TraceMonitor {
    pub fn new(handle: TraceHandle) -> Self {
        Self {
            handle,
            snapshot: GraphSnapshot::default(),
            status: "Starting trace...".to_string(),
            last_unspent: None,
            highlight: None,
            pending: 0,
            is_complete: false,
            scroll_graph: 0,
            scroll_findings: 0,
        }
    }

    /// Drain queued events and pick up a fresh snapshot.
    ///
    /// Returns true when the view changed and needs to be drawn again.
    pub fn refresh(&mut self) -> bool {
        let batch = self.handle.drain_events();
        let complete = self.handle.is_complete();

        if batch.is_empty() && complete == self.is_complete {
            return false;
        }

        self.apply(&batch);
        self.snapshot = self.handle.snapshot();
        self.pending = self.handle.pending_count();
        self.is_complete = complete;
        if complete {
            self.status = format!(
                "Trace complete! {} outputs, {} unspent",
                self.snapshot.vertex_count(),
                self.snapshot.findings.len()
            );
        }
        true
    }

    fn apply(&mut self, batch: &EventBatch) {
        if let Some(status) = batch.latest_status() {
            self.status = status.to_string();
        }
        // Highlight lasts for the pass that follows this batch only
        match batch.latest_unspent() {
            Some((label, text)) => {
                self.last_unspent = Some(text.to_string());
                self.highlight = Some(label.to_string());
            }
            None => self.highlight = None,
        }
    }

    /// Drop the one-pass highlight before a redraw not caused by new events.
    fn clear_highlight(&mut self) {
        self.highlight = None;
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn highlight(&self) -> Option<&str> {
        self.highlight.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn render(&self, f: &mut Frame) {
        let size = f.area();

        // Main area + hints bar
        let vertical_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(10), Constraint::Length(1)])
            .split(size);

        // Graph (left), progress + findings (right)
        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(vertical_chunks[0]);

        let right_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(9), Constraint::Min(5)])
            .split(main_chunks[1]);

        self.render_graph(f, main_chunks[0]);
        self.render_progress(f, right_chunks[0]);
        self.render_findings(f, right_chunks[1]);
        self.render_hints(f, vertical_chunks[1]);
    }

    fn graph_lines(&self) -> Vec<ListItem<'static>> {
        let unspent: HashSet<&str> = self
            .snapshot
            .findings
            .iter()
            .map(|f| f.label.as_str())
            .collect();

        self.snapshot
            .vertices_by_depth()
            .into_iter()
            .map(|vertex| {
                let indent = "  ".repeat(vertex.depth);
                let incoming: Vec<String> = self
                    .snapshot
                    .incoming(&vertex.label)
                    .iter()
                    .map(|e| format!("{:.8} BTC", e.value as f64 / 100_000_000.0))
                    .collect();

                let mut spans = vec![
                    Span::styled(
                        format!("{}[{}] ", indent, vertex.depth),
                        Style::default().fg(depth_color(vertex.depth)),
                    ),
                    Span::raw(vertex.short_label()),
                ];
                if !incoming.is_empty() {
                    spans.push(Span::styled(
                        format!("  <- {}", incoming.join(", ")),
                        Style::default().fg(Color::DarkGray),
                    ));
                }

                let mut style = Style::default();
                if unspent.contains(vertex.label.as_str()) {
                    style = style.fg(Color::Green).add_modifier(Modifier::BOLD);
                }
                if self.highlight.as_deref() == Some(vertex.label.as_str()) {
                    style = style.bg(Color::DarkGray).add_modifier(Modifier::BOLD);
                }
                ListItem::new(Line::from(spans)).style(style)
            })
            .collect()
    }

    fn render_graph(&self, f: &mut Frame, area: Rect) {
        let title = format!(
            " Spend Graph ({} outputs, {} spends) ",
            self.snapshot.vertex_count(),
            self.snapshot.edge_count()
        );
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(Color::Cyan));

        let inner = block.inner(area);
        f.render_widget(block, area);

        if self.snapshot.is_empty() {
            let empty_msg = Paragraph::new("No outputs yet... waiting for the ledger")
                .style(Style::default().fg(Color::DarkGray))
                .wrap(Wrap { trim: true });
            f.render_widget(empty_msg, inner);
            return;
        }

        let items = self.graph_lines();
        let height = inner.height as usize;
        let offset = self.scroll_graph.min(items.len().saturating_sub(height));
        let visible: Vec<ListItem> = items.into_iter().skip(offset).take(height).collect();
        f.render_widget(List::new(visible), inner);
    }

    fn render_progress(&self, f: &mut Frame, area: Rect) {
        let (title, border_color) = if self.is_complete {
            (" Complete ", Color::Green)
        } else {
            (" Progress ", Color::Yellow)
        };

        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(border_color));

        let inner = block.inner(area);
        f.render_widget(block, area);

        let status_icon = if self.is_complete { "✓" } else { "⠋" };

        let mut text = vec![
            Line::from(vec![
                Span::styled(status_icon, Style::default().fg(Color::Cyan)),
                Span::raw(" "),
                Span::styled(
                    format!("{} pending", self.pending),
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw(format!(
                    "  max depth seen {}",
                    self.snapshot.max_depth()
                )),
            ]),
            Line::from(""),
            Line::from(self.status.clone()),
        ];

        if let Some(ref unspent) = self.last_unspent {
            text.push(Line::from(""));
            text.push(Line::from(Span::styled(
                unspent.clone(),
                Style::default().fg(Color::Green),
            )));
        }

        f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
    }

    fn render_findings(&self, f: &mut Frame, area: Rect) {
        let findings = &self.snapshot.findings;
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" Unspent ({}) ", findings.len()))
            .border_style(Style::default().fg(Color::Magenta));

        let inner = block.inner(area);
        f.render_widget(block, area);

        let height = inner.height as usize;
        let offset = self
            .scroll_findings
            .min(findings.len().saturating_sub(height));

        let items: Vec<ListItem> = findings
            .iter()
            .skip(offset)
            .take(height)
            .map(|finding| {
                let mut style = Style::default().fg(Color::Green);
                if self.highlight.as_deref() == Some(finding.label.as_str()) {
                    style = style.add_modifier(Modifier::BOLD | Modifier::REVERSED);
                }
                ListItem::new(finding.short_label()).style(style)
            })
            .collect();

        f.render_widget(List::new(items), inner);
    }

    fn render_hints(&self, f: &mut Frame, area: Rect) {
        let key = Style::default().fg(Color::Black).bg(Color::Gray);
        let quit_action = if self.is_complete { " Exit  " } else { " Stop  " };
        let hints = Line::from(vec![
            Span::styled(" q/ESC ", key),
            Span::raw(quit_action),
            Span::styled(" Ctrl+C ", key),
            Span::raw(quit_action),
            Span::styled(" ↑/↓ ", key),
            Span::raw(" Scroll graph  "),
            Span::styled(" PgUp/PgDn ", key),
            Span::raw(" Page  "),
            Span::styled(" ←/→ ", key),
            Span::raw(" Scroll unspent"),
        ]);

        let paragraph =
            Paragraph::new(hints).style(Style::default().bg(Color::Black).fg(Color::Gray));
        f.render_widget(paragraph, area);
    }

    /// Returns false when the key asks to leave the monitor.
    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> bool {
        let graph_len = self.snapshot.vertex_count();
        let findings_len = self.snapshot.findings.len();
        match code {
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return false,
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Up => self.scroll_graph = self.scroll_graph.saturating_sub(1),
            KeyCode::Down => {
                self.scroll_graph = (self.scroll_graph + 1).min(graph_len.saturating_sub(1))
            }
            KeyCode::PageUp => self.scroll_graph = self.scroll_graph.saturating_sub(PAGE),
            KeyCode::PageDown => {
                self.scroll_graph = (self.scroll_graph + PAGE).min(graph_len.saturating_sub(1))
            }
            KeyCode::Home => self.scroll_graph = 0,
            KeyCode::End => self.scroll_graph = graph_len.saturating_sub(PAGE),
            KeyCode::Left => self.scroll_findings = self.scroll_findings.saturating_sub(1),
            KeyCode::Right => {
                self.scroll_findings =
                    (self.scroll_findings + 1).min(findings_len.saturating_sub(1))
            }
            _ => {}
        }
        true
    }
}

fn depth_color(depth: usize) -> Color {
    match depth {
        0 => Color::Magenta,
        1..=2 => Color::LightMagenta,
        3..=5 => Color::LightRed,
        _ => Color::Yellow,
    }
}

/// Run the trace monitor TUI (blocking function, should be run in separate thread)
pub fn run_monitor(handle: TraceHandle, should_exit: Arc<AtomicBool>) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut monitor = TraceMonitor::new(handle);
    let outcome = monitor_loop(&mut terminal, &mut monitor, &should_exit);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    outcome
}

fn monitor_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    monitor: &mut TraceMonitor,
    should_exit: &AtomicBool,
) -> Result<()> {
    monitor.refresh();
    terminal.draw(|f| monitor.render(f))?;

    loop {
        if should_exit.load(Ordering::Relaxed) {
            break;
        }

        let mut redraw = monitor.refresh();

        if event::poll(TICK)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if !monitor.handle_key(key.code, key.modifiers) {
                        break;
                    }
                    if !redraw {
                        monitor.clear_highlight();
                    }
                    redraw = true;
                }
                Event::Resize(_, _) => {
                    if !redraw {
                        monitor.clear_highlight();
                    }
                    redraw = true;
                }
                _ => {}
            }
        }

        if redraw {
            terminal.draw(|f| monitor.render(f))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use spendtrace_scanner::error::Result as ScanResult;
    use spendtrace_scanner::{Ledger, Outspends, TransactionDetails, TxOutput, Tracer};

    const START: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SPENDER: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    /// START:0 is spent into SPENDER, whose single output is unspent.
    struct TwoHopLedger;

    impl Ledger for TwoHopLedger {
        async fn fetch_transaction(&self, txid: &str) -> ScanResult<TransactionDetails> {
            Ok(TransactionDetails {
                txid: txid.to_string(),
                outputs: vec![TxOutput {
                    index: 0,
                    value: 50_000,
                    script_type: "p2pkh".to_string(),
                }],
            })
        }

        async fn fetch_outspends(&self, txid: &str) -> ScanResult<Outspends> {
            if txid == START {
                Ok(Outspends(vec![Some(SPENDER.to_string())]))
            } else {
                Ok(Outspends(vec![None]))
            }
        }
    }

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[tokio::test]
    async fn test_refresh_picks_up_finished_trace() {
        let tracer = Tracer::new(TwoHopLedger);
        let mut monitor = TraceMonitor::new(tracer.handle());

        tracer.trace(START, 0).await;

        assert!(monitor.refresh());
        assert!(monitor.is_complete());
        assert_eq!(monitor.snapshot.vertex_count(), 2);
        let spender_label = format!("{}:0 (p2pkh)", SPENDER);
        assert_eq!(monitor.highlight(), Some(spender_label.as_str()));
        assert!(monitor.status().starts_with("Trace complete!"));

        // Nothing new: no redraw needed
        assert!(!monitor.refresh());
    }

    #[tokio::test]
    async fn test_render_shows_graph_and_findings() {
        let tracer = Tracer::new(TwoHopLedger);
        let mut monitor = TraceMonitor::new(tracer.handle());
        tracer.trace(START, 0).await;
        monitor.refresh();

        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|f| monitor.render(f)).unwrap();
        let screen = screen_text(&terminal);

        assert!(screen.contains("Spend Graph (2 outputs, 1 spends)"));
        assert!(screen.contains("aaaaaaaa...:0 (p2pkh)"));
        assert!(screen.contains("0.00050000 BTC"));
        assert!(screen.contains("Unspent (1)"));
        assert!(screen.contains("Complete"));
    }

    #[test]
    fn test_apply_keeps_status_without_new_status() {
        let tracer = Tracer::new(TwoHopLedger);
        let mut monitor = TraceMonitor::new(tracer.handle());

        monitor.apply(&EventBatch(vec![
            spendtrace_scanner::UpdateEvent::status("first"),
            spendtrace_scanner::UpdateEvent::status("second"),
        ]));
        assert_eq!(monitor.status(), "second");
        assert_eq!(monitor.highlight(), None);

        monitor.apply(&EventBatch(vec![spendtrace_scanner::UpdateEvent::unspent(
            "x",
            "Unspent output found: x",
        )]));
        assert_eq!(monitor.status(), "second");
        assert_eq!(monitor.highlight(), Some("x"));

        monitor.clear_highlight();
        assert_eq!(monitor.highlight(), None);
        assert_eq!(
            monitor.last_unspent.as_deref(),
            Some("Unspent output found: x")
        );
    }

    #[test]
    fn test_quit_keys() {
        let tracer = Tracer::new(TwoHopLedger);
        let mut monitor = TraceMonitor::new(tracer.handle());

        assert!(!monitor.handle_key(KeyCode::Char('q'), KeyModifiers::NONE));
        assert!(!monitor.handle_key(KeyCode::Esc, KeyModifiers::NONE));
        assert!(!monitor.handle_key(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(monitor.handle_key(KeyCode::Char('c'), KeyModifiers::NONE));
        assert!(monitor.handle_key(KeyCode::Up, KeyModifiers::NONE));
    }
}
