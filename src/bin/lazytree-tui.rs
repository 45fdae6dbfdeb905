use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers,
    MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use lazytree::{
    BatchQueue, DirectoryFetcher, EngineConfig, FlatRef, Flattener, IconResolver, Modifiers, Pick,
    SelectionModel, Subscription, TreeEngine, TreeEvent, TreeNode,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect as UiRect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::{Frame, Terminal};
use std::fs::File;
use std::io::{self, stdout};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const MIN_PANE_WIDTH: u16 = 28;
const MAX_PANE_WIDTH: u16 = 90;

struct Args {
    root: PathBuf,
    config: Option<PathBuf>,
    log: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut root = None;
    let mut config = None;
    let mut log = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(args.next().ok_or("--config needs a file")?.into()),
            "--log" => log = Some(args.next().ok_or("--log needs a file")?.into()),
            "-h" | "--help" => {
                return Err("usage: lazytree-tui [PATH] [--config FILE] [--log FILE]".to_string())
            }
            other if root.is_none() => root = Some(PathBuf::from(other)),
            other => return Err(format!("unexpected argument: {}", other)),
        }
    }
    Ok(Args {
        root: root.unwrap_or_else(|| PathBuf::from(".")),
        config,
        log,
    })
}

/// Log to a file only; the terminal belongs to the UI.
fn init_logging(path: Option<&Path>) -> io::Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let file = File::create(path)?;
    let filter = EnvFilter::try_from_env("LAZYTREE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[derive(Default, Clone, Copy)]
struct UiLayoutState {
    search_area: Option<UiRect>,
    tree_area: Option<UiRect>,
}

struct App {
    root: PathBuf,
    fetcher: DirectoryFetcher,
    engine: TreeEngine,
    events: Subscription<TreeEvent>,
    selection: SelectionModel,

    rows: Vec<FlatRef>,
    cursor: usize,
    scroll: usize,
    dragging: bool,

    query: String,
    input_mode: bool,
    status: String,

    widths: BatchQueue<u16>,
    pane_width: u16,
    ui_layout: UiLayoutState,

    should_quit: bool,
}

impl App {
    fn new(root: PathBuf, config: EngineConfig) -> io::Result<Self> {
        let fetcher = DirectoryFetcher::new(&config);
        let flattener = Flattener::new().with_icons(|node: &TreeNode| {
            let container = node.container;
            let resolver: IconResolver = Rc::new(move |expanded| icon_for(container, expanded).to_string());
            resolver
        });
        let widths = BatchQueue::from_config(&config);
        let mut engine = TreeEngine::with_config(fetcher, flattener, config);
        let events = engine.connect();

        let mut app = Self {
            root,
            fetcher,
            engine,
            events,
            selection: SelectionModel::new(),
            rows: Vec::new(),
            cursor: 0,
            scroll: 0,
            dragging: false,
            query: String::new(),
            input_mode: false,
            status: String::new(),
            widths,
            pane_width: MIN_PANE_WIDTH,
            ui_layout: UiLayoutState::default(),
            should_quit: false,
        };
        app.reload()?;
        Ok(app)
    }

    fn reload(&mut self) -> io::Result<()> {
        let roots = self.fetcher.list(&self.root)?;
        self.query.clear();
        self.selection.clear();
        self.engine.set_roots(roots);
        self.status = format!("Loaded {}", self.root.display());
        Ok(())
    }

    fn poll_engine_updates(&mut self) {
        self.engine.poll();

        while let Some(event) = self.events.try_next() {
            match event {
                TreeEvent::List(rows) => {
                    self.widths.extend(rows.iter().map(row_width));
                    self.rows = rows;
                    self.selection.retain_present(&self.rows);
                    self.cursor = self.cursor.min(self.rows.len().saturating_sub(1));
                }
                TreeEvent::Toggled { node, expanded } => {
                    let label = self
                        .engine
                        .node(node)
                        .map(|n| n.label.clone())
                        .unwrap_or_default();
                    let verb = if expanded { "Expanded" } else { "Collapsed" };
                    self.status = format!("{} {}", verb, label);
                }
                TreeEvent::Replaced { old, new } => self.selection.replace(&old, &new),
                TreeEvent::SearchInvalidated => {
                    self.query.clear();
                    self.status = "Search ended by a tree change".to_string();
                }
                TreeEvent::Error(err) => self.status = err.to_string(),
            }
        }

        if let Some(widths) = self.widths.flush_due(Instant::now()) {
            let widest = widths.into_iter().max().unwrap_or(0);
            self.pane_width = self
                .pane_width
                .max(widest.saturating_add(2))
                .clamp(MIN_PANE_WIDTH, MAX_PANE_WIDTH);
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char('c')) {
            self.should_quit = true;
            return;
        }

        if self.input_mode {
            match key.code {
                KeyCode::Enter => self.input_mode = false,
                KeyCode::Esc => {
                    self.input_mode = false;
                    self.query.clear();
                    self.engine.clear_search();
                }
                KeyCode::Backspace => {
                    self.query.pop();
                    self.engine.search(&self.query);
                }
                KeyCode::Char(ch) => {
                    self.query.push(ch);
                    self.engine.search(&self.query);
                }
                _ => {}
            }
            return;
        }

        let shift = key.modifiers.contains(KeyModifiers::SHIFT);
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('/') => self.input_mode = true,
            KeyCode::Char('j') | KeyCode::Down => self.move_cursor(1, shift),
            KeyCode::Char('k') | KeyCode::Up => self.move_cursor(-1, shift),
            KeyCode::Char('J') => self.move_cursor(1, true),
            KeyCode::Char('K') => self.move_cursor(-1, true),
            KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => self.toggle_cursor(),
            KeyCode::Char(' ') => self.pick_cursor(Pick::Click(Modifiers::ctrl())),
            KeyCode::Char('h') | KeyCode::Left => self.jump_to_parent(),
            KeyCode::Char('x') | KeyCode::Delete => self.delete_selected(),
            KeyCode::Char('r') => {
                if let Err(err) = self.reload() {
                    self.status = format!("Reload failed: {}", err);
                }
            }
            KeyCode::Esc => {
                if self.engine.is_searching() {
                    self.query.clear();
                    self.engine.clear_search();
                } else {
                    self.selection.clear();
                }
            }
            _ => {}
        }
    }

    fn on_mouse(&mut self, event: MouseEvent) {
        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if let Some(area) = self.ui_layout.search_area {
                    if point_in_rect(area, event.column, event.row) {
                        self.input_mode = true;
                        return;
                    }
                }
                let Some(index) = self.row_at(event.column, event.row) else {
                    return;
                };
                self.cursor = index;
                let row = Rc::clone(&self.rows[index]);
                let modifiers = Modifiers {
                    ctrl: event.modifiers.contains(KeyModifiers::CONTROL),
                    meta: event.modifiers.contains(KeyModifiers::SUPER),
                    shift: event.modifiers.contains(KeyModifiers::SHIFT),
                };
                self.selection.pick(&row, Pick::Click(modifiers), &self.rows);

                // Clicking the disclosure arrow toggles.
                let arrow_x = self
                    .ui_layout
                    .tree_area
                    .map(|area| arrow_column(area.x, row.level()))
                    .unwrap_or(0);
                if modifiers == Modifiers::NONE && event.column <= arrow_x.saturating_add(1) {
                    self.engine.toggle(row.data());
                }
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                if self.dragging {
                    return;
                }
                self.dragging = true;
                if let Some(index) = self.row_at(event.column, event.row) {
                    let row = Rc::clone(&self.rows[index]);
                    self.selection.pick(&row, Pick::DragStart, &self.rows);
                    self.status = format!("Dragging {} item(s)", self.selection.selection().len());
                }
            }
            MouseEventKind::Up(MouseButton::Left) => self.dragging = false,
            MouseEventKind::ScrollDown => self.scroll = self.scroll.saturating_add(3),
            MouseEventKind::ScrollUp => self.scroll = self.scroll.saturating_sub(3),
            _ => {}
        }
    }

    fn move_cursor(&mut self, delta: isize, extend: bool) {
        if self.rows.is_empty() {
            return;
        }
        let last = self.rows.len() - 1;
        self.cursor = self.cursor.saturating_add_signed(delta).min(last);
        let modifiers = if extend { Modifiers::shift() } else { Modifiers::NONE };
        self.pick_cursor(Pick::Click(modifiers));
    }

    fn pick_cursor(&mut self, pick: Pick) {
        let Some(row) = self.rows.get(self.cursor).cloned() else {
            return;
        };
        self.selection.pick(&row, pick, &self.rows);
    }

    fn toggle_cursor(&mut self) {
        if let Some(row) = self.rows.get(self.cursor) {
            self.engine.toggle(row.data());
        }
    }

    fn jump_to_parent(&mut self) {
        let Some(row) = self.rows.get(self.cursor) else {
            return;
        };
        if self.engine.is_expanded(row.data()) {
            self.engine.toggle(row.data());
            return;
        }
        let Some(parent) = self.engine.get_parent(row.data()) else {
            return;
        };
        if let Some(index) = self.rows.iter().position(|r| Rc::ptr_eq(r, &parent)) {
            self.cursor = index;
            self.pick_cursor(Pick::Click(Modifiers::NONE));
        }
    }

    /// Remove the selected rows from the view. Nothing on disk is touched.
    fn delete_selected(&mut self) {
        let doomed: Vec<FlatRef> = self.selection.selection().to_vec();
        for row in &doomed {
            self.engine.delete_node(row.data());
        }
        self.status = format!("Removed {} item(s) from view", doomed.len());
    }

    fn row_at(&self, x: u16, y: u16) -> Option<usize> {
        let area = self.ui_layout.tree_area?;
        if !point_in_rect(area, x, y) {
            return None;
        }
        let index = self.scroll + (y - area.y) as usize;
        (index < self.rows.len()).then_some(index)
    }

    fn keep_cursor_visible(&mut self, height: usize) {
        if height == 0 {
            return;
        }
        if self.cursor < self.scroll {
            self.scroll = self.cursor;
        } else if self.cursor >= self.scroll + height {
            self.scroll = self.cursor + 1 - height;
        }
        self.scroll = self.scroll.min(self.rows.len().saturating_sub(1));
    }
}

fn icon_for(container: bool, expanded: bool) -> &'static str {
    match (container, expanded) {
        (true, true) => "▾",
        (true, false) => "▸",
        (false, _) => " ",
    }
}

fn row_width(row: &FlatRef) -> u16 {
    let columns = row.level() * 2 + 2 + row.label().chars().count();
    columns.min(u16::MAX as usize) as u16
}

/// Screen column of the disclosure arrow for a row at `level`.
fn arrow_column(area_x: u16, level: usize) -> u16 {
    let indent = u16::try_from(level).unwrap_or(u16::MAX).saturating_mul(2);
    area_x.saturating_add(indent)
}

fn point_in_rect(rect: UiRect, x: u16, y: u16) -> bool {
    x >= rect.x
        && x < rect.x.saturating_add(rect.width)
        && y >= rect.y
        && y < rect.y.saturating_add(rect.height)
}

fn format_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    let mut unit_index = 0;
    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }
    format!("{:.1} {}", value, UNITS[unit_index])
}

fn row_line<'a>(app: &App, index: usize, row: &'a FlatRef) -> Line<'a> {
    let expanded = app.engine.is_expanded(row.data());
    let icon = if row.is_expandable() || expanded {
        row.icon(expanded).unwrap_or_default()
    } else {
        " ".to_string()
    };
    let mut style = Style::default().fg(if row.is_expandable() {
        Color::Rgb(120, 180, 235)
    } else {
        Color::White
    });
    if app.selection.is_selected(row) {
        style = style.bg(Color::Rgb(60, 60, 90));
    }
    if index == app.cursor {
        style = style.add_modifier(Modifier::REVERSED);
    }

    let mut spans = vec![
        Span::raw("  ".repeat(row.level())),
        Span::styled(format!("{} ", icon), style),
        Span::styled(row.label(), style),
    ];
    if row.is_loading() {
        spans.push(Span::styled(" …", Style::default().fg(Color::Gray)));
    }
    Line::from(spans)
}

fn draw_ui(frame: &mut Frame, app: &mut App) {
    let root = frame.area();
    let split = Layout::horizontal([Constraint::Length(app.pane_width + 2), Constraint::Min(30)]).split(root);
    let left = split[0];
    let right = split[1];

    let left_rows = Layout::vertical([Constraint::Length(3), Constraint::Min(4)]).split(left);

    let search_title = if app.input_mode {
        " Search (typing) "
    } else {
        " Search "
    };
    let search_block = Block::default().title(search_title).borders(Borders::ALL);
    let search_inner = search_block.inner(left_rows[0]);
    frame.render_widget(search_block, left_rows[0]);
    let search_style = if app.input_mode {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::White)
    };
    frame.render_widget(Paragraph::new(app.query.as_str()).style(search_style), search_inner);
    app.ui_layout.search_area = Some(search_inner);

    let tree_block = Block::default()
        .title(format!(" {} ", app.root.display()))
        .borders(Borders::ALL);
    let tree_inner = tree_block.inner(left_rows[1]);
    frame.render_widget(tree_block, left_rows[1]);
    app.ui_layout.tree_area = Some(tree_inner);

    app.keep_cursor_visible(tree_inner.height as usize);
    let lines: Vec<Line> = app
        .rows
        .iter()
        .enumerate()
        .skip(app.scroll)
        .take(tree_inner.height as usize)
        .map(|(index, row)| row_line(app, index, row))
        .collect();
    if lines.is_empty() {
        let hint = if app.engine.is_searching() {
            "No matches."
        } else {
            "Empty directory."
        };
        frame.render_widget(Paragraph::new(hint).style(Style::default().fg(Color::Gray)), tree_inner);
    } else {
        frame.render_widget(Paragraph::new(lines), tree_inner);
    }

    let right_rows = Layout::vertical([Constraint::Min(6), Constraint::Length(3), Constraint::Length(6)]).split(right);

    let mut details = Vec::new();
    match app.rows.get(app.cursor).and_then(|row| app.engine.node(row.data())) {
        Some(node) => {
            details.push(Line::from(vec![
                Span::styled("Path: ", Style::default().fg(Color::Gray)),
                Span::raw(node.path.clone()),
            ]));
            let kind = node.attrs.get("kind").cloned().unwrap_or_default();
            details.push(Line::from(vec![
                Span::styled("Type: ", Style::default().fg(Color::Gray)),
                Span::raw(kind),
            ]));
            if let Some(size) = node.attrs.get("size").and_then(|s| s.parse::<u64>().ok()) {
                details.push(Line::from(vec![
                    Span::styled("Size: ", Style::default().fg(Color::Gray)),
                    Span::raw(format_size(size)),
                ]));
            }
        }
        None => details.push(Line::from("Nothing under the cursor")),
    }
    details.push(Line::from(format!(
        "Selected: {}   Pending fetches: {}",
        app.selection.selection().len(),
        app.engine.pending_fetches()
    )));
    frame.render_widget(
        Paragraph::new(details).block(Block::default().title(" Details ").borders(Borders::ALL)),
        right_rows[0],
    );

    frame.render_widget(
        Paragraph::new(app.status.as_str()).block(Block::default().title(" Status ").borders(Borders::ALL)),
        right_rows[1],
    );

    let help_lines = vec![
        Line::from("j/k: move   J/K or shift: extend   space: toggle select"),
        Line::from("Enter/l: expand/collapse   h: parent   /: search   Esc: clear"),
        Line::from("x: remove from view   r: reload   q: quit"),
        Line::from("Mouse: click, ctrl/shift-click, drag"),
    ];
    frame.render_widget(
        Paragraph::new(help_lines).block(Block::default().title(" Controls ").borders(Borders::ALL)),
        right_rows[2],
    );
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>, mut app: App) -> io::Result<()> {
    loop {
        app.poll_engine_updates();

        terminal.draw(|frame| {
            draw_ui(frame, &mut app);
        })?;

        if app.should_quit {
            break;
        }

        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) => app.on_key(key),
                Event::Mouse(mouse) => app.on_mouse(mouse),
                Event::Resize(_, _) => {}
                Event::FocusGained | Event::FocusLost | Event::Paste(_) => {}
            }
        }
    }

    Ok(())
}

fn main() -> io::Result<()> {
    let args = parse_args().map_err(|msg| io::Error::new(io::ErrorKind::InvalidInput, msg))?;
    init_logging(args.log.as_deref())?;
    let config = match args.config.as_deref() {
        Some(path) => EngineConfig::load(path).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?,
        None => EngineConfig::default(),
    };
    let app = App::new(args.root, config)?;

    enable_raw_mode()?;
    crossterm::execute!(stdout(), EnterAlternateScreen, EnableMouseCapture)?;

    let backend = CrosstermBackend::new(stdout());
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let app_result = run_app(&mut terminal, app);

    disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    app_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrow_column_indents_by_level() {
        assert_eq!(arrow_column(1, 0), 1);
        assert_eq!(arrow_column(1, 3), 7);
    }

    #[test]
    fn test_arrow_column_saturates_for_deep_rows() {
        assert_eq!(arrow_column(10, 40_000), u16::MAX);
        assert_eq!(arrow_column(10, usize::MAX), u16::MAX);
    }
}
