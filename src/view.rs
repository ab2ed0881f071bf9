use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Gauge, Paragraph};

use crate::app::App;
use crate::model::mode::Screen;
use crate::plugin::status::PluginStatus;

const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

const SELECTED: Style = Style::new().fg(Color::Black).bg(Color::Cyan);
const MUTED: Style = Style::new().fg(Color::DarkGray);
const PANEL_BG: Color = Color::Rgb(12, 12, 18);

impl App {
    // ── MVU: View ────────────────────────────────────────────────

    pub fn view(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1), // title
                Constraint::Min(1),    // body
                Constraint::Length(1), // status bar
            ])
            .split(frame.area());

        self.render_title(frame, chunks[0]);
        match self.screen {
            Screen::List => self.render_list(frame, chunks[1]),
            Screen::Progress => self.render_progress(frame, chunks[1]),
            Screen::Browse => self.render_browse(frame, chunks[1]),
            Screen::CommitViewer => {
                self.render_progress(frame, chunks[1]);
                self.render_commit_overlay(frame);
            }
            Screen::Debug => self.render_debug(frame, chunks[1]),
        }
        self.render_status_bar(frame, chunks[2]);
    }

    fn render_title(&self, frame: &mut Frame, area: Rect) {
        let installed = self.manager.plugins.iter().filter(|p| p.status.is_installed()).count();
        let title = Line::from(vec![
            Span::styled(
                " muxpack ",
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Rgb(0, 255, 136))
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(
                    " {} declared, {installed} installed, {} outdated, {} orphaned ",
                    self.manager.plugins.len(),
                    self.manager.count(PluginStatus::Outdated),
                    self.manager.orphans.len()
                ),
                Style::default().fg(Color::Gray),
            ),
        ]);
        frame.render_widget(
            Paragraph::new(title).style(Style::default().bg(Color::Rgb(20, 20, 30))),
            area,
        );
    }

    fn render_list(&self, frame: &mut Frame, area: Rect) {
        let body = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(3),
                Constraint::Length(self.orphan_panel_height()),
            ])
            .split(area);

        let inner_height = body[0].height.saturating_sub(2) as usize;
        let start = scroll_start(self.cursor, self.manager.plugins.len(), inner_height);

        let lines: Vec<Line> = if self.manager.plugins.is_empty() {
            vec![Line::from(Span::styled(
                "No plugins declared. Add `set -g @plugin 'owner/repo'` to tmux.conf or press b to browse.",
                MUTED,
            ))]
        } else {
            self.manager
                .plugins
                .iter()
                .enumerate()
                .skip(start)
                .take(inner_height.max(1))
                .map(|(idx, plugin)| {
                    let mark = if self.selected.contains(&idx) { "[x]" } else { "[ ]" };
                    let (label, style) = status_badge(plugin.status, self.tick);
                    let name = format!(" {mark} {:<32}", plugin.spec.name);
                    if idx == self.cursor {
                        Line::from(vec![Span::styled(name, SELECTED), Span::styled(label, SELECTED)])
                    } else {
                        Line::from(vec![
                            Span::styled(name, Style::default().fg(Color::Gray)),
                            Span::styled(label, style),
                        ])
                    }
                })
                .collect()
        };

        frame.render_widget(
            Paragraph::new(lines).block(
                Block::default()
                    .title(" Plugins ")
                    .borders(Borders::ALL)
                    .style(Style::default().bg(PANEL_BG)),
            ),
            body[0],
        );

        if !self.manager.orphans.is_empty() {
            let orphans: Vec<Line> = self
                .manager
                .orphans
                .iter()
                .map(|orphan| Line::from(Span::styled(format!("  {}", orphan.name), MUTED)))
                .collect();
            frame.render_widget(
                Paragraph::new(orphans).block(
                    Block::default()
                        .title(" Not declared (c to clean) ")
                        .borders(Borders::ALL)
                        .style(Style::default().bg(PANEL_BG)),
                ),
                body[1],
            );
        }
    }

    fn orphan_panel_height(&self) -> u16 {
        match self.manager.orphans.len() {
            0 => 0,
            n => (n.min(6) + 2) as u16,
        }
    }

    fn render_progress(&self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(1)])
            .split(area);

        let total = self.orchestrator.total().max(1);
        let completed = self.orchestrator.completed();
        let title = if self.orchestrator.is_processing() {
            format!(
                " {} {} ",
                self.orchestrator.operation().progress_title(),
                SPINNER[self.tick % SPINNER.len()]
            )
        } else {
            let (ok, failed) = self.orchestrator.tally();
            format!(" Done: {ok} succeeded, {failed} failed ")
        };
        let gauge = Gauge::default()
            .block(Block::default().title(title).borders(Borders::ALL))
            .gauge_style(Style::default().fg(Color::Cyan).bg(Color::Rgb(20, 20, 30)))
            .ratio((completed as f64 / total as f64).min(1.0))
            .label(format!("{completed}/{}", self.orchestrator.total()));
        frame.render_widget(gauge, chunks[0]);

        let mut lines = Vec::new();
        let mut focus_line = 0;
        for (idx, result) in self.orchestrator.results().iter().enumerate() {
            let (mark, style) = if result.success {
                ("ok", Style::default().fg(Color::Rgb(0, 255, 136)))
            } else {
                ("!!", Style::default().fg(Color::Rgb(255, 102, 0)))
            };
            let focused = !self.orchestrator.is_processing() && idx == self.progress.cursor;
            if focused {
                focus_line = lines.len();
            }
            let text = format!(" {mark} {:<28} {}", result.name, result.message);
            lines.push(Line::from(Span::styled(text, if focused { SELECTED } else { style })));

            if self.progress.expanded.contains(&idx) {
                for commit in &result.commits {
                    lines.push(Line::from(vec![
                        Span::styled(format!("      {} ", commit.hash), Style::default().fg(Color::Yellow)),
                        Span::styled(commit.subject.clone(), Style::default().fg(Color::Gray)),
                    ]));
                }
            }
        }
        if self.orchestrator.in_flight_count() > 0 {
            lines.push(Line::from(Span::styled(
                format!(
                    " .. {} running, {} queued",
                    self.orchestrator.in_flight_count(),
                    self.orchestrator.queued()
                ),
                MUTED,
            )));
        }

        let height = chunks[1].height.saturating_sub(2) as usize;
        let skip = if self.orchestrator.is_processing() {
            lines.len().saturating_sub(height.max(1))
        } else {
            scroll_start(focus_line, lines.len(), height)
        };
        frame.render_widget(
            Paragraph::new(lines.into_iter().skip(skip).collect::<Vec<_>>()).block(
                Block::default()
                    .borders(Borders::ALL)
                    .style(Style::default().bg(PANEL_BG)),
            ),
            chunks[1],
        );
    }

    fn render_commit_overlay(&self, frame: &mut Frame) {
        let Some(result) = self.orchestrator.results().get(self.commit_view.result) else {
            return;
        };
        let area = centered_rect(80, 70, frame.area());
        frame.render_widget(Clear, area);

        let lines: Vec<Line> = result
            .commits
            .iter()
            .enumerate()
            .skip(self.commit_view.scroll)
            .map(|(idx, commit)| {
                let style = if idx == self.commit_view.scroll {
                    SELECTED
                } else {
                    Style::default().fg(Color::Gray)
                };
                Line::from(Span::styled(format!(" {}  {}", commit.hash, commit.subject), style))
            })
            .collect();

        let range = match (&result.before_ref, &result.after_ref) {
            (Some(before), Some(after)) => format!(" {before}..{after}"),
            _ => String::new(),
        };
        frame.render_widget(
            Paragraph::new(lines).block(
                Block::default()
                    .title(format!(" {}{range} ", result.name))
                    .borders(Borders::ALL)
                    .style(Style::default().bg(Color::Rgb(15, 15, 24))),
            ),
            area,
        );
    }

    fn render_browse(&self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(1)])
            .split(area);

        let filter_title = format!(" Filter [{}] ", self.browse.category_label());
        let filter_style = if self.browse.editing_filter {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::Gray)
        };
        frame.render_widget(
            Paragraph::new(Span::styled(self.browse.filter.clone(), filter_style)).block(
                Block::default()
                    .title(filter_title)
                    .borders(Borders::ALL)
                    .style(Style::default().bg(Color::Rgb(15, 15, 24))),
            ),
            chunks[0],
        );
        if self.browse.editing_filter {
            let cursor_x = chunks[0].x + 1 + self.browse.filter.chars().count() as u16;
            frame.set_cursor_position((cursor_x, chunks[0].y + 1));
        }

        let lines: Vec<Line> = if self.browse.loading {
            vec![Line::from(Span::styled(
                format!(" Loading registry {}", SPINNER[self.tick % SPINNER.len()]),
                MUTED,
            ))]
        } else if let Some(err) = &self.browse.error {
            vec![Line::from(Span::styled(
                format!(" Registry unavailable: {err}"),
                Style::default().fg(Color::Rgb(255, 102, 0)),
            ))]
        } else {
            let visible = self.browse.visible();
            if visible.is_empty() {
                vec![Line::from(Span::styled(" No matches", MUTED))]
            } else {
                let height = chunks[1].height.saturating_sub(2) as usize;
                let start = scroll_start(self.browse.cursor, visible.len(), height);
                visible
                    .iter()
                    .enumerate()
                    .skip(start)
                    .take(height.max(1))
                    .map(|(idx, item)| {
                        let installed = self
                            .manager
                            .find(&item.name)
                            .is_some_and(|p| p.status.is_installed());
                        let marker = if installed { "*" } else { " " };
                        let text = format!(" {marker} {:<28} {}", item.name, item.description);
                        if idx == self.browse.cursor {
                            Line::from(Span::styled(text, SELECTED))
                        } else {
                            Line::from(Span::styled(text, Style::default().fg(Color::Gray)))
                        }
                    })
                    .collect()
            }
        };

        frame.render_widget(
            Paragraph::new(lines).block(
                Block::default()
                    .title(" Registry ")
                    .borders(Borders::ALL)
                    .style(Style::default().bg(PANEL_BG)),
            ),
            chunks[1],
        );
    }

    fn render_debug(&self, frame: &mut Frame, area: Rect) {
        let row = |key: &str, value: String| {
            Line::from(vec![
                Span::styled(format!(" {key:<22}"), Style::default().fg(Color::Cyan)),
                Span::styled(value, Style::default().fg(Color::Gray)),
            ])
        };
        let timeouts = self.config.timeouts();
        let lines = vec![
            row("plugin dir", self.manager.root().display().to_string()),
            row("tmux.conf", self.config.tmux_conf().display().to_string()),
            row("operation slots", self.orchestrator.max_concurrent().to_string()),
            row("check slots", self.config.check_concurrency().to_string()),
            row("status check timeout", format!("{:?}", timeouts.status_check)),
            row("clone/pull timeout", format!("{:?}", timeouts.clone_pull)),
            row("remove timeout", format!("{:?}", timeouts.remove)),
            row("update checks", format!("{:?}", self.config.updates.check_mode)),
            row("declared", self.manager.plugins.len().to_string()),
            row("checking", self.manager.count(PluginStatus::Checking).to_string()),
            row("check failed", self.manager.count(PluginStatus::CheckFailed).to_string()),
            row("orphans", self.manager.orphans.len().to_string()),
            row("notifications", self.notifications.len().to_string()),
            row(
                "batch",
                format!(
                    "{} processing={} {}/{} done, {} in flight, {} queued",
                    self.orchestrator.operation(),
                    self.orchestrator.is_processing(),
                    self.orchestrator.completed(),
                    self.orchestrator.total(),
                    self.orchestrator.in_flight_count(),
                    self.orchestrator.queued()
                ),
            ),
        ];
        frame.render_widget(
            Paragraph::new(lines).block(
                Block::default()
                    .title(" Debug ")
                    .borders(Borders::ALL)
                    .style(Style::default().bg(PANEL_BG)),
            ),
            area,
        );
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect) {
        let screen_style = match self.screen {
            Screen::List => Style::default().fg(Color::Black).bg(Color::Magenta),
            Screen::Progress | Screen::CommitViewer => Style::default().fg(Color::Black).bg(Color::Cyan),
            _ => Style::default().fg(Color::Black).bg(Color::Yellow),
        }
        .add_modifier(Modifier::BOLD);

        let hints = match self.screen {
            Screen::List => "space select  a all  i install  u update  x uninstall  c clean  b browse  q quit",
            Screen::Progress if self.orchestrator.is_processing() => "working...",
            Screen::Progress => "j/k move  tab expand  v commits  enter back",
            Screen::Browse if self.browse.editing_filter => "enter apply  esc cancel",
            Screen::Browse => "tab category  / filter  enter install  esc back",
            Screen::CommitViewer => "j/k scroll  esc close",
            Screen::Debug => "esc back",
        };

        let info = match self.notifications.back() {
            Some(note) => Span::styled(format!(" {note} "), Style::default().fg(Color::Yellow).bg(Color::DarkGray)),
            None => Span::styled(format!(" {hints} "), Style::default().fg(Color::Gray).bg(Color::DarkGray)),
        };

        let bar = Line::from(vec![Span::styled(format!(" {} ", self.screen.label()), screen_style), info]);
        frame.render_widget(Paragraph::new(bar).style(Style::default().bg(Color::DarkGray)), area);
    }
}

fn status_badge(status: PluginStatus, tick: usize) -> (String, Style) {
    match status {
        PluginStatus::Checking => (
            format!("checking {}", SPINNER[tick % SPINNER.len()]),
            Style::default().fg(Color::DarkGray),
        ),
        PluginStatus::Installed => (status.label().to_string(), Style::default().fg(Color::Rgb(0, 255, 136))),
        PluginStatus::Outdated => (status.label().to_string(), Style::default().fg(Color::Yellow)),
        PluginStatus::CheckFailed => (status.label().to_string(), Style::default().fg(Color::Rgb(255, 102, 0))),
        PluginStatus::NotInstalled => (status.label().to_string(), Style::default().fg(Color::Gray)),
    }
}

/// First row to draw so that `cursor` stays inside a window of `height` rows.
fn scroll_start(cursor: usize, len: usize, height: usize) -> usize {
    if height == 0 || len <= height {
        return 0;
    }
    cursor.saturating_sub(height - 1).min(len - height)
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
