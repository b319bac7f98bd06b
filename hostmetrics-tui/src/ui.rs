use crate::app::{App, Tab};
use hostmetrics_core::{CapabilityState, FileSystemKind, MetricsError};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Bar, BarChart, BarGroup, Block, Borders, Cell, Gauge, Paragraph, Row, Table, Tabs},
    Frame,
};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)])
        .split(f.area());

    draw_tabs(f, app, chunks[0]);
    match app.current_tab {
        Tab::Dashboard => draw_dashboard(f, app, chunks[1]),
        Tab::Filesystems => draw_filesystems(f, app, chunks[1]),
        Tab::Network => draw_network(f, app, chunks[1]),
        Tab::Capabilities => draw_capabilities(f, app, chunks[1]),
    }
    draw_footer(f, app, chunks[2]);
}

fn draw_tabs(f: &mut Frame, app: &App, area: Rect) {
    let titles = vec!["Dashboard (1)", "Filesystems (2)", "Network (3)", "Capabilities (4)"];
    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title("Host Metrics"))
        .select(app.get_tab_index())
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

    f.render_widget(tabs, area);
}

fn draw_dashboard(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(0)])
        .split(area);

    draw_system_overview(f, app, chunks[0]);
    draw_cpu_cores(f, app, chunks[1]);
}

fn draw_system_overview(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
        ])
        .split(area);

    let cpu_percent = app.cpu.map(|cpu| cpu.combined * 100.0).unwrap_or(0.0);
    let cpu_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("CPU Usage"))
        .gauge_style(Style::default().fg(get_usage_color(cpu_percent)))
        .percent(cpu_percent.clamp(0.0, 100.0) as u16)
        .label(match app.cpu {
            Some(cpu) => format!(
                "{:.1}% (usr {:.0}% sys {:.0}% wait {:.0}%)",
                cpu_percent,
                cpu.user * 100.0,
                cpu.sys * 100.0,
                cpu.wait * 100.0
            ),
            None => "N/A".to_string(),
        });
    f.render_widget(cpu_gauge, chunks[0]);

    let mem_percent = app.mem.map(|mem| mem.used_percent()).unwrap_or(0.0);
    let mem_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Memory"))
        .gauge_style(Style::default().fg(get_usage_color(mem_percent)))
        .percent(mem_percent.clamp(0.0, 100.0) as u16)
        .label(match app.mem {
            Some(mem) => format!("{:.1} / {:.1} GB", mem.actual_used as f64 / GIB, mem.total as f64 / GIB),
            None => "N/A".to_string(),
        });
    f.render_widget(mem_gauge, chunks[1]);

    let swap_percent = app.swap.map(|swap| swap.used_percent()).unwrap_or(0.0);
    let swap_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Swap"))
        .gauge_style(Style::default().fg(get_usage_color(swap_percent)))
        .percent(swap_percent.clamp(0.0, 100.0) as u16)
        .label(match app.swap {
            Some(swap) if swap.total > 0 => {
                format!("{:.1} / {:.1} GB", swap.used as f64 / GIB, swap.total as f64 / GIB)
            }
            _ => "none".to_string(),
        });
    f.render_widget(swap_gauge, chunks[2]);

    let load = match app.load {
        Some(load) => format!("{:.2} {:.2} {:.2}", load.one, load.five, load.fifteen),
        None => "N/A".to_string(),
    };
    let uptime = match app.uptime {
        Some(uptime) => format_uptime(uptime.seconds),
        None => "N/A".to_string(),
    };
    let load_para = Paragraph::new(format!("{}\nup {}", load, uptime))
        .block(Block::default().borders(Borders::ALL).title("Load"))
        .alignment(Alignment::Center);
    f.render_widget(load_para, chunks[3]);
}

fn draw_cpu_cores(f: &mut Frame, app: &App, area: Rect) {
    let labels: Vec<String> = (0..app.cores.len()).map(|i| i.to_string()).collect();
    let bars: Vec<Bar> = app
        .cores
        .iter()
        .zip(&labels)
        .map(|(core, label)| {
            let value = (core.combined * 100.0).round() as u64;
            Bar::default()
                .value(value)
                .label(Line::from(label.as_str()))
                .style(Style::default().fg(get_usage_color(value as f64)))
        })
        .collect();

    let chart = BarChart::default()
        .block(Block::default().borders(Borders::ALL).title("CPU Cores"))
        .data(BarGroup::default().bars(&bars))
        .max(100)
        .bar_width(3)
        .bar_gap(1);

    f.render_widget(chart, area);
}

fn draw_filesystems(f: &mut Frame, app: &App, area: Rect) {
    let rows: Vec<Row> = app
        .filesystems
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let (size, used, status, color) = match &row.usage {
                Ok(usage) => {
                    let percent = usage.use_percent() * 100.0;
                    (
                        format!("{:.1} GB", usage.total as f64 / GIB),
                        format!("{:.1} GB", usage.used as f64 / GIB),
                        format!("{:.0}%", percent),
                        get_usage_color(percent),
                    )
                }
                Err(err @ MetricsError::Unreachable { .. }) => {
                    ("-".into(), "-".into(), err.to_string(), Color::Red)
                }
                Err(err) => ("-".into(), "-".into(), err.to_string(), Color::Gray),
            };
            let style = if i == app.selected_row {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(row.entry.mount_point.display().to_string()),
                Cell::from(row.entry.device.clone()),
                Cell::from(row.entry.fs_type.clone()),
                Cell::from(kind_label(row.entry.kind)),
                Cell::from(size),
                Cell::from(used),
                Cell::from(status).style(Style::default().fg(color)),
            ])
            .style(style)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Min(16),
            Constraint::Min(20),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Min(10),
        ],
    )
    .header(
        Row::new(vec!["Mounted on", "Device", "Type", "Kind", "Size", "Used", "Use%"])
            .style(Style::default().add_modifier(Modifier::BOLD))
            .bottom_margin(1),
    )
    .block(Block::default().borders(Borders::ALL).title("Filesystems"));

    f.render_widget(table, area);
}

fn draw_network(f: &mut Frame, app: &App, area: Rect) {
    let rows: Vec<Row> = app
        .interfaces
        .iter()
        .map(|row| {
            Row::new(vec![
                Cell::from(row.stat.name.clone()),
                Cell::from(format!("{:.2} MB", row.stat.rx_bytes as f64 / (1024.0 * 1024.0))),
                Cell::from(format!("{:.2} MB", row.stat.tx_bytes as f64 / (1024.0 * 1024.0))),
                Cell::from(format!("{:.1} KB/s", row.rate.rx_bytes_per_sec / 1024.0)),
                Cell::from(format!("{:.1} KB/s", row.rate.tx_bytes_per_sec / 1024.0)),
                Cell::from(format!("{} / {}", row.stat.rx_errors, row.stat.tx_errors)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Min(12),
            Constraint::Length(14),
            Constraint::Length(14),
            Constraint::Length(14),
            Constraint::Length(14),
            Constraint::Length(12),
        ],
    )
    .header(
        Row::new(vec!["Interface", "↓ Total", "↑ Total", "↓ Rate", "↑ Rate", "Errors"])
            .style(Style::default().add_modifier(Modifier::BOLD))
            .bottom_margin(1),
    )
    .block(Block::default().borders(Borders::ALL).title("Network Interfaces"));

    f.render_widget(table, area);
}

fn draw_capabilities(f: &mut Frame, app: &App, area: Rect) {
    if app.capabilities.is_empty() {
        let text = Paragraph::new("No capabilities configured.\nAdd [capabilities.<name>] sections to the config file.")
            .block(Block::default().borders(Borders::ALL).title("Capabilities"))
            .alignment(Alignment::Center);
        f.render_widget(text, area);
        return;
    }

    let rows: Vec<Row> = app
        .capabilities
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let color = match row.state {
                CapabilityState::Located(_) | CapabilityState::Built(_) => Color::Green,
                CapabilityState::Unavailable(_) => Color::Red,
                CapabilityState::Unresolved => Color::Gray,
            };
            let style = if i == app.selected_row {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(row.name.clone()),
                Cell::from(row.state.to_string()).style(Style::default().fg(color)),
                Cell::from(
                    row.library
                        .as_ref()
                        .map(|path| path.display().to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
            ])
            .style(style)
        })
        .collect();

    let table = Table::new(rows, [Constraint::Length(20), Constraint::Min(30), Constraint::Min(30)])
        .header(
            Row::new(vec!["Name", "State", "Shared library"])
                .style(Style::default().add_modifier(Modifier::BOLD))
                .bottom_margin(1),
        )
        .block(Block::default().borders(Borders::ALL).title("Capabilities (r: resolve)"));

    f.render_widget(table, area);
}

fn draw_footer(f: &mut Frame, app: &App, area: Rect) {
    let help = "q: Quit | Tab: Next Tab | 1-4: Switch Tabs | ↑↓: Select | r: Refresh / Resolve";
    let text = match &app.status_message {
        Some(message) => format!("{}  |  {}", message, help),
        None => help.to_string(),
    };
    let footer = Paragraph::new(text)
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, area);
}

fn kind_label(kind: FileSystemKind) -> &'static str {
    match kind {
        FileSystemKind::LocalDisk => "local",
        FileSystemKind::Network => "network",
        FileSystemKind::RamDisk => "ram",
        FileSystemKind::Cdrom => "cdrom",
        FileSystemKind::Swap => "swap",
        FileSystemKind::None => "none",
        FileSystemKind::Unknown => "?",
    }
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}

fn get_usage_color(usage: f64) -> Color {
    if usage > 80.0 {
        Color::Red
    } else if usage > 60.0 {
        Color::Yellow
    } else {
        Color::Green
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_uptime() {
        assert_eq!(format_uptime(59), "0h 0m");
        assert_eq!(format_uptime(3_660), "1h 1m");
        assert_eq!(format_uptime(90_061), "1d 1h 1m");
    }

    #[test]
    fn usage_colors_follow_thresholds() {
        assert_eq!(get_usage_color(10.0), Color::Green);
        assert_eq!(get_usage_color(70.0), Color::Yellow);
        assert_eq!(get_usage_color(95.0), Color::Red);
    }
}
