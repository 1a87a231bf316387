use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::Local;
use unicode_width::UnicodeWidthStr;

use crate::backend::Mode;
use crate::config::Config;
use crate::identity::Actor;
use crate::preferences::Preferences;
use crate::store::{BoardColumn, TaskStats};
use crate::task::{Importance, Task};
use crate::toast::{Toast, ToastKind};

#[derive(Debug, Clone)]
pub struct Renderer {
    stdout_color: bool,
    stderr_color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            stdout_color: color && io::stdout().is_terminal(),
            stderr_color: color && io::stderr().is_terminal(),
        })
    }

    pub fn with_terminals(self, stdout: bool, stderr: bool) -> Self {
        Self {
            stdout_color: self.stdout_color && stdout,
            stderr_color: self.stderr_color && stderr,
        }
    }

    #[tracing::instrument(skip(self, out, tasks))]
    pub fn task_table(&self, out: &mut dyn Write, tasks: &[Task]) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Done".to_string(),
            "Column".to_string(),
            "Importance".to_string(),
            "Created".to_string(),
            "Title".to_string(),
        ];

        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(&task.id.to_string(), "33"),
                    if task.is_complete { "x" } else { "" }.to_string(),
                    task.workflow_column.to_string(),
                    self.importance(task.importance),
                    task.created_at
                        .with_timezone(&Local)
                        .format("%Y-%m-%d")
                        .to_string(),
                    task.title.clone(),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip_all)]
    pub fn board(&self, out: &mut dyn Write, board: &[BoardColumn]) -> anyhow::Result<()> {
        for (idx, lane) in board.iter().enumerate() {
            if idx > 0 {
                writeln!(out)?;
            }
            let heading = format!("{} ({})", lane.column.title(), lane.tasks.len());
            writeln!(out, "{}", self.paint(&heading, "1"))?;
            for task in &lane.tasks {
                writeln!(
                    out,
                    "  {:>6}  {:<6}  {}",
                    task.id,
                    task.importance.as_str(),
                    task.title
                )?;
            }
        }
        Ok(())
    }

    pub fn actor(&self, out: &mut dyn Write, actor: Option<&Actor>, mode: Mode) -> anyhow::Result<()> {
        let Some(actor) = actor else {
            writeln!(out, "not signed in ({mode})")?;
            return Ok(());
        };

        writeln!(out, "id     {}", actor.id())?;
        writeln!(out, "email  {}", actor.email().unwrap_or("-"))?;
        if let Actor::Local { name, .. } = actor {
            writeln!(out, "name   {name}")?;
        }
        writeln!(out, "mode   {mode}")?;
        Ok(())
    }

    pub fn stats(&self, out: &mut dyn Write, stats: &TaskStats) -> anyhow::Result<()> {
        writeln!(out, "total        {}", stats.total)?;
        writeln!(out, "completed    {}", stats.completed)?;
        writeln!(out, "pending      {}", stats.pending)?;
        writeln!(out, "in progress  {}", stats.in_progress)?;
        Ok(())
    }

    pub fn preferences(&self, out: &mut dyn Write, prefs: &Preferences) -> anyhow::Result<()> {
        writeln!(out, "filter  {}", prefs.task_filter)?;
        writeln!(out, "sort    {}", prefs.task_sort)?;
        writeln!(out, "theme   {}", prefs.theme)?;
        Ok(())
    }

    pub fn toasts(&self, out: &mut dyn Write, toasts: &[Toast]) -> anyhow::Result<()> {
        for toast in toasts {
            let (label, code) = match toast.kind {
                ToastKind::Success => ("ok", "32"),
                ToastKind::Error => ("error", "31"),
                ToastKind::Info => ("info", "36"),
                ToastKind::Warning => ("warning", "33"),
            };
            writeln!(out, "[{}] {}", paint(label, code, self.stderr_color), toast.message)?;
        }
        Ok(())
    }

    fn importance(&self, importance: Importance) -> String {
        match importance {
            Importance::High => self.paint(importance.as_str(), "31"),
            Importance::Medium => importance.as_str().to_string(),
            Importance::Low => self.paint(importance.as_str(), "2"),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        paint(text, code, self.stdout_color)
    }
}

fn paint(text: &str, code: &str, enabled: bool) -> String {
    if !enabled {
        return text.to_string();
    }
    format!("\x1b[{code}m{text}\x1b[0m")
}

fn write_table(
    writer: &mut dyn Write,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(widths.iter().copied()) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(widths.iter().copied()) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::task::WorkflowColumn;

    fn plain() -> Renderer {
        let mut cfg = Config::defaults();
        cfg.apply_overrides(vec![("color".to_string(), "off".to_string())]);
        Renderer::new(&cfg).expect("renderer")
    }

    fn task(id: i64, title: &str, column: WorkflowColumn) -> Task {
        Task {
            id,
            title: title.to_string(),
            description: String::new(),
            user_id: "u1".to_string(),
            importance: Importance::High,
            is_complete: column.is_done(),
            workflow_column: column,
            created_at: Utc::now(),
        }
    }

    fn rendered(f: impl FnOnce(&mut Vec<u8>) -> anyhow::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).expect("render");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn table_aligns_wide_titles() {
        let renderer = plain();
        let tasks = vec![
            task(7, "Écrire le rapport", WorkflowColumn::InProgress),
            task(12, "会议", WorkflowColumn::Done),
        ];
        let text = rendered(|out| renderer.task_table(out, &tasks));
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("ID Done Column"));
        assert!(lines[2].contains("in-progress"));
        assert!(lines[3].contains(" x "));
        assert!(lines[3].trim_end().ends_with("会议"));
        assert_eq!(
            UnicodeWidthStr::width(lines[2]),
            UnicodeWidthStr::width(lines[3])
        );
    }

    #[test]
    fn board_lists_every_lane() {
        let renderer = plain();
        let board = vec![
            BoardColumn {
                column: WorkflowColumn::Todo,
                tasks: vec![],
            },
            BoardColumn {
                column: WorkflowColumn::Done,
                tasks: vec![task(3, "Ship it", WorkflowColumn::Done)],
            },
        ];
        let text = rendered(|out| renderer.board(out, &board));
        assert!(text.contains("To Do (0)"));
        assert!(text.contains("Done (1)"));
        assert!(text.contains("Ship it"));
    }

    #[test]
    fn invalid_color_setting_is_rejected() {
        let mut cfg = Config::defaults();
        cfg.apply_overrides(vec![("color".to_string(), "maybe".to_string())]);
        assert!(Renderer::new(&cfg).is_err());
    }

    #[test]
    fn toasts_follow_stderr_and_tables_follow_stdout() {
        let mut cfg = Config::defaults();
        cfg.apply_overrides(vec![("color".to_string(), "on".to_string())]);
        let renderer = Renderer {
            stdout_color: true,
            stderr_color: true,
        }
        .with_terminals(false, true);

        let toasts = vec![Toast {
            id: "t1".to_string(),
            message: "Saved".to_string(),
            kind: ToastKind::Success,
            ttl: 0,
        }];
        let notices = rendered(|out| renderer.toasts(out, &toasts));
        assert_eq!(notices, "[\x1b[32mok\x1b[0m] Saved\n");

        let tasks = vec![task(1, "Plain", WorkflowColumn::Todo)];
        let table = rendered(|out| renderer.task_table(out, &tasks));
        assert!(!table.contains('\x1b'));

        let piped = Renderer::new(&cfg)
            .expect("renderer")
            .with_terminals(false, false);
        let notices = rendered(|out| piped.toasts(out, &toasts));
        assert_eq!(notices, "[ok] Saved\n");
    }

    #[test]
    fn strip_ansi_removes_escape_sequences() {
        assert_eq!(strip_ansi("\x1b[31mhigh\x1b[0m"), "high");
    }
}
