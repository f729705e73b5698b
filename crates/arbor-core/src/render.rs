use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDateTime;
use unicode_width::UnicodeWidthStr;

use crate::cli::TaskPath;
use crate::config::Config;
use crate::datetime::format_due;
use crate::filter::SearchFilter;
use crate::task::{Priority, TaskData};
use crate::tree::NodeId;

const DUE_DISPLAY: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
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
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    /// Prints `visible` (depth-first, as produced by a search filter), one
    /// row per task, titles indented by depth.
    #[tracing::instrument(skip(self, filter, visible, now))]
    pub fn print_tree(
        &self,
        filter: &SearchFilter<'_>,
        visible: &[NodeId],
        now: NaiveDateTime,
    ) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        self.write_tree(out, filter, visible, now)
    }

    pub fn write_tree<W: Write>(
        &self,
        mut out: W,
        filter: &SearchFilter<'_>,
        visible: &[NodeId],
        now: NaiveDateTime,
    ) -> anyhow::Result<()> {
        let tree = filter.tree();
        if visible.is_empty() {
            if filter.is_passthrough() {
                writeln!(out, "No tasks.")?;
            } else {
                writeln!(out, "No matching tasks.")?;
            }
            return Ok(());
        }

        let headers = vec![
            "#".to_string(),
            "Task".to_string(),
            "Due".to_string(),
            "Pri".to_string(),
            "Category".to_string(),
            "Tags".to_string(),
        ];

        let mut rows = Vec::with_capacity(visible.len());
        for &id in visible {
            let (Some(task), Some(path)) = (tree.task(id), TaskPath::of(tree, id)) else {
                continue;
            };

            let check = if task.completed { "[x]" } else { "[ ]" };
            let indent = "  ".repeat(tree.depth(id));
            let title = format!("{indent}{check} {}", task.title);
            let title = if task.completed {
                self.paint(&title, "2")
            } else {
                title
            };

            let due = task
                .due_date
                .map(|due| {
                    let text = due.format(DUE_DISPLAY).to_string();
                    if !task.completed && due < now {
                        self.paint(&text, "31")
                    } else {
                        text
                    }
                })
                .unwrap_or_default();

            let priority = match task.priority {
                Priority::None => String::new(),
                Priority::High => self.paint(Priority::High.label(), "1;31"),
                other => other.label().to_string(),
            };

            let tags = task
                .tags
                .iter()
                .map(|tag| format!("+{tag}"))
                .collect::<Vec<_>>()
                .join(" ");

            rows.push(vec![
                self.paint(&path.to_string(), "33"),
                title,
                due,
                priority,
                task.category.clone(),
                tags,
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(
        &self,
        path: &TaskPath,
        task: &TaskData,
        child_count: usize,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "path        {path}")?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(out, "description {}", task.description)?;
        writeln!(out, "completed   {}", if task.completed { "yes" } else { "no" })?;
        writeln!(out, "due         {}", format_due(task.due_date))?;
        writeln!(out, "priority    {}", task.priority)?;
        writeln!(out, "category    {}", task.category)?;
        writeln!(out, "tags        {}", task.tags.join(", "))?;
        writeln!(out, "subtasks    {child_count}")?;

        Ok(())
    }

    pub fn print_lines<I, S>(&self, lines: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = io::stdout().lock();
        for line in lines {
            writeln!(out, "{}", line.as_ref())?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
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

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
                format!("{cell}{}", " ".repeat(width.saturating_sub(visible_width)))
            })
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(writer, "{}", line.trim_end())?;
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
