use anyhow::{Context, anyhow, bail};
use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, instrument};

use crate::cli::{Command, FieldArgs, TaskPath};
use crate::config::Config;
use crate::datetime::parse_due_input;
use crate::manager::TaskManager;
use crate::render::Renderer;
use crate::task::{Priority, TaskPatch};
use crate::tree::{NodeId, TaskIndex, TaskTree};

#[instrument(skip(manager, cfg, renderer, command))]
pub fn dispatch(
    manager: &mut TaskManager,
    cfg: &Config,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let now = Local::now().naive_local();
    debug!(?command, "dispatching command");

    match command {
        Command::List { search, all } => {
            cmd_list(manager, renderer, search.as_deref().unwrap_or_default(), all, now)
        }
        Command::Add {
            title,
            parent,
            fields,
        } => cmd_add(manager, &title, parent.as_ref(), fields, now),
        Command::Edit {
            path,
            title,
            fields,
            clear_due,
            clear_tags,
        } => {
            let mut patch = build_patch(fields, now)?;
            if title.is_some() {
                patch.title = title;
            }
            if clear_due {
                patch.due_date = Some(None);
            }
            if clear_tags {
                patch.tags = Some(Vec::new());
            }
            cmd_edit(manager, &path, &patch)
        }
        Command::Done { path } => cmd_set_completed(manager, &path, true),
        Command::Undone { path } => cmd_set_completed(manager, &path, false),
        Command::Remove { path } => cmd_remove(manager, &path),
        Command::Show { path, json } => cmd_show(manager, renderer, &path, json),
        Command::Categories => renderer.print_lines(manager.all_categories()),
        Command::Tags => renderer.print_lines(manager.all_tags()),
        Command::Export => {
            let out = serde_json::to_string_pretty(&manager.tree().to_json())?;
            println!("{out}");
            Ok(())
        }
        Command::Config => cmd_config(manager, cfg, renderer),
    }
}

#[instrument(skip(manager, renderer, now))]
fn cmd_list(
    manager: &mut TaskManager,
    renderer: &Renderer,
    search: &str,
    all: bool,
    now: NaiveDateTime,
) -> anyhow::Result<()> {
    info!("command list");

    manager.set_search_text(search);
    let filter = manager.filtered();
    let mut visible = filter.visible();
    if !all {
        let tree = manager.tree();
        visible.retain(|id| has_open_work(tree, *id));
    }

    renderer.print_tree(&filter, &visible, now)
}

#[instrument(skip(manager, fields, now))]
fn cmd_add(
    manager: &mut TaskManager,
    title: &str,
    parent: Option<&TaskPath>,
    fields: FieldArgs,
    now: NaiveDateTime,
) -> anyhow::Result<()> {
    info!("command add");

    let title = title.trim();
    if title.is_empty() {
        bail!("task title cannot be empty");
    }

    let parent = parent
        .map(|path| resolve(manager.tree(), path))
        .transpose()?;
    let patch = build_patch(fields, now)?;

    let index = manager
        .tree_mut()
        .add_task(title, parent)
        .ok_or_else(|| anyhow!("parent task disappeared while adding"))?;
    if !patch.is_empty() {
        manager.tree_mut().update_task(index, &patch);
    }
    ensure_saved(manager)?;

    if let Some(path) = TaskPath::of(manager.tree(), index.id()) {
        println!("Created task {path}.");
    }
    Ok(())
}

#[instrument(skip(manager, patch))]
fn cmd_edit(manager: &mut TaskManager, path: &TaskPath, patch: &TaskPatch) -> anyhow::Result<()> {
    info!("command edit");

    if patch.is_empty() {
        bail!("nothing to change for task {path}");
    }
    let index = resolve(manager.tree(), path)?;
    manager.tree_mut().update_task(index, patch);
    ensure_saved(manager)?;

    println!("Modified task {path}.");
    Ok(())
}

#[instrument(skip(manager))]
fn cmd_set_completed(
    manager: &mut TaskManager,
    path: &TaskPath,
    completed: bool,
) -> anyhow::Result<()> {
    info!(completed, "command done/undone");

    let index = resolve(manager.tree(), path)?;
    manager.tree_mut().set_completed(index, completed);
    ensure_saved(manager)?;

    if completed {
        let cascaded = manager.tree().descendants(index.id()).count();
        if cascaded > 0 {
            println!("Completed task {path} and {cascaded} sub-task(s).");
        } else {
            println!("Completed task {path}.");
        }
    } else {
        println!("Reopened task {path}.");
    }
    Ok(())
}

#[instrument(skip(manager))]
fn cmd_remove(manager: &mut TaskManager, path: &TaskPath) -> anyhow::Result<()> {
    info!("command remove");

    let index = resolve(manager.tree(), path)?;
    let (title, removed) = manager
        .tree()
        .node(index.id())
        .map(|node| (node.task.title.clone(), node.subtree_len()))
        .ok_or_else(|| anyhow!("no task at {path}"))?;

    if !manager.tree_mut().remove_task(index) {
        bail!("failed to remove task {path}");
    }
    ensure_saved(manager)?;

    println!("Removed task {path} '{title}' ({removed} task(s)).");
    Ok(())
}

#[instrument(skip(manager, renderer))]
fn cmd_show(
    manager: &TaskManager,
    renderer: &Renderer,
    path: &TaskPath,
    json: bool,
) -> anyhow::Result<()> {
    let tree = manager.tree();
    let index = resolve(tree, path)?;

    if json {
        let node = tree
            .node(index.id())
            .ok_or_else(|| anyhow!("no task at {path}"))?;
        println!("{}", serde_json::to_string_pretty(&node.to_json())?);
        return Ok(());
    }

    let data = tree.get_task_data(Some(index));
    renderer.print_task_info(path, &data, tree.row_count(Some(index)))
}

fn cmd_config(manager: &TaskManager, cfg: &Config, renderer: &Renderer) -> anyhow::Result<()> {
    let mut lines: Vec<String> = cfg.iter().map(|(k, v)| format!("{k}={v}")).collect();
    lines.sort();
    lines.push(format!("# tasks {}", manager.data_path().display()));
    for file in &cfg.loaded_files {
        lines.push(format!("# loaded {}", file.display()));
    }
    renderer.print_lines(lines)
}

fn resolve(tree: &TaskTree, path: &TaskPath) -> anyhow::Result<TaskIndex> {
    path.resolve(tree)
        .ok_or_else(|| anyhow!("no task at {path}"))
}

/// The observers already tried to save; surface a failure as an error
/// after one more attempt.
fn ensure_saved(manager: &TaskManager) -> anyhow::Result<()> {
    if manager.has_unsaved_changes() {
        manager
            .save()
            .with_context(|| format!("failed to save {}", manager.data_path().display()))?;
    }
    Ok(())
}

/// A completed task stays listed only while something below it is open.
fn has_open_work(tree: &TaskTree, id: NodeId) -> bool {
    let open = |id: NodeId| tree.task(id).is_some_and(|task| !task.completed);
    open(id) || tree.descendants(id).any(open)
}

/// Turns field flags into a sparse patch.
pub fn build_patch(fields: FieldArgs, now: NaiveDateTime) -> anyhow::Result<TaskPatch> {
    let mut patch = TaskPatch {
        description: fields.description,
        category: fields.category.map(|c| c.trim().to_string()),
        ..TaskPatch::default()
    };

    if let Some(raw) = fields.due {
        let due = parse_due_input(&raw, now).with_context(|| format!("invalid --due {raw:?}"))?;
        patch.due_date = Some(Some(due));
    }

    if let Some(raw) = fields.priority {
        let priority = Priority::parse(&raw).ok_or_else(|| {
            anyhow!("invalid priority {raw:?}: expected none, low, medium, high or 0-3")
        })?;
        patch.priority = Some(priority);
    }

    if !fields.tags.is_empty() {
        let mut tags: Vec<String> = Vec::new();
        for tag in fields
            .tags
            .iter()
            .flat_map(|raw| raw.split(','))
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
        {
            if !tags.iter().any(|existing| existing == tag) {
                tags.push(tag.to_string());
            }
        }
        patch.tags = Some(tags);
    }

    Ok(patch)
}
