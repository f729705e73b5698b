use std::fmt;

use tracing::{
  debug,
  trace
};

use crate::tree::{
  NodeId,
  TaskIndex,
  TaskTree
};

/// Visibility predicate over a borrowed
/// tree for one search query.
///
/// A task is visible when the query is
/// empty, when it matches, or when any
/// descendant matches. Ancestors of a
/// match therefore stay visible so the
/// tree keeps its context. Nothing is
/// cached: build a new filter whenever
/// the query or the tree changes.
#[derive(Debug, Clone)]
pub struct SearchFilter<'a> {
  tree:   &'a TaskTree,
  needle: String
}

impl<'a> SearchFilter<'a> {
  pub fn new(
    tree: &'a TaskTree,
    query: &str
  ) -> Self {
    Self {
      tree,
      needle: query.to_lowercase()
    }
  }

  pub fn tree(&self) -> &'a TaskTree {
    self.tree
  }

  pub fn is_passthrough(&self) -> bool {
    self.needle.is_empty()
  }

  pub fn accepts(
    &self,
    id: NodeId
  ) -> bool {
    let Some(task) = self.tree.task(id)
    else {
      return false;
    };
    if self.needle.is_empty()
      || task
        .matches_lowered(&self.needle)
    {
      return true;
    }

    self
      .tree
      .child_ids(Some(id))
      .iter()
      .any(|child| self.accepts(*child))
  }

  /// Accepted children of `parent`, as
  /// source-model indexes, in order.
  pub fn visible_rows(
    &self,
    parent: Option<TaskIndex>
  ) -> Vec<TaskIndex> {
    (0..self.tree.row_count(parent))
      .filter_map(|row| {
        self.tree.index(row, parent)
      })
      .filter(|index| {
        self.accepts(index.id())
      })
      .collect()
  }

  /// Every visible task, depth-first.
  /// Hidden subtrees are skipped whole:
  /// a hidden node cannot have a
  /// visible descendant.
  #[tracing::instrument(skip(self), fields(needle = %self.needle))]
  pub fn visible(&self) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeId> = self
      .tree
      .roots()
      .iter()
      .rev()
      .copied()
      .collect();

    while let Some(id) = stack.pop() {
      if !self.accepts(id) {
        trace!(?id, "pruned hidden subtree");
        continue;
      }
      out.push(id);
      stack.extend(
        self
          .tree
          .child_ids(Some(id))
          .iter()
          .rev()
          .copied()
      );
    }

    debug!(
      visible = out.len(),
      total = self.tree.len(),
      "computed visible tasks"
    );
    out
  }
}

/// Search text owned by the UI, with a
/// change signal.
#[derive(Default)]
pub struct FilteredView {
  search_text: String,
  listeners:   Vec<Box<dyn FnMut(&str)>>
}

impl fmt::Debug for FilteredView {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.debug_struct("FilteredView")
      .field(
        "search_text",
        &self.search_text
      )
      .field(
        "listeners",
        &self.listeners.len()
      )
      .finish()
  }
}

impl FilteredView {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn search_text(&self) -> &str {
    &self.search_text
  }

  /// Returns whether the text changed.
  /// Listeners only hear about real
  /// changes.
  pub fn set_search_text(
    &mut self,
    text: impl Into<String>
  ) -> bool {
    let text = text.into();
    if text == self.search_text {
      return false;
    }
    debug!(search = %text, "search text changed");
    self.search_text = text;
    for listener in &mut self.listeners
    {
      listener(&self.search_text);
    }
    true
  }

  pub fn on_search_text_changed<F>(
    &mut self,
    listener: F
  ) where
    F: FnMut(&str) + 'static
  {
    self
      .listeners
      .push(Box::new(listener));
  }

  pub fn filter<'a>(
    &self,
    tree: &'a TaskTree
  ) -> SearchFilter<'a> {
    SearchFilter::new(
      tree,
      &self.search_text
    )
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;

  use super::{
    FilteredView,
    SearchFilter
  };
  use crate::task::TaskPatch;
  use crate::tree::TaskTree;

  fn personal_tree() -> TaskTree {
    let mut tree = TaskTree::new();
    let personal = tree
      .add_task("Personal", None)
      .expect("personal");
    tree
      .add_task(
        "Call mom",
        Some(personal)
      )
      .expect("call");
    tree
      .add_task(
        "Renew passport",
        Some(personal)
      )
      .expect("passport");
    let work = tree
      .add_task("Work", None)
      .expect("work");
    tree
      .add_task(
        "Expense report",
        Some(work)
      )
      .expect("expense");
    tree
  }

  fn visible_titles(
    tree: &TaskTree,
    query: &str
  ) -> Vec<String> {
    SearchFilter::new(tree, query)
      .visible()
      .into_iter()
      .filter_map(|id| tree.task(id))
      .map(|task| task.title.clone())
      .collect()
  }

  #[test]
  fn ancestors_of_matches_stay_visible()
  {
    let tree = personal_tree();
    assert_eq!(
      visible_titles(&tree, "mom"),
      vec!["Personal", "Call mom"]
    );
  }

  #[test]
  fn empty_query_shows_everything() {
    let tree = personal_tree();
    assert_eq!(
      visible_titles(&tree, "").len(),
      tree.len()
    );
  }

  #[test]
  fn matches_tags_and_category_deeply()
  {
    let mut tree = personal_tree();
    let work = tree
      .index(1, None)
      .expect("work");
    let expense = tree
      .index(0, Some(work))
      .expect("expense");
    tree.update_task(
      expense,
      &TaskPatch {
        tags: Some(vec![
          "Finance".to_string(),
        ]),
        ..TaskPatch::default()
      }
    );

    let filter =
      SearchFilter::new(&tree, "FIN");
    assert!(filter.accepts(work.id()));
    assert!(
      filter.accepts(expense.id())
    );
    assert_eq!(
      filter.visible_rows(None),
      vec![work]
    );
    assert_eq!(
      filter.visible_rows(Some(work)),
      vec![expense]
    );
  }

  #[test]
  fn stale_ids_are_never_visible() {
    let mut tree = personal_tree();
    let work = tree
      .index(1, None)
      .expect("work");
    tree.remove_task(work);
    assert!(
      !SearchFilter::new(&tree, "")
        .accepts(work.id())
    );
  }

  #[test]
  fn search_text_notifies_on_change_only()
  {
    let heard =
      Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&heard);
    let mut view = FilteredView::new();
    view.on_search_text_changed(
      move |text| {
        sink
          .borrow_mut()
          .push(text.to_string())
      }
    );

    assert!(view.set_search_text("mom"));
    assert!(!view.set_search_text("mom"));
    assert!(view.set_search_text(""));
    assert_eq!(
      *heard.borrow(),
      vec!["mom".to_string(), String::new()]
    );

    let tree = personal_tree();
    assert!(
      view.filter(&tree).is_passthrough()
    );
  }
}
