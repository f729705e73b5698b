use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, instrument};

use crate::tree::TaskTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelEvent {
    CategoriesChanged,
    TagsChanged,
}

/// Sorted, de-duplicated categories and tags in use across the tree.
///
/// The lists are a projection of the tree. `add_*`/`remove_*` let a UI
/// stage or retire a label by hand, but the next [`LabelIndex::recompute`]
/// rebuilds both lists from the tasks and drops anything no task uses.
#[derive(Default)]
pub struct LabelIndex {
    categories: Vec<String>,
    tags: Vec<String>,
    listeners: Vec<Box<dyn FnMut(LabelEvent)>>,
}

impl fmt::Debug for LabelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelIndex")
            .field("categories", &self.categories)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

impl LabelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn on_change<F>(&mut self, listener: F)
    where
        F: FnMut(LabelEvent) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn add_category(&mut self, category: &str) -> bool {
        if !insert_sorted(&mut self.categories, category) {
            return false;
        }
        self.notify(LabelEvent::CategoriesChanged);
        true
    }

    pub fn add_tag(&mut self, tag: &str) -> bool {
        if !insert_sorted(&mut self.tags, tag) {
            return false;
        }
        self.notify(LabelEvent::TagsChanged);
        true
    }

    pub fn remove_category(&mut self, category: &str) -> bool {
        if !remove_first(&mut self.categories, category) {
            return false;
        }
        self.notify(LabelEvent::CategoriesChanged);
        true
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        if !remove_first(&mut self.tags, tag) {
            return false;
        }
        self.notify(LabelEvent::TagsChanged);
        true
    }

    /// Rebuilds both lists from the tree and always notifies.
    #[instrument(skip(self, tree))]
    pub fn recompute(&mut self, tree: &TaskTree) {
        let (categories, tags) = collect_labels(tree);
        debug!(
            categories = categories.len(),
            tags = tags.len(),
            "recomputed label index"
        );
        self.categories = categories;
        self.tags = tags;
        self.notify(LabelEvent::CategoriesChanged);
        self.notify(LabelEvent::TagsChanged);
    }

    fn notify(&mut self, event: LabelEvent) {
        for listener in &mut self.listeners {
            listener(event);
        }
    }
}

/// Distinct non-empty categories and tags reachable from the roots,
/// each sorted.
pub fn collect_labels(tree: &TaskTree) -> (Vec<String>, Vec<String>) {
    let mut categories = BTreeSet::new();
    let mut tags = BTreeSet::new();

    for task in tree.walk().filter_map(|id| tree.task(id)) {
        if !task.category.is_empty() {
            categories.insert(task.category.clone());
        }
        tags.extend(task.tags.iter().filter(|tag| !tag.is_empty()).cloned());
    }

    (categories.into_iter().collect(), tags.into_iter().collect())
}

fn insert_sorted(list: &mut Vec<String>, label: &str) -> bool {
    if list.iter().any(|existing| existing == label) {
        return false;
    }
    list.push(label.to_string());
    list.sort();
    true
}

fn remove_first(list: &mut Vec<String>, label: &str) -> bool {
    match list.iter().position(|existing| existing == label) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::task::TaskPatch;

    fn tree_with_labels() -> TaskTree {
        let mut tree = TaskTree::new();
        let report = tree.add_task("Write report", None).expect("report");
        let house = tree.add_task("Clean house", None).expect("house");
        let kitchen = tree.add_task("Kitchen", Some(house)).expect("kitchen");
        tree.update_task(
            report,
            &TaskPatch {
                category: Some("Work".into()),
                tags: Some(vec!["q4".into(), "".into()]),
                ..TaskPatch::default()
            },
        );
        tree.update_task(
            house,
            &TaskPatch {
                category: Some("Home".into()),
                ..TaskPatch::default()
            },
        );
        tree.update_task(
            kitchen,
            &TaskPatch {
                category: Some("Home".into()),
                tags: Some(vec!["chores".into(), "q4".into()]),
                ..TaskPatch::default()
            },
        );
        tree
    }

    #[test]
    fn collects_sorted_distinct_non_empty_labels() {
        let (categories, tags) = collect_labels(&tree_with_labels());
        assert_eq!(categories, vec!["Home", "Work"]);
        assert_eq!(tags, vec!["chores", "q4"]);
    }

    #[test]
    fn manual_labels_are_transient() {
        let tree = tree_with_labels();
        let mut index = LabelIndex::new();
        index.recompute(&tree);

        assert!(index.add_category("Errands"));
        assert!(!index.add_category("Errands"));
        assert_eq!(index.categories(), ["Errands", "Home", "Work"]);
        assert!(index.remove_tag("q4"));
        assert!(!index.remove_tag("q4"));

        index.recompute(&tree);
        assert_eq!(index.categories(), ["Home", "Work"]);
        assert_eq!(index.tags(), ["chores", "q4"]);
    }

    #[test]
    fn notifies_listeners() {
        let heard = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&heard);
        let mut index = LabelIndex::new();
        index.on_change(move |event| sink.borrow_mut().push(event));

        index.add_tag("a");
        index.remove_category("missing");
        index.recompute(&TaskTree::new());
        assert_eq!(
            *heard.borrow(),
            vec![
                LabelEvent::TagsChanged,
                LabelEvent::CategoriesChanged,
                LabelEvent::TagsChanged
            ]
        );
        assert!(index.tags().is_empty());
    }
}
