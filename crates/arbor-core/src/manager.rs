use std::cell::{Cell, RefCell};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, info, instrument, warn};

use crate::datastore::{TaskStore, parse_document};
use crate::filter::{FilteredView, SearchFilter};
use crate::labels::{LabelEvent, LabelIndex};
use crate::tree::{TaskTree, TreeEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No data file yet; the tree was left alone.
    Missing,
    /// The file exists but could not be read.
    Unreadable,
    /// The file is not a JSON array of tasks.
    Malformed,
    Loaded { roots: usize, tasks: usize },
}

/// Owns the tree, its data file, the derived label lists and the search
/// text. Every `Changed` event from the tree saves the file and then
/// rebuilds the labels; a `Reset` only rebuilds the labels.
///
/// Single-threaded by construction: observers share state through
/// `Rc<RefCell<_>>`.
pub struct TaskManager {
    tree: TaskTree,
    store: Rc<TaskStore>,
    labels: Rc<RefCell<LabelIndex>>,
    unsaved: Rc<Cell<bool>>,
    view: FilteredView,
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("tree", &self.tree)
            .field("store", &self.store)
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Opens (creating if needed) `data_dir` and loads `tasks.json` from it.
    #[instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self::with_store(TaskStore::open(data_dir)?))
    }

    #[instrument(skip(store), fields(tasks = %store.tasks_path.display()))]
    pub fn with_store(store: TaskStore) -> Self {
        let store = Rc::new(store);
        let labels = Rc::new(RefCell::new(LabelIndex::new()));
        let unsaved = Rc::new(Cell::new(false));
        let mut tree = TaskTree::new();

        let persist = Rc::clone(&store);
        let persist_flag = Rc::clone(&unsaved);
        tree.subscribe(move |tree: &TaskTree, event: &TreeEvent| {
            if *event != TreeEvent::Changed {
                return;
            }
            match persist.write(&tree.to_json()) {
                Ok(()) => persist_flag.set(false),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "failed to save tasks");
                    persist_flag.set(true);
                }
            }
        });

        let index = Rc::clone(&labels);
        tree.subscribe(move |tree: &TaskTree, event: &TreeEvent| {
            if matches!(event, TreeEvent::Changed | TreeEvent::Reset) {
                index.borrow_mut().recompute(tree);
            }
        });

        let mut manager = Self {
            tree,
            store,
            labels,
            unsaved,
            view: FilteredView::new(),
        };
        manager.load();
        manager
    }

    pub fn tree(&self) -> &TaskTree {
        &self.tree
    }

    /// Mutations made through this borrow are saved and indexed by the
    /// manager's observers like any other.
    pub fn tree_mut(&mut self) -> &mut TaskTree {
        &mut self.tree
    }

    pub fn data_path(&self) -> &Path {
        &self.store.tasks_path
    }

    /// Replaces the tree from the data file. Never fails: problems are
    /// logged and reported through the outcome, and leave the tree as it
    /// was.
    #[instrument(skip(self))]
    pub fn load(&mut self) -> LoadOutcome {
        let text = match self.store.read() {
            Ok(Some(text)) => text,
            Ok(None) => {
                debug!(file = %self.store.tasks_path.display(), "no existing data file");
                return LoadOutcome::Missing;
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to open task file for reading");
                return LoadOutcome::Unreadable;
            }
        };

        let loaded = parse_document(&text).and_then(|document| self.tree.from_json(&document));
        if let Err(err) = loaded {
            warn!(
                file = %self.store.tasks_path.display(),
                error = %format!("{err:#}"),
                "invalid task data; ignoring file"
            );
            return LoadOutcome::Malformed;
        }

        let outcome = LoadOutcome::Loaded {
            roots: self.tree.roots().len(),
            tasks: self.tree.len(),
        };
        info!(file = %self.store.tasks_path.display(), ?outcome, "loaded tasks");
        outcome
    }

    /// Writes the current tree. Failure leaves memory untouched and is
    /// retried when the manager is dropped.
    #[instrument(skip(self))]
    pub fn save(&self) -> anyhow::Result<()> {
        let result = self.store.write(&self.tree.to_json());
        match &result {
            Ok(()) => {
                debug!(file = %self.store.tasks_path.display(), "saved tasks");
                self.unsaved.set(false);
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to save tasks");
                self.unsaved.set(true);
            }
        }
        result
    }

    /// True when the most recent save failed.
    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved.get()
    }

    // ---- derived labels --------------------------------------------------

    pub fn all_categories(&self) -> Vec<String> {
        self.labels.borrow().categories().to_vec()
    }

    pub fn all_tags(&self) -> Vec<String> {
        self.labels.borrow().tags().to_vec()
    }

    /// Listeners must not call back into the manager's label accessors.
    pub fn on_labels_changed<F>(&mut self, listener: F)
    where
        F: FnMut(LabelEvent) + 'static,
    {
        self.labels.borrow_mut().on_change(listener);
    }

    pub fn add_category(&mut self, category: &str) -> bool {
        self.labels.borrow_mut().add_category(category)
    }

    pub fn add_tag(&mut self, tag: &str) -> bool {
        self.labels.borrow_mut().add_tag(tag)
    }

    pub fn remove_category(&mut self, category: &str) -> bool {
        self.labels.borrow_mut().remove_category(category)
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.labels.borrow_mut().remove_tag(tag)
    }

    // ---- search ----------------------------------------------------------

    pub fn search_text(&self) -> &str {
        self.view.search_text()
    }

    pub fn set_search_text(&mut self, text: impl Into<String>) -> bool {
        self.view.set_search_text(text)
    }

    /// Filter over the current tree for the current search text.
    pub fn filtered(&self) -> SearchFilter<'_> {
        self.view.filter(&self.tree)
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        if self.unsaved.get() {
            info!("retrying unsaved tasks before shutdown");
            let _ = self.save();
        }
    }
}
