use std::fmt;

use anyhow::anyhow;
use serde_json::Value;
use tracing::{debug, trace};

use crate::task::{FieldValue, Task, TaskData, TaskNode, TaskPatch, TaskRole};

/// Arena handle. The generation makes a handle to a removed node resolve
/// to nothing even after its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    slot: u32,
    generation: u32,
}

/// Model index handed to UI bindings: a node plus its row under its parent.
/// The synthetic root never gets one; "no index" is spelled `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskIndex {
    row: usize,
    id: NodeId,
}

impl TaskIndex {
    pub fn row(&self) -> usize {
        self.row
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    RowsInserted {
        parent: Option<TaskIndex>,
        first: usize,
        last: usize,
    },
    RowsRemoved {
        parent: Option<TaskIndex>,
        first: usize,
        last: usize,
    },
    FieldsChanged {
        index: TaskIndex,
        roles: Vec<TaskRole>,
    },
    /// The whole forest was replaced.
    Reset,
    /// Emitted after every mutation's specific event.
    Changed,
}

pub trait TreeObserver {
    fn on_event(&mut self, tree: &TaskTree, event: &TreeEvent);
}

impl<F> TreeObserver for F
where
    F: FnMut(&TaskTree, &TreeEvent),
{
    fn on_event(&mut self, tree: &TaskTree, event: &TreeEvent) {
        self(tree, event)
    }
}

#[derive(Debug)]
struct Entry {
    task: Task,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

pub struct TaskTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    live: usize,
    observers: Vec<Box<dyn TreeObserver>>,
}

impl fmt::Debug for TaskTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTree")
            .field("tasks", &self.live)
            .field("roots", &self.roots().len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Default for TaskTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTree {
    pub fn new() -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                slot: 0,
                generation: 0,
            },
            live: 0,
            observers: Vec::new(),
        };
        tree.root = tree.alloc(Task::default(), None);
        tree
    }

    /// Observers run synchronously, in registration order, after each
    /// mutation has completed.
    pub fn subscribe<O>(&mut self, observer: O)
    where
        O: TreeObserver + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    // ---- traversal -------------------------------------------------------

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn roots(&self) -> &[NodeId] {
        self.child_ids(None)
    }

    /// Children of `parent`, or of the synthetic root for `None`. A stale
    /// handle has no children.
    pub fn child_ids(&self, parent: Option<NodeId>) -> &[NodeId] {
        let id = parent.unwrap_or(self.root);
        self.entry(id).map(|e| e.children.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id != self.root && self.entry(id).is_some()
    }

    pub fn task(&self, id: NodeId) -> Option<&Task> {
        if id == self.root {
            return None;
        }
        self.entry(id).map(|e| &e.task)
    }

    /// Parent of a node; `None` for top-level tasks and stale handles.
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.entry(id)
            .and_then(|e| e.parent)
            .filter(|parent| *parent != self.root)
    }

    /// Position within the parent's children; 0 without a parent.
    pub fn row(&self, id: NodeId) -> usize {
        let Some(parent) = self.entry(id).and_then(|e| e.parent) else {
            return 0;
        };
        self.child_ids(Some(parent))
            .iter()
            .position(|child| *child == id)
            .unwrap_or(0)
    }

    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cursor = self.parent_of(id);
        while let Some(parent) = cursor {
            depth += 1;
            cursor = self.parent_of(parent);
        }
        depth
    }

    /// Depth-first, pre-order walk over every task.
    pub fn walk(&self) -> Walk<'_> {
        Walk::new(self, self.roots())
    }

    /// Depth-first walk over the strict descendants of `id`.
    pub fn descendants(&self, id: NodeId) -> Walk<'_> {
        Walk::new(self, self.child_ids(Some(id)))
    }

    pub fn index_of(&self, id: NodeId) -> Option<TaskIndex> {
        self.contains(id).then(|| TaskIndex {
            row: self.row(id),
            id,
        })
    }

    // ---- model surface ---------------------------------------------------

    pub fn row_count(&self, parent: Option<TaskIndex>) -> usize {
        match self.resolve_parent(parent) {
            Some(id) => self.child_ids(Some(id)).len(),
            None => 0,
        }
    }

    pub fn index(&self, row: usize, parent: Option<TaskIndex>) -> Option<TaskIndex> {
        let parent = self.resolve_parent(parent)?;
        let id = *self.child_ids(Some(parent)).get(row)?;
        Some(TaskIndex { row, id })
    }

    pub fn parent(&self, index: TaskIndex) -> Option<TaskIndex> {
        self.parent_of(index.id).and_then(|p| self.index_of(p))
    }

    pub fn data(&self, index: TaskIndex, role: TaskRole) -> Option<FieldValue> {
        let task = self.task(index.id)?;
        let child_count = self.child_ids(Some(index.id)).len();
        match role {
            TaskRole::HasChildren => Some(FieldValue::Flag(child_count > 0)),
            TaskRole::ChildCount => Some(FieldValue::Count(child_count)),
            _ => task.value(role),
        }
    }

    /// Writes one field by role. Returns false when nothing was written.
    #[tracing::instrument(skip(self, value))]
    pub fn set_data(&mut self, index: TaskIndex, role: TaskRole, value: FieldValue) -> bool {
        if !self.contains(index.id) {
            return false;
        }
        let written = match (role, value) {
            (TaskRole::Completed, FieldValue::Flag(flag)) => {
                self.cascade_completed(index.id, flag);
                true
            }
            (role, value) => self
                .entry_mut(index.id)
                .map(|e| e.task.set_field(role, value))
                .unwrap_or(false),
        };
        if !written {
            trace!("rejected field write");
            return false;
        }

        let index = self.refresh(index);
        self.emit(TreeEvent::FieldsChanged {
            index,
            roles: vec![role],
        });
        self.emit(TreeEvent::Changed);
        true
    }

    /// Appends a new task under `parent` (top level for `None`).
    #[tracing::instrument(skip(self, title))]
    pub fn add_task(&mut self, title: &str, parent: Option<TaskIndex>) -> Option<TaskIndex> {
        let parent_id = self.resolve_parent(parent)?;
        let row = self.child_ids(Some(parent_id)).len();
        self.insert_node(parent_id, row, TaskNode::new(title))
    }

    /// Inserts a detached subtree at `position` under `parent`.
    #[tracing::instrument(skip(self, node))]
    pub fn insert_task(
        &mut self,
        parent: Option<TaskIndex>,
        position: usize,
        node: TaskNode,
    ) -> Option<TaskIndex> {
        let parent_id = self.resolve_parent(parent)?;
        if position > self.child_ids(Some(parent_id)).len() {
            debug!(position, "insert position out of range; ignoring");
            return None;
        }
        self.insert_node(parent_id, position, node)
    }

    #[tracing::instrument(skip(self))]
    pub fn remove_task(&mut self, index: TaskIndex) -> bool {
        if !self.contains(index.id) {
            debug!("remove of unknown task ignored");
            return false;
        }
        let parent_id = self
            .entry(index.id)
            .and_then(|e| e.parent)
            .unwrap_or(self.root);
        let row = self.row(index.id);

        if let Some(parent) = self.entry_mut(parent_id) {
            parent.children.remove(row);
        }
        self.free_subtree(index.id);

        let parent = self.index_of(parent_id);
        self.emit(TreeEvent::RowsRemoved {
            parent,
            first: row,
            last: row,
        });
        self.emit(TreeEvent::Changed);
        true
    }

    /// Applies the present fields of `patch`. Notifies even when nothing
    /// actually differed.
    #[tracing::instrument(skip(self, patch))]
    pub fn update_task(&mut self, index: TaskIndex, patch: &TaskPatch) -> bool {
        if !self.contains(index.id) {
            return false;
        }
        if let Some(entry) = self.entry_mut(index.id) {
            entry.task.apply_scalars(patch);
        }
        if let Some(completed) = patch.completed {
            self.cascade_completed(index.id, completed);
        }

        let index = self.refresh(index);
        self.emit(TreeEvent::FieldsChanged {
            index,
            roles: patch.roles(),
        });
        self.emit(TreeEvent::Changed);
        true
    }

    pub fn set_completed(&mut self, index: TaskIndex, completed: bool) -> bool {
        self.set_data(index, TaskRole::Completed, FieldValue::Flag(completed))
    }

    /// Dense snapshot of a task, or defaults for a missing index.
    pub fn get_task_data(&self, index: Option<TaskIndex>) -> TaskData {
        index
            .and_then(|ix| self.task(ix.id))
            .map(TaskData::from)
            .unwrap_or_default()
    }

    // ---- serialization ---------------------------------------------------

    /// Detached copy of the subtree rooted at `id`.
    pub fn node(&self, id: NodeId) -> Option<TaskNode> {
        let entry = self.entry(id).filter(|_| id != self.root)?;
        let children = entry
            .children
            .iter()
            .filter_map(|child| self.node(*child))
            .collect();
        Some(TaskNode::with_children(entry.task.clone(), children))
    }

    pub fn to_nodes(&self) -> Vec<TaskNode> {
        self.roots().iter().filter_map(|id| self.node(*id)).collect()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.to_nodes().iter().map(TaskNode::to_json).collect())
    }

    /// Replaces the forest from a JSON array. Anything else is rejected and
    /// leaves the tree as it was.
    #[tracing::instrument(skip(self, document))]
    pub fn from_json(&mut self, document: &Value) -> anyhow::Result<()> {
        let items = document
            .as_array()
            .ok_or_else(|| anyhow!("task document must be a JSON array"))?;
        let nodes = items.iter().map(TaskNode::from_json).collect();
        self.replace(nodes);
        Ok(())
    }

    /// Drops every task and builds the given forest in its place.
    pub fn replace(&mut self, nodes: Vec<TaskNode>) {
        let old_roots = self
            .entry_mut(self.root)
            .map(|e| std::mem::take(&mut e.children))
            .unwrap_or_default();
        for id in old_roots {
            self.free_subtree(id);
        }
        for node in nodes {
            let row = self.child_ids(None).len();
            self.attach(self.root, row, node);
        }
        debug!(tasks = self.live, "replaced task forest");
        self.emit(TreeEvent::Reset);
    }

    // ---- internals -------------------------------------------------------

    fn resolve_parent(&self, parent: Option<TaskIndex>) -> Option<NodeId> {
        match parent {
            None => Some(self.root),
            Some(index) if self.contains(index.id) => Some(index.id),
            Some(_) => None,
        }
    }

    fn refresh(&self, index: TaskIndex) -> TaskIndex {
        TaskIndex {
            row: self.row(index.id),
            id: index.id,
        }
    }

    fn entry(&self, id: NodeId) -> Option<&Entry> {
        self.slots
            .get(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: NodeId) -> Option<&mut Entry> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn alloc(&mut self, task: Task, parent: Option<NodeId>) -> NodeId {
        let entry = Entry {
            task,
            parent,
            children: Vec::new(),
        };
        if parent.is_some() {
            self.live += 1;
        }
        if let Some(slot) = self.free.pop() {
            let cell = &mut self.slots[slot as usize];
            cell.entry = Some(entry);
            return NodeId {
                slot,
                generation: cell.generation,
            };
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        NodeId {
            slot,
            generation: 0,
        }
    }

    fn attach(&mut self, parent: NodeId, position: usize, node: TaskNode) -> NodeId {
        let TaskNode { task, children } = node;
        let id = self.alloc(task, Some(parent));
        if let Some(entry) = self.entry_mut(parent) {
            entry.children.insert(position, id);
        }
        for (row, child) in children.into_iter().enumerate() {
            self.attach(id, row, child);
        }
        id
    }

    fn insert_node(&mut self, parent_id: NodeId, row: usize, node: TaskNode) -> Option<TaskIndex> {
        let id = self.attach(parent_id, row, node);
        let parent = self.index_of(parent_id);
        self.emit(TreeEvent::RowsInserted {
            parent,
            first: row,
            last: row,
        });
        self.emit(TreeEvent::Changed);
        Some(TaskIndex { row, id })
    }

    fn free_subtree(&mut self, id: NodeId) {
        let Some(slot) = self.slots.get_mut(id.slot as usize) else {
            return;
        };
        if slot.generation != id.generation {
            return;
        }
        let Some(entry) = slot.entry.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.slot);
        self.live = self.live.saturating_sub(1);
        for child in entry.children {
            self.free_subtree(child);
        }
    }

    fn cascade_completed(&mut self, id: NodeId, completed: bool) {
        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        entry.task.completed = completed;
        if !completed {
            return;
        }
        let children = entry.children.clone();
        for child in children {
            self.cascade_completed(child, true);
        }
    }

    fn emit(&mut self, event: TreeEvent) {
        trace!(?event, observers = self.observers.len(), "emitting tree event");
        let mut observers = std::mem::take(&mut self.observers);
        for observer in &mut observers {
            observer.on_event(self, &event);
        }
        self.observers = observers;
    }
}

pub struct Walk<'a> {
    tree: &'a TaskTree,
    stack: Vec<NodeId>,
}

impl<'a> Walk<'a> {
    fn new(tree: &'a TaskTree, start: &[NodeId]) -> Self {
        Self {
            tree,
            stack: start.iter().rev().copied().collect(),
        }
    }
}

impl Iterator for Walk<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.child_ids(Some(id)).iter().rev().copied());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::task::Priority;

    fn titles(tree: &TaskTree) -> Vec<String> {
        tree.walk()
            .filter_map(|id| tree.task(id))
            .map(|t| t.title.clone())
            .collect()
    }

    fn recorder(tree: &mut TaskTree) -> Rc<RefCell<Vec<TreeEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        tree.subscribe(move |_: &TaskTree, event: &TreeEvent| {
            sink.borrow_mut().push(event.clone());
        });
        events
    }

    #[test]
    fn add_task_to_empty_tree_serializes_defaults() {
        let mut tree = TaskTree::new();
        tree.add_task("Buy milk", None).expect("added");

        assert_eq!(
            tree.to_json(),
            json!([{
                "title": "Buy milk",
                "description": "",
                "completed": false,
                "dueDate": "",
                "priority": 0,
                "category": "",
                "tags": [],
                "children": []
            }])
        );
    }

    #[test]
    fn add_emits_insert_then_changed() {
        let mut tree = TaskTree::new();
        let parent = tree.add_task("Parent", None).expect("parent");
        let events = recorder(&mut tree);

        let child = tree.add_task("Child", Some(parent)).expect("child");
        assert_eq!(child.row(), 0);
        assert_eq!(
            *events.borrow(),
            vec![
                TreeEvent::RowsInserted {
                    parent: Some(parent),
                    first: 0,
                    last: 0
                },
                TreeEvent::Changed
            ]
        );
    }

    #[test]
    fn structural_queries_agree() {
        let mut tree = TaskTree::new();
        let a = tree.add_task("A", None).expect("a");
        let b = tree.add_task("B", None).expect("b");
        let b1 = tree.add_task("B1", Some(b)).expect("b1");
        let b2 = tree.add_task("B2", Some(b)).expect("b2");

        assert_eq!(tree.row_count(None), 2);
        assert_eq!(tree.row_count(Some(b)), 2);
        assert_eq!(tree.index(1, Some(b)), Some(b2));
        assert_eq!(tree.index(2, Some(b)), None);
        assert_eq!(tree.parent(b1), Some(b));
        assert_eq!(tree.parent(a), None);
        assert_eq!(tree.row(b2.id()), 1);
        assert_eq!(tree.depth(b2.id()), 1);
        assert_eq!(tree.data(b, TaskRole::ChildCount), Some(FieldValue::Count(2)));
        assert_eq!(tree.data(a, TaskRole::HasChildren), Some(FieldValue::Flag(false)));
        assert_eq!(titles(&tree), vec!["A", "B", "B1", "B2"]);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn rows_follow_removals() {
        let mut tree = TaskTree::new();
        let a = tree.add_task("A", None).expect("a");
        let b = tree.add_task("B", None).expect("b");
        tree.add_task("C", None).expect("c");
        tree.add_task("A1", Some(a)).expect("a1");

        assert!(tree.remove_task(a));
        assert_eq!(tree.row(b.id()), 0);
        assert_eq!(tree.len(), 2);
        assert!(tree.task(a.id()).is_none());
        assert_eq!(titles(&tree), vec!["B", "C"]);
    }

    #[test]
    fn stale_indices_are_no_ops() {
        let mut tree = TaskTree::new();
        let gone = tree.add_task("Gone", None).expect("gone");
        tree.add_task("Kept", None).expect("kept");
        assert!(tree.remove_task(gone));

        // The freed slot is reused by the next allocation.
        let fresh = tree.add_task("Fresh", None).expect("fresh");
        assert_ne!(fresh.id(), gone.id());

        let before = tree.to_json();
        let events = recorder(&mut tree);
        assert!(!tree.remove_task(gone));
        assert!(!tree.update_task(gone, &TaskPatch::default()));
        assert!(!tree.set_data(gone, TaskRole::Title, FieldValue::Text("x".into())));
        assert!(tree.add_task("Orphan", Some(gone)).is_none());
        assert_eq!(tree.get_task_data(Some(gone)), TaskData::default());
        assert_eq!(tree.to_json(), before);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn insert_out_of_range_leaves_tree_unchanged() {
        let mut tree = TaskTree::new();
        let a = tree.add_task("A", None).expect("a");
        let before = tree.to_json();

        assert!(tree.insert_task(Some(a), 1, TaskNode::new("late")).is_none());
        assert!(tree.insert_task(None, 5, TaskNode::new("late")).is_none());
        assert_eq!(tree.to_json(), before);

        let mut sub = TaskNode::new("First");
        sub.append_child(TaskNode::new("Nested"));
        let first = tree.insert_task(None, 0, sub).expect("inserted");
        assert_eq!(first.row(), 0);
        assert_eq!(tree.row(a.id()), 1);
        assert_eq!(tree.row_count(Some(first)), 1);
    }

    #[test]
    fn completing_via_update_cascades() {
        let mut tree = TaskTree::new();
        let groceries = tree.add_task("Groceries", None).expect("groceries");
        let milk = tree.add_task("Milk", Some(groceries)).expect("milk");
        tree.add_task("Oat", Some(milk)).expect("oat");

        let patch = TaskPatch {
            completed: Some(true),
            ..TaskPatch::default()
        };
        assert!(tree.update_task(groceries, &patch));
        assert!(tree.walk().filter_map(|id| tree.task(id)).all(|t| t.completed));

        assert!(tree.set_completed(groceries, false));
        assert!(!tree.get_task_data(Some(groceries)).completed);
        assert!(tree.get_task_data(Some(milk)).completed);
    }

    #[test]
    fn update_only_touches_present_fields_and_always_notifies() {
        let mut tree = TaskTree::new();
        let task = tree.add_task("Write report", None).expect("task");
        tree.update_task(
            task,
            &TaskPatch {
                category: Some("Work".into()),
                priority: Some(Priority::High),
                ..TaskPatch::default()
            },
        );
        let events = recorder(&mut tree);

        tree.update_task(task, &TaskPatch::default());
        let data = tree.get_task_data(Some(task));
        assert_eq!(data.title, "Write report");
        assert_eq!(data.category, "Work");
        assert_eq!(data.priority, Priority::High);
        assert_eq!(
            *events.borrow(),
            vec![
                TreeEvent::FieldsChanged {
                    index: task,
                    roles: vec![]
                },
                TreeEvent::Changed
            ]
        );
    }

    #[test]
    fn set_data_rejects_read_only_roles() {
        let mut tree = TaskTree::new();
        let task = tree.add_task("x", None).expect("task");
        assert!(!tree.set_data(task, TaskRole::ChildCount, FieldValue::Count(3)));
        assert!(tree.set_data(task, TaskRole::Tags, FieldValue::Labels(vec!["t".into()])));
        assert_eq!(tree.get_task_data(Some(task)).tags, vec!["t".to_string()]);
    }

    #[test]
    fn from_json_replaces_and_round_trips() {
        let mut tree = TaskTree::new();
        let old = tree.add_task("Old", None).expect("old");
        let document = json!([
            {"title": "Home", "category": "Home", "tags": ["a"], "children": [
                {"title": "Sweep", "completed": true, "priority": 2,
                 "dueDate": "2026-10-20T09:30:00"}
            ]},
            {"title": "Work"}
        ]);
        let events = recorder(&mut tree);

        tree.from_json(&document).expect("array document");
        assert!(!tree.contains(old.id()));
        assert_eq!(titles(&tree), vec!["Home", "Sweep", "Work"]);
        assert_eq!(*events.borrow(), vec![TreeEvent::Reset]);

        let mut copy = TaskTree::new();
        copy.from_json(&tree.to_json()).expect("round trip");
        assert_eq!(copy.to_json(), tree.to_json());
        assert_eq!(copy.to_nodes(), tree.to_nodes());
    }

    #[test]
    fn non_array_document_is_rejected() {
        let mut tree = TaskTree::new();
        tree.add_task("Keep", None).expect("keep");
        let before = tree.to_json();
        assert!(tree.from_json(&json!({"title": "nope"})).is_err());
        assert_eq!(tree.to_json(), before);
    }

    #[test]
    fn observers_see_post_mutation_tree() {
        let mut tree = TaskTree::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        tree.subscribe(move |tree: &TaskTree, event: &TreeEvent| {
            if *event == TreeEvent::Changed {
                sink.borrow_mut().push(tree.len());
            }
        });

        let a = tree.add_task("A", None).expect("a");
        tree.add_task("B", Some(a)).expect("b");
        tree.remove_task(a);
        assert_eq!(*seen.borrow(), vec![1, 2, 0]);
    }
}
