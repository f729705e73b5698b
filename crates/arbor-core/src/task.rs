use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datetime::due_date_serde;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(into = "u8")]
pub enum Priority {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::None, Priority::Low, Priority::Medium, Priority::High];

    /// Maps the persisted integer; anything outside `0..=3` degrades to `None`.
    pub fn from_level(level: i64) -> Self {
        match level {
            1 => Priority::Low,
            2 => Priority::Medium,
            3 => Priority::High,
            _ => Priority::None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Priority::None => 0,
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::None => "none",
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Accepts a label (`high`, `h`) or a level (`3`).
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw.trim().to_ascii_lowercase();
        if let Ok(level) = token.parse::<i64>() {
            return (0..=3).contains(&level).then(|| Priority::from_level(level));
        }
        match token.as_str() {
            "none" | "n" | "" => Some(Priority::None),
            "low" | "l" => Some(Priority::Low),
            "medium" | "med" | "m" => Some(Priority::Medium),
            "high" | "h" => Some(Priority::High),
            _ => None,
        }
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.level()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Scalar fields of one task. Structure (parent, children) lives in
/// [`crate::tree::TaskTree`] or in a detached [`TaskNode`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, deserialize_with = "lenient::text")]
    pub title: String,

    #[serde(default, deserialize_with = "lenient::text")]
    pub description: String,

    #[serde(default, deserialize_with = "lenient::flag")]
    pub completed: bool,

    #[serde(default, with = "due_date_serde")]
    pub due_date: Option<NaiveDateTime>,

    #[serde(default, deserialize_with = "lenient::priority")]
    pub priority: Priority,

    #[serde(default, deserialize_with = "lenient::text")]
    pub category: String,

    #[serde(default, deserialize_with = "lenient::labels")]
    pub tags: Vec<String>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn set_due_date(&mut self, due: Option<NaiveDateTime>) {
        self.due_date = due;
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags = tags;
    }

    pub fn set_category(&mut self, category: impl Into<String>) {
        self.category = category.into();
    }

    /// Case-insensitive substring match over title, description, category
    /// and tags. An empty query matches everything.
    pub fn matches_search(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        let needle = query.to_lowercase();
        self.matches_lowered(&needle)
    }

    pub(crate) fn matches_lowered(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
            || self.category.to_lowercase().contains(needle)
            || self.tags.iter().any(|tag| tag.to_lowercase().contains(needle))
    }

    /// Value of an editable role. Structural roles need the tree.
    pub fn value(&self, role: TaskRole) -> Option<FieldValue> {
        let value = match role {
            TaskRole::Title => FieldValue::Text(self.title.clone()),
            TaskRole::Description => FieldValue::Text(self.description.clone()),
            TaskRole::Completed => FieldValue::Flag(self.completed),
            TaskRole::DueDate => FieldValue::Due(self.due_date),
            TaskRole::Priority => FieldValue::Priority(self.priority),
            TaskRole::Tags => FieldValue::Labels(self.tags.clone()),
            TaskRole::Category => FieldValue::Text(self.category.clone()),
            TaskRole::HasChildren | TaskRole::ChildCount => return None,
        };
        Some(value)
    }

    /// Plain field write by role; completion does not cascade here.
    /// Returns false for read-only roles or a value of the wrong kind.
    pub fn set_field(&mut self, role: TaskRole, value: FieldValue) -> bool {
        match (role, value) {
            (TaskRole::Title, FieldValue::Text(text)) => self.set_title(text),
            (TaskRole::Description, FieldValue::Text(text)) => self.set_description(text),
            (TaskRole::Category, FieldValue::Text(text)) => self.set_category(text),
            (TaskRole::Completed, FieldValue::Flag(flag)) => self.completed = flag,
            (TaskRole::DueDate, FieldValue::Due(due)) => self.set_due_date(due),
            (TaskRole::Priority, FieldValue::Priority(priority)) => self.set_priority(priority),
            (TaskRole::Tags, FieldValue::Labels(tags)) => self.set_tags(tags),
            _ => return false,
        }
        true
    }

    /// Applies every present patch field except `completed`, which the
    /// caller handles so it can cascade.
    pub(crate) fn apply_scalars(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.set_title(title.clone());
        }
        if let Some(description) = &patch.description {
            self.set_description(description.clone());
        }
        if let Some(due) = patch.due_date {
            self.set_due_date(due);
        }
        if let Some(priority) = patch.priority {
            self.set_priority(priority);
        }
        if let Some(tags) = &patch.tags {
            self.set_tags(tags.clone());
        }
        if let Some(category) = &patch.category {
            self.set_category(category.clone());
        }
    }
}

/// A detached, owned subtree: the unit of serialization and insertion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskNode {
    #[serde(flatten)]
    pub task: Task,

    #[serde(default, deserialize_with = "lenient::children")]
    pub children: Vec<TaskNode>,
}

impl TaskNode {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            task: Task::new(title),
            children: vec![],
        }
    }

    pub fn with_children(task: Task, children: Vec<TaskNode>) -> Self {
        Self { task, children }
    }

    /// Completing cascades to the whole subtree; un-completing only
    /// touches this node.
    pub fn set_completed(&mut self, completed: bool) {
        self.task.completed = completed;
        if completed {
            for child in &mut self.children {
                child.set_completed(true);
            }
        }
    }

    pub fn append_child(&mut self, child: TaskNode) {
        self.children.push(child);
    }

    pub fn insert_child(&mut self, position: usize, child: TaskNode) -> bool {
        if position > self.children.len() {
            return false;
        }
        self.children.insert(position, child);
        true
    }

    pub fn remove_child(&mut self, position: usize) -> bool {
        if position >= self.children.len() {
            return false;
        }
        self.children.remove(position);
        true
    }

    pub fn child(&self, row: usize) -> Option<&TaskNode> {
        self.children.get(row)
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Nodes in this subtree, including this one.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(TaskNode::subtree_len).sum::<usize>()
    }

    pub fn matches_search(&self, query: &str) -> bool {
        self.task.matches_search(query)
    }

    pub fn to_json(&self) -> Value {
        // Every field is a plain string, bool, integer or array.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Rebuilds a subtree from any JSON value. Missing or ill-typed
    /// fields take their defaults and a non-object yields an empty node.
    pub fn from_json(value: &Value) -> Self {
        TaskNode::deserialize(value).unwrap_or_default()
    }
}

/// Fields addressable by name from a UI binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskRole {
    Title,
    Description,
    Completed,
    DueDate,
    Priority,
    Tags,
    Category,
    HasChildren,
    ChildCount,
}

impl TaskRole {
    pub const ALL: [TaskRole; 9] = [
        TaskRole::Title,
        TaskRole::Description,
        TaskRole::Completed,
        TaskRole::DueDate,
        TaskRole::Priority,
        TaskRole::Tags,
        TaskRole::Category,
        TaskRole::HasChildren,
        TaskRole::ChildCount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TaskRole::Title => "title",
            TaskRole::Description => "description",
            TaskRole::Completed => "completed",
            TaskRole::DueDate => "dueDate",
            TaskRole::Priority => "priority",
            TaskRole::Tags => "tags",
            TaskRole::Category => "category",
            TaskRole::HasChildren => "hasChildren",
            TaskRole::ChildCount => "childCount",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        TaskRole::ALL.into_iter().find(|role| role.name() == name)
    }

    pub fn is_editable(self) -> bool {
        !matches!(self, TaskRole::HasChildren | TaskRole::ChildCount)
    }
}

impl fmt::Display for TaskRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Due(Option<NaiveDateTime>),
    Priority(Priority),
    Labels(Vec<String>),
    Count(usize),
}

/// Dense snapshot of the editable fields of one task.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskData {
    pub title: String,
    pub description: String,
    pub completed: bool,
    #[serde(with = "due_date_serde")]
    pub due_date: Option<NaiveDateTime>,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub category: String,
}

impl From<&Task> for TaskData {
    fn from(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            completed: task.completed,
            due_date: task.due_date,
            priority: task.priority,
            tags: task.tags.clone(),
            category: task.category.clone(),
        }
    }
}

/// Sparse update: only `Some` fields are written. `due_date: Some(None)`
/// clears the date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
    pub due_date: Option<Option<NaiveDateTime>>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
    pub category: Option<String>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.roles().is_empty()
    }

    pub fn roles(&self) -> Vec<TaskRole> {
        let mut roles = Vec::new();
        if self.title.is_some() {
            roles.push(TaskRole::Title);
        }
        if self.description.is_some() {
            roles.push(TaskRole::Description);
        }
        if self.completed.is_some() {
            roles.push(TaskRole::Completed);
        }
        if self.due_date.is_some() {
            roles.push(TaskRole::DueDate);
        }
        if self.priority.is_some() {
            roles.push(TaskRole::Priority);
        }
        if self.tags.is_some() {
            roles.push(TaskRole::Tags);
        }
        if self.category.is_some() {
            roles.push(TaskRole::Category);
        }
        roles
    }
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::{Priority, TaskNode};

    pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(as_text(&raw))
    }

    pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(raw.as_bool().unwrap_or(false))
    }

    pub fn priority<'de, D>(deserializer: D) -> Result<Priority, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let level = raw
            .as_i64()
            .or_else(|| raw.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64));
        Ok(level.map(Priority::from_level).unwrap_or_default())
    }

    pub fn labels<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(match raw {
            Value::Array(items) => items.iter().map(as_text).collect(),
            _ => vec![],
        })
    }

    pub fn children<'de, D>(deserializer: D) -> Result<Vec<TaskNode>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(match raw {
            Value::Array(items) => items.iter().map(TaskNode::from_json).collect(),
            _ => vec![],
        })
    }

    fn as_text(value: &Value) -> String {
        value.as_str().map(str::to_string).unwrap_or_default()
    }
}
