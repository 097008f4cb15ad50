//! Accessibility tree reading
//!
//! A stateless recursive walk over [`AccessibleNode`]. Node attributes that
//! cannot be read come back empty; a broken widget never aborts the walk.

pub mod atspi;

use serde::Serialize;

/// Depth limit for searches
pub const SEARCH_DEPTH: usize = 15;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Extents {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One node of an accessibility tree
pub trait AccessibleNode: Sized {
    fn name(&self) -> String;
    fn role(&self) -> String;
    fn description(&self) -> String;
    fn states(&self) -> Vec<String>;
    /// Screen coordinates, when the node is a visual component
    fn extents(&self) -> Option<Extents>;
    fn actions(&self) -> Vec<String>;
    fn children(&self) -> Vec<Self>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementInfo {
    pub role: String,
    pub name: String,
    pub description: String,
    pub states: Vec<String>,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub actions: Vec<String>,
    pub children_count: usize,
    pub depth: usize,
}

impl ElementInfo {
    fn read<N: AccessibleNode>(node: &N, depth: usize, children: usize) -> Self {
        let role = node.role();
        let extents = node.extents().unwrap_or_default();
        Self {
            role: if role.is_empty() { "unknown".into() } else { role },
            name: node.name(),
            description: node.description(),
            states: node.states(),
            x: extents.x,
            y: extents.y,
            width: extents.width,
            height: extents.height,
            actions: node.actions(),
            children_count: children,
            depth,
        }
    }

    /// `- [role] "name" (states) @ (x, y, wxh) [actions: ...]`, indented by depth
    pub fn line(&self) -> String {
        let indent = "  ".repeat(self.depth);
        let states = if self.states.is_empty() {
            String::new()
        } else {
            format!(" ({})", self.states.join(", "))
        };
        let actions = if self.actions.is_empty() {
            String::new()
        } else {
            format!(" [actions: {}]", self.actions.join(", "))
        };
        format!(
            "{indent}- [{}] \"{}\"{states} @ ({}, {}, {}x{}){actions}",
            self.role, self.name, self.x, self.y, self.width, self.height
        )
    }

    /// Center point, for clicking
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

fn matching_apps<N: AccessibleNode>(desktop: &N, app_filter: &str) -> Vec<N> {
    let filter = app_filter.to_lowercase();
    desktop
        .children()
        .into_iter()
        .filter(|app| filter.is_empty() || app.name().to_lowercase().contains(&filter))
        .collect()
}

/// Render every application under `desktop` (or those whose name contains `app_filter`)
pub fn tree<N: AccessibleNode>(desktop: &N, app_filter: &str, max_depth: usize) -> String {
    let mut lines = Vec::new();
    let mut total = 0;
    for app in matching_apps(desktop, app_filter) {
        total += format_node(&app, &mut lines, 0, max_depth);
    }
    if lines.is_empty() {
        return "(no accessible applications found)".into();
    }
    format!("# Accessibility Tree ({total} elements)\n\n{}", lines.join("\n"))
}

fn format_node<N: AccessibleNode>(
    node: &N,
    lines: &mut Vec<String>,
    depth: usize,
    max_depth: usize,
) -> usize {
    if depth > max_depth {
        return 0;
    }
    let children = node.children();
    lines.push(ElementInfo::read(node, depth, children.len()).line());
    1 + children
        .iter()
        .map(|child| format_node(child, lines, depth + 1, max_depth))
        .sum::<usize>()
}

/// Elements whose name, role or description contains `query` (case-insensitive)
pub fn find<N: AccessibleNode>(desktop: &N, query: &str, app_filter: &str) -> Vec<ElementInfo> {
    let query = query.to_lowercase();
    let mut results = Vec::new();
    for app in matching_apps(desktop, app_filter) {
        search(&app, &query, &mut results, 0);
    }
    results
}

fn search<N: AccessibleNode>(node: &N, query: &str, results: &mut Vec<ElementInfo>, depth: usize) {
    if depth > SEARCH_DEPTH {
        return;
    }
    let children = node.children();
    let info = ElementInfo::read(node, depth, children.len());
    if info.name.to_lowercase().contains(query)
        || info.role.to_lowercase().contains(query)
        || info.description.to_lowercase().contains(query)
    {
        results.push(info);
    }
    for child in &children {
        search(child, query, results, depth + 1);
    }
}
