//! Logging and debugging facilities.
//!
//! # Tracing Integration
//!
//! Every subsystem logs through the `tracing` crate under a fixed target from
//! [`targets`], so output can be filtered per subsystem:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_observer::history=debug")
//!     .init();
//! ```
//!
//! Listener panics and failed undo steps are reported at `error` level, stale
//! undo replays at `warn`, rejected no-op operations at `debug`, and emission
//! flow at `trace`.
//!
//! # Debug Visualization
//!
//! [`TreeDebug`] renders an observer's data as an indented outline, marking
//! nested observers so ownership boundaries are visible:
//!
//! ```
//! use horizon_observer::{Observer, TreeDebug, TreeFormatOptions, TreeStyle};
//! use serde_json::json;
//!
//! let observer = Observer::from_json(json!({ "name": "Box", "tags": ["a"] })).unwrap();
//! let options = TreeFormatOptions { style: TreeStyle::Ascii, ..TreeFormatOptions::minimal() };
//! println!("{}", TreeDebug::with_options(&observer, options));
//! ```

use std::fmt::{self, Write as FmtWrite};

use serde_json::Value as JsonValue;

use crate::observer::Observer;
use crate::tree::json_kind;
use crate::value::Value;

/// Tracing targets used by this crate.
pub mod targets {
    /// Emitter dispatch and listener panics.
    pub const EVENTS: &str = "horizon_observer::events";
    /// Observer mutations and propagation.
    pub const OBSERVER: &str = "horizon_observer::observer";
    /// Flat list operations.
    pub const LIST: &str = "horizon_observer::list";
    /// Undo stack.
    pub const HISTORY: &str = "horizon_observer::history";
    /// Undo recording for observers.
    pub const OBSERVER_HISTORY: &str = "horizon_observer::observer_history";
}

/// Style options for tree visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
    /// Compact single-line representation.
    Compact,
}

/// Configuration for [`TreeDebug`] output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    pub style: TreeStyle,
    /// Whether to show the kind of each entry.
    pub show_kinds: bool,
    /// Whether to show scalar values.
    pub show_values: bool,
    /// Maximum depth to traverse (None for unlimited).
    pub max_depth: Option<usize>,
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_kinds: true,
            show_values: true,
            max_depth: None,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    /// Kinds and values for every entry.
    pub fn detailed() -> Self {
        Self::default()
    }

    /// Keys only.
    pub fn minimal() -> Self {
        Self {
            show_kinds: false,
            show_values: false,
            ..Default::default()
        }
    }
}

/// Outline view of an observer's data.
#[derive(Debug, Clone)]
pub struct TreeDebug {
    root: Observer,
    options: TreeFormatOptions,
}

impl TreeDebug {
    pub fn new(root: &Observer) -> Self {
        Self::with_options(root, TreeFormatOptions::default())
    }

    pub fn with_options(root: &Observer, options: TreeFormatOptions) -> Self {
        Self {
            root: root.clone(),
            options,
        }
    }

    /// Render the outline to a string.
    pub fn format(&self) -> String {
        self.to_string()
    }

    fn write_entry(
        &self,
        out: &mut impl FmtWrite,
        label: &str,
        value: &Value,
        depth: usize,
        is_last: bool,
        ancestors: &mut Vec<bool>,
    ) -> fmt::Result {
        if let Some(max) = self.options.max_depth
            && depth > max
        {
            return Ok(());
        }

        out.write_str(&self.build_prefix(depth, is_last, ancestors))?;
        out.write_str(label)?;

        if self.options.show_values
            && let Value::Json(json) = value
            && !json.is_object()
            && !json.is_array()
        {
            write!(out, ": {json}")?;
        }
        if self.options.show_kinds {
            write!(out, " ({})", kind_name(value))?;
        }
        out.write_char('\n')?;

        let children = children(value);
        let count = children.len();
        if depth > 0 {
            ancestors.push(is_last);
        }
        for (i, (key, child)) in children.into_iter().enumerate() {
            self.write_entry(out, &key, &child, depth + 1, i + 1 == count, ancestors)?;
        }
        if depth > 0 {
            ancestors.pop();
        }
        Ok(())
    }

    /// `ancestors` holds, per level above this entry, whether that entry was
    /// the last of its siblings. Finished branches are padded, not drawn.
    fn build_prefix(&self, depth: usize, is_last: bool, ancestors: &[bool]) -> String {
        if depth == 0 {
            return String::new();
        }

        let (branch, corner, last) = match self.options.style {
            TreeStyle::Ascii => ("|", "+-- ", "`-- "),
            TreeStyle::Unicode => (
                "\u{2502}",
                "\u{251c}\u{2500}\u{2500} ",
                "\u{2514}\u{2500}\u{2500} ",
            ),
            TreeStyle::Compact => ("", "- ", "- "),
        };

        let mut prefix = String::new();
        for &ancestor_last in ancestors {
            if ancestor_last {
                prefix.push_str(&" ".repeat(branch.chars().count()));
            } else {
                prefix.push_str(branch);
            }
            prefix.push_str(&" ".repeat(self.options.indent_size));
        }
        prefix.push_str(if is_last { last } else { corner });
        prefix
    }
}

impl fmt::Display for TreeDebug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = Value::Observer(self.root.clone());
        self.write_entry(f, "(root)", &root, 0, true, &mut Vec::new())
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Observer(_) => "observer",
        Value::Array(_) => "array",
        Value::Json(json) => json_kind(json),
    }
}

fn children(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Observer(observer) => match observer.json() {
            JsonValue::Object(map) => map
                .keys()
                .filter_map(|key| observer.get_raw(key).map(|child| (key.clone(), child)))
                .collect(),
            _ => Vec::new(),
        },
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (i.to_string(), item.clone()))
            .collect(),
        Value::Json(JsonValue::Object(map)) => map
            .iter()
            .map(|(key, child)| (key.clone(), Value::Json(child.clone())))
            .collect(),
        Value::Json(JsonValue::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (i.to_string(), Value::Json(item.clone())))
            .collect(),
        Value::Json(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Observer {
        Observer::from_json(json!({
            "name": "Box",
            "transform": { "scale": 2 },
            "children": [{ "id": 1 }]
        }))
        .unwrap()
    }

    #[test]
    fn test_ascii_outline() {
        let options = TreeFormatOptions {
            style: TreeStyle::Ascii,
            ..Default::default()
        };
        let output = TreeDebug::with_options(&sample(), options).format();
        let expected = "\
(root) (observer)
+-- name: \"Box\" (string)
+-- transform (object)
|  `-- scale: 2 (number)
`-- children (array)
   `-- 0 (observer)
      `-- id: 1 (number)
";
        assert_eq!(output, expected);
    }

    #[test]
    fn test_open_branches_continue_past_nested_entries() {
        let observer = Observer::from_json(json!({
            "a": { "b": { "c": 1 }, "d": 2 },
            "e": 3
        }))
        .unwrap();
        let options = TreeFormatOptions {
            style: TreeStyle::Ascii,
            ..TreeFormatOptions::minimal()
        };
        let expected = "\
(root)
+-- a
|  +-- b
|  |  `-- c
|  `-- d
`-- e
";
        assert_eq!(TreeDebug::with_options(&observer, options).format(), expected);
    }

    #[test]
    fn test_minimal_and_depth_limit() {
        let options = TreeFormatOptions {
            style: TreeStyle::Compact,
            max_depth: Some(1),
            ..TreeFormatOptions::minimal()
        };
        let output = TreeDebug::with_options(&sample(), options).format();
        assert_eq!(output, "(root)\n- name\n- transform\n- children\n");
    }

    #[test]
    fn test_unicode_default() {
        let output = TreeDebug::new(&Observer::from_json(json!({"a": true})).unwrap()).to_string();
        assert_eq!(output, "(root) (observer)\n\u{2514}\u{2500}\u{2500} a: true (boolean)\n");
    }
}
