//! Patch stub rendering for import fixes.

const CONTEXT_LINES: usize = 3;

/// Source line for importing `symbol` (optionally from `module`).
pub fn import_line(symbol: &str, module: Option<&str>) -> String {
    match module {
        Some(module) => format!("from {module} import {symbol}"),
        None => format!("from . import {symbol}"),
    }
}

/// Index of the line after the last top-level import, or 0 if there is none.
///
/// Parenthesized multi-line imports are skipped to their closing line.
pub fn import_insertion_index(lines: &[&str]) -> usize {
    let mut insert_at = 0;
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let is_import = line.starts_with("import ")
            || (line.starts_with("from ") && line.contains(" import "));
        if is_import {
            if line.contains('(') && !line.contains(')') {
                while i + 1 < lines.len() && !lines[i].contains(')') {
                    i += 1;
                }
            }
            insert_at = i + 1;
        }
        i += 1;
    }
    insert_at
}

/// Unified diff adding `new_line` after the last import of `original`.
///
/// Returns an empty string when the line is already present, so callers can
/// treat "no change" uniformly.
pub fn import_insertion_diff(path: &str, original: &str, new_line: &str) -> String {
    let lines: Vec<&str> = original.lines().collect();
    if lines.iter().any(|line| line.trim() == new_line.trim()) {
        return String::new();
    }
    let at = import_insertion_index(&lines);
    let ctx_start = at.saturating_sub(CONTEXT_LINES);
    let ctx_end = (at + CONTEXT_LINES).min(lines.len());
    let old_len = ctx_end - ctx_start;
    let old_start = if old_len == 0 { 0 } else { ctx_start + 1 };

    let mut out = String::new();
    if original.is_empty() {
        out.push_str("--- /dev/null\n");
    } else {
        out.push_str(&format!("--- a/{path}\n"));
    }
    out.push_str(&format!("+++ b/{path}\n"));
    out.push_str(&format!(
        "@@ -{},{} +{},{} @@\n",
        old_start,
        old_len,
        ctx_start + 1,
        old_len + 1
    ));
    for line in &lines[ctx_start..at] {
        out.push_str(&format!(" {line}\n"));
    }
    out.push_str(&format!("+{new_line}\n"));
    for line in &lines[at..ctx_end] {
        out.push_str(&format!(" {line}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_line_forms() {
        assert_eq!(import_line("Foo", Some("pkg.core")), "from pkg.core import Foo");
        assert_eq!(import_line("Foo", None), "from . import Foo");
    }

    #[test]
    fn insertion_after_last_import() {
        let lines = vec!["\"\"\"doc\"\"\"", "import os", "from x import y", "", "A = 1"];
        assert_eq!(import_insertion_index(&lines), 3);
    }

    #[test]
    fn insertion_skips_parenthesized_import() {
        let lines = vec!["from x import (", "    a,", "    b,", ")", "B = 2"];
        assert_eq!(import_insertion_index(&lines), 4);
    }

    #[test]
    fn insertion_at_top_without_imports() {
        assert_eq!(import_insertion_index(&["A = 1"]), 0);
        assert_eq!(import_insertion_index(&[]), 0);
    }

    #[test]
    fn diff_for_empty_file_creates_it() {
        let diff = import_insertion_diff("pkg/__init__.py", "", "from . import Foo");
        assert_eq!(
            diff,
            "--- /dev/null\n+++ b/pkg/__init__.py\n@@ -0,0 +1,1 @@\n+from . import Foo\n"
        );
    }

    #[test]
    fn diff_includes_context() {
        let original = "import os\nimport sys\n\nX = 1\n";
        let diff = import_insertion_diff("m.py", original, "from . import Foo");
        assert_eq!(
            diff,
            "--- a/m.py\n+++ b/m.py\n@@ -1,4 +1,5 @@\n \
             import os\n import sys\n+from . import Foo\n \n X = 1\n"
        );
    }

    #[test]
    fn diff_is_empty_when_import_exists() {
        let original = "from . import Foo\n";
        assert!(import_insertion_diff("m.py", original, "from . import Foo").is_empty());
    }
}
