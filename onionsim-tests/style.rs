//! Style Enforcement Tests
//!
//! Scans the workspace sources for patterns clippy does not catch.
//!
//! - `naming` - banned function prefixes, type suffixes and module names
//! - `layout` - module size, `# Errors` sections and dead code allowances

#[path = "style/source_tree.rs"]
mod source_tree;

#[path = "style/naming.rs"]
mod naming;

#[path = "style/layout.rs"]
mod layout;
