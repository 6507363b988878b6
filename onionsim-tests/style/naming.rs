//! Naming conventions: say what a thing is or does.

use crate::source_tree::{SourceFile, Violation, assert_clean, workspace_sources};

const BANNED_PREFIXES: [(&str, &str); 3] = [
    ("get_", "use the noun: catalog.epochs() not catalog.get_epochs()"),
    ("set_", "use a verb describing the change"),
    ("handle_", "name what is done: attach_stream() not handle_stream()"),
];

const BANNED_SUFFIXES: [&str; 6] = ["Manager", "Handler", "Processor", "Controller", "Service", "Factory"];

const BANNED_MODULES: [&str; 5] = ["utils", "helpers", "common", "misc", "stuff"];

fn function_prefixes(file: &str, content: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.starts_with("//") {
            continue;
        }
        let Some(position) = line.find("fn ") else {
            continue;
        };
        let is_definition = line[..position]
            .split_whitespace()
            .all(|word| matches!(word, "pub" | "pub(crate)" | "async" | "const" | "unsafe"));
        if !is_definition {
            continue;
        }
        let name = &line[position + 3..];
        for (prefix, advice) in BANNED_PREFIXES {
            if name.starts_with(prefix) {
                violations.push(Violation {
                    file: file.to_string(),
                    line: index + 1,
                    rule: "function-prefix",
                    message: format!("function starts with '{prefix}': {advice}"),
                });
            }
        }
    }
    violations
}

fn type_suffixes(file: &str, content: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let words: Vec<&str> = line.split_whitespace().collect();
        let keyword = words
            .iter()
            .position(|word| matches!(*word, "struct" | "enum" | "trait"));
        let Some(name) = keyword.and_then(|position| words.get(position + 1)) else {
            continue;
        };
        let name = name
            .split(['<', '{', '(', ';', ':'])
            .next()
            .unwrap_or_default();
        if let Some(suffix) = BANNED_SUFFIXES.iter().find(|suffix| name.ends_with(*suffix)) {
            violations.push(Violation {
                file: file.to_string(),
                line: index + 1,
                rule: "type-suffix",
                message: format!("type '{name}' ends with '{suffix}'; name what it is"),
            });
        }
    }
    violations
}

fn module_name(file: &SourceFile) -> Option<Violation> {
    let name = file.name();
    let stem = name.strip_suffix(".rs").unwrap_or(&name);
    BANNED_MODULES.contains(&stem).then(|| Violation {
        file: file.display(),
        line: 1,
        rule: "module-name",
        message: format!("module '{stem}' is too generic"),
    })
}

#[test]
fn test_workspace_naming() {
    let mut violations = Vec::new();
    for file in workspace_sources() {
        if file.name() == "naming.rs" {
            continue;
        }
        let display = file.display();
        violations.extend(function_prefixes(&display, &file.content));
        violations.extend(type_suffixes(&display, &file.content));
        violations.extend(module_name(&file));
    }
    assert_clean(&violations);
}

#[test]
fn test_banned_function_prefixes_are_found() {
    let code = r#"
impl Client {
    pub fn get_guard(&self) -> RelayId { self.guard }
    fn set_phase(&mut self) {}
    pub(crate) async fn handle_stream(&mut self) {}
    pub fn guard(&self) -> RelayId { self.guard }
    fn target_set_size(&self) -> usize { 0 }
    // fn get_commented() {}
}
"#;
    let violations = function_prefixes("client.rs", code);
    assert_eq!(violations.len(), 3);
    assert_eq!(violations[0].line, 3);
}

#[test]
fn test_banned_type_suffixes_are_found() {
    let code = "pub struct CircuitManager {}\nenum EventHandler {}\npub struct TraceRecorder<W> {}\n";
    let violations = type_suffixes("types.rs", code);
    assert_eq!(violations.len(), 2);
    assert!(violations[0].message.contains("Manager"));
}
