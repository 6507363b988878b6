//! Module size, error documentation and dead code.

use crate::source_tree::{SourceFile, Violation, assert_clean, workspace_sources};

const MAX_MODULE_LINES: usize = 500;

fn module_size(file: &SourceFile) -> Option<Violation> {
    let lines = file.content.lines().count();
    (lines > MAX_MODULE_LINES).then(|| Violation {
        file: file.display(),
        line: lines,
        rule: "module-size",
        message: format!("{lines} lines, split above {MAX_MODULE_LINES}"),
    })
}

/// Signature starting at `start`, up to the opening brace.
fn signature(lines: &[&str], start: usize) -> String {
    let mut signature = String::new();
    for line in &lines[start..] {
        signature.push_str(line.trim());
        signature.push(' ');
        if line.contains('{') || line.trim_end().ends_with(';') {
            break;
        }
    }
    signature.split('{').next().unwrap_or_default().to_string()
}

/// Doc comment lines directly above `start`, attributes skipped.
fn doc_above<'a>(lines: &[&'a str], start: usize) -> Vec<&'a str> {
    let mut doc = Vec::new();
    for line in lines[..start].iter().rev() {
        let line = line.trim();
        if line.starts_with("///") {
            doc.push(line);
        } else if !line.starts_with("#[") {
            break;
        }
    }
    doc.reverse();
    doc
}

fn error_docs(file: &str, content: &str) -> Vec<Violation> {
    let lines: Vec<&str> = content
        .lines()
        .take_while(|line| line.trim() != "#[cfg(test)]")
        .collect();
    let mut violations = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        if !line.trim().starts_with("pub fn ") {
            continue;
        }
        let returns_result = signature(&lines, index)
            .rsplit_once("->")
            .is_some_and(|(_, output)| output.contains("Result"));
        if !returns_result {
            continue;
        }

        let doc = doc_above(&lines, index);
        let Some(section) = doc.iter().position(|line| *line == "/// # Errors") else {
            violations.push(Violation {
                file: file.to_string(),
                line: index + 1,
                rule: "errors-doc",
                message: "public fallible function lacks an `# Errors` section".to_string(),
            });
            continue;
        };

        let bullets: Vec<&str> = doc[section + 1..]
            .iter()
            .map(|line| line.trim_start_matches("///").trim())
            .take_while(|line| !line.starts_with("# "))
            .filter(|line| !line.is_empty())
            .collect();
        let well_formed = !bullets.is_empty()
            && bullets
                .iter()
                .all(|bullet| bullet.starts_with("- `") && bullet.contains("` - "));
        if !well_formed {
            violations.push(Violation {
                file: file.to_string(),
                line: index + 1,
                rule: "errors-doc",
                message: "`# Errors` entries must read `- `ErrorType` - condition`".to_string(),
            });
        }
    }
    violations
}

fn dead_code(file: &SourceFile) -> Vec<Violation> {
    file.production_lines()
        .filter(|(_, line)| line.contains("allow(dead_code)"))
        .map(|(line, _)| Violation {
            file: file.display(),
            line,
            rule: "dead-code",
            message: "remove unused code instead of allowing it".to_string(),
        })
        .collect()
}

#[test]
fn test_workspace_layout() {
    let mut violations = Vec::new();
    for file in workspace_sources() {
        if file.is_test_code() {
            continue;
        }
        violations.extend(module_size(&file));
        violations.extend(error_docs(&file.display(), &file.content));
        violations.extend(dead_code(&file));
    }
    assert_clean(&violations);
}

#[test]
fn test_error_sections_are_checked() {
    let code = r#"
/// Opens the trace.
///
/// # Errors
///
/// - `TraceError::Write` - If the file cannot be created
pub fn create(path: &Path) -> Result<Self, TraceError> {
    todo!()
}

/// Parses a window.
pub fn parse(
    from: &str,
    to: &str,
) -> Result<Self, ConfigError> {
    todo!()
}

/// Loads a model.
///
/// # Errors
/// Returns an error when the file is missing.
pub fn load(path: &Path) -> Result<Self, ModelError> {
    todo!()
}

/// Never fails.
pub fn len(&self) -> usize {
    0
}
"#;
    let violations = error_docs("sample.rs", code);
    let lines: Vec<usize> = violations.iter().map(|violation| violation.line).collect();
    assert_eq!(lines, vec![12, 23]);
}
