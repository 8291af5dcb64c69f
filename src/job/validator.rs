use tree_sitter::{Node, Parser};
use tree_sitter_javascript::LANGUAGE as JAVASCRIPT;

/// Syntax check applied to a job's application source before it is accepted.
pub trait SyntaxValidator: Send + Sync {
    /// `Err` carries a human-readable description of the first problem.
    fn check(&self, source: &str) -> Result<(), String>;
}

impl<F> SyntaxValidator for F
where
    F: Fn(&str) -> Result<(), String> + Send + Sync,
{
    fn check(&self, source: &str) -> Result<(), String> {
        self(source)
    }
}

/// Parses the source as JavaScript and rejects anything the grammar has to
/// recover from.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsSyntaxValidator;

impl SyntaxValidator for JsSyntaxValidator {
    fn check(&self, source: &str) -> Result<(), String> {
        let lang = JAVASCRIPT.into();
        let mut parser = Parser::new();
        parser
            .set_language(&lang)
            .map_err(|e| format!("JavaScript grammar unavailable: {}", e))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| "JavaScript parser returned no tree".to_string())?;

        let root = tree.root_node();
        if !root.has_error() {
            return Ok(());
        }
        Err(match first_error(root) {
            Some(node) => describe(node, source),
            None => "syntax error".to_string(),
        })
    }
}

/// Depth-first search for the earliest ERROR or MISSING node.
fn first_error<'tree>(node: Node<'tree>) -> Option<Node<'tree>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(found) = first_error(child) {
                return Some(found);
            }
        }
    }
    None
}

fn describe(node: Node<'_>, source: &str) -> String {
    let at = node.start_position();
    let (line, col) = (at.row + 1, at.column + 1);
    if node.is_missing() {
        return format!("missing '{}' at {}:{}", node.kind(), line, col);
    }
    let text: String = source
        .get(node.byte_range())
        .and_then(|s| s.lines().next())
        .unwrap_or_default()
        .trim()
        .chars()
        .take(24)
        .collect();
    if text.is_empty() {
        format!("unexpected input at {}:{}", line, col)
    } else {
        format!("unexpected '{}' at {}:{}", text, line, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_source() {
        let v = JsSyntaxValidator;
        assert!(v.check("if(true){var a=10;}else{j='hello';}").is_ok());
        assert!(v.check("var s = \"}\"; // { unclosed in comment\nf([1, 2]);").is_ok());
        assert!(v.check("/* ( */ g();").is_ok());
        assert!(v.check("const sum = (xs) => xs.reduce((a, b) => a + b, 0);").is_ok());
        assert!(v.check("").is_ok());
    }

    #[test]
    fn test_regex_literals_accepted() {
        let v = JsSyntaxValidator;
        assert!(v.check("var re = /[}{)(]/g; re.test('a');").is_ok());
        assert!(v.check("const parts = line.split(/\\)/);").is_ok());
        assert!(v.check("const q = `${a.replace(/'/g, '')}`;").is_ok());
    }

    #[test]
    fn test_invalid_source() {
        let v = JsSyntaxValidator;
        let err = v.check("if(true){var a=10;}else j='hello';}").unwrap_err();
        assert!(err.contains(" at 1:"), "{}", err);
        assert!(v.check("f(").is_err());
        assert!(v.check("f(]").is_err());
        assert!(v.check("var = ;").is_err());
        assert!(v.check("function (a, b { return a; }").is_err());
    }

    #[test]
    fn test_error_reports_line() {
        let err = JsSyntaxValidator
            .check("let ok = 1;\nlet broken = ;\n")
            .unwrap_err();
        assert!(err.contains(" at 2:"), "{}", err);
    }

    #[test]
    fn test_closure_validator() {
        let reject_all = |_: &str| -> Result<(), String> { Err("nope".to_string()) };
        assert_eq!(reject_all.check("x"), Err("nope".to_string()));
    }
}
