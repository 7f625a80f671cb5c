//! Size-bounded code bundles and the code-shape validator.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Appended to content that was cut, so a reader can see the loss.
pub const TRUNCATION_MARKER: &str = "\n# ... [truncated] ...\n";

/// Definition syntax at the start of a line; prose never opens a line this way.
const DEFINITION_PATTERNS: &[&str] = &[
    r"(?m)^[ \t]*(?:(?:pub(?:\([\w:]+\))?|public|private|protected|export|default|async|static|abstract|final|unsafe)[ \t]+)*(?:def|class|fn|func|function|impl|struct|interface|enum|trait)\b[ \t]*[\w<(]",
    r"(?m)^[ \t]*(?:export[ \t]+)?(?:const|let|var)[ \t]+\w+[ \t]*=[ \t]*(?:async[ \t]*)?(?:\([^)\n]*\)|\w+)[ \t]*=>",
];

fn definition_patterns() -> &'static [Regex] {
    static COMPILED: OnceLock<Vec<Regex>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        DEFINITION_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

fn has_definition(content: &str) -> bool {
    definition_patterns().iter().any(|re| re.is_match(content))
}

/// Per-file and per-bundle character ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleLimits {
    pub max_file_chars: usize,
    pub max_total_chars: usize,
}

impl Default for BundleLimits {
    fn default() -> Self {
        Self {
            max_file_chars: 12_000,
            max_total_chars: 40_000,
        }
    }
}

/// One file in a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFile {
    pub file_path: String,
    pub content: String,
    #[serde(default)]
    pub truncated: bool,
}

impl CodeFile {
    pub fn new(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
            truncated: false,
        }
    }
}

/// Ordered list of files produced by one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBundle {
    pub files: Vec<CodeFile>,
    /// Set when any file was cut or dropped to fit the limits.
    #[serde(default)]
    pub truncated: bool,
    /// Files dropped entirely because the total budget was spent.
    #[serde(default)]
    pub omitted_files: usize,
}

impl CodeBundle {
    /// Build a bundle, enforcing `limits` and flagging any loss.
    pub fn bounded(files: impl IntoIterator<Item = CodeFile>, limits: BundleLimits) -> Self {
        let mut kept = Vec::new();
        let mut remaining = limits.max_total_chars;
        let mut truncated = false;
        let mut omitted_files = 0usize;

        for mut file in files {
            if remaining == 0 {
                omitted_files += 1;
                truncated = true;
                continue;
            }

            let cap = limits.max_file_chars.min(remaining);
            if file.content.chars().count() > cap {
                file.content = truncate_chars(&file.content, cap);
                file.truncated = true;
            }
            truncated |= file.truncated;
            remaining = remaining.saturating_sub(file.content.chars().count());
            kept.push(file);
        }

        Self {
            files: kept,
            truncated,
            omitted_files,
        }
    }

    /// Single-file convenience constructor (unbounded).
    pub fn single(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            files: vec![CodeFile::new(file_path, content)],
            truncated: false,
            omitted_files: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.iter().all(|f| f.content.trim().is_empty())
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.file_path.clone()).collect()
    }

    pub fn total_chars(&self) -> usize {
        self.files.iter().map(|f| f.content.chars().count()).sum()
    }

    /// Render as fenced blocks for inclusion in a prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            out.push_str(&format!("### {}\n```\n{}\n```\n", file.file_path, file.content));
        }
        if self.omitted_files > 0 {
            out.push_str(&format!("({} more file(s) omitted)\n", self.omitted_files));
        }
        out
    }

    /// Whether the bundle looks like code: a definition opening some line
    /// and at least `min_chars` characters in total.
    pub fn is_code_shaped(&self, min_chars: usize) -> bool {
        if self.total_chars() < min_chars {
            return false;
        }
        self.files
            .iter()
            .any(|f| has_definition(&f.content))
    }
}

/// Output of the generation agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub plan: String,
    pub bundle: CodeBundle,
}

fn truncate_chars(content: &str, cap: usize) -> String {
    let marker_len = TRUNCATION_MARKER.chars().count();
    if cap <= marker_len {
        return content.chars().take(cap).collect();
    }
    let mut out: String = content.chars().take(cap - marker_len).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(file: usize, total: usize) -> BundleLimits {
        BundleLimits {
            max_file_chars: file,
            max_total_chars: total,
        }
    }

    #[test]
    fn test_small_bundle_is_untouched() {
        let bundle = CodeBundle::bounded(
            vec![CodeFile::new("a.py", "def a():\n    return 1\n")],
            BundleLimits::default(),
        );
        assert!(!bundle.truncated);
        assert!(!bundle.files[0].truncated);
        assert_eq!(bundle.omitted_files, 0);
    }

    #[test]
    fn test_oversized_file_is_cut_and_flagged() {
        let content = "x".repeat(500);
        let bundle = CodeBundle::bounded(vec![CodeFile::new("big.py", content)], limits(100, 1000));
        assert!(bundle.truncated);
        assert!(bundle.files[0].truncated);
        assert_eq!(bundle.files[0].content.chars().count(), 100);
        assert!(bundle.files[0].content.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_total_budget_drops_trailing_files() {
        let files = vec![
            CodeFile::new("a.py", "a".repeat(60)),
            CodeFile::new("b.py", "b".repeat(60)),
            CodeFile::new("c.py", "c".repeat(60)),
        ];
        let bundle = CodeBundle::bounded(files, limits(100, 100));
        assert!(bundle.truncated);
        assert_eq!(bundle.files.len(), 2);
        assert!(!bundle.files[0].truncated);
        assert!(bundle.files[1].truncated);
        assert_eq!(bundle.omitted_files, 1);
        assert!(bundle.total_chars() <= 100);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let content = "é".repeat(200);
        let bundle = CodeBundle::bounded(vec![CodeFile::new("u.py", content)], limits(50, 50));
        assert_eq!(bundle.files[0].content.chars().count(), 50);
    }

    #[test]
    fn test_code_shape_rejects_prose() {
        let prose = CodeBundle::single(
            "notes.md",
            "I think the code looks fine overall and you should merge it soon.",
        );
        assert!(!prose.is_code_shaped(20));

        for text in [
            "I merged both reviewers' suggestions; the public interface stays unchanged overall.",
            "The private struct of this module should keep its function names as they are.",
            "Keep the class as is.\nThe fn keyword is fine here and no impl changes are needed.",
        ] {
            let prose = CodeBundle::single("notes.md", text);
            assert!(!prose.is_code_shaped(20), "prose accepted: {text}");
        }

        let code = CodeBundle::single("m.py", "def login(user):\n    return check(user)\n");
        assert!(code.is_code_shaped(20));
        assert!(!code.is_code_shaped(10_000));

        for text in [
            "pub(crate) fn parse(input: &str) -> u32 {\n    input.len() as u32\n}\n",
            "impl<T> Stack<T> {\n    fn push(&mut self, v: T) {}\n}\n",
            "export const total = (items) => items.length;\n",
            "public class Ledger {\n    private int balance;\n}\n",
            "func (s *Server) Start() error {\n\treturn nil\n}\n",
        ] {
            let code = CodeBundle::single("src.txt", text);
            assert!(code.is_code_shaped(20), "code rejected: {text}");
        }
    }

    #[test]
    fn test_render_mentions_omitted() {
        let mut bundle = CodeBundle::single("a.rs", "fn a() {}");
        bundle.omitted_files = 2;
        let text = bundle.render();
        assert!(text.contains("### a.rs"));
        assert!(text.contains("2 more file(s) omitted"));
    }
}
