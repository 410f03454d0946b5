//! Pull code out of fenced blocks in model responses.

use std::sync::OnceLock;

use regex::Regex;

fn fence() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)```(.*?)```").ok()).as_ref()
}

fn fence_with_header() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").ok())
        .as_ref()
}

/// Trim a block and drop a leading language tag such as `kbs` or `cpp`.
fn strip_header<'a>(block: &'a str, languages: &[&str]) -> &'a str {
    let mut code = block.trim();
    for lang in languages {
        if let Some(rest) = code.strip_prefix(lang) {
            code = rest.trim();
        }
    }
    code
}

/// Contents of the first fenced block.
pub fn extract_first_code(text: &str, languages: &[&str]) -> Option<String> {
    fence()?
        .captures(text.trim())
        .map(|caps| strip_header(&caps[1], languages).to_string())
}

/// Contents of the last fenced block.
pub fn extract_last_code(text: &str, languages: &[&str]) -> Option<String> {
    fence()?
        .captures_iter(text.trim())
        .last()
        .map(|caps| strip_header(&caps[1], languages).to_string())
}

/// Every fenced block with its header line removed, joined by `" \n "`.
/// Empty when there are none.
pub fn extract_code_blocks(text: &str, languages: &[&str]) -> String {
    let Some(fence) = fence_with_header() else {
        return String::new();
    };
    fence
        .captures_iter(text)
        .map(|caps| strip_header(&caps[1], languages).to_string())
        .collect::<Vec<_>>()
        .join(" \n ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "\
Here is my kernel:
```kbs
forward(x):
    return x + 1
```
and a faster one:
```
forward(x):
    return x + 1.0
```
";

    #[test]
    fn test_first_block_strips_language() {
        let code = extract_first_code(RESPONSE, &["kbs"]).unwrap();
        assert!(code.starts_with("forward(x):"));
        assert!(code.ends_with("x + 1"));
    }

    #[test]
    fn test_last_block() {
        let code = extract_last_code(RESPONSE, &["kbs"]).unwrap();
        assert!(code.ends_with("x + 1.0"));
    }

    #[test]
    fn test_no_blocks() {
        assert!(extract_first_code("no code here", &["kbs"]).is_none());
        assert!(extract_last_code("no code here", &["kbs"]).is_none());
        assert_eq!(extract_code_blocks("no code here", &["kbs"]), "");
    }

    #[test]
    fn test_all_blocks_joined() {
        let joined = extract_code_blocks(RESPONSE, &["kbs"]);
        assert_eq!(joined.matches("forward(x):").count(), 2);
        assert!(joined.contains(" \n "));
    }
}
