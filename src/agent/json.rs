use serde_json::Value;

/// Pull the structured verdict out of free-form agent output.
///
/// Tries, in order: the whole output as JSON, the last fenced ```json
/// block, and then every balanced `{...}` span from the end backwards.
/// Only JSON objects are returned.
pub fn extract_json_object(output: &str) -> Option<Value> {
    let trimmed = output.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    for block in fenced_blocks(output).into_iter().rev() {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(block.trim()) {
            return Some(value);
        }
    }

    let bytes = output.as_bytes();
    let mut end = output.len();
    while let Some(close) = output[..end].rfind('}') {
        if let Some(open) = matching_open(bytes, close)
            && let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&output[open..=close])
        {
            return Some(value);
        }
        end = close;
    }
    None
}

fn fenced_blocks(output: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = output;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(&body[..close]);
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Scan backwards from a closing brace to its balanced opening brace,
/// ignoring braces inside string literals.
fn matching_open(bytes: &[u8], close: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut i = close + 1;
    while i > 0 {
        i -= 1;
        let b = bytes[i];
        if b == b'"' && !is_escaped(bytes, i) {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match b {
            b'}' => depth += 1,
            b'{' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_escaped(bytes: &[u8], idx: usize) -> bool {
    let mut backslashes = 0;
    let mut i = idx;
    while i > 0 && bytes[i - 1] == b'\\' {
        backslashes += 1;
        i -= 1;
    }
    backslashes % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let v = extract_json_object(r#"{"fixed": true}"#).unwrap();
        assert_eq!(v["fixed"], true);
    }

    #[test]
    fn test_fenced_block_wins_over_prose() {
        let out = "I fixed it.\n```json\n{\"fixed\": true, \"filesModified\": [\"a.ts\"]}\n```\nDone {maybe}";
        let v = extract_json_object(out).unwrap();
        assert_eq!(v["filesModified"][0], "a.ts");
    }

    #[test]
    fn test_trailing_object_in_prose() {
        let out = "Ran the tests. GET /api/orders returned 404 Not Found.\n{\"integrationPass\": false, \"issues\": [{\"type\": \"endpoint-not-found\"}]}";
        let v = extract_json_object(out).unwrap();
        assert_eq!(v["integrationPass"], false);
    }

    #[test]
    fn test_braces_inside_strings() {
        let out = r#"result: {"changes": ["wrap body in {data: ...}"], "fixed": false}"#;
        let v = extract_json_object(out).unwrap();
        assert_eq!(v["fixed"], false);
    }

    #[test]
    fn test_no_json() {
        assert!(extract_json_object("all good, no json here").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
    }
}
