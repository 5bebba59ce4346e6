//! Class names embedded in model metadata
//!
//! Ultralytics exports store them under the `names` key as a Python dict
//! literal, e.g. `{0: 'crack', 1: 'dirty', 2: 'good'}`. Some converters
//! write a JSON list instead; both are accepted.

/// Parse a `names` metadata value into an id-ordered list
///
/// Returns `None` for anything that is not a dense `0..n` mapping.
#[must_use]
pub fn parse_names(raw: &str) -> Option<Vec<String>> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str(raw).ok();
    }

    let body = raw.strip_prefix('{')?.strip_suffix('}')?;
    let mut entries: Vec<(usize, String)> = Vec::new();
    let mut rest = body.trim();

    while !rest.is_empty() {
        let (key, after) = rest.split_once(':')?;
        let id = key.trim().parse::<usize>().ok()?;

        let after = after.trim_start();
        let quote = after.chars().next().filter(|c| *c == '\'' || *c == '"')?;
        let value = &after[quote.len_utf8()..];
        let end = value.find(quote)?;
        entries.push((id, value[..end].to_string()));

        rest = value[end + quote.len_utf8()..].trim_start();
        rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
    }

    entries.sort_by_key(|(id, _)| *id);
    if entries.iter().enumerate().any(|(i, (id, _))| i != *id) {
        return None;
    }
    Some(entries.into_iter().map(|(_, name)| name).collect())
}

/// Name for `class_id`, or `class_<id>` when the model did not say
#[must_use]
pub fn class_name(names: &[String], class_id: u32) -> String {
    names
        .get(class_id as usize)
        .cloned()
        .unwrap_or_else(|| format!("class_{class_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ultralytics_dict() {
        let names = parse_names("{0: 'crack', 1: 'dirty', 2: 'good egg'}").unwrap();
        assert_eq!(names, vec!["crack", "dirty", "good egg"]);
    }

    #[test]
    fn test_parse_out_of_order_and_double_quotes() {
        let names = parse_names(r#"{1: "defective", 0: "normal"}"#).unwrap();
        assert_eq!(names, vec!["normal", "defective"]);
    }

    #[test]
    fn test_parse_json_list() {
        let names = parse_names(r#"["crack", "blood spot"]"#).unwrap();
        assert_eq!(names, vec!["crack", "blood spot"]);
    }

    #[test]
    fn test_names_with_commas_and_colons() {
        let names = parse_names("{0: 'a, b', 1: 'c: d'}").unwrap();
        assert_eq!(names, vec!["a, b", "c: d"]);
    }

    #[test]
    fn test_reject_malformed() {
        assert!(parse_names("").is_none());
        assert!(parse_names("crack,dirty").is_none());
        assert!(parse_names("{0: crack}").is_none());
        assert!(parse_names("{0: 'crack', 2: 'dirty'}").is_none());
        assert!(parse_names("{x: 'crack'}").is_none());
    }

    #[test]
    fn test_empty_dict() {
        assert_eq!(parse_names("{}"), Some(Vec::new()));
    }

    #[test]
    fn test_class_name_fallback() {
        let names = vec!["crack".to_string()];
        assert_eq!(class_name(&names, 0), "crack");
        assert_eq!(class_name(&names, 3), "class_3");
        assert_eq!(class_name(&[], 0), "class_0");
    }
}
