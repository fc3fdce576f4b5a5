//! Value extraction from JSON and HTML response bodies.
//!
//! HTML helpers are deliberately synchronous and operate on owned body
//! strings: `scraper`'s DOM types are not `Send`, so they must never be held
//! across an await point.

use scraper::{Html, Selector};
use serde_json::Value;

/// Walks a dotted path (`"data.image_url"`) through nested JSON objects.
///
/// Strings are returned verbatim, numbers are rendered as rounded integers,
/// booleans as `true`/`false`. Anything else, including a missing segment or
/// a non-object mid-path, yields the empty string.
pub fn json_value_at(root: &Value, path: &str) -> String {
    let mut current = root;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    match current {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else if let Some(f) = n.as_f64() {
                format!("{:.0}", f)
            } else {
                String::new()
            }
        }
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// First match of `selector`: its `value` attribute, falling back to the
/// element's text content. Whitespace is trimmed; no match or an invalid
/// selector yields the empty string.
pub fn select_first_value(body: &str, selector: &str) -> String {
    let Ok(selector) = Selector::parse(selector) else {
        return String::new();
    };
    let document = Html::parse_document(body);
    let Some(element) = document.select(&selector).next() else {
        return String::new();
    };
    let value = match element.value().attr("value") {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => element.text().collect::<String>(),
    };
    value.trim().to_string()
}

/// First match's attribute, if present.
pub fn select_attr(body: &str, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let document = Html::parse_document(body);
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.to_string())
}

/// First match's trimmed text content, if any.
pub fn select_text(body: &str, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let document = Html::parse_document(body);
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_path_walks_objects() {
        let data = json!({"a": {"b": "c"}});
        assert_eq!(json_value_at(&data, "a.b"), "c");
    }

    #[test]
    fn missing_segments_yield_empty() {
        let data = json!({"gallery": {"id": "abc123"}});
        assert_eq!(json_value_at(&data, "gallery.missing.field"), "");
        assert_eq!(json_value_at(&data, "nope"), "");
        assert_eq!(json_value_at(&data, ""), "");
    }

    #[test]
    fn intermediate_objects_yield_empty() {
        let data = json!({"gallery": {"metadata": {"owner": "testuser"}}});
        assert_eq!(json_value_at(&data, "gallery.metadata"), "");
        assert_eq!(json_value_at(&data, "gallery.metadata.owner"), "testuser");
    }

    #[test]
    fn scalars_are_rendered() {
        let data = json!({"id": 123, "price": 19.99, "on": true, "off": false, "gone": null});
        assert_eq!(json_value_at(&data, "id"), "123");
        assert_eq!(json_value_at(&data, "price"), "20");
        assert_eq!(json_value_at(&data, "on"), "true");
        assert_eq!(json_value_at(&data, "off"), "false");
        assert_eq!(json_value_at(&data, "gone"), "");
    }

    #[test]
    fn arrays_yield_empty() {
        let data = json!({"items": ["a", "b"]});
        assert_eq!(json_value_at(&data, "items"), "");
    }

    #[test]
    fn selector_prefers_value_attribute() {
        let html = r#"<form><input name="sess_id" value="tok123"> <span id="label"> hi </span></form>"#;
        assert_eq!(select_first_value(html, "input[name='sess_id']"), "tok123");
        assert_eq!(select_first_value(html, "#label"), "hi");
        assert_eq!(select_first_value(html, "input[name='missing']"), "");
        assert_eq!(select_first_value(html, "not a selector !!"), "");
    }

    #[test]
    fn attr_and_text_helpers() {
        let html = r#"<meta name="csrf-token" content="abc"><a href="/g/x1?p=2"><i> My Gallery </i></a>"#;
        assert_eq!(
            select_attr(html, "meta[name='csrf-token']", "content").as_deref(),
            Some("abc")
        );
        assert_eq!(select_text(html, "a i").as_deref(), Some("My Gallery"));
        assert_eq!(select_attr(html, "img", "src"), None);
    }
}
