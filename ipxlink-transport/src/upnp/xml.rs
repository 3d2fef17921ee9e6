//! Just enough XML for IGD descriptions and SOAP replies.
//!
//! Routers emit flat, well-formed documents, so elements are located by local
//! name (namespace prefix ignored) instead of building a tree.

use std::borrow::Cow;

/// Position of the next start tag whose local name is `name`, as
/// `(start of tag, end of start tag, full qualified name, self closing)`.
fn find_start<'a>(xml: &'a str, name: &str, from: usize) -> Option<(usize, usize, &'a str, bool)> {
    let mut pos = from;
    while let Some(rel) = xml[pos..].find('<') {
        let start = pos + rel;
        let rest = &xml[start + 1..];
        let close = rest.find('>')?;
        let tag = &rest[..close];
        pos = start + 1;
        if tag.starts_with(&['/', '?', '!'][..]) {
            continue;
        }
        let qualified = tag
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default();
        let local = qualified.rsplit(':').next().unwrap_or(qualified);
        if local == name {
            return Some((start, start + 1 + close + 1, qualified, tag.ends_with('/')));
        }
    }
    None
}

/// Raw inner content of the first `name` element at or after `from`, plus the
/// offset just past its end tag.
fn element_at<'a>(xml: &'a str, name: &str, from: usize) -> Option<(&'a str, usize)> {
    let (_, body_start, qualified, self_closing) = find_start(xml, name, from)?;
    if self_closing {
        return Some(("", body_start));
    }
    let end_tag = format!("</{qualified}>");
    let body_len = xml[body_start..].find(&end_tag)?;
    Some((
        &xml[body_start..body_start + body_len],
        body_start + body_len + end_tag.len(),
    ))
}

/// Trimmed, unescaped text of the first `name` element.
pub(crate) fn text(xml: &str, name: &str) -> Option<String> {
    element_at(xml, name, 0).map(|(body, _)| unescape(body.trim()).into_owned())
}

/// Raw inner content of every `name` element. Nested same-name elements are
/// not supported.
pub(crate) fn blocks<'a>(xml: &'a str, name: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some((body, next)) = element_at(xml, name, pos) {
        out.push(body);
        pos = next;
    }
    out
}

pub(crate) fn escape(s: &str) -> Cow<'_, str> {
    if !s.contains(&['&', '<', '>', '"', '\''][..]) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

pub(crate) fn unescape(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    Cow::Owned(
        s.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&amp;", "&"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_ignores_namespace_prefix() {
        let xml = r#"<?xml version="1.0"?><s:Envelope><s:Body>
            <u:GetExternalIPAddressResponse xmlns:u="urn:x">
            <NewExternalIPAddress> 203.0.113.5 </NewExternalIPAddress>
            </u:GetExternalIPAddressResponse></s:Body></s:Envelope>"#;
        assert_eq!(text(xml, "NewExternalIPAddress").as_deref(), Some("203.0.113.5"));
        assert!(text(xml, "Body").is_some());
        assert_eq!(text(xml, "Missing"), None);
    }

    #[test]
    fn self_closing_element_is_empty() {
        assert_eq!(text("<a><NewRemoteHost/></a>", "NewRemoteHost").as_deref(), Some(""));
    }

    #[test]
    fn blocks_collects_siblings() {
        let xml = "<serviceList><service><t>a</t></service><service><t>b</t></service></serviceList>";
        let found = blocks(xml, "service");
        assert_eq!(found.len(), 2);
        assert_eq!(text(found[1], "t").as_deref(), Some("b"));
    }

    #[test]
    fn prefix_match_is_exact() {
        // `serviceList` must not be mistaken for `service`
        let xml = "<serviceList></serviceList>";
        assert!(blocks(xml, "service").is_empty());
    }

    #[test]
    fn escaping_round_trip() {
        let raw = "Tom & Jerry's <LAN>";
        let escaped = escape(raw);
        assert_eq!(escaped, "Tom &amp; Jerry&apos;s &lt;LAN&gt;");
        assert_eq!(unescape(&escaped), raw);
        assert!(matches!(escape("plain"), Cow::Borrowed(_)));
    }
}
