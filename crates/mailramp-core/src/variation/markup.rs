//! Splits content into visible text and protected markup

use regex::Regex;
use std::sync::OnceLock;

/// A piece of content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Visible text that may be varied
    Text(&'a str),
    /// An HTML tag
    Tag(&'a str),
    /// Placeholder, URL, comment or entity, copied verbatim
    Protected(&'a str),
}

fn protected() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<!--.*?-->|<[^>]*>|\{\{.*?\}\}|https?://[^\s<>"']+|mailto:[^\s<>"']+|&#?[a-zA-Z0-9]+;"#)
            .expect("static markup regex")
    })
}

/// Split `input` into segments in document order
pub fn segments(input: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut last = 0;

    for m in protected().find_iter(input) {
        if m.start() > last {
            out.push(Segment::Text(&input[last..m.start()]));
        }
        let s = m.as_str();
        if s.starts_with('<') && !s.starts_with("<!--") {
            out.push(Segment::Tag(s));
        } else {
            out.push(Segment::Protected(s));
        }
        last = m.end();
    }

    if last < input.len() {
        out.push(Segment::Text(&input[last..]));
    }
    out
}

/// Text inside `<script>`/`<style>` is not visible and is never varied
pub fn opens_raw_block(tag: &str) -> bool {
    let lower = tag.to_ascii_lowercase();
    lower.starts_with("<script") || lower.starts_with("<style")
}

pub fn closes_raw_block(tag: &str) -> bool {
    let lower = tag.to_ascii_lowercase();
    lower.starts_with("</script") || lower.starts_with("</style")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_segments_protect_markup() {
        let html = r#"Hi {{first_name}}, <a href="https://x.example/a?b=1">see https://x.example</a> &amp; more"#;
        assert_eq!(
            segments(html),
            vec![
                Segment::Text("Hi "),
                Segment::Protected("{{first_name}}"),
                Segment::Text(", "),
                Segment::Tag(r#"<a href="https://x.example/a?b=1">"#),
                Segment::Text("see "),
                Segment::Protected("https://x.example"),
                Segment::Tag("</a>"),
                Segment::Text(" "),
                Segment::Protected("&amp;"),
                Segment::Text(" more"),
            ]
        );
    }

    #[test]
    fn test_segments_rejoin_losslessly() {
        let html = "<p>Great <b>news</b>!</p><!-- note --> {{unsubscribe_url}}";
        let joined: String = segments(html)
            .into_iter()
            .map(|s| match s {
                Segment::Text(t) | Segment::Tag(t) | Segment::Protected(t) => t,
            })
            .collect();
        assert_eq!(joined, html);
    }
}
