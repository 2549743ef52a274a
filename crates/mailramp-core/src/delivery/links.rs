//! Click and open tracking rewrites, plain text fallback

use regex::{Captures, Regex};
use std::sync::OnceLock;
use url::form_urlencoded;

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)(<a\b[^>]*?\bhref\s*=\s*)(["'])(.*?)(["'])"#).expect("static href regex")
    })
}

/// Click tracking URL for a recipient
pub fn click_url(public_url: &str, tracking_id: &str, target: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(target.as_bytes()).collect();
    format!(
        "{}/tracking/click/{}?url={}",
        public_url.trim_end_matches('/'),
        tracking_id,
        encoded
    )
}

/// Open tracking pixel URL for a recipient
pub fn pixel_url(public_url: &str, tracking_id: &str) -> String {
    format!(
        "{}/tracking/open/{}",
        public_url.trim_end_matches('/'),
        tracking_id
    )
}

/// Route every http(s) anchor through the click tracker.
/// Unsubscribe and tracking links are left alone.
pub fn rewrite_links(html: &str, public_url: &str, tracking_id: &str) -> String {
    let base = public_url.trim_end_matches('/');
    let tracking_prefix = format!("{}/tracking/", base);

    href_regex()
        .replace_all(html, |caps: &Captures| {
            let raw = caps[3].trim();
            let target = raw.replace("&amp;", "&");
            let lower = target.to_ascii_lowercase();

            let skip = !(lower.starts_with("http://") || lower.starts_with("https://"))
                || lower.contains("/unsubscribe")
                || target.starts_with(&tracking_prefix);

            if skip {
                caps[0].to_string()
            } else {
                format!(
                    "{}{}{}{}",
                    &caps[1],
                    &caps[2],
                    click_url(base, tracking_id, &target),
                    &caps[4]
                )
            }
        })
        .into_owned()
}

/// Insert the open tracking pixel before `</body>`, or append it
pub fn inject_pixel(html: &str, pixel_url: &str) -> String {
    let pixel = format!(
        r#"<img src="{}" width="1" height="1" alt="" style="display:none" />"#,
        pixel_url
    );

    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + pixel.len());
            out.push_str(&html[..pos]);
            out.push_str(&pixel);
            out.push_str(&html[pos..]);
            out
        }
        None => format!("{}{}", html, pixel),
    }
}

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|head)\b.*?</(script|style|head)\s*>").expect("static block regex")
    })
}

fn break_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</(p|div|h[1-6]|li|tr|table|blockquote)\s*>").expect("static break regex")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static tag regex"))
}

/// Derive a plain text body from HTML
pub fn html_to_text(html: &str) -> String {
    let text = block_regex().replace_all(html, "");
    let text = break_regex().replace_all(&text, "\n");
    let text = tag_regex().replace_all(&text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        // collapse runs of blank lines
        if line.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASE: &str = "https://mail.example.com";

    #[test]
    fn test_rewrite_links() {
        let html = r#"<a href="https://shop.example/p?a=1&amp;b=2">Shop</a> <a class="x" href='http://blog.example'>Blog</a>"#;
        let out = rewrite_links(html, BASE, "trk");
        assert_eq!(
            out,
            r#"<a href="https://mail.example.com/tracking/click/trk?url=https%3A%2F%2Fshop.example%2Fp%3Fa%3D1%26b%3D2">Shop</a> <a class="x" href='https://mail.example.com/tracking/click/trk?url=http%3A%2F%2Fblog.example'>Blog</a>"#
        );
    }

    #[test]
    fn test_rewrite_skips_special_links() {
        let html = concat!(
            r#"<a href="mailto:team@example.com">Mail</a>"#,
            r#"<a href="https://mail.example.com/unsubscribe/trk">Unsubscribe</a>"#,
            r#"<a href="https://mail.example.com/tracking/open/trk">x</a>"#,
            r##"<a href="#top">Top</a>"##,
        );
        assert_eq!(rewrite_links(html, BASE, "trk"), html);
    }

    #[test]
    fn test_inject_pixel() {
        let pixel = pixel_url(BASE, "trk");
        assert_eq!(pixel, "https://mail.example.com/tracking/open/trk");

        let out = inject_pixel("<html><body><p>Hi</p></BODY></html>", &pixel);
        assert_eq!(
            out,
            r#"<html><body><p>Hi</p><img src="https://mail.example.com/tracking/open/trk" width="1" height="1" alt="" style="display:none" /></BODY></html>"#
        );
        assert!(inject_pixel("<p>Hi</p>", &pixel).ends_with("style=\"display:none\" />"));
    }

    #[test]
    fn test_html_to_text() {
        let html = "<html><head><title>T</title><style>p{}</style></head><body><h1>Hello</h1><p>Big &amp; bold<br>news</p>\n\n<p>  Bye  </p></body></html>";
        assert_eq!(html_to_text(html), "Hello\nBig & bold\nnews\n\nBye");
    }
}
