//! Content variation
//!
//! Produces a handful of textual variants of a campaign. Variant 0 is
//! always the original content. Only visible text is altered; tags,
//! placeholders, URLs and entities are copied through untouched.

mod markup;
mod synonyms;

use markup::Segment;
use mailramp_common::config::VariationConfig;
use mailramp_common::types::CampaignId;
use mailramp_storage::models::Campaign;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// One rendition of a campaign's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentVariant {
    pub index: usize,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
}

/// Transformations chosen once per variant
#[derive(Debug, Clone, Copy)]
struct Plan {
    synonyms: bool,
    whitespace: bool,
    swap_bold: bool,
    swap_italic: bool,
    invisible_rate: Option<f64>,
}

pub struct VariationEngine {
    config: VariationConfig,
    cache: RwLock<HashMap<CampaignId, Arc<Vec<ContentVariant>>>>,
}

impl VariationEngine {
    pub fn new(config: VariationConfig) -> Self {
        Self {
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Generate variants deterministically from `seed`
    pub fn generate(
        &self,
        subject: &str,
        html_body: &str,
        text_body: Option<&str>,
        seed: u64,
    ) -> Vec<ContentVariant> {
        let original = ContentVariant {
            index: 0,
            subject: subject.to_string(),
            html_body: html_body.to_string(),
            text_body: text_body.map(str::to_string),
        };

        if !self.config.enabled || self.config.count <= 1 {
            return vec![original];
        }

        let mut variants = Vec::with_capacity(self.config.count);
        variants.push(original);

        for index in 1..self.config.count {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
            let plan = Plan {
                synonyms: self.config.synonyms,
                whitespace: self.config.whitespace,
                swap_bold: self.config.tag_swaps && rng.random_bool(0.5),
                swap_italic: self.config.tag_swaps && rng.random_bool(0.5),
                invisible_rate: self
                    .config
                    .invisible_chars
                    .then_some(self.config.invisible_char_rate.clamp(0.0, 1.0)),
            };

            // subjects keep their characters visible-only
            let subject_plan = Plan {
                invisible_rate: None,
                ..plan
            };

            variants.push(ContentVariant {
                index,
                subject: vary(subject, subject_plan, &mut rng),
                html_body: vary(html_body, plan, &mut rng),
                text_body: text_body.map(|t| vary(t, plan, &mut rng)),
            });
        }

        variants
    }

    /// Cached variants for a campaign
    pub fn variants_for(&self, campaign: &Campaign) -> Arc<Vec<ContentVariant>> {
        if let Ok(cache) = self.cache.read() {
            if let Some(variants) = cache.get(&campaign.id) {
                return variants.clone();
            }
        }

        let variants = Arc::new(self.generate(
            &campaign.subject,
            &campaign.html_body,
            campaign.text_body.as_deref(),
            seed_for(campaign.id),
        ));
        debug!(campaign_id = %campaign.id, count = variants.len(), "Content variants generated");

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(campaign.id, variants.clone());
        }
        variants
    }

    /// Drop cached variants after the campaign content changes
    pub fn invalidate(&self, campaign_id: CampaignId) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&campaign_id);
        }
    }

    /// Pick one of the campaign's variants at random
    pub fn pick(&self, campaign: &Campaign) -> ContentVariant {
        let variants = self.variants_for(campaign);
        let index = rand::rng().random_range(0..variants.len());
        variants[index].clone()
    }
}

fn seed_for(campaign_id: CampaignId) -> u64 {
    let bytes = campaign_id.as_bytes();
    let mut first = [0u8; 8];
    first.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(first)
}

fn vary(input: &str, plan: Plan, rng: &mut StdRng) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    let mut in_raw_block = false;

    for segment in markup::segments(input) {
        match segment {
            Segment::Tag(tag) => {
                if markup::opens_raw_block(tag) {
                    in_raw_block = true;
                } else if markup::closes_raw_block(tag) {
                    in_raw_block = false;
                }
                out.push_str(&swap_tag(tag, plan));
            }
            Segment::Protected(s) => out.push_str(s),
            Segment::Text(text) if in_raw_block => out.push_str(text),
            Segment::Text(text) => {
                let mut text = text.to_string();
                if plan.synonyms {
                    text = replace_synonyms(&text, rng);
                }
                if plan.whitespace {
                    text = perturb_whitespace(&text, rng);
                }
                if let Some(rate) = plan.invisible_rate {
                    text = insert_invisible(&text, rate, rng);
                }
                out.push_str(&text);
            }
        }
    }

    out
}

fn replace_synonyms(text: &str, rng: &mut StdRng) -> String {
    synonyms::pattern()
        .replace_all(text, |caps: &regex::Captures| {
            let original = &caps[0];
            match synonyms::alternatives(original) {
                Some(alts) if rng.random_bool(0.5) => {
                    let pick = alts[rng.random_range(0..alts.len())];
                    synonyms::match_case(original, pick)
                }
                _ => original.to_string(),
            }
        })
        .into_owned()
}

fn perturb_whitespace(text: &str, rng: &mut StdRng) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        out.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek() == Some(&' ') && rng.random_bool(0.3) {
            out.push(' ');
        }
    }

    if out.contains("...") && rng.random_bool(0.5) {
        out = out.replace("...", "\u{2026}");
    } else if out.contains('\u{2026}') && rng.random_bool(0.5) {
        out = out.replace('\u{2026}', "...");
    }
    out
}

fn insert_invisible(text: &str, rate: f64, rng: &mut StdRng) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        out.push(c);
        if c == ' ' && rng.random_bool(rate) {
            out.push(ZERO_WIDTH_SPACE);
        }
    }
    out
}

fn emphasis_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^<(/?)(b|strong|i|em)(\s[^>]*)?>$").expect("static emphasis regex")
    })
}

fn swap_tag(tag: &str, plan: Plan) -> String {
    if !(plan.swap_bold || plan.swap_italic) {
        return tag.to_string();
    }
    let Some(caps) = emphasis_tag().captures(tag) else {
        return tag.to_string();
    };

    let name = caps[2].to_ascii_lowercase();
    let replacement = match name.as_str() {
        "b" if plan.swap_bold => "strong",
        "strong" if plan.swap_bold => "b",
        "i" if plan.swap_italic => "em",
        "em" if plan.swap_italic => "i",
        _ => return tag.to_string(),
    };

    format!(
        "<{}{}{}>",
        &caps[1],
        replacement,
        caps.get(3).map(|m| m.as_str()).unwrap_or("")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> VariationConfig {
        VariationConfig {
            enabled: true,
            count: 4,
            synonyms: true,
            whitespace: true,
            tag_swaps: true,
            invisible_chars: false,
            invisible_char_rate: 0.02,
        }
    }

    const HTML: &str = r#"<p>Hello {{first_name}}! Check out our <b>great</b> new offer. Buy now...</p><a href="https://shop.example/free-offer">Get it free</a> <a href="{{unsubscribe_url}}">unsubscribe</a>"#;

    fn visible(s: &str) -> String {
        s.replace('\u{200B}', "")
    }

    #[test]
    fn test_first_variant_is_original() {
        let engine = VariationEngine::new(config());
        let variants = engine.generate("Great news", HTML, Some("Hello there"), 7);

        assert_eq!(variants.len(), 4);
        assert_eq!(variants[0].subject, "Great news");
        assert_eq!(variants[0].html_body, HTML);
        assert_eq!(variants[0].text_body.as_deref(), Some("Hello there"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let engine = VariationEngine::new(config());
        assert_eq!(
            engine.generate("Great news", HTML, None, 42),
            engine.generate("Great news", HTML, None, 42)
        );
    }

    #[test]
    fn test_markup_is_preserved() {
        let engine = VariationEngine::new(VariationConfig {
            invisible_chars: true,
            invisible_char_rate: 0.5,
            ..config()
        });

        for seed in 0..20 {
            for variant in engine.generate("Great news", HTML, None, seed) {
                let html = visible(&variant.html_body);
                assert!(html.contains("{{first_name}}"));
                assert!(html.contains(r#"<a href="{{unsubscribe_url}}">"#));
                assert!(html.contains(r#"href="https://shop.example/free-offer""#));
                assert!(!variant.subject.contains('\u{200B}'));
            }
        }
    }

    #[test]
    fn test_variants_differ_from_original() {
        let engine = VariationEngine::new(config());
        let variants = engine.generate("Great news", HTML, None, 3);
        assert!(variants[1..].iter().any(|v| v.html_body != HTML));
    }

    #[test]
    fn test_disabled_returns_only_original() {
        let engine = VariationEngine::new(VariationConfig {
            enabled: false,
            ..config()
        });
        assert_eq!(engine.generate("s", HTML, None, 1).len(), 1);
    }

    #[test]
    fn test_script_blocks_untouched() {
        let engine = VariationEngine::new(config());
        let html = "<script>var great = 'free';</script><style>.new{}</style>";
        for seed in 0..10 {
            for variant in engine.generate("s", html, None, seed) {
                assert_eq!(variant.html_body, html);
            }
        }
    }

    #[test]
    fn test_swap_tag() {
        let plan = Plan {
            synonyms: false,
            whitespace: false,
            swap_bold: true,
            swap_italic: false,
            invisible_rate: None,
        };
        assert_eq!(swap_tag("<b>", plan), "<strong>");
        assert_eq!(swap_tag("</STRONG>", plan), "</b>");
        assert_eq!(swap_tag(r#"<b class="x">"#, plan), r#"<strong class="x">"#);
        assert_eq!(swap_tag("<i>", plan), "<i>");
        assert_eq!(swap_tag("<br>", plan), "<br>");
    }
}
