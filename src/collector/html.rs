//! Text extraction from rendered wiki HTML.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::records::ArticleSection;
use crate::utils::normalize_whitespace;

/// Headings that mark the end of the article prose
const STOP_HEADINGS: &[&str] = &["Sources", "Notes and references", "See also", "External links"];

/// Section name for text before the first heading
const LEAD_SECTION: &str = "Main";

static INFOBOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<aside[^>]*class="[^"]*portable-infobox[^"]*"[^>]*>(.*?)</aside>"#)
        .expect("Valid infobox regex")
});

static INFOBOX_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?is)<h2[^>]*class="[^"]*pi-(title|header)[^"]*"[^>]*>(.*?)</h2>"#,
        r#"|<h3[^>]*class="[^"]*pi-data-label[^"]*"[^>]*>(.*?)</h3>\s*"#,
        r#"<div[^>]*class="[^"]*pi-data-value[^"]*"[^>]*>(.*?)</div>"#,
    ))
    .expect("Valid infobox item regex")
});

static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?is)<sup[^>]*class="[^"]*reference[^"]*"[^>]*>.*?</sup>"#,
        r"|<table[^>]*>.*?</table>",
        r"|<style[^>]*>.*?</style>",
        r"|<script[^>]*>.*?</script>",
        r"|<!--.*?-->",
    ))
    .expect("Valid noise regex")
});

static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<h([23])[^>]*>(.*?)</h[23]>|<p(?:\s[^>]*)?>(.*?)</p>|<li(?:\s[^>]*)?>(.*?)</li>")
        .expect("Valid block regex")
});

static HEADLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<span[^>]*class="[^"]*mw-headline[^"]*"[^>]*>(.*?)</span>"#)
        .expect("Valid headline regex")
});

static EDIT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<span[^>]*class="[^"]*mw-editsection[^"]*"[^>]*>.*?\]</span>\s*</span>"#)
        .expect("Valid edit link regex")
});

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("Valid line break regex"));

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("Valid tag regex"));

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("Valid entity regex")
});

static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*\)").expect("Valid parenthetical regex"));

static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([,.;:!?])").expect("Valid punctuation regex"));

/// Structured content of one article page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    pub sections: Vec<ArticleSection>,
    pub infobox: Option<String>,
    pub appearances: Vec<String>,
}

impl ParsedPage {
    /// Section texts joined as one body
    pub fn body(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn parse_article(html: &str) -> ParsedPage {
    let infobox = INFOBOX.captures(html).and_then(|c| flatten_infobox(&c[1]));
    let without_infobox = INFOBOX.replace_all(html, "");
    let cleaned = NOISE.replace_all(&without_infobox, "");

    let mut sections: Vec<(String, Vec<String>)> = Vec::new();
    let mut appearances = Vec::new();
    let mut current = LEAD_SECTION.to_string();
    let mut in_appearances = false;

    for block in BLOCK.captures_iter(&cleaned) {
        if let Some(inner) = block.get(2) {
            let heading = heading_text(inner.as_str());
            if heading.is_empty() {
                continue;
            }
            if STOP_HEADINGS.iter().any(|stop| heading.contains(stop)) {
                break;
            }
            in_appearances = heading.contains("Appearances");
            if !in_appearances {
                current = heading;
            }
        } else if let Some(paragraph) = block.get(3) {
            if in_appearances {
                continue;
            }
            let text = fragment_text(paragraph.as_str());
            if text.is_empty() {
                continue;
            }
            match sections.iter_mut().find(|(name, _)| *name == current) {
                Some((_, texts)) => texts.push(text),
                None => sections.push((current.clone(), vec![text])),
            }
        } else if let Some(item) = block.get(4) {
            if !in_appearances {
                continue;
            }
            let text = fragment_text(item.as_str());
            let text = PARENTHETICAL.replace_all(&text, "").trim().to_string();
            if !text.is_empty() {
                appearances.push(text);
            }
        }
    }

    ParsedPage {
        sections: sections
            .into_iter()
            .map(|(heading, texts)| ArticleSection {
                heading,
                text: texts.join(" "),
            })
            .collect(),
        infobox,
        appearances,
    }
}

/// `Section | key: value; key: value | Section | ...`
fn flatten_infobox(inner: &str) -> Option<String> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    let mut current = "General".to_string();

    for item in INFOBOX_ITEM.captures_iter(inner) {
        if let Some(header) = item.get(2) {
            let text = fragment_text(header.as_str());
            if !text.is_empty() {
                current = text;
            }
            continue;
        }

        let (Some(label), Some(value)) = (item.get(3), item.get(4)) else {
            continue;
        };
        let value = NOISE.replace_all(value.as_str(), "");
        let pair = format!("{}: {}", fragment_text(label.as_str()), fragment_text(&value));

        match groups.iter_mut().find(|(name, _)| *name == current) {
            Some((_, pairs)) => pairs.push(pair),
            None => groups.push((current.clone(), vec![pair])),
        }
    }

    if groups.is_empty() {
        return None;
    }

    Some(
        groups
            .into_iter()
            .map(|(section, pairs)| format!("{} | {}", section, pairs.join("; ")))
            .collect::<Vec<_>>()
            .join(" | "),
    )
}

fn heading_text(inner: &str) -> String {
    match HEADLINE.captures(inner) {
        Some(c) => fragment_text(&c[1]),
        None => fragment_text(&EDIT_LINK.replace_all(inner, "")),
    }
}

/// Visible text of an HTML fragment, whitespace collapsed
pub fn fragment_text(fragment: &str) -> String {
    let spaced = LINE_BREAK.replace_all(fragment, " ");
    let stripped = TAG.replace_all(&spaced, "");
    let decoded = decode_entities(&stripped);
    let collapsed = normalize_whitespace(&decoded);
    SPACE_BEFORE_PUNCT.replace_all(&collapsed, "$1").into_owned()
}

pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |c: &Captures| {
            let name = &c[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match name {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "ndash" => Some('–'),
                    "mdash" => Some('—'),
                    "hellip" => Some('…'),
                    _ => None,
                }
            };
            decoded.map(String::from).unwrap_or_else(|| c[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
<div class="mw-parser-output">
<aside role="region" class="portable-infobox pi-background pi-theme-character">
  <h2 class="pi-item pi-item-spacing pi-title" data-source="name">Yoda</h2>
  <div class="pi-item pi-data" data-source="homeworld">
    <h3 class="pi-data-label pi-secondary-font">Homeworld</h3>
    <div class="pi-data-value pi-font"><a href="/wiki/Unknown">Unknown</a><sup class="reference"><a href="#cite-1">[1]</a></sup></div>
  </div>
  <h2 class="pi-item pi-header">Physical description</h2>
  <div class="pi-item pi-data" data-source="height">
    <h3 class="pi-data-label">Height</h3>
    <div class="pi-data-value">0.66 meters</div>
  </div>
  <div class="pi-item pi-data" data-source="eyes">
    <h3 class="pi-data-label">Eye color</h3>
    <div class="pi-data-value">Green&#8211;brown</div>
  </div>
</aside>
<p><b>Yoda</b> was a legendary <a href="/wiki/Jedi">Jedi</a> Master<sup class="reference"><a href="#cite-2">[2]</a></sup>, known for his wisdom &amp; power.</p>
<table class="navbox"><tr><td><p>Navigation noise</p></td></tr></table>
<h2><span class="mw-headline" id="Biography">Biography</span><span class="mw-editsection"><span class="mw-editsection-bracket">[</span><a href="?action=edit">edit</a><span class="mw-editsection-bracket">]</span></span></h2>
<p>He trained Jedi for eight hundred years.</p>
<p>He lived on <a href="/wiki/Dagobah">Dagobah</a> in exile.</p>
<h2><span class="mw-headline" id="Appearances">Appearances</span></h2>
<ul>
<li><i><a href="/wiki/The_Empire_Strikes_Back">The Empire Strikes Back</a></i> (First appearance)</li>
<li><i>Return of the Jedi</i></li>
</ul>
<h2><span class="mw-headline" id="Sources">Sources</span></h2>
<p>This paragraph is after the stop heading.</p>
</div>"##;

    #[test]
    fn test_parse_article_sections() {
        let page = parse_article(PAGE);

        assert_eq!(page.sections.len(), 2);
        assert_eq!(page.sections[0].heading, "Main");
        assert_eq!(
            page.sections[0].text,
            "Yoda was a legendary Jedi Master, known for his wisdom & power."
        );
        assert_eq!(page.sections[1].heading, "Biography");
        assert_eq!(
            page.sections[1].text,
            "He trained Jedi for eight hundred years. He lived on Dagobah in exile."
        );
        assert!(!page.body().contains("Navigation noise"));
        assert!(!page.body().contains("after the stop heading"));
    }

    #[test]
    fn test_parse_article_appearances() {
        let page = parse_article(PAGE);
        assert_eq!(
            page.appearances,
            vec!["The Empire Strikes Back".to_string(), "Return of the Jedi".to_string()]
        );
    }

    #[test]
    fn test_parse_article_infobox() {
        let page = parse_article(PAGE);
        assert_eq!(
            page.infobox.as_deref(),
            Some("Yoda | Homeworld: Unknown | Physical description | Height: 0.66 meters; Eye color: Green–brown")
        );
    }

    #[test]
    fn test_new_style_headings() {
        let html = r#"<p>Lead.</p><div class="mw-heading mw-heading2"><h2 id="History">History</h2><span class="mw-editsection"><span class="mw-editsection-bracket">[</span><a>edit</a><span class="mw-editsection-bracket">]</span></span></div><p>Old times.</p>"#;
        let page = parse_article(html);
        assert_eq!(page.sections[1].heading, "History");
        assert_eq!(page.sections[1].text, "Old times.");
        assert!(page.infobox.is_none());
    }

    #[test]
    fn test_page_without_prose() {
        let page = parse_article(r#"<div class="mw-parser-output"><table><tr><td>only a table</td></tr></table></div>"#);
        assert!(page.sections.is_empty());
        assert!(page.body().is_empty());
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("R2&#45;D2 &amp; C&#x2D;3PO&nbsp;&bogus;"), "R2-D2 & C-3PO &bogus;");
    }
}
