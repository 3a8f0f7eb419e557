//! Prioritized extraction rules
//!
//! Each field (title, price, seller) has an ordered list of rules. Rules are
//! plain data so they can be changed in the config file when the source's
//! markup drifts; the first rule producing a usable value wins.

use super::price::parse_price;
use crate::error::{Error, Result};
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

/// One extraction strategy as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldRule {
    /// Text content of the first non-empty element matching a CSS selector
    Css { selector: String },
    /// Attribute value of the first matching element
    Attr { selector: String, attr: String },
    /// First capture group (or whole match) of a pattern over the raw document
    Regex { pattern: String },
}

impl FieldRule {
    pub fn css(selector: &str) -> Self {
        Self::Css {
            selector: selector.to_string(),
        }
    }

    pub fn attr(selector: &str, attr: &str) -> Self {
        Self::Attr {
            selector: selector.to_string(),
            attr: attr.to_string(),
        }
    }

    pub fn regex(pattern: &str) -> Self {
        Self::Regex {
            pattern: pattern.to_string(),
        }
    }

    fn compile(&self) -> Result<CompiledRule> {
        match self {
            FieldRule::Css { selector } => Ok(CompiledRule::Css(parse_selector(selector)?)),
            FieldRule::Attr { selector, attr } => {
                Ok(CompiledRule::Attr(parse_selector(selector)?, attr.clone()))
            }
            FieldRule::Regex { pattern } => Regex::new(pattern)
                .map(CompiledRule::Regex)
                .map_err(|e| Error::Config(format!("Invalid rule pattern '{}': {}", pattern, e))),
        }
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| Error::Config(format!("Invalid rule selector '{}': {}", selector, e)))
}

#[derive(Debug, Clone)]
enum CompiledRule {
    Css(Selector),
    Attr(Selector, String),
    Regex(Regex),
}

impl CompiledRule {
    /// Every candidate value this rule yields, in document order
    fn candidates<'a>(&'a self, doc: &'a Html, raw: &'a str) -> Box<dyn Iterator<Item = String> + 'a> {
        match self {
            CompiledRule::Css(selector) => Box::new(
                doc.select(selector)
                    .map(|el| collapse_whitespace(&el.text().collect::<String>())),
            ),
            CompiledRule::Attr(selector, attr) => Box::new(
                doc.select(selector)
                    .filter_map(move |el| el.value().attr(attr))
                    .map(collapse_whitespace),
            ),
            CompiledRule::Regex(re) => Box::new(
                re.captures_iter(raw)
                    .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
                    .map(|m| collapse_whitespace(m.as_str())),
            ),
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(rules: &[CompiledRule], doc: &Html, raw: &str) -> Option<String> {
    rules
        .iter()
        .find_map(|rule| rule.candidates(doc, raw).find(|value| !value.is_empty()))
}

/// Raw field values pulled from one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub title: Option<String>,
    pub price: Option<f64>,
    pub seller: Option<String>,
}

/// Compiled rule lists for all three fields
#[derive(Debug, Clone)]
pub struct RuleSet {
    title: Vec<CompiledRule>,
    price: Vec<CompiledRule>,
    seller: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile rule lists; title and price must each have at least one rule
    pub fn compile(title: &[FieldRule], price: &[FieldRule], seller: &[FieldRule]) -> Result<Self> {
        if title.is_empty() {
            return Err(Error::Config("At least one title rule is required".to_string()));
        }
        if price.is_empty() {
            return Err(Error::Config("At least one price rule is required".to_string()));
        }

        let compile_all = |rules: &[FieldRule]| -> Result<Vec<CompiledRule>> {
            rules.iter().map(FieldRule::compile).collect()
        };

        Ok(Self {
            title: compile_all(title)?,
            price: compile_all(price)?,
            seller: compile_all(seller)?,
        })
    }

    /// Evaluate the rules against an HTML document.
    ///
    /// Price candidates that do not parse as a number are skipped, so a price
    /// is absent only when no candidate of any rule converts.
    pub fn evaluate(&self, html: &str) -> ExtractedFields {
        let doc = Html::parse_document(html);

        let price = self.price.iter().find_map(|rule| {
            rule.candidates(&doc, html)
                .filter(|value| !value.is_empty())
                .find_map(|value| parse_price(&value))
        });

        ExtractedFields {
            title: first_text(&self.title, &doc, html),
            price,
            seller: first_text(&self.seller, &doc, html),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(title: &[FieldRule], price: &[FieldRule], seller: &[FieldRule]) -> RuleSet {
        RuleSet::compile(title, price, seller).unwrap()
    }

    #[test]
    fn test_first_non_empty_rule_wins() {
        let html = r#"<html><body>
            <h1 class="name">   </h1>
            <h1>Fallback   Widget</h1>
            <span class="price">12,50 TL</span>
        </body></html>"#;
        let set = rules(
            &[FieldRule::css("h1.name"), FieldRule::css("h1")],
            &[FieldRule::css(".price")],
            &[],
        );

        let fields = set.evaluate(html);
        assert_eq!(fields.title.as_deref(), Some("Fallback Widget"));
        assert_eq!(fields.price, Some(12.5));
        assert_eq!(fields.seller, None);
    }

    #[test]
    fn test_attr_and_regex_rules() {
        let html = r#"<html><head>
            <meta property="og:title" content="Meta Widget">
            <script>window.state = {"merchantName":"Acme Store","price":"1.299,90"};</script>
        </head><body></body></html>"#;
        let set = rules(
            &[FieldRule::css("h1"), FieldRule::attr("meta[property='og:title']", "content")],
            &[FieldRule::regex(r#""price"\s*:\s*"([^"]+)""#)],
            &[FieldRule::regex(r#""merchantName"\s*:\s*"([^"]+)""#)],
        );

        let fields = set.evaluate(html);
        assert_eq!(fields.title.as_deref(), Some("Meta Widget"));
        assert_eq!(fields.price, Some(1299.9));
        assert_eq!(fields.seller.as_deref(), Some("Acme Store"));
    }

    #[test]
    fn test_unparseable_price_falls_through() {
        let html = r#"<span class="old">Call us</span><span class="new">59,90</span>"#;
        let set = rules(
            &[FieldRule::css("span")],
            &[FieldRule::css(".old"), FieldRule::css(".new")],
            &[],
        );
        assert_eq!(set.evaluate(html).price, Some(59.9));

        let only_text = rules(&[FieldRule::css("span")], &[FieldRule::css(".old")], &[]);
        assert_eq!(only_text.evaluate(html).price, None);
    }

    #[test]
    fn test_compile_rejects_bad_rules() {
        assert!(RuleSet::compile(&[FieldRule::css("h1[")], &[FieldRule::css("p")], &[]).is_err());
        assert!(RuleSet::compile(&[FieldRule::css("h1")], &[FieldRule::regex("(")], &[]).is_err());
        assert!(RuleSet::compile(&[], &[FieldRule::css("p")], &[]).is_err());
    }
}
