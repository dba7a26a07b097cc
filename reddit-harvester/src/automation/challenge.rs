//! Page-content heuristics: anti-automation challenges, rate limits, live
//! content pages and post-submit verification.
//!
//! Markup is read with `scraper`. Notice phrases only count inside alert,
//! toast, error and challenge elements, and comment text only counts once it
//! is outside any editable control, so post bodies and our own unsent draft
//! never trigger a match. A positive rate-limit reading does not prove the
//! reply was lost, nor does a verification pass prove it landed.

use interfaces::defs::{PageController, Selector};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector as CssSelector};

const CHALLENGE_PHRASES: &[&str] = &[
    "verify you are human",
    "are you a robot",
    "complete the captcha",
    "prove you're not a robot",
    "checking your browser",
    "please verify",
    "just a moment",
];

const CHALLENGE_SELECTORS: &[&str] = &[
    r#"iframe[src*="recaptcha"]"#,
    r#"iframe[src*="hcaptcha"]"#,
    r#"iframe[src*="arkose"]"#,
    ".g-recaptcha",
    ".h-captcha",
    "#challenge-form",
    "#cf-challenge-running",
    r#"[id*="funcaptcha"]"#,
];

const NOTICE_SELECTORS: &[&str] = &[
    "title",
    r#"[role="alert"]"#,
    r#"[role="status"]"#,
    "[aria-live]",
    "faceplate-toast",
    "shreddit-toast",
    r#"[class*="toast"]"#,
    r#"[class*="error"]"#,
    r#"[class*="ratelimit"]"#,
];

const RATE_LIMIT_PHRASES: &[&str] = &[
    "you are doing that too much",
    "you're doing that too much",
    "try again in",
    "rate limit",
    "too many requests",
    "take a break",
];

/// Whole titles of error and interstitial pages.
const ERROR_TITLES: &[&str] = &["blocked", "forbidden", "not found", "reddit - dive into anything"];

const ERROR_TITLE_PREFIXES: &[&str] = &[
    "page not found",
    "404 not found",
    "403 forbidden",
    "something went wrong",
    "whoa there, pardner",
    "too many requests",
];

const COMMENT_SELECTORS: &[&str] = &["shreddit-comment", r#"[data-testid="comment"]"#, ".comment"];

const FRESH_COMMENT_MARKERS: &[&str] = &["just now", "0 minutes ago", "1 minute ago", "0 min. ago"];

const REPLY_FRAGMENT_CHARS: usize = 40;

pub fn challenge_selectors() -> Vec<Selector> {
    CHALLENGE_SELECTORS.iter().map(|s| Selector::css(s)).collect()
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Every element matching any of `selectors`, each at most once.
fn matching<'a>(document: &'a Html, selectors: &[&str]) -> Vec<ElementRef<'a>> {
    let mut found: Vec<ElementRef<'a>> = Vec::new();
    for raw in selectors {
        let Ok(selector) = CssSelector::parse(raw) else {
            continue;
        };
        for element in document.select(&selector) {
            if !found.iter().any(|seen| seen.id() == element.id()) {
                found.push(element);
            }
        }
    }
    found
}

fn is_editable(element: ElementRef) -> bool {
    let value = element.value();
    matches!(value.name(), "textarea" | "input")
        || value
            .attr("contenteditable")
            .is_some_and(|v| !v.eq_ignore_ascii_case("false"))
}

/// Text of `element`, leaving out whatever sits inside an editable control.
fn settled_text(element: ElementRef) -> String {
    let mut text = String::new();
    for node in element.descendants() {
        let Node::Text(fragment) = node.value() else {
            continue;
        };
        if node.ancestors().filter_map(ElementRef::wrap).any(is_editable) {
            continue;
        }
        text.push_str(fragment);
        text.push(' ');
    }
    normalize(&text)
}

fn notices_mention(document: &Html, phrases: &[&str]) -> bool {
    matching(document, NOTICE_SELECTORS).into_iter().any(|notice| {
        let text = settled_text(notice);
        phrases.iter().any(|p| text.contains(p))
    })
}

pub fn mentions_challenge(content: &str) -> bool {
    let document = Html::parse_document(content);
    !matching(&document, CHALLENGE_SELECTORS).is_empty() || notices_mention(&document, CHALLENGE_PHRASES)
}

pub fn mentions_rate_limit(content: &str) -> bool {
    notices_mention(&Html::parse_document(content), RATE_LIMIT_PHRASES)
}

/// Looks for a challenge in the page markup and among visible challenge widgets.
pub async fn challenge_present(page: &dyn PageController) -> bool {
    if let Ok(content) = page.content().await {
        if mentions_challenge(&content) {
            return true;
        }
    }
    for selector in challenge_selectors() {
        if let Ok(elements) = page.locate(&selector).await {
            for element in elements {
                if page.is_visible(&element).await.unwrap_or(false) {
                    return true;
                }
            }
        }
    }
    false
}

pub fn is_auth_page(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("/login") || lower.contains("/account/login") || lower.contains("/register")
}

fn is_error_title(title: &str) -> bool {
    ERROR_TITLES.contains(&title) || ERROR_TITLE_PREFIXES.iter().any(|p| title.starts_with(p))
}

/// A navigation landed on a post when the response was not an error, the URL
/// addresses a post and the title is not an error page's.
pub fn is_live_content_page(url: &str, title: &str, status: Option<u16>) -> bool {
    if status.is_some_and(|s| s >= 400) {
        return false;
    }
    let url = url.to_lowercase();
    let title = normalize(title);
    if title.is_empty() || is_auth_page(&url) {
        return false;
    }
    if !(url.contains("/comments/") || url.contains("/by_id/")) {
        return false;
    }
    !is_error_title(&title)
}

/// What the page shows about our reply at one moment. Read once just before
/// submitting and again after, then compared with [`landed_since`].
///
/// [`landed_since`]: VerificationSignals::landed_since
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationSignals {
    /// Comments whose settled text carries the start of our reply.
    pub reply_matches: usize,
    pub comment_region: bool,
    pub still_on_target: bool,
    /// Comments stamped as just posted.
    pub fresh_matches: usize,
    pub rate_limited: bool,
}

impl VerificationSignals {
    pub fn read(content: &str, url: &str, target_id: &str, reply: &str) -> Self {
        let document = Html::parse_document(content);
        let fragment: String = normalize(reply).chars().take(REPLY_FRAGMENT_CHARS).collect();
        let comments: Vec<String> = matching(&document, COMMENT_SELECTORS)
            .into_iter()
            .map(settled_text)
            .collect();

        Self {
            reply_matches: if fragment.is_empty() {
                0
            } else {
                comments.iter().filter(|c| c.contains(&fragment)).count()
            },
            comment_region: !comments.is_empty(),
            still_on_target: !target_id.is_empty() && url.to_lowercase().contains(&target_id.to_lowercase()),
            fresh_matches: comments
                .iter()
                .filter(|c| FRESH_COMMENT_MARKERS.iter().any(|m| c.contains(m)))
                .count(),
            rate_limited: notices_mention(&document, RATE_LIMIT_PHRASES),
        }
    }

    /// A new comment carrying our text is decisive. Without one, a new fresh
    /// comment, comment markup and a URL still on the target must all agree.
    pub fn landed_since(&self, before: &Self) -> bool {
        self.reply_matches > before.reply_matches
            || (self.comment_region && self.still_on_target && self.fresh_matches > before.fresh_matches)
    }
}
