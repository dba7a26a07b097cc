//! Ordered element-locating strategies.
//!
//! Each strategy names one way of finding an element. Strategies are tried in
//! priority order and every attempt reports the same [`StrategyOutcome`].

use interfaces::defs::{CapabilityError, ElementHandle, PageController, Selector};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Strategy {
    pub describe: &'static str,
    pub selector: Selector,
}

impl Strategy {
    pub const fn new(describe: &'static str, selector: Selector) -> Self {
        Self { describe, selector }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Interaction<'a> {
    /// Fill the element, then read it back and require the text's leading
    /// characters to come out again.
    Fill(&'a str),
    Click,
}

#[derive(Debug)]
pub enum StrategyOutcome {
    Found {
        strategy: &'static str,
        element: ElementHandle,
    },
    NotFound,
    Error(CapabilityError),
}

impl StrategyOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, StrategyOutcome::Found { .. })
    }
}

const ROUND_TRIP_PREFIX_CHARS: usize = 20;

/// Tries one strategy: the first visible candidate that accepts the interaction wins.
pub async fn attempt(page: &dyn PageController, strategy: &Strategy, interaction: Interaction<'_>) -> StrategyOutcome {
    let candidates = match page.locate(&strategy.selector).await {
        Ok(candidates) => candidates,
        Err(e) => return StrategyOutcome::Error(e),
    };

    for element in candidates {
        match page.is_visible(&element).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => return StrategyOutcome::Error(e),
        }

        match interaction {
            Interaction::Click => {
                if let Err(e) = page.click(&element).await {
                    return StrategyOutcome::Error(e);
                }
            }
            Interaction::Fill(text) => {
                if let Err(e) = page.fill(&element, text).await {
                    return StrategyOutcome::Error(e);
                }
                match page.read_value(&element).await {
                    Ok(value) if round_trips(text, &value) => {}
                    Ok(_) => {
                        debug!("{} did not keep the filled text", strategy.describe);
                        continue;
                    }
                    Err(e) => return StrategyOutcome::Error(e),
                }
            }
        }

        return StrategyOutcome::Found {
            strategy: strategy.describe,
            element,
        };
    }

    StrategyOutcome::NotFound
}

/// Runs strategies in order and returns the first `Found`.
///
/// A strategy that errors does not stop the search; the last error is
/// reported only when no strategy succeeded.
pub async fn first_match(
    page: &dyn PageController,
    strategies: &[Strategy],
    interaction: Interaction<'_>,
) -> StrategyOutcome {
    let mut last_error = None;

    for strategy in strategies {
        match attempt(page, strategy, interaction).await {
            found @ StrategyOutcome::Found { .. } => {
                debug!("Matched {} via {}", strategy.selector, strategy.describe);
                return found;
            }
            StrategyOutcome::NotFound => {}
            StrategyOutcome::Error(e) => {
                debug!("Strategy {} failed: {}", strategy.describe, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => StrategyOutcome::Error(e),
        None => StrategyOutcome::NotFound,
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn round_trips(expected: &str, actual: &str) -> bool {
    let expected: String = normalize(expected).chars().take(ROUND_TRIP_PREFIX_CHARS).collect();
    normalize(actual).starts_with(&expected)
}

pub fn username_strategies() -> Vec<Strategy> {
    vec![
        Strategy::new("username by name", Selector::css(r#"input[name="username"]"#)),
        Strategy::new("username by id", Selector::css("#login-username")),
        Strategy::new("username by autocomplete", Selector::css(r#"input[autocomplete="username"]"#)),
        Strategy::new("username by placeholder", Selector::placeholder("Email or username")),
        Strategy::new("first text input", Selector::css(r#"form input[type="text"]"#)),
    ]
}

pub fn password_strategies() -> Vec<Strategy> {
    vec![
        Strategy::new("password by name", Selector::css(r#"input[name="password"]"#)),
        Strategy::new("password by id", Selector::css("#login-password")),
        Strategy::new("password by type", Selector::css(r#"input[type="password"]"#)),
        Strategy::new("password by placeholder", Selector::placeholder("Password")),
    ]
}

pub fn login_submit_strategies() -> Vec<Strategy> {
    vec![
        Strategy::new("submit button", Selector::css(r#"button[type="submit"]"#)),
        Strategy::new("login button class", Selector::css("button.login")),
        Strategy::new("log in text", Selector::text("Log In")),
    ]
}

/// Elements that open a collapsed comment composer.
pub fn composer_opener_strategies() -> Vec<Strategy> {
    vec![
        Strategy::new("comment composer trigger", Selector::css(r#"comment-composer-host button"#)),
        Strategy::new("add a comment placeholder", Selector::placeholder("Add a comment")),
        Strategy::new("join the conversation text", Selector::text("Join the conversation")),
    ]
}

pub fn reply_input_strategies() -> Vec<Strategy> {
    vec![
        Strategy::new("rich text editor", Selector::css(r#"div[contenteditable="true"][role="textbox"]"#)),
        Strategy::new("comment textarea by name", Selector::css(r#"textarea[name="text"]"#)),
        Strategy::new("old reddit usertext", Selector::css("form.usertext textarea")),
        Strategy::new("any contenteditable", Selector::css(r#"div[contenteditable="true"]"#)),
        Strategy::new("any textarea", Selector::css("textarea")),
    ]
}

pub fn reply_submit_strategies() -> Vec<Strategy> {
    vec![
        Strategy::new("comment submit slot", Selector::css(r#"button[slot="submit-button"]"#)),
        Strategy::new("submit button", Selector::css(r#"button[type="submit"]"#)),
        Strategy::new("old reddit save", Selector::css("form.usertext button.save")),
        Strategy::new("comment text", Selector::text("Comment")),
        Strategy::new("reply text", Selector::text("Reply")),
    ]
}
