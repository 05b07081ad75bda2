//! Scrape rules and the ordered engine that evaluates them.
//!
//! Every rule, built-in or user supplied, is the same `ScrapeRule` value: a name
//! plus a predicate over `ScrapeContext`. The engine runs rules in insertion
//! order and stops at the first failure.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use chrono::Timelike;
use log::{debug, error, info};

use crate::config::ScrapingConfig;
use crate::models::{Artist, ScrapeContext, ScrapeResult};

/// Pass/fail verdict of one rule plus a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub passed: bool,
    pub reason: String,
}

impl RuleOutcome {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

type RuleCheck = Box<dyn Fn(&ScrapeContext<'_>) -> RuleOutcome + Send + Sync>;

/// Named predicate deciding whether a liked track may trigger a scrape.
pub struct ScrapeRule {
    name: String,
    check: RuleCheck,
}

impl fmt::Debug for ScrapeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrapeRule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ScrapeRule {
    /// Builds a rule from an infallible check.
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&ScrapeContext<'_>) -> RuleOutcome + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Box::new(check),
        }
    }

    /// Track must credit at least `min_artists` artists.
    pub fn minimum_artists(min_artists: usize) -> Self {
        Self::new(format!("MinimumArtists(>={min_artists})"), move |context| {
            let artist_count = context.track.artists.len();
            if artist_count >= min_artists {
                RuleOutcome::pass(format!(
                    "Track has {artist_count} artists (>= {min_artists})"
                ))
            } else {
                RuleOutcome::fail(format!(
                    "Track has only {artist_count} artist(s), need >= {min_artists}"
                ))
            }
        })
    }

    /// None of the track's artists may already be known. Disabled rules always pass.
    pub fn no_known_artists(enabled: bool) -> Self {
        Self::new("NoKnownArtists", move |context| {
            if !enabled {
                return RuleOutcome::pass("Known artist check disabled");
            }
            let known_names: Vec<&str> = context
                .track
                .artists
                .iter()
                .filter(|artist| context.known_artist_ids.contains(&artist.id))
                .map(|artist| artist.name.as_str())
                .collect();
            if known_names.is_empty() {
                RuleOutcome::pass("No known artists on this track")
            } else {
                RuleOutcome::fail(format!(
                    "Already known artist(s): {}",
                    known_names.join(", ")
                ))
            }
        })
    }

    /// Wraps a fallible user predicate.
    ///
    /// An `Err` or a panic raised by the predicate becomes a failing outcome so a
    /// misbehaving rule cannot take down the poll loop.
    pub fn custom<F>(name: impl Into<String>, description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ScrapeContext<'_>) -> Result<bool, String> + Send + Sync + 'static,
    {
        let name = name.into();
        let description = description.into();
        let rule_name = name.clone();
        Self::new(name, move |context| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| predicate(context)))
                .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())));
            match result {
                Ok(passed) => {
                    let reason = if description.is_empty() {
                        format!("{rule_name}: {passed}")
                    } else {
                        description.clone()
                    };
                    RuleOutcome { passed, reason }
                }
                Err(err) => {
                    error!("Error evaluating custom rule {}: {}", rule_name, err);
                    RuleOutcome::fail(format!("Rule evaluation error: {err}"))
                }
            }
        })
    }

    /// Only allows scraping between `start_hour` (inclusive) and `end_hour`
    /// (exclusive), local time. `start_hour > end_hour` wraps past midnight.
    pub fn time_of_day(start_hour: u32, end_hour: u32) -> Self {
        Self::custom(
            format!("TimeOfDay({start_hour:02}:00-{end_hour:02}:00)"),
            format!("Only scrape between {start_hour}:00 and {end_hour}:00"),
            move |context| {
                let hour = context.evaluated_at.hour();
                Ok(if start_hour <= end_hour {
                    (start_hour..end_hour).contains(&hour)
                } else {
                    hour >= start_hour || hour < end_hour
                })
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, context: &ScrapeContext<'_>) -> RuleOutcome {
        (self.check)(context)
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return format!("panicked: {message}");
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return format!("panicked: {message}");
    }
    "panicked with non-string payload".to_string()
}

/// Ordered rule registry deciding which newly liked tracks trigger a scrape.
#[derive(Debug, Default)]
pub struct ScrapeRulesEngine {
    rules: Vec<ScrapeRule>,
}

impl ScrapeRulesEngine {
    /// Creates an engine with the default rule set for `settings`.
    pub fn new(settings: &ScrapingConfig) -> Self {
        Self {
            rules: vec![
                ScrapeRule::minimum_artists(settings.min_artists),
                ScrapeRule::no_known_artists(settings.skip_known_artists),
            ],
        }
    }

    /// Appends a rule; it runs after every rule already registered.
    pub fn add_rule(&mut self, rule: ScrapeRule) {
        info!("Added scraping rule: {}", rule.name());
        self.rules.push(rule);
    }

    /// Removes the first rule named `rule_name`. Returns `false` if none matched.
    pub fn remove_rule(&mut self, rule_name: &str) -> bool {
        let Some(index) = self.rules.iter().position(|rule| rule.name() == rule_name) else {
            return false;
        };
        self.rules.remove(index);
        info!("Removed scraping rule: {}", rule_name);
        true
    }

    pub fn clear_rules(&mut self) {
        self.rules.clear();
    }

    pub fn list_rules(&self) -> Vec<String> {
        self.rules.iter().map(|rule| rule.name().to_string()).collect()
    }

    /// Runs every rule in order and picks the artists worth scraping.
    pub fn evaluate(&self, context: &ScrapeContext<'_>) -> ScrapeResult {
        let track = context.track;
        debug!("Evaluating scraping rules for: {}", track.display_label());

        for rule in &self.rules {
            let outcome = rule.evaluate(context);
            debug!(
                "  Rule '{}': {} - {}",
                rule.name(),
                if outcome.passed { "PASS" } else { "FAIL" },
                outcome.reason
            );
            if !outcome.passed {
                return ScrapeResult::skip(format!(
                    "Rule '{}' failed: {}",
                    rule.name(),
                    outcome.reason
                ));
            }
        }

        let artists_to_scrape: Vec<Artist> = track
            .artists
            .iter()
            .filter(|artist| !context.known_artist_ids.contains(&artist.id))
            .cloned()
            .collect();
        if artists_to_scrape.is_empty() {
            return ScrapeResult::skip("All artists already known, none to scrape");
        }

        ScrapeResult {
            should_scrape: true,
            reason: format!("All {} rules passed", self.rules.len()),
            artists_to_scrape,
        }
    }
}
