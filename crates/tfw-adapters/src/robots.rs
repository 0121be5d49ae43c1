//! Robots-exclusion policy parsing and the fail-open compliance gate.

use std::sync::Arc;
use std::time::Duration;

use tfw_storage::{FetchError, HttpFetcher};
use tracing::warn;
use url::Url;

/// Outcome of a policy check before it is collapsed to a yes/no.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allowed,
    Denied,
    /// Policy could not be read; treated as allowed.
    Undetermined(String),
}

impl PolicyVerdict {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, PolicyVerdict::Denied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed `robots.txt`.
///
/// Longest matching pattern decides; `Allow` wins a tie. Patterns support `*` and a
/// trailing `$` anchor.
#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    groups: Vec<Group>,
}

impl RobotsPolicy {
    pub fn parse(text: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current: Option<Group> = None;

        for raw in text.lines() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // A user-agent line after rules opens a new group.
                    if current.as_ref().is_some_and(|g| !g.rules.is_empty()) {
                        groups.extend(current.take());
                    }
                    current
                        .get_or_insert_with(Group::default)
                        .agents
                        .push(value.to_ascii_lowercase());
                }
                "allow" | "disallow" => {
                    let Some(group) = current.as_mut() else {
                        continue;
                    };
                    if value.is_empty() {
                        continue;
                    }
                    group.rules.push(Rule {
                        allow: key == "allow",
                        pattern: value.to_string(),
                    });
                }
                _ => {}
            }
        }
        groups.extend(current);
        Self { groups }
    }

    fn rules_for(&self, agent: &str) -> Vec<&Rule> {
        let agent = agent.to_ascii_lowercase();
        let specific: Vec<&Rule> = self
            .groups
            .iter()
            .filter(|g| {
                g.agents
                    .iter()
                    .any(|a| a != "*" && !a.is_empty() && agent.contains(a.as_str()))
            })
            .flat_map(|g| g.rules.iter())
            .collect();
        if !specific.is_empty() {
            return specific;
        }
        self.groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a == "*"))
            .flat_map(|g| g.rules.iter())
            .collect()
    }

    /// `path` is the URL path plus optional `?query`.
    pub fn is_allowed(&self, agent: &str, path: &str) -> bool {
        let mut best: Option<(usize, bool)> = None;
        for rule in self.rules_for(agent) {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            let len = rule.pattern.len();
            best = match best {
                Some((best_len, best_allow)) if best_len > len || (best_len == len && best_allow) => {
                    Some((best_len, best_allow))
                }
                _ => Some((len, rule.allow)),
            };
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = path.chars().collect();
    // reachable[j]: pattern prefix consumed so far can end at text position j
    let mut reachable = vec![false; txt.len() + 1];
    reachable[0] = true;
    for &pc in &pat {
        let mut next = vec![false; txt.len() + 1];
        if pc == '*' {
            let mut seen = false;
            for j in 0..=txt.len() {
                seen |= reachable[j];
                next[j] = seen;
            }
        } else {
            for j in 0..txt.len() {
                if reachable[j] && txt[j] == pc {
                    next[j + 1] = true;
                }
            }
        }
        reachable = next;
    }
    if anchored {
        reachable[txt.len()]
    } else {
        reachable.iter().any(|r| *r)
    }
}

pub fn robots_url_for(target: &Url) -> Result<Url, url::ParseError> {
    target.join("/robots.txt")
}

fn path_and_query(target: &Url) -> String {
    match target.query() {
        Some(q) => format!("{}?{}", target.path(), q),
        None => target.path().to_string(),
    }
}

/// Consults the target origin's `robots.txt` before an HTML fetch.
#[derive(Debug, Clone)]
pub struct ComplianceGate {
    http: Arc<HttpFetcher>,
    agent: String,
    timeout: Duration,
}

impl ComplianceGate {
    pub fn new(http: Arc<HttpFetcher>, agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            agent: agent.into(),
            timeout,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub async fn check(&self, target_url: &str) -> PolicyVerdict {
        let target = match Url::parse(target_url) {
            Ok(url) => url,
            Err(err) => return PolicyVerdict::Undetermined(format!("invalid target url: {err}")),
        };
        let robots_url = match robots_url_for(&target) {
            Ok(url) => url,
            Err(err) => return PolicyVerdict::Undetermined(format!("cannot derive robots url: {err}")),
        };

        match self.http.fetch_direct(robots_url.as_str(), self.timeout).await {
            Ok(resp) => {
                let policy = RobotsPolicy::parse(&resp.text());
                if policy.is_allowed(&self.agent, &path_and_query(&target)) {
                    PolicyVerdict::Allowed
                } else {
                    PolicyVerdict::Denied
                }
            }
            Err(err) => match err.status() {
                Some(401) | Some(403) => PolicyVerdict::Denied,
                Some(status) if (400..500).contains(&status) => {
                    warn!(status, %robots_url, "no robots policy published; assuming allowed");
                    PolicyVerdict::Allowed
                }
                _ => PolicyVerdict::Undetermined(describe(&err)),
            },
        }
    }

    /// Fail-open boolean form of [`check`](Self::check).
    pub async fn is_allowed(&self, target_url: &str) -> bool {
        match self.check(target_url).await {
            PolicyVerdict::Allowed => true,
            PolicyVerdict::Denied => {
                warn!(url = target_url, "robots policy disallows this url");
                false
            }
            PolicyVerdict::Undetermined(reason) => {
                warn!(url = target_url, %reason, "robots policy unavailable; assuming allowed");
                true
            }
        }
    }
}

fn describe(err: &FetchError) -> String {
    if err.is_timeout() {
        format!("timed out: {err}")
    } else {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT: &str = "Mozilla/5.0 (compatible; TfwBot/1.0)";

    #[test]
    fn wildcard_group_applies_when_no_specific_group_matches() {
        let policy = RobotsPolicy::parse("User-agent: *\nDisallow: /private/\n");
        assert!(!policy.is_allowed(AGENT, "/private/data"));
        assert!(policy.is_allowed(AGENT, "/weather/poland/opole/historic"));
    }

    #[test]
    fn specific_group_overrides_wildcard() {
        let text = "User-agent: *\nDisallow: /\n\nUser-agent: tfwbot\nAllow: /weather/\nDisallow: /\n";
        let policy = RobotsPolicy::parse(text);
        assert!(policy.is_allowed(AGENT, "/weather/poland/opole/historic?month=5"));
        assert!(!policy.is_allowed(AGENT, "/news/"));
        assert!(!policy.is_allowed("OtherBot/2.0", "/weather/"));
    }

    #[test]
    fn longest_match_wins_and_allow_breaks_ties() {
        let text = "User-agent: *\nDisallow: /weather/\nAllow: /weather/poland/\nDisallow: /same\nAllow: /same\n";
        let policy = RobotsPolicy::parse(text);
        assert!(policy.is_allowed(AGENT, "/weather/poland/opole"));
        assert!(!policy.is_allowed(AGENT, "/weather/germany/berlin"));
        assert!(policy.is_allowed(AGENT, "/same/thing"));
    }

    #[test]
    fn wildcards_and_anchors() {
        let text = "User-agent: *\nDisallow: /*?hd=\nDisallow: /*.php$\n";
        let policy = RobotsPolicy::parse(text);
        assert!(!policy.is_allowed(AGENT, "/weather/opole/historic?hd=20240502"));
        assert!(policy.is_allowed(AGENT, "/weather/opole/historic"));
        assert!(!policy.is_allowed(AGENT, "/index.php"));
        assert!(policy.is_allowed(AGENT, "/index.php?x=1"));
    }

    #[test]
    fn comments_blank_disallow_and_consecutive_agents() {
        let text = "# site policy\nUser-agent: a-bot\nUser-agent: *   # everyone\nDisallow:\nSitemap: https://example.com/sitemap.xml\n";
        let policy = RobotsPolicy::parse(text);
        assert!(policy.is_allowed(AGENT, "/anything"));
    }

    #[test]
    fn empty_policy_allows_everything() {
        assert!(RobotsPolicy::parse("").is_allowed(AGENT, "/"));
    }

    #[test]
    fn robots_url_uses_origin_only() {
        let target = Url::parse("https://www.timeanddate.com/weather/poland/opole/historic?month=5&year=2024").unwrap();
        assert_eq!(
            robots_url_for(&target).unwrap().as_str(),
            "https://www.timeanddate.com/robots.txt"
        );
        assert_eq!(path_and_query(&target), "/weather/poland/opole/historic?month=5&year=2024");
    }

    #[test]
    fn verdict_collapses_fail_open() {
        assert!(PolicyVerdict::Allowed.is_allowed());
        assert!(PolicyVerdict::Undetermined("timeout".into()).is_allowed());
        assert!(!PolicyVerdict::Denied.is_allowed());
    }
}
