//! robots.txt parsing and a process-local cache.
//!
//! Rules are cached per origin for 24 h. A robots.txt that cannot be fetched
//! (404, network error, oversized) allows everything, matching common
//! crawler behaviour; a `Disallow` hit yields `robots_disallowed` without
//! fetching the page.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use url::Url;

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_ROBOTS_BYTES: usize = 512 * 1024;

/// Parsed robots.txt rules, grouped per user-agent.
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    rules: HashMap<String, AgentRules>,
    default_rules: AgentRules,
}

#[derive(Debug, Clone, Default)]
struct AgentRules {
    disallow: Vec<String>,
    allow: Vec<String>,
}

impl RobotsTxt {
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut current_agents: Vec<String> = Vec::new();
        let mut current = AgentRules::default();
        let mut in_group = false;

        let mut flush = |agents: &mut Vec<String>, rules: &mut AgentRules, robots: &mut Self| {
            for agent in agents.drain(..) {
                if agent == "*" {
                    robots.default_rules = rules.clone();
                } else {
                    robots.rules.insert(agent, rules.clone());
                }
            }
            *rules = AgentRules::default();
        };

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_ascii_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    if in_group {
                        flush(&mut current_agents, &mut current, &mut robots);
                        in_group = false;
                    }
                    current_agents.push(value.to_ascii_lowercase());
                }
                "disallow" => {
                    in_group = true;
                    if !value.is_empty() {
                        current.disallow.push(value.to_string());
                    }
                }
                "allow" => {
                    in_group = true;
                    if !value.is_empty() {
                        current.allow.push(value.to_string());
                    }
                }
                _ => {}
            }
        }
        flush(&mut current_agents, &mut current, &mut robots);
        robots
    }

    /// Whether `path` may be fetched by `user_agent`. Allow rules take
    /// precedence over Disallow, as in the de-facto standard.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let agent = user_agent.to_ascii_lowercase();
        let rules = self
            .rules
            .iter()
            .find(|(k, _)| agent.contains(k.as_str()))
            .map(|(_, v)| v)
            .unwrap_or(&self.default_rules);

        if rules.allow.iter().any(|a| path.starts_with(a.as_str())) {
            return true;
        }
        !rules
            .disallow
            .iter()
            .any(|d| d == "/" || path.starts_with(d.as_str()))
    }
}

/// Process-local robots cache keyed by origin (`scheme://host[:port]`).
pub struct RobotsCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, RobotsTxt)>>,
}

impl Default for RobotsCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl RobotsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn origin_of(url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let port = url
            .port()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", url.scheme(), host, port))
    }

    /// Check whether `url` may be fetched, loading robots.txt for its origin
    /// on first use (within the same short per-request budget as page
    /// fetches).
    pub async fn allowed(&self, client: &reqwest::Client, url: &Url, user_agent: &str) -> bool {
        let Some(origin) = Self::origin_of(url) else {
            return false;
        };

        if let Some(rules) = self.cached(&origin) {
            return rules.is_allowed(user_agent, url.path());
        }

        let rules = Self::fetch(client, &origin, user_agent).await;
        let allowed = rules.is_allowed(user_agent, url.path());
        self.entries
            .lock()
            .expect("robots cache poisoned")
            .insert(origin, (Instant::now(), rules));
        allowed
    }

    fn cached(&self, origin: &str) -> Option<RobotsTxt> {
        let entries = self.entries.lock().expect("robots cache poisoned");
        let (stored_at, rules) = entries.get(origin)?;
        if stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(rules.clone())
    }

    async fn fetch(client: &reqwest::Client, origin: &str, user_agent: &str) -> RobotsTxt {
        let robots_url = format!("{}/robots.txt", origin.trim_end_matches('/'));
        let response = client
            .get(&robots_url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .timeout(Duration::from_secs(2))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) if body.len() <= MAX_ROBOTS_BYTES => RobotsTxt::parse(&body),
                _ => RobotsTxt::default(),
            },
            Ok(_) => RobotsTxt::default(),
            Err(e) => {
                debug!(url = %robots_url, error = %e, "robots.txt fetch failed, allowing");
                RobotsTxt::default()
            }
        }
    }

    /// Seed rules for an origin, bypassing the network. Used by tests.
    pub fn seed(&self, origin: &str, rules: RobotsTxt) {
        self.entries
            .lock()
            .expect("robots cache poisoned")
            .insert(origin.to_string(), (Instant::now(), rules));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_groups() {
        let content = r#"
User-agent: *
Disallow: /private/
Allow: /private/menu
"#;
        let robots = RobotsTxt::parse(content);
        assert!(robots.is_allowed("VenueScopeBot", "/menu"));
        assert!(!robots.is_allowed("VenueScopeBot", "/private/admin"));
        assert!(robots.is_allowed("VenueScopeBot", "/private/menu"));
    }

    #[test]
    fn disallow_all() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow: /\n");
        assert!(!robots.is_allowed("AnyBot", "/"));
        assert!(!robots.is_allowed("AnyBot", "/hours"));
    }

    #[test]
    fn specific_agent_overrides_default() {
        let content = r#"
User-agent: *
Disallow: /

User-agent: venuescopebot
Disallow:
"#;
        let robots = RobotsTxt::parse(content);
        assert!(!robots.is_allowed("OtherBot", "/page"));
        assert!(robots.is_allowed("VenueScopeBot/0.1", "/page"));
    }

    #[test]
    fn empty_allows_everything() {
        let robots = RobotsTxt::parse("");
        assert!(robots.is_allowed("Bot", "/anything"));
    }

    #[tokio::test]
    async fn seeded_cache_is_consulted() {
        let cache = RobotsCache::default();
        cache.seed(
            "https://v.example",
            RobotsTxt::parse("User-agent: *\nDisallow: /\n"),
        );
        let client = reqwest::Client::new();
        let url = Url::parse("https://v.example/hours").unwrap();
        assert!(!cache.allowed(&client, &url, "VenueScopeBot").await);
    }
}
