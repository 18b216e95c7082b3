//! Ad ledger: sponsorable inventory, user targeting and revenue accounting.
//!
//! Revenue from ad impressions and clicks offsets provider payouts; the
//! stream coordinator also attributes a fraction of token revenue through
//! the same ledger so daily and total reporting is unified.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// A sponsorable content unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ad {
    pub id: String,
    pub category: String,
    /// Sponsored text spliced into prompts
    pub content: String,
    /// Keywords matched against prompt keywords for relevance
    pub keywords: HashSet<String>,
    /// Revenue per one thousand impressions, always > 0
    pub cpm: f64,
    /// Click-through rate in [0, 1]
    pub ctr: f64,
    pub impressions: u64,
    pub clicks: u64,
    /// Only ever increases, via impression or click events
    pub revenue: f64,
    pub last_shown_at: Option<DateTime<Utc>>,
}

impl Ad {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        content: impl Into<String>,
        keywords: HashSet<String>,
        cpm: f64,
        ctr: f64,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            content: content.into(),
            keywords,
            cpm,
            ctr: ctr.clamp(0.0, 1.0),
            impressions: 0,
            clicks: 0,
            revenue: 0.0,
            last_shown_at: None,
        }
    }
}

/// Per-user ad targeting state, created lazily with defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreference {
    pub preferred_categories: HashSet<String>,
    pub ads_enabled: bool,
}

impl Default for UserPreference {
    fn default() -> Self {
        Self {
            preferred_categories: HashSet::new(),
            ads_enabled: true,
        }
    }
}

/// Process-wide revenue aggregate across ad and inference income.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevenueLedger {
    /// UTC-date buckets
    pub daily_totals: BTreeMap<NaiveDate, f64>,
    pub grand_total: f64,
    /// Portion of `grand_total` attributed from stream token revenue
    pub attributed_inference_total: f64,
}

impl RevenueLedger {
    fn credit(&mut self, amount: f64, at: DateTime<Utc>) {
        *self.daily_totals.entry(at.date_naive()).or_insert(0.0) += amount;
        self.grand_total += amount;
    }
}

/// Relevance floor: ads scoring at or below this are never injected.
pub const RELEVANCE_FLOOR: f64 = 5.0;

/// Default cooldown before the same ad is preferred again (5 minutes).
pub const DEFAULT_AD_COOLDOWN_MS: i64 = 300_000;

/// Relevance of an ad for a prompt and a user.
///
/// `10` per keyword overlap, `20` for a preferred category, `100 * ctr`
/// for demonstrated engagement.
pub fn compute_relevance(
    prompt_keywords: &HashSet<String>,
    ad: &Ad,
    prefs: &UserPreference,
) -> f64 {
    let overlap = prompt_keywords.intersection(&ad.keywords).count() as f64;
    let category_bonus = if prefs.preferred_categories.contains(&ad.category) {
        20.0
    } else {
        0.0
    };
    overlap * 10.0 + category_bonus + 100.0 * ad.ctr
}

/// Ledger state behind one lock: inventory, preferences, revenue.
#[derive(Debug, Default)]
struct LedgerState {
    inventory: HashMap<String, Ad>,
    preferences: HashMap<String, UserPreference>,
    revenue: RevenueLedger,
}

/// Owner of the ad inventory, user preferences and the revenue ledger.
#[derive(Debug)]
pub struct AdLedger {
    state: Mutex<LedgerState>,
    cooldown_ms: i64,
}

impl Default for AdLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl AdLedger {
    pub fn new() -> Self {
        Self::with_cooldown(DEFAULT_AD_COOLDOWN_MS)
    }

    pub fn with_cooldown(cooldown_ms: i64) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            cooldown_ms,
        }
    }

    /// Add (or replace) an ad in the inventory.
    pub fn upsert_ad(&self, ad: Ad) {
        debug!(ad_id = %ad.id, category = %ad.category, "ad added to inventory");
        self.state.lock().inventory.insert(ad.id.clone(), ad);
    }

    /// Explicitly remove an ad. Returns the removed record if present.
    pub fn remove_ad(&self, ad_id: &str) -> Option<Ad> {
        self.state.lock().inventory.remove(ad_id)
    }

    pub fn get_ad(&self, ad_id: &str) -> Option<Ad> {
        self.state.lock().inventory.get(ad_id).cloned()
    }

    /// Replace a user's targeting preferences.
    pub fn set_preferences(&self, user_id: impl Into<String>, prefs: UserPreference) {
        self.state.lock().preferences.insert(user_id.into(), prefs);
    }

    /// Current preferences for a user, defaults when never seen.
    pub fn preferences_for(&self, user_id: &str) -> UserPreference {
        self.state
            .lock()
            .preferences
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Pick the most relevant ad for a prompt, honoring the cooldown.
    ///
    /// Candidates at or below the relevance floor are excluded. Among the
    /// rest, ads not shown within the cooldown window are preferred in
    /// relevance order; when every candidate is in cooldown the top-scored
    /// one is returned anyway, so an ad is always chosen when any
    /// candidate clears the floor. Never errors: no relevant ad is `None`.
    pub fn select_ad(&self, prompt_keywords: &HashSet<String>, user_id: &str) -> Option<Ad> {
        let state = self.state.lock();
        let prefs = state.preferences.get(user_id).cloned().unwrap_or_default();

        let mut scored: Vec<(f64, &Ad)> = state
            .inventory
            .values()
            .map(|ad| (compute_relevance(prompt_keywords, ad, &prefs), ad))
            .filter(|(score, _)| *score > RELEVANCE_FLOOR)
            .collect();
        if scored.is_empty() {
            return None;
        }

        // Highest relevance first; ad id keeps the order stable.
        scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then_with(|| a.id.cmp(&b.id)));

        let now = Utc::now();
        let fresh = scored.iter().find(|(_, ad)| {
            ad.last_shown_at
                .is_none_or(|shown| (now - shown).num_milliseconds() >= self.cooldown_ms)
        });

        let chosen = fresh.or_else(|| scored.first()).map(|(_, ad)| (*ad).clone());
        if let Some(ad) = &chosen {
            debug!(ad_id = %ad.id, user_id, "ad selected");
        }
        chosen
    }

    /// Record one impression: bumps the counter, stamps `last_shown_at`
    /// and credits `cpm / 1000` to the ad and the day bucket.
    pub fn record_impression(&self, ad_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(ad) = state.inventory.get_mut(ad_id) else {
            return false;
        };

        let now = Utc::now();
        ad.impressions += 1;
        ad.last_shown_at = Some(now);
        let amount = ad.cpm / 1000.0;
        ad.revenue += amount;
        state.revenue.credit(amount, now);
        true
    }

    /// Record one click: credits `cpm * ctr`, valuing realized engagement
    /// above a bare impression.
    pub fn record_click(&self, ad_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(ad) = state.inventory.get_mut(ad_id) else {
            return false;
        };

        ad.clicks += 1;
        let amount = ad.cpm * ad.ctr;
        ad.revenue += amount;
        state.revenue.credit(amount, Utc::now());
        info!(ad_id, amount, "ad click recorded");
        true
    }

    /// Channel a slice of stream token revenue through the ledger so daily
    /// and total reporting covers ad and inference income alike.
    pub fn attribute_inference_revenue(&self, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        let mut state = self.state.lock();
        state.revenue.credit(amount, Utc::now());
        state.revenue.attributed_inference_total += amount;
    }

    /// Snapshot of the revenue ledger.
    pub fn revenue(&self) -> RevenueLedger {
        self.state.lock().revenue.clone()
    }

    /// Snapshot of the full inventory, for rollups.
    pub fn inventory(&self) -> Vec<Ad> {
        self.state.lock().inventory.values().cloned().collect()
    }
}

/// Splice sponsored content once into a prompt.
///
/// Inserted after the first sentence boundary when one exists, otherwise
/// appended; the prompt text is otherwise preserved.
pub fn splice_ad_into_prompt(prompt: &str, ad: &Ad) -> String {
    let sponsored = format!(" [sponsored: {}] ", ad.content);
    match prompt.find(['.', '!', '?']) {
        Some(pos) => {
            let (head, tail) = prompt.split_at(pos + 1);
            format!("{head}{sponsored}{}", tail.trim_start())
        }
        None => format!("{prompt}{sponsored}"),
    }
}

/// Extract lowercase keywords from a prompt, skipping stop words and very
/// short tokens.
pub fn extract_keywords(prompt: &str) -> HashSet<String> {
    prompt
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() >= 2 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

const STOP_WORDS: &[&str] = &[
    "is", "to", "of", "in", "on", "at", "it", "as", "be", "by", "or", "an", "we", "do", "if",
    "my", "me", "no", "so", "up", "us", "the", "and", "for", "are", "but", "not", "you", "all",
    "can", "had", "her", "was", "one", "our", "out", "has", "him", "his", "how", "its", "new",
    "now", "that", "this", "with", "what", "when", "where", "which", "will", "your", "from",
    "they", "would", "there", "their", "about", "could", "should", "into", "more", "some", "than",
    "them", "then", "these", "have", "been",
];

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn keywords(words: &[&str]) -> HashSet<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    fn ad(id: &str, category: &str, kw: &[&str], cpm: f64, ctr: f64) -> Ad {
        Ad::new(id, category, format!("try {id}"), keywords(kw), cpm, ctr)
    }

    #[test]
    fn test_relevance_scoring() {
        let prompt_kw = keywords(&["rust", "gpu", "inference"]);
        let a = ad("a1", "cloud", &["gpu", "inference"], 2.0, 0.05);
        let mut prefs = UserPreference::default();

        // 2 overlaps * 10 + 0 + 100 * 0.05 = 25
        assert!((compute_relevance(&prompt_kw, &a, &prefs) - 25.0).abs() < 1e-9);

        prefs.preferred_categories.insert("cloud".to_string());
        assert!((compute_relevance(&prompt_kw, &a, &prefs) - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_select_ad_respects_relevance_floor() {
        let ledger = AdLedger::new();
        // No keyword overlap, no category bonus, ctr 0.04 -> score 4 <= 5.
        ledger.upsert_ad(ad("a1", "cloud", &["databases"], 2.0, 0.04));

        assert!(ledger.select_ad(&keywords(&["rust"]), "u1").is_none());
    }

    #[test]
    fn test_select_ad_prefers_out_of_cooldown() {
        let ledger = AdLedger::new();
        let mut top = ad("top", "cloud", &["gpu", "rust"], 2.0, 0.1);
        // Shown just now: inside the 5 minute cooldown.
        top.last_shown_at = Some(Utc::now());
        ledger.upsert_ad(top);
        ledger.upsert_ad(ad("second", "cloud", &["gpu"], 2.0, 0.1));

        let chosen = ledger.select_ad(&keywords(&["gpu", "rust"]), "u1").unwrap();
        assert_eq!(chosen.id, "second");
    }

    #[test]
    fn test_select_ad_falls_back_when_all_cooling() {
        let ledger = AdLedger::new();
        let mut only = ad("only", "cloud", &["gpu"], 2.0, 0.1);
        only.last_shown_at = Some(Utc::now());
        ledger.upsert_ad(only);

        // Still chosen: a candidate above the floor always yields an ad.
        let chosen = ledger.select_ad(&keywords(&["gpu"]), "u1").unwrap();
        assert_eq!(chosen.id, "only");
    }

    #[test]
    fn test_cooldown_expiry() {
        let ledger = AdLedger::new();
        let mut stale = ad("stale", "cloud", &["gpu", "rust"], 2.0, 0.1);
        stale.last_shown_at = Some(Utc::now() - Duration::milliseconds(DEFAULT_AD_COOLDOWN_MS + 1));
        ledger.upsert_ad(stale);
        ledger.upsert_ad(ad("lesser", "cloud", &["gpu"], 2.0, 0.1));

        let chosen = ledger.select_ad(&keywords(&["gpu", "rust"]), "u1").unwrap();
        assert_eq!(chosen.id, "stale");
    }

    #[test]
    fn test_impression_and_click_revenue() {
        let ledger = AdLedger::new();
        ledger.upsert_ad(ad("a1", "cloud", &["gpu"], 2.0, 0.1));

        assert!(ledger.record_impression("a1"));
        let a = ledger.get_ad("a1").unwrap();
        assert_eq!(a.impressions, 1);
        assert!(a.last_shown_at.is_some());
        assert!((a.revenue - 0.002).abs() < 1e-12);

        assert!(ledger.record_click("a1"));
        let a = ledger.get_ad("a1").unwrap();
        assert_eq!(a.clicks, 1);
        assert!((a.revenue - (0.002 + 0.2)).abs() < 1e-12);

        let revenue = ledger.revenue();
        assert!((revenue.grand_total - a.revenue).abs() < 1e-12);
        assert_eq!(revenue.daily_totals.len(), 1);

        assert!(!ledger.record_impression("missing"));
    }

    #[test]
    fn test_inference_attribution_tracked_separately() {
        let ledger = AdLedger::new();
        ledger.attribute_inference_revenue(0.05);
        ledger.attribute_inference_revenue(0.0);

        let revenue = ledger.revenue();
        assert!((revenue.grand_total - 0.05).abs() < 1e-12);
        assert!((revenue.attributed_inference_total - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_keyword_extraction() {
        let kw = extract_keywords("What is the fastest GPU for Rust inference?");
        assert!(kw.contains("gpu"));
        assert!(kw.contains("rust"));
        assert!(kw.contains("inference"));
        assert!(kw.contains("fastest"));
        assert!(!kw.contains("the"));
        assert!(!kw.contains("is"));
    }

    #[test]
    fn test_splice_preserves_prompt() {
        let a = ad("a1", "cloud", &["gpu"], 2.0, 0.1);

        let spliced = splice_ad_into_prompt("Explain GPUs. Keep it short.", &a);
        assert!(spliced.starts_with("Explain GPUs."));
        assert!(spliced.contains("[sponsored: try a1]"));
        assert!(spliced.ends_with("Keep it short."));
        assert_eq!(spliced.matches("sponsored").count(), 1);

        let appended = splice_ad_into_prompt("no sentence boundary", &a);
        assert!(appended.starts_with("no sentence boundary"));
        assert!(appended.contains("[sponsored: try a1]"));
    }
}
