//! Asynchronous client for the segmented classification store.
//!
//! - Fetches the segment index and chapter shards over HTTPS, with a
//!   bounded retry loop, exponential backoff and per-request timeouts.
//! - Keeps shards in an in-process working set for the session and writes
//!   them through to the versioned disk cache.
//! - Exposes exact-code lookup, prefix search and a background pre-warm of
//!   high-volume chapters.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::entities::{
    AdditiveDutyRule, ClassificationRecord, DutyKind, RateException, RuleScope, SearchHit, Shard,
};
use crate::infra::cache::{self, ShardCache};
use crate::util::country;

const DEFAULT_BASE_URL: &str = "https://tariffdata.blob.core.windows.net/refdata/tariff-segments/";
const USER_AGENT: &str = "tariff-core/1.0";
const INDEX_FILE: &str = "segment-index.json";

/// How long a fetched segment index is trusted before re-fetching.
const INDEX_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_MAX_ATTEMPTS: u32 = 3;
const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(1000);
const RETRY_BACKOFF: u32 = 2;

/// Default result cap for autocomplete searches.
pub const DEFAULT_SEARCH_LIMIT: usize = 15;

#[derive(Debug, Error)]
pub enum HtsClientError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("segment store error: {0}")]
    Api(String),
}

/// Maps classification-code prefixes to shard filenames.
///
/// The segmentation has evolved over time: the current store publishes
/// 3-digit buckets under `segments`, while older generations used 2- and
/// 1-digit buckets. All maps are optional and the most granular one wins.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SegmentIndex {
    #[serde(default)]
    pub segments: BTreeMap<String, String>,
    #[serde(default, rename = "twoDigitSegments")]
    pub two_digit_segments: BTreeMap<String, String>,
    #[serde(default, rename = "singleDigitSegments")]
    pub single_digit_segments: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: IndexMetadata,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IndexMetadata {
    #[serde(default, rename = "totalEntries")]
    pub total_entries: u64,
    #[serde(default, rename = "lastUpdated")]
    pub last_updated: String,
    #[serde(default, rename = "segmentationDate")]
    pub segmentation_date: String,
    #[serde(default)]
    pub hts_revision: String,
}

impl SegmentIndex {
    /// The single most specific shard covering `prefix`: 3-digit bucket
    /// first, then the legacy 2- and 1-digit maps.
    pub fn shard_for_prefix(&self, prefix: &str) -> Option<&str> {
        if let Some(key) = prefix.get(0..3) {
            if let Some(file) = self.segments.get(key) {
                return Some(file);
            }
        }
        if let Some(key) = prefix.get(0..2) {
            if let Some(file) = self.two_digit_segments.get(key) {
                return Some(file);
            }
        }
        if let Some(key) = prefix.get(0..1) {
            if let Some(file) = self.single_digit_segments.get(key) {
                return Some(file);
            }
        }
        None
    }

    /// Every distinct shard filename across all segmentation generations.
    pub fn all_files(&self) -> Vec<String> {
        let files: BTreeSet<&String> = self
            .segments
            .values()
            .chain(self.two_digit_segments.values())
            .chain(self.single_digit_segments.values())
            .collect();
        files.into_iter().cloned().collect()
    }
}

#[derive(Default)]
struct IndexState {
    index: Option<Arc<SegmentIndex>>,
    fetched_at: Option<Instant>,
}

enum Fetched<T> {
    Ok(T),
    /// Remote 404: "no data for that prefix", not an error.
    Missing,
}

/// Client for the remote segment store. Cheap to clone; all clones share
/// the same working set and disk cache.
#[derive(Clone)]
pub struct HtsClient {
    http: Client,
    base_url: Url,
    cache: ShardCache,
    index: Arc<Mutex<IndexState>>,
    shards: Arc<Mutex<HashMap<String, Arc<Shard>>>>,
}

impl HtsClient {
    pub fn new(cache: ShardCache) -> Result<Self, HtsClientError> {
        Self::with_base_url(DEFAULT_BASE_URL, cache)
    }

    pub fn with_base_url(base: &str, cache: ShardCache) -> Result<Self, HtsClientError> {
        let base_url = Url::parse(base)?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            cache,
            index: Arc::new(Mutex::new(IndexState::default())),
            shards: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Fetches the segment index unless a fresh one is already loaded, then
    /// aligns the disk cache with its version stamp.
    ///
    /// The freshness check is timestamp-based, not mutex-guarded: two
    /// near-simultaneous calls may both fetch, which is redundant work but
    /// converges on identical data.
    pub async fn initialize(&self) -> Result<(), HtsClientError> {
        if self.is_fresh().await {
            debug!("segment index already loaded and fresh");
            return Ok(());
        }

        let url = self.base_url.join(INDEX_FILE)?;
        let index: SegmentIndex = match self.fetch_raw(url).await? {
            Fetched::Ok(body) => serde_json::from_str(&body)
                .map_err(|err| HtsClientError::Api(format!("malformed segment index: {err}")))?,
            Fetched::Missing => {
                return Err(HtsClientError::Api(
                    "segment index missing from store".to_string(),
                ))
            }
        };

        info!(
            three_digit = index.segments.len(),
            two_digit = index.two_digit_segments.len(),
            single_digit = index.single_digit_segments.len(),
            total_entries = index.metadata.total_entries,
            revision = %index.metadata.hts_revision,
            "segment index loaded"
        );

        // A cache failure only costs refetches; it must not fail startup.
        if let Err(err) = self.cache.synchronize(&index.metadata.segmentation_date) {
            warn!(error = %err, "cache generation sync failed");
        }

        let mut state = self.index.lock().await;
        state.index = Some(Arc::new(index));
        state.fetched_at = Some(Instant::now());
        Ok(())
    }

    async fn is_fresh(&self) -> bool {
        let state = self.index.lock().await;
        state.index.is_some()
            && state
                .fetched_at
                .map(|at| at.elapsed() <= INDEX_TTL)
                .unwrap_or(false)
    }

    async fn current_index(&self) -> Result<Arc<SegmentIndex>, HtsClientError> {
        if !self.is_fresh().await {
            self.initialize().await?;
        }
        let state = self.index.lock().await;
        state
            .index
            .clone()
            .ok_or_else(|| HtsClientError::Api("segment index unavailable".to_string()))
    }

    /// Revision label of the loaded classification schedule, if any.
    pub async fn hts_revision(&self) -> Option<String> {
        let state = self.index.lock().await;
        state
            .index
            .as_ref()
            .map(|index| index.metadata.hts_revision.clone())
    }

    /// Publication date of the loaded reference data, if any.
    pub async fn last_updated(&self) -> Option<String> {
        let state = self.index.lock().await;
        state
            .index
            .as_ref()
            .map(|index| index.metadata.last_updated.clone())
    }

    /// Record for an exact 8-digit code. `Ok(None)` when no shard covers
    /// the code, the shard is missing remotely, or the shard has no entry
    /// for it; a miss is not an error.
    pub async fn lookup(&self, code: &str) -> Result<Option<ClassificationRecord>, HtsClientError> {
        let index = self.current_index().await?;
        let Some(file) = index.shard_for_prefix(code) else {
            debug!(code, "no shard covers code");
            return Ok(None);
        };
        let Some(shard) = self.load_shard(file).await? else {
            return Ok(None);
        };
        Ok(shard.entries.iter().find(|r| r.code == code).cloned())
    }

    /// Up to `limit` records whose code starts with `prefix`, sorted by
    /// code. Short prefixes union across every child shard beneath them,
    /// most granular generation first, and stop as soon as the limit is
    /// reached; partial first-found results are expected.
    pub async fn search_by_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, HtsClientError> {
        if prefix.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let index = self.current_index().await?;
        let mut hits: Vec<SearchHit> = Vec::new();

        if prefix.len() < 3 {
            for (key, file) in &index.segments {
                if hits.len() >= limit {
                    break;
                }
                if key.starts_with(prefix) {
                    self.collect_matches(file, prefix, limit, &mut hits).await?;
                }
            }
            for (key, file) in &index.two_digit_segments {
                if hits.len() >= limit {
                    break;
                }
                if key.starts_with(prefix) {
                    self.collect_matches(file, prefix, limit, &mut hits).await?;
                }
            }
            if hits.len() < limit {
                if let Some(file) = prefix
                    .get(0..1)
                    .and_then(|digit| index.single_digit_segments.get(digit))
                {
                    self.collect_matches(file, prefix, limit, &mut hits).await?;
                }
            }
        } else if let Some(file) = index.shard_for_prefix(prefix) {
            self.collect_matches(file, prefix, limit, &mut hits).await?;
        } else {
            debug!(prefix, "no shard covers prefix");
        }

        hits.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(hits)
    }

    async fn collect_matches(
        &self,
        file: &str,
        prefix: &str,
        limit: usize,
        out: &mut Vec<SearchHit>,
    ) -> Result<(), HtsClientError> {
        let Some(shard) = self.load_shard(file).await? else {
            return Ok(());
        };
        for record in &shard.entries {
            if out.len() >= limit {
                break;
            }
            if record.code.starts_with(prefix) {
                out.push(SearchHit {
                    code: record.code.clone(),
                    description: record.description.clone(),
                });
            }
        }
        Ok(())
    }

    /// Walks the shard list in chapter-priority order and caches anything
    /// not already on disk. Runs opportunistically: per-shard failures are
    /// logged and skipped, and interrupting the walk leaves the cache
    /// consistent because every write is independent.
    pub async fn prewarm(&self) {
        let index = match self.current_index().await {
            Ok(index) => index,
            Err(err) => {
                warn!(error = %err, "pre-warm skipped; segment index unavailable");
                return;
            }
        };

        let mut fetched = 0usize;
        for file in cache::prioritized(index.all_files()) {
            if self.cache.contains(&file) {
                continue;
            }
            match self.load_shard(&file).await {
                Ok(Some(_)) => fetched += 1,
                Ok(None) => debug!(file = %file, "pre-warm: shard missing from store"),
                Err(err) => warn!(file = %file, error = %err, "pre-warm fetch failed"),
            }
        }
        info!(fetched, "shard pre-warm complete");
    }

    /// Runs [`Self::prewarm`] on a background task so it never blocks
    /// foreground lookups.
    pub fn spawn_prewarm(&self) -> tokio::task::JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move { client.prewarm().await })
    }

    /// Shard by filename: working set, then disk cache, then network with
    /// write-through. `Ok(None)` for a remote 404.
    async fn load_shard(&self, file: &str) -> Result<Option<Arc<Shard>>, HtsClientError> {
        if let Some(shard) = self.shards.lock().await.get(file).cloned() {
            return Ok(Some(shard));
        }

        if let Some(json) = self.cache.get(file) {
            match serde_json::from_str::<ShardDto>(&json) {
                Ok(dto) => return Ok(Some(self.adopt_shard(file, dto).await)),
                Err(err) => warn!(file, error = %err, "cached shard unreadable; refetching"),
            }
        }

        debug!(file, "fetching shard from store");
        let body = match self.fetch_raw(self.segment_url(file)?).await? {
            Fetched::Ok(body) => body,
            Fetched::Missing => {
                debug!(file, "shard missing from store");
                return Ok(None);
            }
        };
        let dto: ShardDto = serde_json::from_str(&body)
            .map_err(|err| HtsClientError::Api(format!("malformed shard {file}: {err}")))?;
        if dto.count != dto.entries.len() {
            warn!(
                file,
                declared = dto.count,
                actual = dto.entries.len(),
                "shard record count mismatch"
            );
        }
        // Write-through of the raw body keeps the cached JSON byte-identical
        // to the store; a failed write only costs a refetch next session.
        if let Err(err) = self.cache.put(file, &body) {
            warn!(file, error = %err, "failed to cache shard");
        }
        Ok(Some(self.adopt_shard(file, dto).await))
    }

    async fn adopt_shard(&self, file: &str, dto: ShardDto) -> Arc<Shard> {
        let shard = Arc::new(Shard::from(dto));
        self.shards
            .lock()
            .await
            .insert(file.to_string(), shard.clone());
        shard
    }

    /// Index entries are filenames like "tariff-721.json"; bare segment ids
    /// are tolerated and rebuilt into the filename convention.
    fn segment_url(&self, file: &str) -> Result<Url, HtsClientError> {
        let id = file.strip_prefix("tariff-").unwrap_or(file);
        let id = id.strip_suffix(".json").unwrap_or(id);
        Ok(self.base_url.join(&format!("tariff-{id}.json"))?)
    }

    /// GET with a bounded retry loop: 404 short-circuits as `Missing`, 5xx
    /// and transport/timeout failures are retried with exponential backoff,
    /// any other error status is terminal.
    async fn fetch_raw(&self, url: Url) -> Result<Fetched<String>, HtsClientError> {
        let mut delay = RETRY_INITIAL_DELAY;
        let mut last_error: Option<HtsClientError> = None;

        for attempt in 1..=RETRY_MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(delay).await;
                delay *= RETRY_BACKOFF;
            }
            match self.http.get(url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        return Ok(Fetched::Missing);
                    }
                    if status.is_server_error() {
                        warn!(%url, %status, attempt, "server error; will retry");
                        last_error =
                            Some(HtsClientError::Api(format!("server returned {status}")));
                        continue;
                    }
                    let response = response.error_for_status()?;
                    return Ok(Fetched::Ok(response.text().await?));
                }
                Err(err) => {
                    // Covers connect failures and the request timeout.
                    warn!(%url, attempt, error = %err, "request failed; will retry");
                    last_error = Some(err.into());
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| HtsClientError::Api("retry budget exhausted".to_string())))
    }

    #[cfg(test)]
    async fn install_index(&self, index: SegmentIndex) {
        let mut state = self.index.lock().await;
        state.index = Some(Arc::new(index));
        state.fetched_at = Some(Instant::now());
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ShardDto {
    #[serde(default)]
    segment: String,
    #[serde(default)]
    count: usize,
    #[serde(default)]
    entries: Vec<RecordDto>,
}

#[derive(Debug, Deserialize)]
struct RecordDto {
    #[serde(default)]
    hts8: String,
    #[serde(default)]
    brief_description: String,
    /// Fraction (0.025 = 2.5%), sometimes serialized as a string.
    #[serde(default, deserialize_with = "rate_from_json")]
    mfn_ad_val_rate: Option<f64>,
    #[serde(default, deserialize_with = "rate_from_json")]
    col2_ad_val_rate: Option<f64>,
    #[serde(default)]
    ntr_suspended_countries: Vec<String>,
    #[serde(default)]
    additive_duties: Vec<AdditiveDutyDto>,
    #[serde(default)]
    reciprocal_tariffs: Vec<CountryTariffDto>,
    #[serde(default)]
    ieepa_tariffs: Vec<CountryTariffDto>,
}

#[derive(Debug, Deserialize)]
struct AdditiveDutyDto {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    rule_name: String,
    #[serde(default)]
    rate: f64,
    #[serde(default)]
    rate_uk: Option<f64>,
    #[serde(default)]
    countries: ScopeDto,
    #[serde(default)]
    countries_reduced: Vec<String>,
    #[serde(default)]
    label: String,
    #[serde(default)]
    quota_eligible: Option<bool>,
}

/// Legacy per-country rows (reciprocal and IEEPA generations of the data).
#[derive(Debug, Deserialize)]
struct CountryTariffDto {
    #[serde(default)]
    country: String,
    #[serde(default)]
    rate: f64,
    #[serde(default)]
    label: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScopeDto {
    Sentinel(String),
    Countries(Vec<String>),
}

impl Default for ScopeDto {
    fn default() -> Self {
        ScopeDto::Countries(Vec::new())
    }
}

impl From<ScopeDto> for RuleScope {
    fn from(dto: ScopeDto) -> Self {
        match dto {
            ScopeDto::Sentinel(s) if s.eq_ignore_ascii_case("all") || s.eq_ignore_ascii_case("global") => {
                RuleScope::All
            }
            ScopeDto::Sentinel(s) => RuleScope::Countries(vec![s]),
            ScopeDto::Countries(countries) => RuleScope::Countries(countries),
        }
    }
}

impl From<ShardDto> for Shard {
    fn from(dto: ShardDto) -> Self {
        Shard {
            segment: dto.segment,
            count: dto.count,
            entries: dto.entries.into_iter().map(ClassificationRecord::from).collect(),
        }
    }
}

impl From<RecordDto> for ClassificationRecord {
    fn from(dto: RecordDto) -> Self {
        let mut rules: Vec<AdditiveDutyRule> =
            dto.additive_duties.into_iter().map(AdditiveDutyDto::into_rule).collect();
        // Older data generations carry reciprocal and IEEPA measures as
        // separate per-country arrays; fold them into the same rule union so
        // the engine sees one shape. Overlapping encodings collapse later
        // through (kind, rate) dedup.
        rules.extend(
            dto.reciprocal_tariffs
                .into_iter()
                .map(|row| row.into_rule(DutyKind::Reciprocal)),
        );
        rules.extend(
            dto.ieepa_tariffs
                .into_iter()
                .map(|row| row.into_rule(DutyKind::Ieepa)),
        );

        ClassificationRecord {
            code: country::clean_code(&dto.hts8),
            description: dto.brief_description,
            base_rate: dto.mfn_ad_val_rate.unwrap_or(0.0) * 100.0,
            column2_rate: dto.col2_ad_val_rate.unwrap_or(0.0) * 100.0,
            ntr_suspended: dto.ntr_suspended_countries,
            additive_duties: rules,
        }
    }
}

impl AdditiveDutyDto {
    fn into_rule(self) -> AdditiveDutyRule {
        let kind = kind_from_wire(&self.kind, &self.label, &self.rule_name);
        let mut exceptions = Vec::new();
        if let Some(rate_uk) = self.rate_uk {
            let countries = if self.countries_reduced.is_empty() {
                vec!["GB".to_string(), "UK".to_string()]
            } else {
                self.countries_reduced
            };
            exceptions.push(RateException {
                countries,
                rate: rate_uk,
            });
        }
        AdditiveDutyRule {
            kind,
            scope: self.countries.into(),
            rate: self.rate,
            exceptions,
            // National-security steel/aluminum measures are the quota
            // program unless the wire says otherwise.
            quota_eligible: self
                .quota_eligible
                .unwrap_or(kind == DutyKind::Section232),
            label: if self.label.is_empty() { self.name } else { self.label },
        }
    }
}

impl CountryTariffDto {
    fn into_rule(self, default_kind: DutyKind) -> AdditiveDutyRule {
        AdditiveDutyRule {
            kind: sniff_kind(&self.label).unwrap_or(default_kind),
            scope: RuleScope::Countries(vec![self.country]),
            rate: self.rate,
            exceptions: Vec::new(),
            quota_eligible: false,
            label: self.label,
        }
    }
}

fn kind_from_wire(kind: &str, label: &str, rule_name: &str) -> DutyKind {
    match kind {
        "section_301" => DutyKind::Section301,
        "section_232" => DutyKind::Section232,
        "fentanyl" => DutyKind::Fentanyl,
        "reciprocal" | "reciprocal_tariff" => DutyKind::Reciprocal,
        "ieepa" | "ieepa_tariff" => DutyKind::Ieepa,
        _ => sniff_kind(rule_name)
            .or_else(|| sniff_kind(label))
            .unwrap_or(DutyKind::Other),
    }
}

/// Last-resort kind inference for rows that only carry a display label.
/// Runs once at load time; the engine itself never matches on labels.
fn sniff_kind(text: &str) -> Option<DutyKind> {
    let text = text.to_ascii_lowercase();
    if text.contains("fentanyl") {
        Some(DutyKind::Fentanyl)
    } else if text.contains("ieepa") {
        Some(DutyKind::Ieepa)
    } else if text.contains("reciprocal") {
        Some(DutyKind::Reciprocal)
    } else if text.contains("301") {
        Some(DutyKind::Section301)
    } else if text.contains("232") {
        Some(DutyKind::Section232)
    } else {
        None
    }
}

/// Ad-valorem rates arrive as numbers, numeric strings or null depending on
/// the data generation; anything unparseable counts as absent.
fn rate_from_json<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct RateVisitor;

    impl<'de> serde::de::Visitor<'de> for RateVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a number, numeric string or null")
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.trim().parse().ok())
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(RateVisitor)
}
