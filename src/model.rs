use serde::{Deserialize, Serialize};

/// Lifecycle of an authored post.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DraftStatus {
    Draft,
    Queued,
    Published,
    Failed,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Draft => "draft",
            DraftStatus::Queued => "queued",
            DraftStatus::Published => "published",
            DraftStatus::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(DraftStatus::Draft),
            "queued" => Some(DraftStatus::Queued),
            "published" => Some(DraftStatus::Published),
            "failed" => Some(DraftStatus::Failed),
            _ => None,
        }
    }
}

/// Per-asset processing state. `Processed` means the resolved URL is durable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssetStatus {
    Pending,
    Processed,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Processed => "processed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AssetStatus::Pending),
            "processed" => Some(AssetStatus::Processed),
            _ => None,
        }
    }
}

/// State machine of a unit of work. Terminal once `Published` or `Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Queued,
    Publishing,
    Published,
    Failed,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Queued => "queued",
            UnitStatus::Publishing => "publishing",
            UnitStatus::Published => "published",
            UnitStatus::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(UnitStatus::Queued),
            "publishing" => Some(UnitStatus::Publishing),
            "published" => Some(UnitStatus::Published),
            "failed" => Some(UnitStatus::Failed),
            _ => None,
        }
    }
}

/// The two unit shapes sharing one pipeline: a single-account job built from
/// a draft, and a multi-account scheduled post (draft-backed or inline URLs).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnitKind {
    Job,
    Scheduled,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Job => "job",
            UnitKind::Scheduled => "scheduled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "job" => Some(UnitKind::Job),
            "scheduled" => Some(UnitKind::Scheduled),
            _ => None,
        }
    }
}

/// Target surface on the platform: the photo/video feed of a business
/// account, or the feed of a linked page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    Feed,
    Page,
}

impl DestinationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationType::Feed => "feed",
            DestinationType::Page => "page",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "feed" => Some(DestinationType::Feed),
            "page" => Some(DestinationType::Page),
            _ => None,
        }
    }

    /// Permission grants the connected account must hold before the pipeline
    /// issues any call against this destination.
    pub fn required_scopes(&self) -> &'static [&'static str] {
        match self {
            DestinationType::Feed => &["instagram_basic", "instagram_content_publish"],
            DestinationType::Page => &["pages_manage_posts"],
        }
    }

    /// Parse a comma-separated destination list, e.g. `"feed,page"`.
    pub fn parse_list(s: &str) -> Vec<DestinationType> {
        s.split(',')
            .filter_map(|part| DestinationType::parse_str(part.trim()))
            .collect()
    }
}

/// Outcome of one (account, destination) publish attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairOutcome {
    pub instance_id: i64,
    pub destination: DestinationType,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PairOutcome {
    pub fn success(instance_id: i64, destination: DestinationType, media_id: String) -> Self {
        Self {
            instance_id,
            destination,
            ok: true,
            media_id: Some(media_id),
            error: None,
        }
    }

    pub fn failure(instance_id: i64, destination: DestinationType, error: String) -> Self {
        Self {
            instance_id,
            destination,
            ok: false,
            media_id: None,
            error: Some(error),
        }
    }
}

/// Aggregated result of one unit of work. The pair list is persisted as the
/// unit's result payload and is the durable source of truth for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub status: UnitStatus,
    pub pairs: Vec<PairOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnitOutcome {
    /// Derive the terminal outcome from collected pair results: `Published`
    /// only if every requested pair succeeded, otherwise `Failed` with all
    /// failure reasons joined for readability.
    pub fn from_pairs(pairs: Vec<PairOutcome>) -> Self {
        let errors: Vec<&str> = pairs
            .iter()
            .filter_map(|p| p.error.as_deref())
            .collect();
        if pairs.is_empty() {
            return UnitOutcome {
                status: UnitStatus::Failed,
                pairs,
                error: Some("no publish destinations requested".to_string()),
            };
        }
        if errors.is_empty() {
            UnitOutcome {
                status: UnitStatus::Published,
                pairs,
                error: None,
            }
        } else {
            let joined = errors.join("; ");
            UnitOutcome {
                status: UnitStatus::Failed,
                pairs,
                error: Some(joined),
            }
        }
    }

    /// A unit that never reached fan-out (asset materialization failed, or
    /// its inputs could not be loaded).
    pub fn fatal(error: String) -> Self {
        UnitOutcome {
            status: UnitStatus::Failed,
            pairs: Vec::new(),
            error: Some(error),
        }
    }
}
