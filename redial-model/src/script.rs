use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CampaignId, ScriptId};
use crate::lead::LanguageCode;

/// Versioned call script attached to a campaign for one language. Static
/// compliance validation is keyed on `(id, version)` and cached, so a script
/// is checked once per version rather than once per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallScript {
    pub id: ScriptId,
    pub campaign_id: CampaignId,
    pub language: LanguageCode,
    pub version: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl CallScript {
    pub fn new(
        campaign_id: CampaignId,
        language: LanguageCode,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: ScriptId::new(),
            campaign_id,
            language,
            version: 1,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Cache key for per-version validation results.
    pub fn version_key(&self) -> (ScriptId, u32) {
        (self.id, self.version)
    }
}
