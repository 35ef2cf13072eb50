use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::{tenant_row_accessors, PgQueryAs, TenantOwned};

/// Calls shorter than this are not worth transcribing.
pub const MIN_ANALYZABLE_SECONDS: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Queued,
    Transcribing,
    Analyzing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Queued => "queued",
            AnalysisStatus::Transcribing => "transcribing",
            AnalysisStatus::Analyzing => "analyzing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    /// A job for the call is waiting or running.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            AnalysisStatus::Queued | AnalysisStatus::Transcribing | AnalysisStatus::Analyzing
        )
    }

    /// Counts towards the monthly audio-minute quota.
    pub fn consumes_minutes(self) -> bool {
        matches!(
            self,
            AnalysisStatus::Transcribing | AnalysisStatus::Analyzing | AnalysisStatus::Completed
        )
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AnalysisStatus::Pending),
            "queued" => Ok(AnalysisStatus::Queued),
            "transcribing" => Ok(AnalysisStatus::Transcribing),
            "analyzing" => Ok(AnalysisStatus::Analyzing),
            "completed" => Ok(AnalysisStatus::Completed),
            "failed" => Ok(AnalysisStatus::Failed),
            _ => Err(anyhow::anyhow!("Unknown analysis status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CallLog {
    pub id: Uuid,
    pub business_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub provider: String,
    pub direction: String,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    /// Seconds.
    pub duration: i32,
    pub recording_url: Option<String>,
    pub status: String,
    pub analysis_status: String,
    pub analysis_error: Option<String>,
    pub transcript: Option<String>,
    pub overall_score: Option<i32>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CallLog {
    pub fn analysis(&self) -> AnalysisStatus {
        self.analysis_status.parse().unwrap_or(AnalysisStatus::Pending)
    }

    pub fn set_analysis(&mut self, status: AnalysisStatus) {
        self.analysis_status = status.as_str().to_string();
    }

    /// Billable minutes, rounded up.
    pub fn minutes(&self) -> i64 {
        (i64::from(self.duration.max(0)) + 59) / 60
    }

    pub fn has_recording(&self) -> bool {
        self.recording_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    /// Reason the call cannot be sent for analysis, if any.
    pub fn analysis_blocker(&self) -> Option<&'static str> {
        if !self.has_recording() {
            Some("Call has no recording")
        } else if self.duration < MIN_ANALYZABLE_SECONDS {
            Some("Call is shorter than 30 seconds")
        } else {
            None
        }
    }
}

impl TenantOwned for CallLog {
    const TABLE: &'static str = "call_logs";
    const COLUMNS: &'static [&'static str] = &[
        "lead_id",
        "provider",
        "direction",
        "from_number",
        "to_number",
        "duration",
        "recording_url",
        "status",
        "analysis_status",
        "analysis_error",
        "transcript",
        "overall_score",
        "analyzed_at",
    ];

    tenant_row_accessors!();

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(self.lead_id)
            .bind(&self.provider)
            .bind(&self.direction)
            .bind(&self.from_number)
            .bind(&self.to_number)
            .bind(self.duration)
            .bind(&self.recording_url)
            .bind(&self.status)
            .bind(&self.analysis_status)
            .bind(&self.analysis_error)
            .bind(&self.transcript)
            .bind(self.overall_score)
            .bind(self.analyzed_at)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCallRequest {
    pub lead_id: Option<Uuid>,
    pub provider: Option<String>,
    pub direction: Option<String>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub duration: i32,
    pub recording_url: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkAnalyzeRequest {
    pub call_ids: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(duration: i32, recording: Option<&str>) -> CallLog {
        let now = Utc::now();
        CallLog {
            id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            lead_id: None,
            provider: "manual".into(),
            direction: "outbound".into(),
            from_number: None,
            to_number: None,
            duration,
            recording_url: recording.map(String::from),
            status: "completed".into(),
            analysis_status: "pending".into(),
            analysis_error: None,
            transcript: None,
            overall_score: None,
            analyzed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn minutes_round_up() {
        assert_eq!(call(0, None).minutes(), 0);
        assert_eq!(call(60, None).minutes(), 1);
        assert_eq!(call(61, None).minutes(), 2);
        assert_eq!(call(125, None).minutes(), 3);
    }

    #[test]
    fn blockers() {
        assert_eq!(call(120, None).analysis_blocker(), Some("Call has no recording"));
        assert_eq!(call(29, Some("https://r/1.mp3")).analysis_blocker(), Some("Call is shorter than 30 seconds"));
        assert_eq!(call(30, Some("https://r/1.mp3")).analysis_blocker(), None);
    }
}
