use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::extract::ExtractionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Transitions only move forward: pending -> processing -> done | failed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked summarization request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub url: String,
    pub fast_summary: Option<String>,
    pub result: Option<SummaryPayload>,
    pub error: Option<String>,
}

/// Final summary: free text, or the structured shape the prompt asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SummaryPayload {
    Structured(StructuredSummary),
    Text(String),
}

impl SummaryPayload {
    pub fn is_empty(&self) -> bool {
        match self {
            SummaryPayload::Text(text) => text.trim().is_empty(),
            SummaryPayload::Structured(s) => s.summary.trim().is_empty(),
        }
    }

    /// Human-readable rendering, used by the MCP tools.
    pub fn to_text(&self) -> String {
        match self {
            SummaryPayload::Text(text) => text.clone(),
            SummaryPayload::Structured(s) => s.to_text(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredSummary {
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub objective: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub methods: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub findings: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub implications: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub limitations: Option<String>,
    #[serde(default, alias = "key_points")]
    pub key_points: Vec<String>,
    #[serde(default, alias = "follow_up_questions")]
    pub follow_up_questions: Vec<String>,
}

impl StructuredSummary {
    fn to_text(&self) -> String {
        let mut out = self.summary.trim().to_string();
        let sections = [
            ("Objective", &self.objective),
            ("Methods", &self.methods),
            ("Findings", &self.findings),
            ("Implications", &self.implications),
            ("Limitations", &self.limitations),
        ];
        for (label, value) in sections {
            if let Some(v) = value {
                out.push_str(&format!("\n\n{}: {}", label, v));
            }
        }
        if !self.key_points.is_empty() {
            out.push_str("\n\nKey points:");
            for point in &self.key_points {
                out.push_str(&format!("\n- {}", point));
            }
        }
        if !self.follow_up_questions.is_empty() {
            out.push_str("\n\nFollow-up questions:");
            for q in &self.follow_up_questions {
                out.push_str(&format!("\n- {}", q));
            }
        }
        out
    }
}

// Models sometimes answer a section with a list instead of a paragraph.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let text = match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Array(items)) => Some(
            items
                .into_iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("; "),
        ),
        Some(other) => Some(other.to_string()),
    };
    Ok(text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()))
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SubmitRequest {
    /// Absolute http(s) URL of the article to summarize
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub fast_summary: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    /// Identifier returned by submit_summarization
    pub job_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractRequest {
    pub url: String,
    #[serde(default)]
    pub mode: ExtractionMode,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchQuery {
    /// Keywords to search the paper index for
    pub keyword: String,
    /// Maximum number of papers to return (1-100, default 10)
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub papers: Vec<Paper>,
}

/// Normalized paper record returned by the search proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paper {
    pub paper_id: String,
    pub title: String,
    pub r#abstract: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<u32>,
    pub venue: Option<String>,
    pub url: Option<String>,
    pub citation_count: Option<u64>,
    pub open_access_pdf: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

// Semantic Scholar graph API types
#[derive(Debug, Deserialize)]
pub struct S2SearchResponse {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub data: Vec<S2Paper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S2Paper {
    pub paper_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub r#abstract: Option<String>,
    #[serde(default)]
    pub authors: Vec<S2Author>,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub citation_count: Option<u64>,
    #[serde(default)]
    pub open_access_pdf: Option<S2OpenAccessPdf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S2Author {
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct S2OpenAccessPdf {
    #[serde(default)]
    pub url: Option<String>,
}

impl From<S2Paper> for Paper {
    fn from(p: S2Paper) -> Self {
        Paper {
            paper_id: p.paper_id,
            title: p.title.unwrap_or_default(),
            r#abstract: p.r#abstract.filter(|a| !a.trim().is_empty()),
            authors: p.authors.into_iter().filter_map(|a| a.name).collect(),
            year: p.year,
            venue: p.venue.filter(|v| !v.trim().is_empty()),
            url: p.url,
            citation_count: p.citation_count,
            open_access_pdf: p.open_access_pdf.and_then(|pdf| pdf.url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_forward_only() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Done));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Done));
        assert!(!Done.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Done));
        assert!(!Done.can_transition_to(Done));
    }

    #[test]
    fn test_job_serializes_camel_case() {
        let now = Utc::now();
        let job = Job {
            id: "abc".into(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            url: "https://example.com".into(),
            fast_summary: Some("Hi.".into()),
            result: None,
            error: None,
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["fastSummary"], "Hi.");
        assert!(value.get("createdAt").is_some());
        assert!(value["result"].is_null());
    }

    #[test]
    fn test_structured_summary_accepts_lists_and_snake_case() {
        let raw = r#"{
            "summary": "A study of things.",
            "findings": ["one", "two"],
            "limitations": null,
            "key_points": ["k1"],
            "followUpQuestions": ["q1"]
        }"#;
        let parsed: StructuredSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.findings.as_deref(), Some("one; two"));
        assert_eq!(parsed.limitations, None);
        assert_eq!(parsed.key_points, vec!["k1"]);
        assert_eq!(parsed.follow_up_questions, vec!["q1"]);
    }

    #[test]
    fn test_payload_untagged_text() {
        let payload = SummaryPayload::Text("plain".into());
        assert_eq!(serde_json::to_value(&payload).unwrap(), "plain");
        assert!(!payload.is_empty());
    }

    #[test]
    fn test_s2_paper_normalization() {
        let raw = r#"{
            "paperId": "p1",
            "title": "Attention",
            "abstract": "",
            "authors": [{"authorId": "1", "name": "A. Author"}, {"authorId": null}],
            "year": 2017,
            "openAccessPdf": {"url": "https://example.org/p1.pdf"}
        }"#;
        let paper: Paper = serde_json::from_str::<S2Paper>(raw).unwrap().into();
        assert_eq!(paper.title, "Attention");
        assert_eq!(paper.r#abstract, None);
        assert_eq!(paper.authors, vec!["A. Author"]);
        assert_eq!(paper.open_access_pdf.as_deref(), Some("https://example.org/p1.pdf"));
    }
}
