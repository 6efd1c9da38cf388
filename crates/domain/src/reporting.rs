use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::filter::{FilterCondition, TimeRange, compile_for_definition};
use crate::forms::Form;
use crate::ports::forms::FormRepository;
use crate::ports::submissions::SubmissionRepository;
use crate::stats::{FormStats, aggregate};
use crate::submissions::SubmissionRecord;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    #[serde(default)]
    pub start_time_ms: Option<i64>,
    #[serde(default)]
    pub end_time_ms: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
}

/// Filtered raw records for an external renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionExport {
    pub form: Form,
    pub records: Vec<SubmissionRecord>,
}

/// Owner-facing read side: statistics and filtered exports. `actor_id` is
/// the already-verified caller identity.
#[derive(Clone)]
pub struct SubmissionQueryService {
    forms: Arc<dyn FormRepository>,
    submissions: Arc<dyn SubmissionRepository>,
}

impl SubmissionQueryService {
    pub fn new(forms: Arc<dyn FormRepository>, submissions: Arc<dyn SubmissionRepository>) -> Self {
        Self { forms, submissions }
    }

    pub async fn form_statistics(&self, actor_id: u64, form_id: u64) -> DomainResult<FormStats> {
        let form = self.owned_form(actor_id, form_id).await?;
        let records = self.submissions.find_by_form(form_id).await?;
        Ok(aggregate(&form.definition, &records))
    }

    pub async fn export_submissions(
        &self,
        actor_id: u64,
        form_id: u64,
        query: ExportQuery,
    ) -> DomainResult<SubmissionExport> {
        let form = self.owned_form(actor_id, form_id).await?;
        let range = TimeRange {
            start_ms: query.start_time_ms,
            end_ms: query.end_time_ms,
        };
        let predicate =
            compile_for_definition(form_id, &form.definition, range, &query.conditions)?;
        let records = self.submissions.find_matching(&predicate).await?;
        Ok(SubmissionExport { form, records })
    }

    async fn owned_form(&self, actor_id: u64, form_id: u64) -> DomainResult<Form> {
        let form = self.forms.get(form_id).await?.ok_or(DomainError::NotFound)?;
        if !form.is_owned_by(actor_id) {
            return Err(DomainError::Forbidden);
        }
        Ok(form)
    }
}
