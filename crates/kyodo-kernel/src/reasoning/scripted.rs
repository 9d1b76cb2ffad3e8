//! Offline keyword-driven planner.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{EditRequest, ReasoningError, ReasoningService};
use crate::plan::{EditOperation, EditPlan};

/// Appended when no keyword matches.
pub const REMOTE_WORK_CLAUSE: &str = "\n\n5. REMOTE WORK\nThe Employee may work remotely up to 3 days per week.";

/// `(keywords, placeholder, replacement)`, first hit wins.
const RULES: &[(&[&str], &str, &str)] = &[
    (&["salary", "compensation"], "[INSERT_SALARY]", "$145,000"),
    (&["name"], "[INSERT_EMPLOYEE_NAME]", "Jamie Rivera"),
    (&["start"], "[INSERT_START_DATE]", "October 1st, 2025"),
];

/// Fills the template placeholders of the demo agreement, or appends a
/// remote-work clause. Waits `latency` to mimic a model round-trip.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReasoner {
    latency: Duration,
}

impl ScriptedReasoner {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    /// The plan for `instruction` against `document`, without the delay.
    pub fn plan(document: &str, instruction: &str) -> EditPlan {
        let lowered = instruction.to_lowercase();
        let hit = RULES
            .iter()
            .find(|(keywords, _, _)| keywords.iter().any(|k| lowered.contains(k)));
        match hit {
            Some((_, placeholder, replacement)) => {
                EditPlan::operations(vec![EditOperation::new(*placeholder, *replacement)])
            }
            None => EditPlan::rewrite(format!("{document}{REMOTE_WORK_CLAUSE}")),
        }
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn submit(&self, document: &str, request: &EditRequest) -> Result<EditPlan, ReasoningError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let plan = Self::plan(document, &request.instruction);
        debug!(instruction = %request.instruction, ?plan, "scripted plan");
        Ok(plan)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_rules() {
        assert_eq!(
            ScriptedReasoner::plan("", "Set the Compensation please"),
            EditPlan::operations(vec![EditOperation::new("[INSERT_SALARY]", "$145,000")])
        );
        assert_eq!(
            ScriptedReasoner::plan("", "fill in the employee name"),
            EditPlan::operations(vec![EditOperation::new("[INSERT_EMPLOYEE_NAME]", "Jamie Rivera")])
        );
        assert_eq!(
            ScriptedReasoner::plan("", "start date"),
            EditPlan::operations(vec![EditOperation::new("[INSERT_START_DATE]", "October 1st, 2025")])
        );
    }

    #[test]
    fn test_salary_beats_name() {
        let plan = ScriptedReasoner::plan("", "name the salary");
        assert_eq!(
            plan,
            EditPlan::operations(vec![EditOperation::new("[INSERT_SALARY]", "$145,000")])
        );
    }

    #[test]
    fn test_fallback_appends_clause() {
        let plan = ScriptedReasoner::plan("Terms.", "add flexibility");
        assert_eq!(plan, EditPlan::rewrite(format!("Terms.{REMOTE_WORK_CLAUSE}")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_waits_latency() {
        let reasoner = ScriptedReasoner::new(Duration::from_millis(800));
        let started = tokio::time::Instant::now();
        let plan = reasoner
            .submit("Terms.", &EditRequest::new("salary"))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(800));
        assert!(matches!(plan, EditPlan::Operations { .. }));
    }
}
