//! Job lifecycle state machine.
//!
//! ```text
//! Pending   --submit success-----------> Submitted
//! Pending   --submit permanent failure--> Failed
//! Submitted --provider reports success--> Succeeded
//! Submitted --provider reports failure--> Failed
//! Succeeded --assets retrieved----------> Completed
//! ```
//!
//! Every mutation of a job's state is expressed as a [`Transition`]. The
//! store applies it as a compare-and-set against [`Transition::sources`],
//! so two racing writers converge on exactly one winner.

use serde::{Deserialize, Serialize};

use crate::asset::AssetRef;
use crate::error::CoreError;

/// Maximum length of a failure reason shown to clients.
pub const MAX_FAILURE_REASON_LEN: usize = 500;

/// Lifecycle state of a generation job.
///
/// Discriminants match the `job_states` lookup table seed data.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending = 1,
    Submitted = 2,
    Succeeded = 3,
    Failed = 4,
    Completed = 5,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Submitted,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Completed,
    ];

    /// Return the database state id.
    pub fn id(self) -> i16 {
        self as i16
    }

    /// Resolve a database id back into a state.
    pub fn from_id(id: i16) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|s| s.id() == id)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job state id {id}")))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    /// `Failed` and `Completed` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Completed)
    }

    /// Whether the provider has finished with this job, i.e. a push
    /// notification or poll result can no longer change it.
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Pending | Self::Submitted)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Submitted)
                | (Self::Pending, Self::Failed)
                | (Self::Submitted, Self::Succeeded)
                | (Self::Submitted, Self::Failed)
                | (Self::Succeeded, Self::Completed)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A requested state change along with the data it records.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The provider accepted the job and assigned `remote_id`.
    Submit { remote_id: String },
    /// Terminal failure, from submission or from the provider.
    Fail { reason: String },
    /// The provider finished; `assets` are remote references.
    Succeed { assets: Vec<AssetRef> },
    /// All assets were copied to durable storage.
    Complete { assets: Vec<AssetRef> },
}

impl Transition {
    /// Build a failure transition with a sanitized, length-capped reason.
    pub fn fail(reason: impl AsRef<str>) -> Self {
        Self::Fail {
            reason: sanitize_failure_reason(reason.as_ref()),
        }
    }

    /// State the job is in after this transition.
    pub fn target(&self) -> JobState {
        match self {
            Self::Submit { .. } => JobState::Submitted,
            Self::Fail { .. } => JobState::Failed,
            Self::Succeed { .. } => JobState::Succeeded,
            Self::Complete { .. } => JobState::Completed,
        }
    }

    /// States from which this transition may be applied.
    pub fn sources(&self) -> &'static [JobState] {
        match self {
            Self::Submit { .. } => &[JobState::Pending],
            Self::Fail { .. } => &[JobState::Pending, JobState::Submitted],
            Self::Succeed { .. } => &[JobState::Submitted],
            Self::Complete { .. } => &[JobState::Succeeded],
        }
    }

    /// Check the payload upholds the job invariants for the target state.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::Submit { remote_id } if remote_id.trim().is_empty() => Err(
                CoreError::Validation("Submitted jobs require a remote id".into()),
            ),
            Self::Succeed { assets } if assets.is_empty() => Err(CoreError::Validation(
                "Succeeded jobs require at least one asset".into(),
            )),
            Self::Complete { assets } if assets.is_empty() => Err(CoreError::Validation(
                "Completed jobs require at least one asset".into(),
            )),
            Self::Complete { assets } if assets.iter().any(|a| !a.is_local()) => Err(
                CoreError::Validation("Completed jobs may only hold local asset references".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// Collapse whitespace and cap the reason at [`MAX_FAILURE_REASON_LEN`]
/// characters so raw provider payloads never reach clients verbatim.
pub fn sanitize_failure_reason(reason: &str) -> String {
    let collapsed = reason.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "Generation failed".to_string();
    }
    if collapsed.chars().count() <= MAX_FAILURE_REASON_LEN {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(MAX_FAILURE_REASON_LEN - 3).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_ids_match_seed_data() {
        assert_eq!(JobState::Pending.id(), 1);
        assert_eq!(JobState::Submitted.id(), 2);
        assert_eq!(JobState::Succeeded.id(), 3);
        assert_eq!(JobState::Failed.id(), 4);
        assert_eq!(JobState::Completed.id(), 5);
    }

    #[test]
    fn graph_has_exactly_five_edges() {
        let mut edges = 0;
        for from in JobState::ALL {
            for to in JobState::ALL {
                if from.can_transition_to(to) {
                    edges += 1;
                }
            }
        }
        assert_eq!(edges, 5);
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in [JobState::Failed, JobState::Completed] {
            assert!(from.is_terminal());
            for to in JobState::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn succeeded_only_leads_to_completed() {
        assert!(!JobState::Succeeded.can_transition_to(JobState::Failed));
        assert!(JobState::Succeeded.can_transition_to(JobState::Completed));
        assert!(JobState::Succeeded.is_settled());
        assert!(!JobState::Succeeded.is_terminal());
    }

    #[test]
    fn transition_sources_agree_with_graph() {
        let transitions = [
            Transition::Submit { remote_id: "r".into() },
            Transition::fail("boom"),
            Transition::Succeed { assets: vec![AssetRef::remote("https://x/y.png")] },
            Transition::Complete { assets: vec![AssetRef::local("/files/a.png", "image/png", 3)] },
        ];
        for t in transitions {
            for source in t.sources() {
                assert!(source.can_transition_to(t.target()));
            }
        }
    }

    #[test]
    fn complete_rejects_remote_assets() {
        let t = Transition::Complete {
            assets: vec![
                AssetRef::local("/files/a.png", "image/png", 3),
                AssetRef::remote("https://cdn/b.png"),
            ],
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn succeed_requires_assets() {
        assert!(Transition::Succeed { assets: vec![] }.validate().is_err());
        assert!(Transition::Submit { remote_id: " ".into() }.validate().is_err());
    }

    #[test]
    fn failure_reason_is_collapsed_and_capped() {
        assert_eq!(sanitize_failure_reason("  bad\n\tprompt "), "bad prompt");
        assert_eq!(sanitize_failure_reason(""), "Generation failed");
        let long = "x".repeat(2000);
        let capped = sanitize_failure_reason(&long);
        assert_eq!(capped.chars().count(), MAX_FAILURE_REASON_LEN);
        assert!(capped.ends_with("..."));
    }
}
