// Copyright 2025 The gmp-operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Status conditions derived from synthesis outcomes.

use crate::synthesis::Outcome;
use crate::types::v1::status::{
    ConditionStatus, ConditionType, MonitoringCondition, MonitoringStatus,
};

/// Returns the status to write, or `None` when the stored one already reflects
/// `outcome` for `generation`.
///
/// Timestamps never cause a write on their own. `lastTransitionTime` is carried
/// over unless the condition status flips.
pub fn next_status(
    current: Option<&MonitoringStatus>,
    generation: Option<i64>,
    outcome: &Outcome,
    now: &str,
) -> Option<MonitoringStatus> {
    let (status, reason, message) = match outcome {
        Outcome::Success => (ConditionStatus::True, None, None),
        Outcome::Adjusted { reason, message } => (
            ConditionStatus::True,
            Some(reason.clone()),
            Some(message.clone()),
        ),
        Outcome::Failure { reason, message } => (
            ConditionStatus::False,
            Some(reason.clone()),
            Some(message.clone()),
        ),
    };
    let mut desired = MonitoringCondition {
        type_: ConditionType::ConfigurationCreateSuccess,
        status,
        last_update_time: Some(now.to_owned()),
        last_transition_time: Some(now.to_owned()),
        reason,
        message,
    };

    let conditions = current.map(|s| s.conditions.as_slice()).unwrap_or_default();
    let existing = conditions.iter().find(|c| c.type_ == desired.type_);
    let unchanged = conditions.len() == 1
        && existing.is_some_and(|c| c.same_state(&desired))
        && current.and_then(|s| s.observed_generation) == generation;
    if unchanged {
        return None;
    }

    if let Some(existing) = existing
        && existing.status == desired.status
        && existing.last_transition_time.is_some()
    {
        desired.last_transition_time = existing.last_transition_time.clone();
    }

    Some(MonitoringStatus {
        observed_generation: generation,
        conditions: vec![desired],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(message: &str) -> Outcome {
        Outcome::Failure {
            reason: "InvalidExpression".into(),
            message: message.into(),
        }
    }

    #[test]
    fn test_steady_state_writes_once() {
        let first = next_status(None, Some(1), &Outcome::Success, "t1").unwrap();
        assert_eq!(first.conditions.len(), 1);
        assert_eq!(first.observed_generation, Some(1));
        assert_eq!(first.conditions[0].status, ConditionStatus::True);

        assert_eq!(next_status(Some(&first), Some(1), &Outcome::Success, "t2"), None);
    }

    #[test]
    fn test_generation_change_is_written() {
        let first = next_status(None, Some(1), &Outcome::Success, "t1").unwrap();
        let second = next_status(Some(&first), Some(2), &Outcome::Success, "t2").unwrap();
        assert_eq!(second.observed_generation, Some(2));
        assert_eq!(
            second.conditions[0].last_transition_time.as_deref(),
            Some("t1")
        );
        assert_eq!(second.conditions[0].last_update_time.as_deref(), Some("t2"));
    }

    #[test]
    fn test_transition_time_moves_on_flip_only() {
        let ok = next_status(None, Some(1), &Outcome::Success, "t1").unwrap();
        let failed = next_status(Some(&ok), Some(1), &failure("a"), "t2").unwrap();
        assert_eq!(failed.conditions[0].status, ConditionStatus::False);
        assert_eq!(
            failed.conditions[0].last_transition_time.as_deref(),
            Some("t2")
        );

        let reworded = next_status(Some(&failed), Some(1), &failure("b"), "t3").unwrap();
        assert_eq!(
            reworded.conditions[0].last_transition_time.as_deref(),
            Some("t2")
        );
        assert_eq!(reworded.conditions[0].message.as_deref(), Some("b"));
    }

    #[test]
    fn test_extra_conditions_are_collapsed() {
        let ok = next_status(None, Some(1), &Outcome::Success, "t1").unwrap();
        let mut doubled = ok.clone();
        doubled.conditions.push(ok.conditions[0].clone());
        let fixed = next_status(Some(&doubled), Some(1), &Outcome::Success, "t2").unwrap();
        assert_eq!(fixed.conditions.len(), 1);
    }
}
