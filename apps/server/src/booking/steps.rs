//! Booking step topology.
//!
//! The nominal order is fixed; optional steps are dropped from the effective
//! sequence according to the current [`FlowConfig`]. Every transition consults
//! the config it is given, so toggling a step mid-session takes effect on the
//! next move.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    SelectService,
    AiStylist,
    SelectDate,
    Details,
    Consent,
    Confirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowConfig {
    pub ai_stylist_enabled: bool,
}

/// Nominal order, each step paired with the predicate that keeps it.
const SEQUENCE: &[(Step, fn(&FlowConfig) -> bool)] = &[
    (Step::SelectService, always),
    (Step::AiStylist, stylist_enabled),
    (Step::SelectDate, always),
    (Step::Details, always),
    (Step::Consent, always),
    (Step::Confirmation, always),
];

fn always(_: &FlowConfig) -> bool {
    true
}

fn stylist_enabled(cfg: &FlowConfig) -> bool {
    cfg.ai_stylist_enabled
}

fn nominal_index(step: Step) -> usize {
    SEQUENCE
        .iter()
        .position(|(s, _)| *s == step)
        .unwrap_or_default()
}

/// Steps the customer will actually walk through, in order.
pub fn effective_steps(cfg: &FlowConfig) -> Vec<Step> {
    SEQUENCE
        .iter()
        .filter(|(_, included)| included(cfg))
        .map(|(s, _)| *s)
        .collect()
}

/// Next included step after `step`, if any.
pub fn next(step: Step, cfg: &FlowConfig) -> Option<Step> {
    SEQUENCE[nominal_index(step) + 1..]
        .iter()
        .find(|(_, included)| included(cfg))
        .map(|(s, _)| *s)
}

/// Previous included step before `step`. Confirmation has no way back.
pub fn prev(step: Step, cfg: &FlowConfig) -> Option<Step> {
    if step == Step::Confirmation {
        return None;
    }
    SEQUENCE[..nominal_index(step)]
        .iter()
        .rev()
        .find(|(_, included)| included(cfg))
        .map(|(s, _)| *s)
}

/// "Step N of M" over the effective sequence, Confirmation excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepIndicator {
    pub position: usize,
    pub total: usize,
}

pub fn indicator(step: Step, cfg: &FlowConfig) -> Option<StepIndicator> {
    let visible: Vec<Step> = effective_steps(cfg)
        .into_iter()
        .filter(|s| *s != Step::Confirmation)
        .collect();
    let index = visible.iter().position(|s| *s == step)?;
    Some(StepIndicator {
        position: index + 1,
        total: visible.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const AI_ON: FlowConfig = FlowConfig {
        ai_stylist_enabled: true,
    };
    const AI_OFF: FlowConfig = FlowConfig {
        ai_stylist_enabled: false,
    };

    #[test]
    fn test_full_sequence_with_stylist() {
        assert_eq!(
            effective_steps(&AI_ON),
            vec![
                Step::SelectService,
                Step::AiStylist,
                Step::SelectDate,
                Step::Details,
                Step::Consent,
                Step::Confirmation
            ]
        );
    }

    #[test]
    fn test_stylist_disabled_collapses_sequence() {
        assert_eq!(next(Step::SelectService, &AI_OFF), Some(Step::SelectDate));
        assert_eq!(prev(Step::SelectDate, &AI_OFF), Some(Step::SelectService));
        assert!(!effective_steps(&AI_OFF).contains(&Step::AiStylist));
    }

    #[test]
    fn test_stylist_enabled_goes_through_stylist() {
        assert_eq!(next(Step::SelectService, &AI_ON), Some(Step::AiStylist));
        assert_eq!(next(Step::AiStylist, &AI_ON), Some(Step::SelectDate));
        assert_eq!(prev(Step::SelectDate, &AI_ON), Some(Step::AiStylist));
    }

    #[test]
    fn test_disabling_while_on_stylist_still_moves() {
        assert_eq!(next(Step::AiStylist, &AI_OFF), Some(Step::SelectDate));
        assert_eq!(prev(Step::AiStylist, &AI_OFF), Some(Step::SelectService));
    }

    #[test]
    fn test_ends_of_sequence() {
        assert_eq!(prev(Step::SelectService, &AI_ON), None);
        assert_eq!(next(Step::Confirmation, &AI_ON), None);
        assert_eq!(prev(Step::Confirmation, &AI_ON), None);
        assert_eq!(next(Step::Consent, &AI_OFF), Some(Step::Confirmation));
    }

    #[test]
    fn test_indicator_reflects_collapsed_sequence() {
        assert_eq!(
            indicator(Step::SelectDate, &AI_OFF),
            Some(StepIndicator { position: 2, total: 4 })
        );
        assert_eq!(
            indicator(Step::SelectDate, &AI_ON),
            Some(StepIndicator { position: 3, total: 5 })
        );
    }

    #[test]
    fn test_indicator_hidden_on_confirmation_and_disabled_step() {
        assert_eq!(indicator(Step::Confirmation, &AI_ON), None);
        assert_eq!(indicator(Step::AiStylist, &AI_OFF), None);
    }
}
