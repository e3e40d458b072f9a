use crate::spec::{
    CustomCheck, GateObject, GateOrigin, GateScope, GateSpecification, GateType,
    NormalizedGateInput, Severity,
};

/// Name given to gates built from a bare criteria string.
pub const INLINE_CRITERIA_NAME: &str = "Inline Validation Criteria";

/// Name used when an object supplies neither `name` nor `id`.
pub const DEFAULT_GATE_NAME: &str = "Custom Gate";

/// Convert any wire gate shape into a [`NormalizedGateInput`].
///
/// Returns `(normalized, valid)`. Shape errors are rejected at ingress, so
/// `valid` is always `true` here.
pub fn normalize(
    raw: &GateSpecification,
    is_chain_execution: bool,
    current_step: u32,
) -> (NormalizedGateInput, bool) {
    let normalized = match raw {
        GateSpecification::Reference(text) => {
            normalize_reference(text, is_chain_execution, current_step)
        }
        GateSpecification::Custom(check) => {
            normalize_custom(check, is_chain_execution, current_step)
        }
        GateSpecification::Full(object) => {
            normalize_object(object, is_chain_execution, current_step)
        }
    };
    (normalized, true)
}

fn normalize_reference(
    text: &str,
    is_chain_execution: bool,
    current_step: u32,
) -> NormalizedGateInput {
    NormalizedGateInput {
        id: None,
        name: INLINE_CRITERIA_NAME.into(),
        gate_type: GateType::Validation,
        scope: GateScope::Execution,
        source: GateOrigin::Automatic,
        criteria: Some(vec![text.trim().to_string()]),
        pass_criteria: None,
        guidance: None,
        description: None,
        severity: None,
        context: None,
        target_step_number: None,
        // Ad-hoc criteria in a chain apply only to the step that asked for them.
        apply_to_steps: is_chain_execution.then(|| vec![current_step]),
    }
}

fn normalize_custom(
    check: &CustomCheck,
    is_chain_execution: bool,
    current_step: u32,
) -> NormalizedGateInput {
    NormalizedGateInput {
        id: None,
        name: check.name.clone(),
        gate_type: GateType::Validation,
        scope: GateScope::Execution,
        source: GateOrigin::Manual,
        criteria: None,
        pass_criteria: None,
        guidance: None,
        description: Some(check.description.clone()),
        severity: None,
        context: None,
        target_step_number: None,
        apply_to_steps: is_chain_execution.then(|| vec![current_step]),
    }
}

fn normalize_object(
    object: &GateObject,
    is_chain_execution: bool,
    current_step: u32,
) -> NormalizedGateInput {
    let id = object
        .id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let name = object
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .or_else(|| id.clone())
        .unwrap_or_else(|| DEFAULT_GATE_NAME.into());

    let gate_type = object
        .gate_type
        .as_deref()
        .and_then(GateType::parse)
        .unwrap_or_default();
    let scope = object
        .scope
        .as_deref()
        .and_then(GateScope::parse)
        .unwrap_or_default();
    let source = object
        .source
        .as_deref()
        .and_then(GateOrigin::parse)
        .unwrap_or_default();
    let severity = object.severity.as_deref().and_then(Severity::parse);

    let (target_step_number, apply_to_steps) = resolve_step_targeting(
        object.target_step_number,
        object.apply_to_steps.as_deref(),
        is_chain_execution,
        current_step,
    );

    NormalizedGateInput {
        id,
        name,
        gate_type,
        scope,
        source,
        criteria: clean_list(object.criteria.as_deref()),
        pass_criteria: clean_list(object.pass_criteria.as_deref()),
        guidance: clean_text(object.guidance.as_deref()),
        description: clean_text(object.description.as_deref()),
        severity,
        context: object.context.clone(),
        target_step_number,
        apply_to_steps,
    }
}

/// Explicit `apply_to_steps` wins; an untargeted gate inside a chain defaults
/// to the current step; otherwise the gate applies to every step.
fn resolve_step_targeting(
    target_step_number: Option<u32>,
    apply_to_steps: Option<&[u32]>,
    is_chain_execution: bool,
    current_step: u32,
) -> (Option<u32>, Option<Vec<u32>>) {
    if let Some(steps) = apply_to_steps
        && !steps.is_empty()
    {
        return (target_step_number, Some(steps.to_vec()));
    }

    if target_step_number.is_none() && is_chain_execution {
        return (None, Some(vec![current_step]));
    }

    (target_step_number, None)
}

fn clean_list(items: Option<&[String]>) -> Option<Vec<String>> {
    let cleaned: Vec<String> = items?
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn clean_text(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(f: impl FnOnce(&mut GateObject)) -> GateSpecification {
        let mut obj = GateObject::default();
        f(&mut obj);
        GateSpecification::Full(Box::new(obj))
    }

    #[test]
    fn bare_string_becomes_inline_criteria() {
        let raw = GateSpecification::Reference("Cite all sources".into());
        let (gate, valid) = normalize(&raw, false, 1);

        assert!(valid);
        assert_eq!(gate.name, INLINE_CRITERIA_NAME);
        assert_eq!(gate.gate_type, GateType::Validation);
        assert_eq!(gate.scope, GateScope::Execution);
        assert_eq!(gate.criteria, Some(vec!["Cite all sources".to_string()]));
        assert_eq!(gate.apply_to_steps, None);
    }

    #[test]
    fn bare_string_in_chain_targets_current_step() {
        let raw = GateSpecification::Reference("Cite all sources".into());
        let (gate, _) = normalize(&raw, true, 3);
        assert_eq!(gate.apply_to_steps, Some(vec![3]));
    }

    #[test]
    fn unrecognized_enums_fall_back_to_defaults() {
        let raw = object(|o| {
            o.guidance = Some("Be concise".into());
            o.gate_type = Some("mandatory".into());
            o.scope = Some("forever".into());
            o.source = Some("someone".into());
        });
        let (gate, _) = normalize(&raw, false, 1);

        assert_eq!(gate.gate_type, GateType::Validation);
        assert_eq!(gate.scope, GateScope::Execution);
        assert_eq!(gate.source, GateOrigin::Automatic);
    }

    #[test]
    fn recognized_enums_are_kept() {
        let raw = object(|o| {
            o.guidance = Some("Be concise".into());
            o.gate_type = Some("guidance".into());
            o.scope = Some("session".into());
            o.source = Some("manual".into());
            o.severity = Some("critical".into());
        });
        let (gate, _) = normalize(&raw, false, 1);

        assert_eq!(gate.gate_type, GateType::Guidance);
        assert_eq!(gate.scope, GateScope::Session);
        assert_eq!(gate.source, GateOrigin::Manual);
        assert_eq!(gate.severity, Some(Severity::Critical));
    }

    #[test]
    fn name_falls_back_to_id_then_default() {
        let (with_id, _) = normalize(
            &object(|o| {
                o.id = Some("tone-check".into());
                o.guidance = Some("Friendly".into());
            }),
            false,
            1,
        );
        assert_eq!(with_id.name, "tone-check");

        let (anonymous, _) = normalize(&object(|o| o.guidance = Some("Friendly".into())), false, 1);
        assert_eq!(anonymous.name, DEFAULT_GATE_NAME);
    }

    #[test]
    fn explicit_apply_to_steps_is_kept_in_chain() {
        let raw = object(|o| {
            o.criteria = Some(vec!["x".into()]);
            o.apply_to_steps = Some(vec![2, 3]);
        });
        let (gate, _) = normalize(&raw, true, 1);
        assert_eq!(gate.apply_to_steps, Some(vec![2, 3]));
    }

    #[test]
    fn target_step_suppresses_chain_default() {
        let raw = object(|o| {
            o.criteria = Some(vec!["x".into()]);
            o.target_step_number = Some(4);
        });
        let (gate, _) = normalize(&raw, true, 1);
        assert_eq!(gate.target_step_number, Some(4));
        assert_eq!(gate.apply_to_steps, None);
    }

    #[test]
    fn untargeted_object_outside_chain_applies_everywhere() {
        let raw = object(|o| o.criteria = Some(vec!["x".into()]));
        let (gate, _) = normalize(&raw, false, 2);
        assert_eq!(gate.target_step_number, None);
        assert_eq!(gate.apply_to_steps, None);
    }

    #[test]
    fn custom_check_keeps_description_as_content() {
        let raw = GateSpecification::Custom(CustomCheck {
            name: "Sources".into(),
            description: "Every claim has a citation".into(),
        });
        let (gate, _) = normalize(&raw, false, 1);
        assert_eq!(gate.name, "Sources");
        assert_eq!(gate.description.as_deref(), Some("Every claim has a citation"));
        assert_eq!(gate.source, GateOrigin::Manual);
    }

    #[test]
    fn blank_criteria_entries_are_dropped() {
        let raw = object(|o| o.criteria = Some(vec!["  ".into(), "real".into()]));
        let (gate, _) = normalize(&raw, false, 1);
        assert_eq!(gate.criteria, Some(vec!["real".to_string()]));
    }
}
