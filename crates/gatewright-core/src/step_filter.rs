use crate::registry::TemporaryGateRegistry;

/// Narrow a chain's gate list to the gates that apply to `step_number`.
///
/// Canonical gates (anything the temporary registry does not know) always
/// pass. Temporary gates honor `target_step_number`, then `apply_to_steps`,
/// and apply everywhere when neither is set.
pub async fn filter_by_step(
    registry: &TemporaryGateRegistry,
    gate_ids: &[String],
    step_number: u32,
) -> Vec<String> {
    let mut kept = Vec::with_capacity(gate_ids.len());

    for id in gate_ids {
        let applies = match registry.get_temporary_gate(id).await {
            Some(gate) => gate.applies_to_step(step_number),
            None => true,
        };

        if applies {
            kept.push(id.clone());
        } else {
            tracing::debug!(gate_id = %id, step = step_number, "Gate not targeted at step");
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{GateOrigin, GateScope, GateType, NormalizedGateInput};

    fn targeted(
        criteria: &str,
        apply_to_steps: Option<Vec<u32>>,
        target: Option<u32>,
    ) -> NormalizedGateInput {
        NormalizedGateInput {
            id: None,
            name: "Targeted".into(),
            gate_type: GateType::Validation,
            scope: GateScope::Chain,
            source: GateOrigin::Manual,
            criteria: Some(vec![criteria.into()]),
            pass_criteria: None,
            guidance: None,
            description: None,
            severity: None,
            context: None,
            target_step_number: target,
            apply_to_steps,
        }
    }

    #[tokio::test]
    async fn apply_to_steps_limits_membership() {
        let registry = TemporaryGateRegistry::new();
        let temp = registry
            .create_temporary_gate(&targeted("x", Some(vec![2, 3]), None), "chain-a")
            .await
            .unwrap();
        let ids = vec!["code-quality".to_string(), temp.clone()];

        assert_eq!(filter_by_step(&registry, &ids, 1).await, ["code-quality"]);
        assert_eq!(filter_by_step(&registry, &ids, 2).await, ids);
        assert_eq!(filter_by_step(&registry, &ids, 3).await, ids);
    }

    #[tokio::test]
    async fn target_step_number_matches_exactly() {
        let registry = TemporaryGateRegistry::new();
        let temp = registry
            .create_temporary_gate(&targeted("y", None, Some(2)), "chain-a")
            .await
            .unwrap();
        let ids = vec![temp.clone()];

        assert!(filter_by_step(&registry, &ids, 1).await.is_empty());
        assert_eq!(filter_by_step(&registry, &ids, 2).await, [temp]);
    }

    #[tokio::test]
    async fn unconstrained_temporary_gate_applies_to_every_step() {
        let registry = TemporaryGateRegistry::new();
        let temp = registry
            .create_temporary_gate(&targeted("z", None, None), "chain-a")
            .await
            .unwrap();
        let ids = vec![temp];

        for step in 1..=4 {
            assert_eq!(filter_by_step(&registry, &ids, step).await.len(), 1);
        }
    }
}
