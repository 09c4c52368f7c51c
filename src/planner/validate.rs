use super::types::{Plan, PlanItem};

pub fn validate_plan(plan: &Plan) -> Result<(), String> {
    if plan.id.trim().is_empty() {
        return Err("plan id is required".to_string());
    }
    if plan.as_of.trim().is_empty() {
        return Err("plan as_of is required".to_string());
    }
    if plan.items.is_empty() {
        return Err("plan must include at least one item".to_string());
    }
    for (idx, item) in plan.items.iter().enumerate() {
        validate_plan_item(item).map_err(|err| format!("plan item {idx}: {err}"))?;
    }
    Ok(())
}

pub fn validate_plan_item(item: &PlanItem) -> Result<(), String> {
    if item.id.trim().is_empty() {
        return Err("id is required".to_string());
    }
    if item.objective_id.trim().is_empty() {
        return Err("objective_id is required".to_string());
    }
    if item.kr_id.trim().is_empty() {
        return Err("kr_id is required".to_string());
    }
    if item.task.trim().is_empty() {
        return Err("task is required".to_string());
    }
    if item.agent_role.trim().is_empty() {
        return Err("agent_role is required".to_string());
    }
    let metric_key = item.expected_metric_change.metric_key.trim();
    if metric_key.is_empty() {
        return Err("expected_metric_change.metric_key is required".to_string());
    }
    match item.expected_metric_change.direction.trim() {
        "" => Err("expected_metric_change.direction is required".to_string()),
        "increase" | "decrease" => Ok(()),
        _ => Err("expected_metric_change.direction must be \"increase\" or \"decrease\"".to_string()),
    }
}
