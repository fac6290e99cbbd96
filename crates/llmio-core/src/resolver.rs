use std::sync::Arc;

use llmio_provider::RequestFeatures;
use llmio_storage::{BindingRow, ModelRow, ProviderRow, Storage};

use crate::error::DispatchError;
use crate::principal::Principal;

#[derive(Debug, Clone)]
pub struct RouteChoice {
    pub binding: BindingRow,
    pub provider: ProviderRow,
}

#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub model: ModelRow,
    pub choices: Vec<RouteChoice>,
}

impl ResolvedRoute {
    pub fn choice(&self, binding_id: i64) -> Option<&RouteChoice> {
        self.choices
            .iter()
            .find(|choice| choice.binding.id == binding_id)
    }
}

/// Map `(logical model, detected capabilities, caller allow-list)` to the
/// eligible binding set. Disabled bindings never reach this point; capability
/// filtering happens here, before any upstream is contacted.
pub async fn resolve(
    storage: &Arc<dyn Storage>,
    model_name: &str,
    features: RequestFeatures,
    principal: &Principal,
) -> Result<ResolvedRoute, DispatchError> {
    let model = storage
        .find_model(model_name)
        .await?
        .ok_or_else(|| DispatchError::ModelNotFound(model_name.to_string()))?;

    if !principal.allows(model_name) {
        return Err(DispatchError::Forbidden);
    }

    let choices: Vec<RouteChoice> = storage
        .bindings_for_model(model.id)
        .await?
        .into_iter()
        .filter(|(binding, _)| binding.weight > 0 && satisfies(binding, features))
        .map(|(binding, provider)| RouteChoice { binding, provider })
        .collect();

    if choices.is_empty() {
        return Err(DispatchError::NoEligibleBinding);
    }

    Ok(ResolvedRoute { model, choices })
}

fn satisfies(binding: &BindingRow, features: RequestFeatures) -> bool {
    if features.tools && !binding.tool_call {
        return false;
    }
    if features.structured_output && !binding.structured_output {
        return false;
    }
    if features.vision && !binding.image {
        return false;
    }
    true
}
