use std::collections::HashSet;

/// The authorized caller attached to a request. `auth_key_id == 0` marks the
/// admin token (or an open gateway with no token configured).
#[derive(Debug, Clone, Default)]
pub struct Principal {
    pub auth_key_id: i64,
    pub allow_all: bool,
    pub allow_models: HashSet<String>,
}

impl Principal {
    pub fn admin() -> Self {
        Self {
            auth_key_id: 0,
            allow_all: true,
            allow_models: HashSet::new(),
        }
    }

    pub fn allows(&self, model: &str) -> bool {
        self.allow_all || self.allow_models.contains(model)
    }
}
