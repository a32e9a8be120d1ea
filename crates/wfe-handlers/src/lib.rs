pub mod builtin;
pub mod registry;

pub use builtin::{CreateIssuesHandler, SaveCheckpointHandler};
pub use registry::{Deps, Handler, HandlerRegistry};

use std::sync::Arc;

/// The default registry shipped with the engine (spec §4.4): `create-issues`
/// and `save-checkpoint`.
pub fn default_registry() -> HandlerRegistry {
    let mut reg = HandlerRegistry::new();
    reg.register("create-issues", Arc::new(CreateIssuesHandler));
    reg.register("save-checkpoint", Arc::new(SaveCheckpointHandler));
    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_ships_builtin_handlers() {
        let reg = default_registry();
        assert!(reg.has("create-issues"));
        assert!(reg.has("save-checkpoint"));
    }
}
