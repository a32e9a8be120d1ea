pub mod loader;
pub mod resolver;
pub mod schema;
pub mod template;

pub use loader::{
    load_agent_definition, load_prompt_definition, load_workflow_definition, AgentDefinition, AgentStep, CodeStep,
    Defaults, LoopStep, OnExhausted, ParallelStep, PerTaskStep, PromptDefinition, Step, WorkflowDefinition,
};
pub use resolver::{contains_traversal, escapes_base, Kind, ResolvedPath, Resolver, Source};
pub use schema::SchemaRegistry;
