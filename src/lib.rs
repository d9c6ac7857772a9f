pub mod callback;
pub mod config;
pub mod flow;
pub mod logger;
pub mod prompt;
pub mod state;
pub mod util;

pub use callback::{CallbackStore, CallbackStoreType, InMemoryCallbackStore};
pub use flow::{
    AdvanceOutcome, ButtonClick, FlowBuilder, FlowDefinition, FlowError, FlowManager, InboundEvent, ProcessResult,
    RequestContext, StepContext, StepInput,
};
pub use prompt::{Keyboard, PromptComposer, PromptSpec};
pub use state::{FlowData, StateValue};
