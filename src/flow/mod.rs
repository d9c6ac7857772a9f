pub mod context;
pub mod definition;
pub mod error;
pub mod event;
pub mod manager;
pub mod result;
pub mod session;
pub mod transition;

pub use context::{RequestContext, StepContext};
pub use definition::{
    ButtonCleanup, CompletionHook, ErrorPolicy, FlowBuilder, FlowCompletion, FlowDefinition, FnHandler,
    StepDefinition, StepHandler,
};
pub use error::{DefinitionError, FlowError};
pub use event::{ButtonClick, ButtonClickEvent, InboundEvent, StepInput};
pub use manager::FlowManager;
pub use result::{AdvanceOutcome, NavAction, ProcessResult, StepError};
pub use session::{FlowSession, InMemorySessionStore, SessionHandle, SessionStore, SessionStoreType};
pub use transition::{Transition, TransitionPlan};
