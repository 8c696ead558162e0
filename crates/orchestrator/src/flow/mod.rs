//! Query flow: the stage pipeline and its pluggable collaborators

pub mod collaborators;
pub mod context_analysis;
pub mod controller;
pub mod external;
pub mod response;

pub use collaborators::{DataSourceCatalog, InteractionRecord, LearningRecorder, QueryCacheRecorder};
pub use context_analysis::{ContextAnalyzer, LexicalContextAnalyzer};
pub use controller::{FlowController, FlowControllerBuilder, SESSION_STEPS};
pub use external::{ExternalDataPredicate, LexicalCuePredicate};
pub use response::{EnhancedAgentResponse, FlowMetadata, QueryRequest, TokenLedger};
