//! # Input Pipeline
//!
//! Events, queues, state, filters and the node that joins them.
//!
//! ## Design
//!
//! ```text
//!  InputSource ──► InputNode ──► IoFilter chain ──► InputState
//!                                                └──► InputSink
//! ```

pub mod event;
pub mod filter;
pub mod filters;
pub mod node;
pub mod queue;
pub mod source;
pub mod state;

pub use event::{EventKind, EventValue, InputEvent};
pub use filter::{run_filter, FilterContext, FilterSettings, IoFilter};
pub use filters::{
    AxisScaleFilter, ButtonSuppressFilter, CallbackFilter, EventCallback, MatrixTransformFilter,
    PassThroughFilter,
};
pub use node::{FilterId, InputNode, QueueCallback, SourceHandle};
pub use queue::{EventBuffers, EventQueue, Signature, FLAG_GARBAGE};
pub use source::{GeneratorSource, InputSink, InputSource, QueueSink};
pub use state::InputState;
