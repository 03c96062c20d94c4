mod base;
mod iggy_bus;

pub use base::{EventBus, EventEmitter, EventSink, ExecutionEvent, ExecutionId};
pub use iggy_bus::{IggyEventSink, IggySinkConfig, IggySinkError};
