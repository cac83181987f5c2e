pub mod cart;
pub mod config;
pub mod messenger;
pub mod orchestrator;
pub mod receiver;
pub mod redirect;
pub mod remote;
pub mod responder;
pub mod retry;
pub mod storage;

pub use cart::CartStore;
pub use config::HandoffConfig;
pub use messenger::WindowMessenger;
pub use orchestrator::{CheckoutOrchestrator, HandoffOutcome, HandoffPhase, Navigator, RecordingNavigator};
pub use receiver::{CartSource, CheckoutReceiver};
pub use redirect::{CartPayload, RedirectBuilder, RedirectPlan};
pub use remote::{HttpOrderSink, NullOrderSink, OrderSink, SinkAck, SinkError, SnapshotRef};
pub use responder::ReadyResponder;
pub use retry::RetryPolicy;
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError, StorageMirror};
