pub mod aggregator;
pub mod channel_sync;
pub mod diagnostics;
pub mod freshness;
pub mod ledger_merge;
pub mod normalizer;
pub mod notifier;
pub mod reconciler;
pub mod registry;
pub mod sources;

pub use channel_sync::ChannelSync;
pub use diagnostics::Diagnostics;
pub use ledger_merge::LedgerMerger;
pub use normalizer::{Normalizer, ProductCatalog};
pub use notifier::{FanoutNotifier, FileNotifier, LogNotifier, Notifier};
pub use reconciler::ReconcileService;
pub use registry::{ChannelDescriptor, ChannelRegistry};
pub use sources::{MemorySource, OrderSource};
