pub mod ledger;
pub mod order;
pub mod report;
pub mod sales;
pub mod window;

pub use ledger::{LedgerColumn, MasterDailyRecord};
pub use order::{CanonicalOrderLine, NormalizeStats, NormalizedOrder};
pub use report::{
    DiagnosticsReport, Fix, FreshnessCheck, Issue, IssueType, JobStatus, MergeReport,
    RebuildReport, RebuildTarget, RunStatus, Severity, SyncAllReport, SyncReport,
};
pub use sales::{ChannelDailyProductSales, ChannelDailyTotal};
pub use window::DateWindow;
