mod pending;
mod reconciler;

pub use pending::{ClearResult, LedgerEntry, PendingTransactionLedger, TouchResult};
pub use reconciler::{FinalizationReconciler, FinalizeReport, ReconcileOutcome};
