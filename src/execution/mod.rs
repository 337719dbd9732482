/// Signal-to-trade execution system

pub mod expiry;
pub mod ledger;
pub mod monitor;
pub mod pipeline;
pub mod portfolio;
pub mod risk;
pub mod signals;
pub mod venue;

pub use expiry::ExpirySweeper;
pub use ledger::{LedgerError, TradeLedger};
pub use monitor::{LiveTradingLoop, LoopComponents, LoopHandle, LoopState, LoopStatus, TickReport};
pub use pipeline::{ExecutionFailure, ExecutionPipeline, ExecutionReport, ExecutionResult, FailureReason};
pub use portfolio::{apply_execution, PortfolioReconciler, Reconciliation};
pub use risk::{evaluate, RiskRejection};
pub use signals::SignalStats;
pub use venue::{FillStatus, PaperVenue, Venue, VenueError, VenueFill};
