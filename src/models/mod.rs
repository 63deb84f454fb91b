pub mod attempt;
pub mod domain_state;
pub mod monitored_url;
pub mod record;
pub mod strategy;

pub use attempt::{AttemptOutcome, AttemptResult, BlockSignal, StrategyOutcome};
pub use domain_state::DomainState;
pub use monitored_url::MonitoredUrl;
pub use record::{Availability, InstallmentPlan, PriceRecord};
pub use strategy::{Strategy, StrategyKind, TargetField};
