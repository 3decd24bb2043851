/// Monitoring engine module - decides when targets are checked and checks them
///
/// This module is responsible for:
/// - Guarding probes against private and reserved addresses
/// - Executing HTTP/HTTPS probes
/// - Deciding which targets are due
/// - Scheduling ticks and recording their results
pub mod checker;
pub mod due;
pub mod executor;
pub mod guard;
pub mod scheduler;
pub mod types;

pub use checker::{HttpProber, Prober};
pub use executor::CheckPipeline;
pub use guard::{AddressGuard, DnsAddressGuard};
pub use scheduler::CheckScheduler;
pub use types::{CheckStatus, ProbeOutcome};
