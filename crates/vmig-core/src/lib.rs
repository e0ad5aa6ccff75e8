//! vmig core - orchestration of VM migrations between vSphere/ONTAP sites.
//!
//! A batch of VMs is moved from a source vCenter to a target vCenter whose
//! ONTAP volumes are SnapMirror destinations of the source datastores. The
//! [`Sequencer`] drives nine steps in order:
//!
//! 1. discovery, 2. power-state verification, 3. SnapMirror break,
//! 4. NFS mount on the target cluster, 5. registration, 6. power on,
//! 7. backup tagging, 8. source network disconnect, 9. source deregistration.
//!
//! External systems are reached only through [`StorageApi`] and
//! [`VirtualizationApi`]; the REST clients in [`backend`] implement them.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vmig_core::backend::{ontap::OntapClient, vsphere::VsphereClient, Endpoint};
//! use vmig_core::{AutoConfirmer, RunConfig, Sequencer, SessionLedger};
//!
//! #[tokio::main]
//! async fn main() -> vmig_core::Result<()> {
//!     let config = RunConfig::new("Cluster-B", "svm_dr", "run.log").with_simulate(true);
//!     let ledger = SessionLedger::open(&config.log_path)?;
//!     let sequencer = Sequencer::new(
//!         config,
//!         Arc::new(VsphereClient::new(&Endpoint::new("vc-a", "admin", "secret"))?),
//!         Arc::new(VsphereClient::new(&Endpoint::new("vc-b", "admin", "secret"))?),
//!         Arc::new(OntapClient::new(&Endpoint::new("ontap-b", "admin", "secret"))?),
//!         Arc::new(AutoConfirmer::new(true)),
//!         ledger,
//!     );
//!     let outcome = sequencer.run_batch("vms.csv").await;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

pub mod backend;
pub mod cancel;
pub mod config;
pub mod confirm;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod matching;
pub mod models;
pub mod poll;
pub mod sequencer;
pub mod stages;
pub mod summary;

pub use backend::{Endpoint, StorageApi, VirtualizationApi};
pub use cancel::{CancellationToken, CancelledError};
pub use config::{AppConfig, NetworkConfig, RunConfig, SequencerConfig, StartConfirmation};
pub use confirm::{AutoConfirmer, Confirmer, ConsoleConfirmer, ScriptedConfirmer, UnitDecision};
pub use error::{MigrationError, Result};
pub use inventory::{load_batch, load_batch_from_reader};
pub use ledger::{LedgerEntry, LogLevel, SessionLedger};
pub use models::{MigrationUnit, UnitStatus};
pub use poll::PollConfig;
pub use sequencer::{RunOutcome, Sequencer};
pub use summary::{RunReport, RunSummary, Verdict};
