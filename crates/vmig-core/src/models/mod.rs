//! Data types shared by the stages and backends.

mod resources;
mod unit;

pub use resources::{
    Datastore, HostInfo, NetworkAdapter, NetworkInterface, PowerState, QuestionChoice,
    ReplicationRelationship, VmInfo, VmQuestion, Volume,
};
pub use unit::{MigrationUnit, UnitStatus};
