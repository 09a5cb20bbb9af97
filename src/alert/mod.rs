//! Alert gating and delivery

pub mod blocklist;
pub mod cooldown;
pub mod sink;
pub mod validator;

pub use blocklist::{Blocklist, BlocklistEntry};
pub use cooldown::{AlertRecord, AlertRecords};
pub use sink::{AlertPayload, ChannelSink, LogSink, MultiSink, NotificationSink, WebhookSink};
pub use validator::{
    AlertCandidate, AlertConfig, AlertDecision, AlertSafetyValidator, Rejection, SecurityFlags,
    ValidationStage,
};
