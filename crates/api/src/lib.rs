//! HTTP-transport collaborators for the aggregation engine: the
//! REST-polled `OracleClient`s (DIA, Pyth, Band), the alert notification
//! webhook, and the audit-batch sink.

mod audit_sink;
mod http_oracle;
mod notify;

pub use audit_sink::HttpAuditSink;
pub use http_oracle::HttpOracleClient;
pub use notify::WebhookNotificationSender;
