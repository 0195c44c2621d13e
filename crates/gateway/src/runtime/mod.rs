pub mod dispatch;
pub mod hitl;
pub mod notify;
pub mod plan;
pub mod policy;
pub mod registry;
pub mod secrets;
pub mod template;
