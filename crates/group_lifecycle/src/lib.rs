pub mod config;
pub mod gateway;
pub mod http;
pub mod membership;
pub mod provider;
pub mod recovery;
pub mod reset;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod subconversation;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

pub use config::{load_settings, Settings};
pub use gateway::ConversationGateway;
pub use http::HttpConversationGateway;
pub use membership::MembershipManager;
pub use provider::{MissingMlsGroupProvider, MlsGroupProvider};
pub use recovery::RecoveryScanner;
pub use reset::ResetEngine;
pub use resolver::JoinOrEstablishResolver;
pub use retry::join_with_stale_epoch_retry;
pub use store::ConversationStore;
pub use subconversation::SubconversationLifecycle;
