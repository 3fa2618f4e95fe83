use shopchat::agent::Agent;

/// Shared application state
///
/// The agent only holds configuration and shared handles, every request gets its
/// own reply stream and conversation.
#[derive(Clone)]
pub struct AppState {
    pub agent: Agent,
}
