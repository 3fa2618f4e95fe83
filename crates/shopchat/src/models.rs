//! These models represent the objects passed around by the orchestrator
//!
//! There are several different related formats we need to interact with:
//! - ui chat messages, sent from the interface to the server
//! - data stream protocol lines, sent from the server to the interface
//! - anthropic messages/tools, sent from the orchestrator to the LLM
//! - tool arguments and results, exchanged with the tool executors
//!
//! These all overlap to varying degrees. We always immediately convert those data models
//! into the internal structs using the helpers in [`crate::formats`]. Because of the need
//! for compatibility, the internal models are not an exact match to any of these formats.
pub mod message;
pub mod role;
pub mod tool;
