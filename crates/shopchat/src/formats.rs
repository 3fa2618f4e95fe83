//! Conversions between the internal [`Message`](crate::models::message::Message) model and
//! the two boundary schemas: the model API (`anthropic`) and the chat client (`ui`).
pub mod anthropic;
pub mod ui;
