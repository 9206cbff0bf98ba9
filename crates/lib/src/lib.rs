//! Catarina core library — config, webhook normalization, slot search,
//! clinic collaborators (calendar, contacts, knowledge, WhatsApp), and the
//! agent gateway used by the CLI.

pub mod agent;
pub mod agent_ctx;
pub mod calendar;
pub mod channels;
pub mod config;
pub mod contacts;
pub mod gateway;
pub mod init;
pub mod knowledge;
pub mod llm;
pub mod session;
pub mod slots;
pub mod tools;
pub mod webhook;
