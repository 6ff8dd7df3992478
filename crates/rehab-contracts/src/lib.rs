pub mod assets;
pub mod chat;
pub mod events;
pub mod prompts;
pub mod session;
pub mod storage;
