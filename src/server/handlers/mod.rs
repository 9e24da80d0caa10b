pub mod chat;
pub mod corpus;
pub mod digest;
pub mod health;
pub mod jobs;
