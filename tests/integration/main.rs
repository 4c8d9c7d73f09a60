mod common;

mod auth;
mod chat;
mod friends;
mod groups;
