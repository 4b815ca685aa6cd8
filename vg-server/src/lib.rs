pub mod ai;
pub mod auth;
pub mod cache;
pub mod config;
pub mod database;
pub mod errors;
pub mod gallery;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod tts;
pub mod web;
