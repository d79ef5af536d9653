pub mod config;
pub mod ipc;
pub mod keypad;
pub mod record;
pub mod view;
