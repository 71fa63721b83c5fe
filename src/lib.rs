//! Telegram bot that gives allow-listed users an interactive SSH shell.
//!
//! Each chat user walks a small conversation (target, auth method,
//! credential) and then sends commands that run on the remote host over a
//! per-user connection. See [`bot`] for the module layout.

pub mod bot;
