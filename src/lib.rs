//! Schema-driven CRUD screens for the terminal.
//!
//! A YAML schema describes a record type; this crate projects it into
//! editable forms, search screens and result tables rendered with
//! ratatui, talking to a backend through a JSON envelope protocol.

pub mod controllers;
pub mod export;
pub mod options;
pub mod registry;
pub mod schema;
pub mod services;
pub mod theme;
pub mod ui;
pub mod widgets;
