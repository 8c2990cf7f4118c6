// UI module - console front end
//
// This module contains:
// - ConsolePrompt: answers pipeline questions from stdin
// - spawn_event_printer: renders state change events on stdout

pub mod console;

pub use console::{ConsolePrompt, spawn_event_printer};
