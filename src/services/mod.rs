pub mod backend;
pub mod bus;
pub mod clipboard;
pub mod fragment;
