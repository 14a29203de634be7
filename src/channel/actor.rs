//! Actor components for the automation channel.
//!
//! # Components
//!
//! - `Reader`: background task that reads from the server and routes messages
//! - `Writer`: background task that drains the outbound queue into the server

mod reader;
mod writer;

pub(crate) use reader::spawn_reader_task;
pub(crate) use writer::{OUTBOUND_QUEUE_CAPACITY, spawn_writer_task};
