pub mod capacity;
mod flusher;
mod relay;

pub(crate) use flusher::Flusher;
pub(crate) use relay::Relay;

#[cfg(unix)]
mod nesting;
#[cfg(unix)]
mod redirect;
#[cfg(unix)]
pub(crate) use redirect::{
    check_target, file_writer, flush_native, null_writer, pipe, redirect, Frame, Writer,
};

#[cfg(not(unix))]
mod dummy_capture;
#[cfg(not(unix))]
pub(crate) use dummy_capture::{
    check_target, file_writer, flush_native, null_writer, pipe, redirect, Frame, Writer,
};
