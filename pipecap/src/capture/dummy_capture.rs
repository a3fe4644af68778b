use std::fs::File;

use crate::config::Capacity;
use crate::error::{CaptureError, Result};
use crate::stream::Stream;

pub(crate) enum Writer {}

pub(crate) enum Frame {}

impl Frame {
    pub(crate) fn restore(self) -> Result<()> {
        match self {}
    }
}

pub(crate) fn check_target(_stream: Stream) -> Result<()> {
    Err(CaptureError::Unsupported)
}

pub(crate) fn redirect(_stream: Stream, writer: &Writer) -> Result<Frame> {
    match *writer {}
}

pub(crate) fn pipe(_capacity: Capacity) -> Result<(File, Writer)> {
    Err(CaptureError::Unsupported)
}

pub(crate) fn null_writer() -> Result<Writer> {
    Err(CaptureError::Unsupported)
}

pub(crate) fn file_writer(_file: &File) -> Result<Writer> {
    Err(CaptureError::Unsupported)
}

pub(crate) fn flush_native() {}
