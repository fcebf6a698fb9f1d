// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! File-transfer self-test over the console link.
//!
//! The device pushes a file to the console host and asks for it back. Frames
//! on the wire:
//!
//! ```text
//! send:    FTX  name NUL  size:u32le  payload     -> ACK
//! receive: FRX  name NUL                          -> size:u32le  payload
//! ```

use crate::console::Console;
use crate::{HarnessError, HarnessResult};
use std::collections::BTreeMap;

pub const FTX: u8 = 0x07;
pub const FRX: u8 = 0x08;
pub const ACK: u8 = 0x06;

pub const DEFAULT_FILE_NAME: &str = "Sendfile.txt";

pub const SELFTEST_TEXT: &str = "Sending this string as a file to console.\n\
The file is then requested back from console.\n\
The sent file is compared to the received file to confirm correct file transfer via UART using console.\n\
Generating the file in the firmware creates an uniform file transfer between pc-emul, simulation and fpga without adding extra targets for file generation.\n";

/// Whole-file transfer to and from the console host.
pub trait FileTransport {
    fn send_file(&mut self, name: &str, data: &[u8]) -> HarnessResult<()>;
    /// Replaces the contents of `out` with the named file and returns its size.
    fn recv_file(&mut self, name: &str, out: &mut Vec<u8>) -> HarnessResult<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FileCompare {
    Match { len: usize },
    /// First differing byte offset.
    Mismatch { offset: usize },
}

impl FileCompare {
    pub fn is_match(&self) -> bool {
        matches!(self, FileCompare::Match { .. })
    }
}

pub fn encode_send_frame(name: &str, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + name.len() + 1 + 4 + data.len());
    frame.push(FTX);
    frame.extend_from_slice(name.as_bytes());
    frame.push(0);
    frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
    frame.extend_from_slice(data);
    frame
}

pub fn encode_request_frame(name: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + name.len() + 1);
    frame.push(FRX);
    frame.extend_from_slice(name.as_bytes());
    frame.push(0);
    frame
}

fn split_name(body: &[u8]) -> HarnessResult<(String, &[u8])> {
    let nul = body
        .iter()
        .position(|&b| b == 0)
        .ok_or(HarnessError::MalformedFrame("unterminated file name"))?;
    let name = std::str::from_utf8(&body[..nul])
        .map_err(|_| HarnessError::MalformedFrame("file name is not UTF-8"))?;
    if name.is_empty() {
        return Err(HarnessError::MalformedFrame("empty file name"));
    }
    Ok((name.to_string(), &body[nul + 1..]))
}

fn split_sized(body: &[u8]) -> HarnessResult<&[u8]> {
    if body.len() < 4 {
        return Err(HarnessError::MalformedFrame("missing size field"));
    }
    let (size, payload) = body.split_at(4);
    let size = u32::from_le_bytes([size[0], size[1], size[2], size[3]]) as usize;
    if payload.len() != size {
        return Err(HarnessError::MalformedFrame("payload length disagrees with size"));
    }
    Ok(payload)
}

/// In-process console host: stores the files it is sent and serves them
/// back on request. Can be told to flip one byte of every file it serves.
#[derive(Debug, Default)]
pub struct LoopbackConsole {
    files: BTreeMap<String, Vec<u8>>,
    corrupt_at: Option<usize>,
    bytes_in: u64,
    bytes_out: u64,
}

impl LoopbackConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_corruption(mut self, offset: Option<usize>) -> Self {
        self.corrupt_at = offset;
        self
    }

    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    /// Bytes received from and sent to the device.
    pub fn traffic(&self) -> (u64, u64) {
        (self.bytes_in, self.bytes_out)
    }

    /// Host side of the link: consume one device frame, produce the reply.
    pub fn handle_frame(&mut self, frame: &[u8]) -> HarnessResult<Vec<u8>> {
        self.bytes_in += frame.len() as u64;
        let (&kind, body) = frame
            .split_first()
            .ok_or(HarnessError::MalformedFrame("empty frame"))?;

        let reply = match kind {
            FTX => {
                let (name, rest) = split_name(body)?;
                let payload = split_sized(rest)?;
                tracing::debug!("Console host stored '{}' ({} bytes)", name, payload.len());
                self.files.insert(name, payload.to_vec());
                vec![ACK]
            }
            FRX => {
                let (name, rest) = split_name(body)?;
                if !rest.is_empty() {
                    return Err(HarnessError::MalformedFrame("trailing bytes after file name"));
                }
                let mut data = self
                    .files
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| HarnessError::FileNotFound(name.clone()))?;
                if let Some(offset) = self.corrupt_at {
                    match data.get_mut(offset) {
                        Some(byte) => *byte ^= 0xFF,
                        None => tracing::warn!(
                            "Corruption offset {} beyond '{}' ({} bytes); served intact",
                            offset,
                            name,
                            data.len()
                        ),
                    }
                }
                let mut reply = Vec::with_capacity(4 + data.len());
                reply.extend_from_slice(&(data.len() as u32).to_le_bytes());
                reply.extend_from_slice(&data);
                reply
            }
            _ => return Err(HarnessError::MalformedFrame("unknown request byte")),
        };
        self.bytes_out += reply.len() as u64;
        Ok(reply)
    }
}

impl FileTransport for LoopbackConsole {
    fn send_file(&mut self, name: &str, data: &[u8]) -> HarnessResult<()> {
        let reply = self.handle_frame(&encode_send_frame(name, data))?;
        if reply != [ACK] {
            return Err(HarnessError::MalformedFrame("host did not acknowledge file"));
        }
        Ok(())
    }

    fn recv_file(&mut self, name: &str, out: &mut Vec<u8>) -> HarnessResult<usize> {
        let reply = self.handle_frame(&encode_request_frame(name))?;
        let payload = split_sized(&reply)?;
        out.clear();
        out.extend_from_slice(payload);
        Ok(payload.len())
    }
}

/// Compares the first `sent.len()` bytes. A short receive is a mismatch at
/// the first missing byte.
pub fn compare_buffers(sent: &[u8], received: &[u8]) -> FileCompare {
    match sent
        .iter()
        .enumerate()
        .find(|&(i, b)| received.get(i) != Some(b))
    {
        Some((offset, _)) => FileCompare::Mismatch { offset },
        None => FileCompare::Match { len: sent.len() },
    }
}

/// Sends `text` as file `name`, reads it back, and reports whether the two
/// agree. Both buffers live only for the duration of the call.
pub fn file_self_test<T: FileTransport>(
    transport: &mut T,
    console: &mut Console,
    name: &str,
    text: &str,
) -> HarnessResult<FileCompare> {
    let mut sendfile = Vec::with_capacity(text.len());
    sendfile.extend_from_slice(text.as_bytes());
    transport.send_file(name, &sendfile)?;

    let mut recvfile = Vec::new();
    let size = transport.recv_file(name, &mut recvfile)?;
    tracing::info!(
        "Self-test file '{}': sent {} bytes, received {}",
        name,
        sendfile.len(),
        size
    );

    let outcome = compare_buffers(&sendfile, &recvfile);
    match outcome {
        FileCompare::Match { .. } => console.puts("SUCCESS: Send and received file match!\n"),
        FileCompare::Mismatch { offset } => {
            tracing::warn!("Self-test file '{}' differs at byte {}", name, offset);
            console.puts("FAILURE: Send and received file differ!\n");
        }
    }
    Ok(outcome)
}
