// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Diagnostic byte stream of the device under test (the UART console).
///
/// Bytes go to an optional capture sink and, unless disabled, to stdout.
#[derive(Debug, Clone)]
pub struct Console {
    sink: Option<Arc<Mutex<Vec<u8>>>>,
    echo_stdout: bool,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        Self {
            sink: None,
            echo_stdout: true,
        }
    }

    /// Console writing into a fresh capture buffer.
    pub fn captured(echo_stdout: bool) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let console = Self {
            sink: Some(sink.clone()),
            echo_stdout,
        };
        (console, sink)
    }

    pub fn set_sink(&mut self, sink: Option<Arc<Mutex<Vec<u8>>>>, echo_stdout: bool) {
        self.sink = sink;
        self.echo_stdout = echo_stdout;
    }

    pub fn puts(&mut self, s: &str) {
        if let Some(sink) = &self.sink {
            if let Ok(mut guard) = sink.lock() {
                guard.extend_from_slice(s.as_bytes());
            }
        }

        if self.echo_stdout {
            #[allow(unused_must_use)]
            {
                let mut out = io::stdout().lock();
                out.write_all(s.as_bytes());
                out.flush();
            }
        }
    }

    pub fn print(&mut self, args: fmt::Arguments<'_>) {
        match args.as_str() {
            Some(s) => self.puts(s),
            None => self.puts(&args.to_string()),
        }
    }

    /// Captured output so far, if a sink is attached.
    pub fn contents(&self) -> Option<String> {
        let sink = self.sink.as_ref()?;
        let guard = sink.lock().ok()?;
        Some(String::from_utf8_lossy(&guard).into_owned())
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.puts(s);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Console;
    use std::fmt::Write;

    #[test]
    fn test_console_captures_without_echo() {
        let (mut console, sink) = Console::captured(false);
        console.puts("Test PCIE!\n");
        console.print(format_args!("datasent[{}] \n", 4));
        write!(console, "data[{}]! {} \n", 2, 2).unwrap();

        let data = sink.lock().unwrap().clone();
        assert_eq!(
            String::from_utf8(data).unwrap(),
            "Test PCIE!\ndatasent[4] \ndata[2]! 2 \n"
        );
        assert_eq!(
            console.contents().as_deref(),
            Some("Test PCIE!\ndatasent[4] \ndata[2]! 2 \n")
        );
    }

    #[test]
    fn test_console_without_sink_has_no_contents() {
        let mut console = Console::new();
        console.set_sink(None, false);
        console.puts("dropped");
        assert!(console.contents().is_none());
    }
}
