//! Frame reassembly for chunked transport reads
//!
//! Providers stream either newline-delimited JSON (Ollama) or SSE lines
//! (OpenAI-compatible servers), and a single network read can end anywhere,
//! including inside a JSON string or a multi-byte codepoint. The assembler
//! buffers raw bytes and only releases syntactically complete frames.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Concatenated JSON objects, delimited by balanced braces
    JsonBraces,
    /// One frame per line
    Lines,
}

#[derive(Debug)]
pub struct FrameAssembler {
    framing: Framing,
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
        }
    }

    /// Append a transport chunk and return all complete frames now
    /// available, in arrival order. Incomplete trailing data stays
    /// buffered for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        match self.framing {
            Framing::JsonBraces => self.drain_objects(),
            Framing::Lines => self.drain_lines(),
        }
    }

    fn drain_objects(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        loop {
            let Some(start) = self.buffer.iter().position(|&b| b == b'{') else {
                // No frame can start in the buffered data
                self.buffer.clear();
                break;
            };
            match scan_object(&self.buffer[start..]) {
                Some(len) => {
                    let frame = String::from_utf8_lossy(&self.buffer[start..start + len]);
                    frames.push(frame.into_owned());
                    self.buffer.drain(..start + len);
                }
                None => {
                    // Object still open; keep it, drop anything before it
                    self.buffer.drain(..start);
                    break;
                }
            }
        }
        frames
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..pos]);
            let line = line.trim_end_matches('\r');
            if !line.is_empty() {
                frames.push(line.to_string());
            }
        }
        frames
    }
}

/// Byte length of the complete JSON object starting at `data[0]`, or None
/// if it has not closed yet. Braces inside string literals are ignored by
/// tracking quote and escape state.
fn scan_object(data: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in data.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
