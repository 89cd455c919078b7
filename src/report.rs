use serde::Serialize;

use crate::opcodes;

/// An opcode with no registered handler, stepped over by one byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedOpcode {
    pub offset: usize,
    pub opcode: u8,
    /// Hex of the bytes following the opcode, for diagnosis.
    pub context: String,
}

/// Non-fatal conditions noticed during a decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A LONG1/LONG4/LONG value wider than 64 bits was truncated
    LongOverflow { offset: usize },
    /// REDUCE is recognized but never calls anything
    ReduceIgnored { offset: usize },
    /// BUILD operands were not both dicts; state was dropped
    BuildIgnored { offset: usize },
    /// PROTO argument disagrees with the header version
    ProtocolMismatch { header: u8, declared: u8 },
    /// Buffer ended before a STOP opcode
    MissingStop,
    /// More than one value left on the stack at the end
    StackResidue { depth: usize },
}

/// Post-decode summary: what was skipped and what was tolerated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeReport {
    pub protocol: u8,
    pub stopped: bool,
    pub skipped: Vec<SkippedOpcode>,
    pub warnings: Vec<Warning>,
}

impl DecodeReport {
    pub(crate) fn new(protocol: u8) -> Self {
        Self {
            protocol,
            ..Self::default()
        }
    }

    /// True when the stream decoded fully: STOP reached, nothing skipped,
    /// nothing tolerated.
    pub fn is_clean(&self) -> bool {
        self.stopped && self.skipped.is_empty() && self.warnings.is_empty()
    }

    pub(crate) fn skip(&mut self, offset: usize, opcode: u8, following: &[u8]) {
        self.skipped.push(SkippedOpcode {
            offset,
            opcode,
            context: hex::encode(following),
        });
    }

    pub(crate) fn warn(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    /// One line per skipped opcode and warning.
    pub fn summary(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .skipped
            .iter()
            .map(|s| {
                format!(
                    "skipped unknown opcode 0x{:02x} at offset {} (next: {})",
                    s.opcode, s.offset, s.context
                )
            })
            .collect();
        lines.extend(self.warnings.iter().map(|w| match w {
            Warning::LongOverflow { offset } => {
                format!("long integer at offset {offset} truncated to 64 bits")
            }
            Warning::ReduceIgnored { offset } => {
                format!("{} at offset {offset} not applied", opcodes::name(opcodes::REDUCE))
            }
            Warning::BuildIgnored { offset } => {
                format!("{} at offset {offset} not applied", opcodes::name(opcodes::BUILD))
            }
            Warning::ProtocolMismatch { header, declared } => {
                format!("PROTO {declared} disagrees with header version {header}")
            }
            Warning::MissingStop => "stream ended without STOP".to_string(),
            Warning::StackResidue { depth } => {
                format!("{depth} values left on stack, returned the topmost")
            }
        }));
        lines
    }
}
