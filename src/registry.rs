use std::fmt;

use crate::cursor::Cursor;
use crate::decode::Machine;
use crate::error::{ErrorKind, RegistryError};
use crate::handlers;
use crate::opcodes;

/// Opcode handler: consumes its argument bytes from the cursor and applies
/// its effect to the machine.
pub type Handler = fn(&mut Cursor<'_>, &mut Machine<'_>) -> Result<(), ErrorKind>;

#[derive(Clone, Copy)]
pub struct Entry {
    pub name: &'static str,
    pub handler: Handler,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Opcode byte → handler table for one protocol version.
///
/// Immutable once built; handlers carry no state, so one table can serve
/// any number of decodes.
#[derive(Clone)]
pub struct OpcodeRegistry {
    entries: [Option<Entry>; 256],
}

impl OpcodeRegistry {
    pub fn empty() -> Self {
        Self {
            entries: [None; 256],
        }
    }

    /// The table for streams whose header declares `version`: the
    /// baseline set, plus the protocol 2 set from version 2 and the
    /// protocol 4 set from version 4.
    pub fn for_protocol(version: u8) -> Result<Self, RegistryError> {
        let mut registry = Self::empty();
        registry.register_table(handlers::BASELINE)?;
        if version >= 2 {
            registry.register_table(handlers::PROTOCOL_2)?;
        }
        if version >= 4 {
            registry.register_table(handlers::PROTOCOL_4)?;
        }
        Ok(registry)
    }

    /// Add a handler for `opcode`. Registering an opcode twice is a setup
    /// error.
    pub fn register(
        &mut self,
        opcode: u8,
        name: &'static str,
        handler: Handler,
    ) -> Result<(), RegistryError> {
        let slot = &mut self.entries[opcode as usize];
        if let Some(existing) = slot {
            return Err(RegistryError::duplicate(opcode, existing.name, name));
        }
        *slot = Some(Entry { name, handler });
        Ok(())
    }

    fn register_table(&mut self, table: &[(u8, Handler)]) -> Result<(), RegistryError> {
        for &(opcode, handler) in table {
            self.register(opcode, opcodes::name(opcode), handler)?;
        }
        Ok(())
    }

    #[inline]
    pub fn get(&self, opcode: u8) -> Option<&Entry> {
        self.entries[opcode as usize].as_ref()
    }

    pub fn contains(&self, opcode: u8) -> bool {
        self.get(opcode).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for OpcodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .enumerate()
                    .filter_map(|(op, e)| e.map(|e| (format!("0x{op:02x}"), e.name))),
            )
            .finish()
    }
}
