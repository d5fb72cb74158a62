//! Achievement trigger conditions.

use garnet::modules::cheevos::MemoryRead;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemSize {
    U8,
    /// Little-endian 16-bit.
    U16,
    /// Little-endian 32-bit.
    U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A single memory comparison, checked once per frame. Addresses are in the
/// emulated address space the core exposes.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Trigger {
    pub size: MemSize,
    pub address: u32,
    pub op: Cmp,
    pub value: u32,
}

impl Trigger {
    /// Whether the condition currently holds. An unmapped address reads as
    /// not-satisfied, never as an error.
    pub fn eval(&self, mem: &dyn MemoryRead) -> bool {
        let current = match self.size {
            MemSize::U8 => mem.read_byte(self.address).map(u32::from),
            MemSize::U16 => mem.read_u16_le(self.address).map(u32::from),
            MemSize::U32 => mem.read_u32_le(self.address),
        };
        let Some(current) = current else {
            return false;
        };

        match self.op {
            Cmp::Eq => current == self.value,
            Cmp::Ne => current != self.value,
            Cmp::Lt => current < self.value,
            Cmp::Le => current <= self.value,
            Cmp::Gt => current > self.value,
            Cmp::Ge => current >= self.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatMem(Vec<u8>);

    impl MemoryRead for FlatMem {
        fn read_byte(&self, addr: u32) -> Option<u8> {
            self.0.get(addr as usize).copied()
        }
    }

    #[test]
    fn sizes_read_little_endian() {
        let mem = FlatMem(vec![0x34, 0x12, 0x78, 0x56]);
        let t = |size, address, value| Trigger {
            size,
            address,
            op: Cmp::Eq,
            value,
        };
        assert!(t(MemSize::U8, 0, 0x34).eval(&mem));
        assert!(t(MemSize::U16, 0, 0x1234).eval(&mem));
        assert!(t(MemSize::U32, 0, 0x56781234).eval(&mem));
    }

    #[test]
    fn comparison_operators() {
        let mem = FlatMem(vec![5]);
        let t = |op, value| Trigger {
            size: MemSize::U8,
            address: 0,
            op,
            value,
        };
        assert!(t(Cmp::Eq, 5).eval(&mem));
        assert!(t(Cmp::Ne, 4).eval(&mem));
        assert!(t(Cmp::Lt, 6).eval(&mem));
        assert!(t(Cmp::Le, 5).eval(&mem));
        assert!(t(Cmp::Gt, 4).eval(&mem));
        assert!(t(Cmp::Ge, 5).eval(&mem));
        assert!(!t(Cmp::Eq, 4).eval(&mem));
    }

    #[test]
    fn unmapped_reads_never_satisfy() {
        let mem = FlatMem(vec![0xFF; 2]);
        let partial = Trigger {
            size: MemSize::U32,
            address: 0,
            op: Cmp::Ne,
            value: 0,
        };
        // only two of the four bytes exist
        assert!(!partial.eval(&mem));
    }

    #[test]
    fn deserializes_from_compact_json() {
        let trigger: Trigger =
            serde_json::from_str(r#"{"size":"u16","address":49152,"op":"ge","value":100}"#).unwrap();
        assert_eq!(trigger.size, MemSize::U16);
        assert_eq!(trigger.address, 49152);
        assert_eq!(trigger.op, Cmp::Ge);
        assert_eq!(trigger.value, 100);
    }
}
