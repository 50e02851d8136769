//! A host for running emitted functions in tests: flat byte buffers for
//! memories and a recording intrinsic handler.

use bulkhead_codegen::interp::{Datum, Host};
use bulkhead_codegen::intrinsics::Intrinsic;
use bulkhead_codegen::ir::Type;
use bulkhead_environ::{MemoryIndex, TrapCode};

pub struct TestMemory {
    pub base: u64,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct TestHost {
    pub memories: Vec<TestMemory>,
    pub intrinsic_calls: Vec<(Intrinsic, Vec<u64>)>,
}

impl TestHost {
    pub fn with_memory(base: u64, bytes: Vec<u8>) -> Self {
        Self {
            memories: vec![TestMemory { base, bytes }],
            intrinsic_calls: Vec::new(),
        }
    }

    pub fn memory_bytes(&self, memory: usize) -> &[u8] {
        &self.memories[memory].bytes
    }

    fn locate(&mut self, addr: u64, len: usize) -> Result<(usize, usize), TrapCode> {
        for (index, memory) in self.memories.iter().enumerate() {
            if addr >= memory.base && addr - memory.base + len as u64 <= memory.bytes.len() as u64
            {
                return Ok((index, (addr - memory.base) as usize));
            }
        }
        Err(TrapCode::OutOfBoundsMemoryAccess)
    }
}

impl Host for TestHost {
    fn memory_base(&mut self, memory: MemoryIndex) -> u64 {
        self.memories[memory.as_u32() as usize].base
    }

    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), TrapCode> {
        let (memory, offset) = self.locate(addr, buf.len())?;
        buf.copy_from_slice(&self.memories[memory].bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), TrapCode> {
        let (memory, offset) = self.locate(addr, bytes.len())?;
        self.memories[memory].bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn intrinsic(
        &mut self,
        intrinsic: Intrinsic,
        args: &[Datum],
    ) -> Result<Option<Datum>, TrapCode> {
        self.intrinsic_calls
            .push((intrinsic, args.iter().map(Datum::as_u64).collect()));
        match intrinsic {
            Intrinsic::MisalignedAtomicTrap => Err(TrapCode::MisalignedAtomic),
            Intrinsic::MemoryGrow | Intrinsic::MemorySize => Ok(Some(Datum::new(Type::I32, 1))),
            Intrinsic::MemoryInit | Intrinsic::DataDrop => Ok(None),
            Intrinsic::AtomicNotify
            | Intrinsic::AtomicWaitI32
            | Intrinsic::AtomicWaitI64 => Ok(Some(Datum::new(Type::I32, 0))),
        }
    }
}
