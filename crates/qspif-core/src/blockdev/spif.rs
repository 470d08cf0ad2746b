//! SPI NOR flash block device

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{check_range, BlockDevice};
use crate::bus::SpiMaster;
use crate::config::SpifConfig;
use crate::error::{Error, Result};
use crate::negotiate::quirks::MANUFACTURER_SST;
use crate::protocol::{self, FlashLink, SpiLink};
use crate::region::EraseMap;
use crate::registry::{ChipSelect, ChipSelectRegistry, Reservation};
use crate::sfdp;
use crate::spi::{opcodes, AddressWidth};

/// Instruction set chosen from the device size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InstructionSet {
    address_width: AddressWidth,
    read: u8,
    program: u8,
}

impl InstructionSet {
    const THREE_BYTE: Self = Self {
        address_width: AddressWidth::ThreeByte,
        read: opcodes::READ,
        program: opcodes::PP,
    };

    const FOUR_BYTE: Self = Self {
        address_width: AddressWidth::FourByte,
        read: opcodes::READ_4B,
        program: opcodes::PP_4B,
    };
}

struct State<M> {
    master: M,
    instructions: InstructionSet,
    page_size: u32,
    map: Option<EraseMap>,
    ref_count: u32,
    reservation: Option<Reservation>,
}

impl<M: SpiMaster> State<M> {
    fn map(&self) -> Result<&EraseMap> {
        self.map.as_ref().ok_or(Error::NotInitialized)
    }

    fn link(&mut self, settings: &SpifConfig) -> SpiLink<'_, M> {
        SpiLink::new(
            &mut self.master,
            self.instructions.address_width,
            settings.ready_poll,
        )
    }
}

/// SFDP-configured NOR flash behind a plain SPI master
///
/// Always talks 1-1-1. Parts above 16 MiB use the dedicated 4-byte
/// read, program and erase instructions.
pub struct SpifBlockDevice<M: SpiMaster> {
    cs: ChipSelect,
    settings: SpifConfig,
    registry: &'static ChipSelectRegistry,
    state: Mutex<State<M>>,
}

impl<M: SpiMaster> SpifBlockDevice<M> {
    /// Create a device on `cs`, reserved in the process-wide registry
    pub fn new(master: M, cs: ChipSelect, settings: SpifConfig) -> Self {
        Self::with_registry(master, cs, settings, ChipSelectRegistry::global())
    }

    /// Create a device reserving its chip select in `registry`
    pub fn with_registry(
        master: M,
        cs: ChipSelect,
        settings: SpifConfig,
        registry: &'static ChipSelectRegistry,
    ) -> Self {
        let reservation = registry
            .try_reserve(cs)
            .inspect_err(|e| log::warn!("{} not reserved at construction: {}", cs, e))
            .ok();
        Self {
            cs,
            settings,
            registry,
            state: Mutex::new(State {
                master,
                instructions: InstructionSet::THREE_BYTE,
                page_size: sfdp::DEFAULT_PAGE_SIZE,
                map: None,
                ref_count: 0,
                reservation,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Erase layout, `None` before `init`
    pub fn erase_map(&self) -> Option<EraseMap> {
        self.lock().map.clone()
    }

    fn bring_up(&self, state: &mut State<M>) -> Result<EraseMap> {
        state.instructions = InstructionSet::THREE_BYTE;
        let mut link = state.link(&self.settings);

        link.command(opcodes::RSTEN, None, &[], &mut [])?;
        link.command(opcodes::RST, None, &[], &mut [])?;

        let id = protocol::read_id(&mut link)?;
        log::debug!("JEDEC ID {:02X} {:04X}", id.manufacturer, id.device);
        if id.manufacturer == MANUFACTURER_SST {
            protocol::global_unlock(&mut link)?;
        }
        protocol::wait_ready(&mut link)?;

        let info = sfdp::parse_headers(|addr, buf| link.read_sfdp(addr, buf))?;
        let bfpt = sfdp::parse_basic_param_table(|addr, buf| link.read_sfdp(addr, buf), &info)?;
        let mut map =
            sfdp::parse_sector_map_table(|addr, buf| link.read_sfdp(addr, buf), &info, &bfpt)?;

        let size = map.device_size;
        state.page_size = bfpt.page_size();
        if size > AddressWidth::THREE_BYTE_LIMIT {
            state.instructions = InstructionSet::FOUR_BYTE;
            map.erase_types = map.erase_types.map_instructions(opcodes::to_4byte_erase);
            map.legacy_erase_instruction =
                map.legacy_erase_instruction.map(opcodes::to_4byte_erase);
        }

        log::info!(
            "SPIF {}: {} bytes, page {}, {} address bytes",
            self.cs,
            size,
            state.page_size,
            state.instructions.address_width.bytes()
        );
        Ok(map)
    }
}

impl<M: SpiMaster> BlockDevice for SpifBlockDevice<M> {
    fn init(&self) -> Result<()> {
        let mut state = self.lock();
        if state.ref_count > 0 {
            state.ref_count += 1;
            log::debug!("{} already initialized, ref count {}", self.cs, state.ref_count);
            return Ok(());
        }

        if state.reservation.is_none() {
            state.reservation = Some(self.registry.try_reserve(self.cs)?);
        }
        match self.bring_up(&mut state) {
            Ok(map) => {
                state.map = Some(map);
                state.ref_count = 1;
                Ok(())
            }
            Err(e) => {
                log::error!("Init of {} failed: {}", self.cs, e);
                state.map = None;
                state.ref_count = 0;
                Err(e)
            }
        }
    }

    fn deinit(&self) -> Result<()> {
        let mut state = self.lock();
        if state.map.is_none() {
            state.ref_count = 0;
            return Ok(());
        }
        state.ref_count -= 1;
        if state.ref_count > 0 {
            return Ok(());
        }

        let result = protocol::write_disable(&mut state.link(&self.settings))
            .inspect_err(|e| log::error!("Write disable failed during deinit: {}", e));
        state.map = None;
        state.reservation = None;
        result
    }

    fn read(&self, buf: &mut [u8], addr: u64) -> Result<()> {
        let mut state = self.lock();
        check_range(addr, buf.len(), state.map()?.device_size)?;
        if buf.is_empty() {
            return Ok(());
        }
        let read = state.instructions.read;
        state.link(&self.settings).read(read, addr, buf)
    }

    fn program(&self, data: &[u8], addr: u64) -> Result<()> {
        let page_size = {
            let state = self.lock();
            check_range(addr, data.len(), state.map()?.device_size)?;
            state.page_size as u64
        };

        let mut addr = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let page_left = (page_size - addr % page_size) as usize;
            let (chunk, tail) = rest.split_at(page_left.min(rest.len()));

            let mut state = self.lock();
            state.map()?;
            let instruction = state.instructions.program;
            let mut link = state.link(&self.settings);
            protocol::set_write_enable(&mut link)?;
            link.program(instruction, addr, chunk)?;
            protocol::wait_ready(&mut link)?;

            addr += chunk.len() as u64;
            rest = tail;
        }
        Ok(())
    }

    fn erase(&self, addr: u64, size: u64) -> Result<()> {
        let map = self.lock().map()?.clone();
        map.validate_erase(addr, size)?;

        for step in map.steps(addr, size) {
            let step = step?;
            let mut state = self.lock();
            state.map()?;
            let mut link = state.link(&self.settings);
            protocol::set_write_enable(&mut link)?;
            link.erase(step.instruction, step.address)?;
            protocol::wait_ready(&mut link)?;
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.lock().map.as_ref().map_or(0, |m| m.device_size)
    }

    fn read_size(&self) -> u64 {
        self.settings.min_read_size
    }

    fn program_size(&self) -> u64 {
        self.settings.min_program_size
    }

    fn erase_size(&self) -> u64 {
        self.lock().map.as_ref().map_or(0, |m| m.erase_size())
    }

    fn erase_size_at(&self, addr: u64) -> u64 {
        self.lock().map.as_ref().map_or(0, |m| m.erase_size_at(addr))
    }

    fn block_type(&self) -> &'static str {
        "SPIF"
    }
}
