//! In-memory SFDP NOR flash

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use qspif_core::bus::{QspiBus, SpiFeatures, SpiMaster};
use qspif_core::error::{Error, Result};
use qspif_core::negotiate::{decode_quad_enable, QuadEnableBit, StatusRegisters};
use qspif_core::sfdp::{self, BasicParamTable, FourByteEntryMethods};
use qspif_core::spi::{opcodes, AddressWidth, BusFormat, BusWidth, SpiCommand};

/// Storage granularity of the memory array
const BLOCK_SIZE: u64 = 4096;
/// SR1 block protection bits
const SR1_BP_MASK: u8 = 0x3C;
/// Device size used when the SFDP image does not parse
const FALLBACK_SIZE: u64 = 16 * 1024 * 1024;

/// Configuration for the dummy flash
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// JEDEC manufacturer ID
    pub manufacturer_id: u8,
    /// JEDEC device ID
    pub device_id: u16,
    /// SFDP image served by RDSFDP
    pub sfdp: Vec<u8>,
    /// Controller features reported to the block device
    pub features: SpiFeatures,
    /// Largest single SPI transfer
    pub max_transfer_len: usize,
    /// Status reads reporting busy after a program or erase
    pub busy_polls: u32,
    /// Initial value of the status registers
    pub status: [u8; 3],
}

impl DummyConfig {
    /// Winbond-like part serving `sfdp`, behind a full-featured controller
    pub fn new(sfdp: Vec<u8>) -> Self {
        Self {
            manufacturer_id: 0xEF,
            device_id: 0x4019,
            sfdp,
            features: SpiFeatures::all(),
            max_transfer_len: usize::MAX,
            busy_polls: 1,
            status: [0; 3],
        }
    }

    /// Set the manufacturer ID
    pub fn with_manufacturer(mut self, id: u8) -> Self {
        self.manufacturer_id = id;
        self
    }

    /// Set the controller features
    pub fn with_features(mut self, features: SpiFeatures) -> Self {
        self.features = features;
        self
    }

    /// Set the initial status registers
    pub fn with_status(mut self, status: [u8; 3]) -> Self {
        self.status = status;
        self
    }

    /// Set the largest single SPI transfer
    pub fn with_max_transfer_len(mut self, len: usize) -> Self {
        self.max_transfer_len = len;
        self
    }
}

/// One bus transaction seen by the emulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// `configure_format`
    Format(BusFormat),
    /// `set_frequency`
    Frequency(u32),
    /// Register or command transfer
    Command {
        /// Instruction
        instruction: u8,
        /// Address phase value
        address: Option<u32>,
        /// Bytes sent after the address
        tx: Vec<u8>,
        /// Bytes read back
        rx_len: usize,
    },
    /// Data or SFDP read
    Read {
        /// Instruction
        instruction: u8,
        /// Alternate bytes
        alt: Option<u32>,
        /// Address phase value
        address: u32,
        /// Bytes read
        len: usize,
    },
    /// Data write
    Write {
        /// Instruction
        instruction: u8,
        /// Address phase value
        address: u32,
        /// Bytes written
        len: usize,
    },
}

impl Transaction {
    /// Instruction of a command, read or write
    pub fn instruction(&self) -> Option<u8> {
        match self {
            Self::Command { instruction, .. }
            | Self::Read { instruction, .. }
            | Self::Write { instruction, .. } => Some(*instruction),
            _ => None,
        }
    }
}

struct State {
    config: DummyConfig,
    size: u64,
    erase_sizes: BTreeMap<u8, u64>,
    quad_enable: Option<QuadEnableBit>,
    blocks: BTreeMap<u64, Box<[u8]>>,
    sr: [u8; 3],
    nvcr: u8,
    bank: u8,
    ext_addr: u8,
    cr2v: u8,
    ecr: u8,
    /// Part has no 3-byte mode
    always_4byte: bool,
    four_byte_mode: bool,
    qpi: bool,
    reset_enabled: bool,
    busy: u32,
    format: BusFormat,
    frequency: u32,
    fail_instruction: Option<u8>,
    wel_stuck: bool,
    log: Vec<Transaction>,
}

/// Emulated SFDP NOR flash
///
/// Implements both [`QspiBus`] and [`SpiMaster`]. Clones share the same
/// chip, so a test can hand one clone to a block device and inspect the
/// memory and the transaction log through another.
#[derive(Clone)]
pub struct DummyFlash {
    inner: Arc<Mutex<State>>,
}

impl DummyFlash {
    /// Create a flash serving `config.sfdp`
    ///
    /// Geometry, erase instructions and the QE bit location are taken
    /// from the image. An image that does not parse yields a 16 MiB part
    /// with the usual 0x20/0x52/0xD8 erase instructions.
    pub fn new(config: DummyConfig) -> Self {
        let mut erase_sizes = BTreeMap::from([
            (opcodes::SE_20, 4 * 1024),
            (opcodes::SE_21, 4 * 1024),
            (opcodes::BE_52, 32 * 1024),
            (opcodes::BE_5C, 32 * 1024),
            (opcodes::BE_D8, 64 * 1024),
            (opcodes::BE_DC, 64 * 1024),
        ]);
        let mut size = FALLBACK_SIZE;
        let mut quad_enable = None;
        let mut always_4byte = false;

        if let Some(bfpt) = basic_table(&config.sfdp) {
            size = bfpt.density_bytes().unwrap_or(FALLBACK_SIZE);
            for (_, ty) in bfpt.erase_types().iter() {
                erase_sizes.insert(ty.instruction, ty.size);
                erase_sizes.insert(opcodes::to_4byte_erase(ty.instruction), ty.size);
            }
            quad_enable =
                decode_quad_enable(bfpt.quad_enable(), StatusRegisters::default()).map(|(qe, _)| qe);
            always_4byte = bfpt
                .four_byte_entry()
                .contains(FourByteEntryMethods::ALWAYS_4BYTE);
        }

        let sr = config.status;
        Self {
            inner: Arc::new(Mutex::new(State {
                config,
                size,
                erase_sizes,
                quad_enable,
                blocks: BTreeMap::new(),
                sr,
                nvcr: 0,
                bank: 0,
                ext_addr: 0,
                cr2v: 0,
                ecr: 0xFF,
                always_4byte,
                four_byte_mode: always_4byte,
                qpi: false,
                reset_enabled: false,
                busy: 0,
                format: BusFormat::default(),
                frequency: 0,
                fail_instruction: None,
                wel_stuck: false,
                log: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emulated device size
    pub fn size(&self) -> u64 {
        self.lock().size
    }

    /// Copy `len` bytes of the memory array starting at `addr`
    pub fn memory(&self, addr: u64, len: usize) -> Vec<u8> {
        let state = self.lock();
        let mut out = vec![0xFF; len];
        state.read_memory(addr, &mut out);
        out
    }

    /// Store `data` at `addr` as if it had been programmed earlier
    pub fn load(&self, addr: u64, data: &[u8]) {
        let mut state = self.lock();
        for (i, byte) in data.iter().enumerate() {
            *state.byte_mut(addr + i as u64) = *byte;
        }
    }

    /// Status registers 1 to 3
    pub fn status_registers(&self) -> [u8; 3] {
        self.lock().sr
    }

    /// Whether the part is in QPI mode
    pub fn qpi_enabled(&self) -> bool {
        self.lock().qpi
    }

    /// Whether the part decodes 4-byte addresses
    pub fn four_byte_mode(&self) -> bool {
        self.lock().four_byte_mode
    }

    /// Extended address register value
    pub fn ext_addr(&self) -> u8 {
        self.lock().ext_addr
    }

    /// Last format set through [`QspiBus::configure_format`]
    pub fn format(&self) -> BusFormat {
        self.lock().format
    }

    /// Last frequency set through [`QspiBus::set_frequency`]
    pub fn frequency(&self) -> u32 {
        self.lock().frequency
    }

    /// Every transaction since creation or the last [`clear_log`](Self::clear_log)
    pub fn transactions(&self) -> Vec<Transaction> {
        self.lock().log.clone()
    }

    /// Forget recorded transactions
    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Fail every transaction using `instruction`
    pub fn fail_instruction(&self, instruction: Option<u8>) {
        self.lock().fail_instruction = instruction;
    }

    /// Ignore WREN, so the write enable latch never sets
    pub fn set_wel_stuck(&self, stuck: bool) {
        self.lock().wel_stuck = stuck;
    }
}

fn basic_table(image: &[u8]) -> Option<BasicParamTable> {
    let info = sfdp::parse_headers(sfdp::slice_reader(image)).ok()?;
    sfdp::parse_basic_param_table(sfdp::slice_reader(image), &info).ok()
}

impl State {
    fn byte_mut(&mut self, addr: u64) -> &mut u8 {
        let block = self
            .blocks
            .entry(addr / BLOCK_SIZE)
            .or_insert_with(|| vec![0xFF; BLOCK_SIZE as usize].into_boxed_slice());
        &mut block[(addr % BLOCK_SIZE) as usize]
    }

    fn read_memory(&self, addr: u64, buf: &mut [u8]) {
        for (i, out) in buf.iter_mut().enumerate() {
            let a = addr + i as u64;
            *out = self
                .blocks
                .get(&(a / BLOCK_SIZE))
                .map_or(0xFF, |b| b[(a % BLOCK_SIZE) as usize]);
        }
    }

    fn wel(&self) -> bool {
        self.sr[0] & opcodes::SR1_WEL != 0
    }

    fn clear_wel(&mut self) {
        self.sr[0] &= !opcodes::SR1_WEL;
    }

    /// Consume the write enable latch for a modifying command
    fn take_wel(&mut self, instruction: u8) -> Result<()> {
        if !self.wel() {
            log::warn!("dummy: 0x{:02X} without write enable", instruction);
            return Err(Error::DeviceError);
        }
        self.clear_wel();
        Ok(())
    }

    /// Absolute memory address for an address phase
    fn resolve(&self, address: u32, width: AddressWidth, dedicated_4b: bool) -> Result<u64> {
        let addr = match width {
            AddressWidth::FourByte if self.four_byte_mode || dedicated_4b => address as u64,
            AddressWidth::FourByte => {
                log::warn!("dummy: 4-byte address while in 3-byte mode");
                return Err(Error::DeviceError);
            }
            _ => ((self.ext_addr as u64) << 24) | (address as u64 & 0x00FF_FFFF),
        };
        if addr >= self.size {
            log::warn!("dummy: address 0x{:X} beyond {} bytes", addr, self.size);
            return Err(Error::AddressOutOfBounds);
        }
        Ok(addr)
    }

    fn check_fault(&self, instruction: u8) -> Result<()> {
        if self.fail_instruction == Some(instruction) {
            return Err(Error::DeviceError);
        }
        Ok(())
    }

    fn quad_enabled(&self) -> bool {
        match self.quad_enable {
            Some(qe) => self.sr[qe.register as usize] & qe.mask() != 0,
            None => true,
        }
    }

    fn read_sfdp(&self, address: u32, buf: &mut [u8]) {
        for (i, out) in buf.iter_mut().enumerate() {
            *out = self
                .config
                .sfdp
                .get(address as usize + i)
                .copied()
                .unwrap_or(0xFF);
        }
    }

    fn read_data(&self, address: u32, width: AddressWidth, dedicated_4b: bool, buf: &mut [u8])
        -> Result<()> {
        let addr = self.resolve(address, width, dedicated_4b)?;
        if addr + buf.len() as u64 > self.size {
            return Err(Error::AddressOutOfBounds);
        }
        self.read_memory(addr, buf);
        Ok(())
    }

    fn program(&mut self, instruction: u8, address: u32, width: AddressWidth, data: &[u8])
        -> Result<()> {
        self.take_wel(instruction)?;
        let addr = self.resolve(address, width, instruction == opcodes::PP_4B)?;
        // wraps inside the page like real parts
        let page = 256u64;
        let base = addr - addr % page;
        for (i, byte) in data.iter().enumerate() {
            let a = base + (addr % page + i as u64) % page;
            *self.byte_mut(a) &= *byte;
        }
        self.busy = self.config.busy_polls;
        Ok(())
    }

    fn erase(&mut self, instruction: u8, size: u64, address: u32, width: AddressWidth)
        -> Result<()> {
        self.take_wel(instruction)?;
        let dedicated = matches!(instruction, opcodes::SE_21 | opcodes::BE_5C | opcodes::BE_DC);
        let addr = self.resolve(address, width, dedicated)?;
        let start = addr - addr % size;
        let mut block = start / BLOCK_SIZE;
        while block * BLOCK_SIZE < start + size {
            self.blocks.remove(&block);
            block += 1;
        }
        self.busy = self.config.busy_polls;
        Ok(())
    }

    fn soft_reset(&mut self) {
        self.qpi = false;
        self.four_byte_mode = self.always_4byte || self.nvcr & 0x01 != 0;
        self.bank = 0;
        self.ext_addr = 0;
        self.busy = 0;
        self.clear_wel();
    }

    /// Register and command transfers
    fn command(
        &mut self,
        instruction: u8,
        address: Option<u32>,
        width: AddressWidth,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<()> {
        self.check_fault(instruction)?;
        if instruction != opcodes::RST && instruction != opcodes::RSTEN {
            self.reset_enabled = false;
        }
        match instruction {
            opcodes::RDID => {
                let id = [
                    self.config.manufacturer_id,
                    (self.config.device_id >> 8) as u8,
                    self.config.device_id as u8,
                ];
                for (out, b) in rx.iter_mut().zip(id) {
                    *out = b;
                }
            }
            opcodes::RDSR => {
                let mut status = self.sr[0];
                if self.busy > 0 {
                    self.busy -= 1;
                    status |= opcodes::SR1_WIP;
                }
                rx.fill(status);
            }
            // 0x35 with no data phase is the QPI entry instruction
            opcodes::RDSR2 if rx.is_empty() => self.qpi = true,
            opcodes::RDSR2 | opcodes::RDSR2_QE7 => rx.fill(self.sr[1]),
            opcodes::RDSR3 => {
                for (i, out) in rx.iter_mut().enumerate() {
                    *out = self.sr.get(1 + i).copied().unwrap_or(0);
                }
            }
            opcodes::WRSR => {
                self.take_wel(instruction)?;
                for (i, b) in tx.iter().take(3).enumerate() {
                    self.sr[i] = *b;
                }
                self.sr[0] &= !(opcodes::SR1_WIP | opcodes::SR1_WEL);
            }
            opcodes::WRSR2 | opcodes::WRSR2_QE7 => {
                self.take_wel(instruction)?;
                if let Some(b) = tx.first() {
                    self.sr[1] = *b;
                }
            }
            opcodes::WREN => {
                if !self.wel_stuck {
                    self.sr[0] |= opcodes::SR1_WEL;
                }
            }
            opcodes::WRDI => self.clear_wel(),
            opcodes::EN4B => self.four_byte_mode = true,
            opcodes::WREAR => {
                self.take_wel(instruction)?;
                self.ext_addr = tx.first().copied().unwrap_or(0);
            }
            opcodes::RDEAR => rx.fill(self.ext_addr),
            opcodes::RDBR => rx.fill(self.bank),
            opcodes::WRBRV => {
                self.bank = tx.first().copied().unwrap_or(0);
                self.four_byte_mode = self.bank & 0x80 != 0;
            }
            opcodes::RDNVCR => rx.fill(self.nvcr),
            opcodes::WRNVCR => {
                self.take_wel(instruction)?;
                self.nvcr = tx.first().copied().unwrap_or(0);
                self.four_byte_mode = self.nvcr & 0x01 != 0;
            }
            opcodes::EQIO => self.qpi = true,
            opcodes::RDAR => {
                let value = if address.is_some() { self.cr2v } else { self.ecr };
                rx.fill(value);
            }
            opcodes::WRAR => {
                self.take_wel(instruction)?;
                self.cr2v = tx.first().copied().unwrap_or(0);
                self.qpi = self.cr2v & 0x40 != 0;
            }
            opcodes::WRECR => {
                self.take_wel(instruction)?;
                self.ecr = tx.first().copied().unwrap_or(0xFF);
                self.qpi = self.ecr & 0x80 == 0;
            }
            opcodes::RSTEN => self.reset_enabled = true,
            opcodes::RST => {
                if self.reset_enabled {
                    self.soft_reset();
                }
                self.reset_enabled = false;
            }
            opcodes::SOFT_RESET_F0 => self.soft_reset(),
            opcodes::ULBPR => {
                self.take_wel(instruction)?;
                self.sr[0] &= !SR1_BP_MASK;
            }
            opcodes::RDSFDP => {
                if let Some(addr) = address {
                    self.read_sfdp(addr, rx);
                }
            }
            opcodes::READ | opcodes::READ_4B => {
                let addr = address.ok_or(Error::DeviceError)?;
                self.read_data(addr, width, instruction == opcodes::READ_4B, rx)?;
            }
            opcodes::PP | opcodes::PP_4B => {
                let addr = address.ok_or(Error::DeviceError)?;
                self.program(instruction, addr, width, tx)?;
            }
            other => match (self.erase_sizes.get(&other).copied(), address) {
                (Some(size), Some(addr)) => self.erase(other, size, addr, width)?,
                _ => {
                    log::warn!("dummy: unsupported instruction 0x{:02X}", other);
                    return Err(Error::DeviceError);
                }
            },
        }
        Ok(())
    }
}

impl QspiBus for DummyFlash {
    fn features(&self) -> SpiFeatures {
        self.lock().config.features
    }

    fn configure_format(&mut self, format: &BusFormat) -> Result<()> {
        let mut state = self.lock();
        state.format = *format;
        state.log.push(Transaction::Format(*format));
        Ok(())
    }

    fn read(&mut self, instruction: u8, alt: Option<u32>, address: u32, buf: &mut [u8])
        -> Result<()> {
        let mut state = self.lock();
        state.log.push(Transaction::Read {
            instruction,
            alt,
            address,
            len: buf.len(),
        });
        state.check_fault(instruction)?;
        if instruction == opcodes::RDSFDP {
            state.read_sfdp(address, buf);
            return Ok(());
        }
        if state.format.data == BusWidth::Quad && !state.qpi && !state.quad_enabled() {
            log::warn!("dummy: quad read with QE clear");
            return Err(Error::DeviceError);
        }
        let width = state.format.address_size;
        state.read_data(address, width, false, buf)
    }

    fn write(&mut self, instruction: u8, _alt: Option<u32>, address: u32, data: &[u8])
        -> Result<()> {
        let mut state = self.lock();
        state.log.push(Transaction::Write {
            instruction,
            address,
            len: data.len(),
        });
        state.check_fault(instruction)?;
        let width = state.format.address_size;
        state.program(instruction, address, width, data)
    }

    fn command_transfer(
        &mut self,
        instruction: u8,
        address: Option<u32>,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<()> {
        let mut state = self.lock();
        state.log.push(Transaction::Command {
            instruction,
            address,
            tx: tx.to_vec(),
            rx_len: rx.len(),
        });
        let width = state.format.address_size;
        state.command(instruction, address, width, tx, rx)
    }

    fn set_frequency(&mut self, hz: u32) -> Result<()> {
        let mut state = self.lock();
        state.frequency = hz;
        state.log.push(Transaction::Frequency(hz));
        Ok(())
    }

    fn delay_us(&mut self, _us: u32) {
        // No delay needed for in-memory operations
    }
}

impl SpiMaster for DummyFlash {
    fn features(&self) -> SpiFeatures {
        self.lock().config.features
    }

    fn max_transfer_len(&self) -> usize {
        self.lock().config.max_transfer_len
    }

    fn execute(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()> {
        let mut state = self.lock();
        state.log.push(Transaction::Command {
            instruction: cmd.opcode,
            address: cmd.address,
            tx: cmd.write_data.to_vec(),
            rx_len: cmd.read_buf.len(),
        });
        state.command(
            cmd.opcode,
            cmd.address,
            cmd.address_width,
            cmd.write_data,
            &mut cmd.read_buf[..],
        )
    }

    fn delay_us(&mut self, _us: u32) {}
}
