//! QSPI NOR flash block device

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{check_range, BlockDevice};
use crate::bus::{QspiBus, SpiFeatures};
use crate::config::QspifConfig;
use crate::error::{Error, Result};
use crate::negotiate::quirks::Quirk;
use crate::negotiate::{self, BusConfig, FourByteStrategy};
use crate::protocol::{self, FlashLink, QspiLink};
use crate::region::EraseMap;
use crate::registry::{ChipSelect, ChipSelectRegistry, Reservation};
use crate::sfdp;
use crate::spi::{opcodes, IoMode};

struct State<B> {
    bus: B,
    config: BusConfig,
    map: Option<EraseMap>,
    quirk: Quirk,
    ref_count: u32,
    reservation: Option<Reservation>,
}

impl<B> State<B> {
    fn map(&self) -> Result<&EraseMap> {
        self.map.as_ref().ok_or(Error::NotInitialized)
    }
}

/// SFDP-configured NOR flash behind a QSPI controller
///
/// `init` reads the SFDP tables through `bus` and negotiates read mode,
/// quad enable, QPI, 4-byte addressing and vendor quirks. Program and
/// erase take the device lock once per page or erase command.
pub struct QspifBlockDevice<B: QspiBus> {
    cs: ChipSelect,
    settings: QspifConfig,
    registry: &'static ChipSelectRegistry,
    state: Mutex<State<B>>,
}

impl<B: QspiBus> QspifBlockDevice<B> {
    /// Create a device on `cs`, reserved in the process-wide registry
    ///
    /// A chip select already held by another device is reported by
    /// `init` as [`Error::DeviceNotUnique`].
    pub fn new(bus: B, cs: ChipSelect, settings: QspifConfig) -> Self {
        Self::with_registry(bus, cs, settings, ChipSelectRegistry::global())
    }

    /// Create a device reserving its chip select in `registry`
    pub fn with_registry(
        bus: B,
        cs: ChipSelect,
        settings: QspifConfig,
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
                bus,
                config: BusConfig::default(),
                map: None,
                quirk: Quirk::None,
                ref_count: 0,
                reservation,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<B>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Chip select of this device
    pub fn chip_select(&self) -> ChipSelect {
        self.cs
    }

    /// Negotiated bus configuration, `None` before `init`
    pub fn bus_config(&self) -> Option<BusConfig> {
        let state = self.lock();
        state.map.as_ref().map(|_| state.config)
    }

    /// Vendor quirk in force, `None` before `init`
    pub fn quirk(&self) -> Option<Quirk> {
        let state = self.lock();
        state.map.as_ref().map(|_| state.quirk)
    }

    /// Erase layout, `None` before `init`
    pub fn erase_map(&self) -> Option<EraseMap> {
        self.lock().map.clone()
    }

    fn bring_up(&self, state: &mut State<B>) -> Result<EraseMap> {
        let poll = self.settings.ready_poll;
        let State {
            bus, config, quirk, ..
        } = state;

        *config = BusConfig::default();
        bus.configure_format(&config.command_format())?;
        bus.set_frequency(self.settings.discovery_frequency_hz)?;
        let features = bus.features();

        let (bfpt, map) = {
            let mut link = QspiLink::new(&mut *bus, config, poll);
            protocol::wait_ready(&mut link)?;
            let id = protocol::read_id(&mut link)?;
            *quirk = Quirk::from_manufacturer(id.manufacturer);
            log::debug!(
                "JEDEC ID {:02X} {:04X}, quirk: {}",
                id.manufacturer,
                id.device,
                quirk
            );

            let info = sfdp::parse_headers(|addr, buf| link.read_sfdp(addr, buf))?;
            let bfpt = sfdp::parse_basic_param_table(|addr, buf| link.read_sfdp(addr, buf), &info)?;
            let map = sfdp::parse_sector_map_table(
                |addr, buf| link.read_sfdp(addr, buf),
                &info,
                &bfpt,
            )?;
            (bfpt, map)
        };

        let size = negotiate::check_addressability(&bfpt, features)?;
        config.page_size = bfpt.page_size();
        let overrides = quirk.overrides();
        if let Some(regs) = overrides.status_registers {
            config.status_registers = regs;
        }

        protocol::soft_reset(&mut QspiLink::new(&mut *bus, config, poll), bfpt.soft_reset())?;

        config.read_mode = negotiate::select_read_mode(&bfpt, features);
        if config.read_mode.io_mode.requires_quad() {
            if let Some((qe, regs)) =
                negotiate::decode_quad_enable(bfpt.quad_enable(), config.status_registers)
            {
                config.status_registers = regs;
                negotiate::enable_quad(&mut *bus, config, poll, qe)?;
            }
        }
        if config.read_mode.io_mode == IoMode::Qpi {
            negotiate::enable_qpi(&mut *bus, config, poll, bfpt.qpi_enable(), bfpt.quad_enable())?;
        }

        let strategy = if bfpt.address_mode().supports_4byte()
            && features.contains(SpiFeatures::FOUR_BYTE_ADDR)
            && self.settings.four_byte_addressing
            && overrides.four_byte_addressing
        {
            FourByteStrategy::select(bfpt.four_byte_entry())
        } else {
            FourByteStrategy::None
        };
        negotiate::enable_four_byte_addressing(&mut *bus, config, poll, strategy)?;

        negotiate::clear_block_protection(&mut *bus, config, poll, overrides.protection)?;
        if overrides.needs_fast_mode {
            negotiate::enable_fast_mode(&mut *bus, config, poll)?;
        }
        bus.set_frequency(self.settings.frequency_hz)?;

        log::info!(
            "QSPIF {}: {} bytes, page {}, read {} (0x{:02X}), {} address bytes",
            self.cs,
            size,
            config.page_size,
            config.read_mode.io_mode,
            config.read_mode.instruction,
            config.address_width.bytes()
        );
        Ok(map)
    }
}

impl<B: QspiBus> BlockDevice for QspifBlockDevice<B> {
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

        let result = {
            let State { bus, config, .. } = &mut *state;
            let mut link = QspiLink::new(bus, config, self.settings.ready_poll);
            protocol::write_disable(&mut link)
                .inspect_err(|e| log::error!("Write disable failed during deinit: {}", e))
        };
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
        let State { bus, config, .. } = &mut *state;
        QspiLink::new(bus, config, self.settings.ready_poll).read(addr, buf)
    }

    fn program(&self, data: &[u8], addr: u64) -> Result<()> {
        let page_size = {
            let state = self.lock();
            check_range(addr, data.len(), state.map()?.device_size)?;
            state.config.page_size as u64
        };

        let mut addr = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let page_left = (page_size - addr % page_size) as usize;
            let (chunk, tail) = rest.split_at(page_left.min(rest.len()));

            let mut state = self.lock();
            state.map()?;
            let State { bus, config, .. } = &mut *state;
            let mut link = QspiLink::new(bus, config, self.settings.ready_poll);
            link.program(opcodes::PP, addr, chunk)?;
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
            log::trace!(
                "Erase 0x{:02X} at 0x{:X} ({} bytes)",
                step.instruction,
                step.address,
                step.size
            );
            let mut state = self.lock();
            state.map()?;
            let State { bus, config, .. } = &mut *state;
            let mut link = QspiLink::new(bus, config, self.settings.ready_poll);
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
        "QSPIF"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi::BusFormat;

    /// Controller whose every transaction fails
    struct DeadBus;

    impl QspiBus for DeadBus {
        fn features(&self) -> SpiFeatures {
            SpiFeatures::empty()
        }

        fn configure_format(&mut self, _: &BusFormat) -> Result<()> {
            Ok(())
        }

        fn read(&mut self, _: u8, _: Option<u32>, _: u32, _: &mut [u8]) -> Result<()> {
            Err(Error::DeviceError)
        }

        fn write(&mut self, _: u8, _: Option<u32>, _: u32, _: &[u8]) -> Result<()> {
            Err(Error::DeviceError)
        }

        fn command_transfer(&mut self, _: u8, _: Option<u32>, _: &[u8], _: &mut [u8]) -> Result<()> {
            Err(Error::DeviceError)
        }

        fn set_frequency(&mut self, _: u32) -> Result<()> {
            Ok(())
        }

        fn delay_us(&mut self, _: u32) {}
    }

    fn dead_device(registry: &'static ChipSelectRegistry) -> QspifBlockDevice<DeadBus> {
        let settings = QspifConfig::default().with_ready_poll(crate::ReadyPoll {
            interval_us: 0,
            max_retries: 2,
        });
        QspifBlockDevice::with_registry(DeadBus, ChipSelect(1), settings, registry)
    }

    #[test]
    fn test_uninitialized_device() {
        static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
        let dev = dead_device(&REGISTRY);

        assert_eq!(dev.size(), 0);
        assert_eq!(dev.erase_size(), 0);
        assert_eq!(dev.erase_value(), 0xFF);
        assert_eq!(dev.block_type(), "QSPIF");
        assert_eq!(dev.read(&mut [0u8; 4], 0), Err(Error::NotInitialized));
        assert_eq!(dev.program(&[0u8; 4], 0), Err(Error::NotInitialized));
        assert_eq!(dev.erase(0, 4096), Err(Error::NotInitialized));
        assert_eq!(dev.deinit(), Ok(()));
        assert!(dev.bus_config().is_none());
    }

    #[test]
    fn test_failed_init_keeps_chip_select_until_drop() {
        static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
        let dev = dead_device(&REGISTRY);

        assert_eq!(dev.init(), Err(Error::ReadyFailed));
        assert!(REGISTRY.is_reserved(ChipSelect(1)));
        assert_eq!(dev.init(), Err(Error::ReadyFailed));

        drop(dev);
        assert!(REGISTRY.is_empty());
    }

    #[test]
    fn test_construction_reserves_chip_select() {
        static REGISTRY: ChipSelectRegistry = ChipSelectRegistry::new();
        let first = dead_device(&REGISTRY);
        assert!(REGISTRY.is_reserved(ChipSelect(1)));

        let second = dead_device(&REGISTRY);
        assert_eq!(second.init(), Err(Error::DeviceNotUnique));

        drop(first);
        // the slot is free again, so the retry reaches the bus
        assert_eq!(second.init(), Err(Error::ReadyFailed));
    }
}
