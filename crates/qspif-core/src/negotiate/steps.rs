//! Command sequences that move the part into the negotiated state
//!
//! Each step borrows the bus for its duration and updates the
//! [`BusConfig`] once the part has accepted the change, so later commands
//! are issued in the new format.

use super::quirks::ProtectionClear;
use super::{decode_quad_enable, BusConfig, FourByteStrategy, QuadEnableBit, MAX_STATUS_REGISTERS};
use crate::bus::QspiBus;
use crate::config::ReadyPoll;
use crate::error::{Error, Result};
use crate::protocol::{self, FlashLink, QspiLink};
use crate::sfdp::{QpiEnableSequence, QuadEnableRequirement};
use crate::spi::{opcodes, IoMode};

/// Macronix configuration register 2: high performance mode
const MACRONIX_FAST_MODE: u8 = 0x02;

/// Set the quad enable bit and verify it stuck
///
/// A QE bit in SR1 is written alone; otherwise every status register is
/// written back through the configured write path.
pub fn enable_quad<B: QspiBus + ?Sized>(
    bus: &mut B,
    config: &mut BusConfig,
    poll: ReadyPoll,
    qe: QuadEnableBit,
) -> Result<()> {
    let count = config.status_registers.count as usize;
    let reg = qe.register as usize;
    let mut regs = [0u8; MAX_STATUS_REGISTERS];
    {
        let mut link = QspiLink::new(bus, config, poll);
        link.read_status_registers(&mut regs[..count])?;
        regs[reg] |= qe.mask();
        if reg == 0 {
            protocol::write_register(&mut link, opcodes::WRSR, None, &regs[..1])?;
        } else {
            link.write_status_registers(&regs[..count])?;
        }
        protocol::wait_ready(&mut link)?;

        let mut check = [0u8; MAX_STATUS_REGISTERS];
        link.read_status_registers(&mut check[..count])?;
        if check[reg] & qe.mask() == 0 {
            log::error!("Quad enable bit {} of register {} did not stick", qe.bit, qe.register);
            return Err(Error::DeviceError);
        }
    }
    log::debug!("Quad enable set (register {} bit {})", qe.register, qe.bit);
    config.quad_enable = Some(qe);
    Ok(())
}

/// Switch the part to 4-4-4 and commands to the QPI format
pub fn enable_qpi<B: QspiBus + ?Sized>(
    bus: &mut B,
    config: &mut BusConfig,
    poll: ReadyPoll,
    sequence: QpiEnableSequence,
    quad_enable: QuadEnableRequirement,
) -> Result<()> {
    if sequence == QpiEnableSequence::QuadEnableThen38 && config.quad_enable.is_none() {
        if let Some((qe, regs)) = decode_quad_enable(quad_enable, config.status_registers) {
            config.status_registers = regs;
            enable_quad(bus, config, poll, qe)?;
        }
    }

    {
        let mut link = QspiLink::new(bus, config, poll);
        match sequence {
            QpiEnableSequence::None => {
                log::warn!("No QPI enable sequence, staying in 1-1-1");
                return Ok(());
            }
            QpiEnableSequence::QuadEnableThen38 | QpiEnableSequence::Instr38 => {
                link.command(opcodes::EQIO, None, &[], &mut [])?;
            }
            QpiEnableSequence::Instr35 => {
                link.command(opcodes::EQIO_35, None, &[], &mut [])?;
            }
            QpiEnableSequence::ConfigRegBit6 => {
                let mut cr = [0u8; 1];
                link.command(opcodes::RDAR, Some(opcodes::CR2V_ADDR), &[], &mut cr)?;
                cr[0] |= 1 << 6;
                protocol::write_register(&mut link, opcodes::WRAR, Some(opcodes::CR2V_ADDR), &cr)?;
            }
            QpiEnableSequence::VolatileConfigBit7 => {
                let mut cr = [0u8; 1];
                link.command(opcodes::RDAR, None, &[], &mut cr)?;
                cr[0] &= !(1 << 7);
                protocol::write_register(&mut link, opcodes::WRECR, None, &cr)?;
            }
        }
    }

    config.command_mode = IoMode::Qpi;
    bus.configure_format(&config.command_format())?;
    log::debug!("QPI mode entered ({:?})", sequence);
    Ok(())
}

/// Put the part in 4-byte address mode with `strategy`
///
/// In extended address register mode nothing is sent here; the register
/// is rewritten before every addressed command.
pub fn enable_four_byte_addressing<B: QspiBus + ?Sized>(
    bus: &mut B,
    config: &mut BusConfig,
    poll: ReadyPoll,
    strategy: FourByteStrategy,
) -> Result<()> {
    {
        let mut link = QspiLink::new(bus, config, poll);
        match strategy {
            FourByteStrategy::None => return Ok(()),
            FourByteStrategy::AlwaysOn | FourByteStrategy::ExtAddrRegister => {}
            FourByteStrategy::EnterB7 => {
                link.command(opcodes::EN4B, None, &[], &mut [])?;
            }
            FourByteStrategy::WrenEnterB7 => {
                protocol::set_write_enable(&mut link)?;
                link.command(opcodes::EN4B, None, &[], &mut [])?;
            }
            FourByteStrategy::ConfigRegister => {
                let mut cr = [0u8; 1];
                link.command(opcodes::RDNVCR, None, &[], &mut cr)?;
                cr[0] |= 0x01;
                protocol::write_register(&mut link, opcodes::WRNVCR, None, &cr)?;
            }
            FourByteStrategy::BankRegister => {
                let mut br = [0u8; 1];
                link.command(opcodes::RDBR, None, &[], &mut br)?;
                br[0] |= 0x80;
                link.command(opcodes::WRBRV, None, &br, &mut [])?;
            }
        }
    }

    config.four_byte = strategy;
    config.address_width = strategy.address_width();
    bus.configure_format(&config.command_format())?;
    log::debug!("4-byte addressing enabled ({:?})", strategy);
    Ok(())
}

/// Set the Macronix high performance bit (configuration register 2, bit 1)
///
/// Needs the three-register layout from the Macronix quirk; with fewer
/// registers nothing is sent and [`Error::DeviceError`] is returned.
pub fn enable_fast_mode<B: QspiBus + ?Sized>(
    bus: &mut B,
    config: &BusConfig,
    poll: ReadyPoll,
) -> Result<()> {
    if (config.status_registers.count as usize) < MAX_STATUS_REGISTERS {
        log::error!(
            "Fast mode needs {} status registers, part has {}",
            MAX_STATUS_REGISTERS,
            config.status_registers.count
        );
        return Err(Error::DeviceError);
    }
    let mut link = QspiLink::new(bus, config, poll);
    let mut regs = [0u8; MAX_STATUS_REGISTERS];
    link.read_status_registers(&mut regs)?;
    regs[2] |= MACRONIX_FAST_MODE;
    protocol::write_register(&mut link, opcodes::WRSR, None, &regs)?;

    let mut check = [0u8; MAX_STATUS_REGISTERS];
    link.read_status_registers(&mut check)?;
    if check[2] & MACRONIX_FAST_MODE == 0 {
        log::error!("Fast mode bit did not stick (CR2 0x{:02X})", check[2]);
        return Err(Error::DeviceError);
    }
    log::debug!("Fast mode enabled");
    Ok(())
}

/// Clear every block protection bit
///
/// SR1 keeps only WIP, WEL and the QE bit if it lives there.
pub fn clear_block_protection<B: QspiBus + ?Sized>(
    bus: &mut B,
    config: &BusConfig,
    poll: ReadyPoll,
    method: ProtectionClear,
) -> Result<()> {
    let mut link = QspiLink::new(bus, config, poll);
    match method {
        ProtectionClear::Unlock => protocol::global_unlock(&mut link),
        ProtectionClear::StatusRegister => {
            let count = config.status_registers.count as usize;
            let mut regs = [0u8; MAX_STATUS_REGISTERS];
            link.read_status_registers(&mut regs[..count])?;

            let mut keep = opcodes::SR1_WIP | opcodes::SR1_WEL;
            if let Some(qe) = config.quad_enable.filter(|qe| qe.register == 0) {
                keep |= qe.mask();
            }
            regs[0] &= keep;
            link.write_status_registers(&regs[..count])
        }
    }
}
