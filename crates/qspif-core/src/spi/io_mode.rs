//! SPI I/O modes

use super::BusWidth;
use crate::bus::SpiFeatures;

/// I/O mode for SPI transactions
///
/// Represents how the instruction, address and data phases of a command
/// are spread over the bus, from single-wire to quad-wire modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IoMode {
    /// Standard SPI: 1-1-1 (cmd, addr, data all on single line)
    #[default]
    Single,
    /// Dual Output: 1-1-2 (data phase on 2 lines)
    DualOut,
    /// Dual I/O: 1-2-2 (addr and data on 2 lines)
    DualIo,
    /// DPI mode: 2-2-2 (everything on 2 lines)
    Dpi,
    /// Quad Output: 1-1-4 (data phase on 4 lines)
    QuadOut,
    /// Quad I/O: 1-4-4 (addr and data on 4 lines)
    QuadIo,
    /// QPI mode: 4-4-4 (everything on 4 lines)
    Qpi,
}

impl IoMode {
    /// Returns the number of data lines used for the command phase
    pub const fn cmd_lines(&self) -> u8 {
        match self {
            Self::Single | Self::DualOut | Self::DualIo | Self::QuadOut | Self::QuadIo => 1,
            Self::Dpi => 2,
            Self::Qpi => 4,
        }
    }

    /// Returns the number of data lines used for the address phase
    pub const fn addr_lines(&self) -> u8 {
        match self {
            Self::Single | Self::DualOut | Self::QuadOut => 1,
            Self::DualIo | Self::Dpi => 2,
            Self::QuadIo | Self::Qpi => 4,
        }
    }

    /// Returns the number of data lines used for the data phase
    pub const fn data_lines(&self) -> u8 {
        match self {
            Self::Single => 1,
            Self::DualOut | Self::DualIo | Self::Dpi => 2,
            Self::QuadOut | Self::QuadIo | Self::Qpi => 4,
        }
    }

    /// Bus width of the instruction phase
    pub const fn cmd_width(&self) -> BusWidth {
        BusWidth::from_lines(self.cmd_lines())
    }

    /// Bus width of the address (and alternate byte) phase
    pub const fn addr_width(&self) -> BusWidth {
        BusWidth::from_lines(self.addr_lines())
    }

    /// Bus width of the data phase
    pub const fn data_width(&self) -> BusWidth {
        BusWidth::from_lines(self.data_lines())
    }

    /// Returns true if this mode requires the flash's quad enable bit
    pub const fn requires_quad(&self) -> bool {
        matches!(self, Self::QuadOut | Self::QuadIo | Self::Qpi)
    }

    /// Returns true if the controller can drive this mode
    pub fn is_supported_by(&self, features: SpiFeatures) -> bool {
        match self {
            Self::Single => true,
            Self::DualOut => features.contains(SpiFeatures::DUAL_IN),
            Self::DualIo => features.contains(SpiFeatures::DUAL_IO),
            Self::Dpi => features.contains(SpiFeatures::DPI),
            Self::QuadOut => features.contains(SpiFeatures::QUAD_IN),
            Self::QuadIo => features.contains(SpiFeatures::QUAD_IO),
            Self::Qpi => features.contains(SpiFeatures::QPI),
        }
    }
}

impl core::fmt::Display for IoMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.cmd_lines(),
            self.addr_lines(),
            self.data_lines()
        )
    }
}
