//! SFDP image builder

use qspif_core::sfdp::FourByteEntryMethods;
use qspif_core::spi::IoMode;

/// Basic Flash Parameter Table length (16 DWORDs, JESD216B)
const BFPT_LEN: usize = 64;
/// Offset of the Basic Flash Parameter Table in the image
const BFPT_PTR: usize = 0x80;
/// Offset of the Sector Map Table in the image
const SECTOR_MAP_PTR: usize = BFPT_PTR + BFPT_LEN;

/// Builder for a synthetic SFDP image
///
/// Starts from a minimal 1-1-1 part: legacy 4K erase 0x20, erase type 1
/// 4K 0x20, 256-byte pages, 0x66/0x99 soft reset, 3-byte addressing.
#[derive(Debug, Clone)]
pub struct SfdpImage {
    bfpt: [u8; BFPT_LEN],
    regions: Vec<(u64, u8)>,
}

impl SfdpImage {
    /// Image for a part of `size` bytes
    pub fn new(size: u64) -> Self {
        let mut bfpt = [0u8; BFPT_LEN];
        bfpt[0] = 0xE5;
        bfpt[1] = 0x20;
        bfpt[3] = 0xFF;
        let density_bits = (size * 8 - 1) as u32;
        bfpt[4..8].copy_from_slice(&density_bits.to_le_bytes());
        bfpt[16] = 0xEE;
        bfpt[17..22].fill(0xFF);
        bfpt[24..26].fill(0xFF);
        // erase type 1: 4K, 0x20
        bfpt[28] = 12;
        bfpt[29] = 0x20;
        bfpt[40] = 8 << 4;
        bfpt[61] = 0x10;
        Self {
            bfpt,
            regions: Vec::new(),
        }
    }

    /// Set erase type `slot` (0..4); an exponent of 0 clears the slot
    pub fn erase_type(mut self, slot: usize, size_exp: u8, instruction: u8) -> Self {
        self.bfpt[28 + 2 * slot] = size_exp;
        self.bfpt[29 + 2 * slot] = instruction;
        self
    }

    /// Set the legacy 4K erase instruction (0xFF for none)
    pub fn legacy_erase(mut self, instruction: u8) -> Self {
        self.bfpt[1] = instruction;
        self
    }

    /// Advertise a fast read mode
    pub fn fast_read(mut self, mode: IoMode, instruction: u8, mode_clocks: u8, dummy: u8) -> Self {
        let (support_byte, bit, offset) = match mode {
            IoMode::Single => return self,
            IoMode::DualOut => (2, 0x01, 12),
            IoMode::DualIo => (2, 0x10, 14),
            IoMode::QuadIo => (2, 0x20, 8),
            IoMode::QuadOut => (2, 0x40, 10),
            IoMode::Dpi => (16, 0x01, 22),
            IoMode::Qpi => (16, 0x10, 26),
        };
        self.bfpt[support_byte] |= bit;
        self.bfpt[offset] = (mode_clocks << 5) | (dummy & 0x1F);
        self.bfpt[offset + 1] = instruction;
        self
    }

    /// Quad enable requirement (0..7)
    pub fn quad_enable(mut self, qer: u8) -> Self {
        self.bfpt[58] = (self.bfpt[58] & !0x70) | ((qer & 0x07) << 4);
        self
    }

    /// QPI enable sequence bits (5-bit field)
    pub fn qpi_sequence(mut self, bits: u8) -> Self {
        self.bfpt[56] = (self.bfpt[56] & 0x0F) | ((bits & 0x0F) << 4);
        self.bfpt[57] = (self.bfpt[57] & !0x01) | ((bits >> 4) & 0x01);
        self
    }

    /// Address byte support field (0: 3-byte, 1: 3 or 4, 2: 4-byte)
    pub fn address_mode(mut self, mode: u8) -> Self {
        self.bfpt[2] = (self.bfpt[2] & !0x06) | ((mode & 0x03) << 1);
        self
    }

    /// 4-byte address entry methods
    pub fn four_byte_entry(mut self, methods: FourByteEntryMethods) -> Self {
        self.bfpt[63] = methods.bits();
        self
    }

    /// Soft reset byte (0x08: 0xF0, 0x10: 0x66/0x99)
    pub fn soft_reset(mut self, value: u8) -> Self {
        self.bfpt[61] = value;
        self
    }

    /// Page size as a power of two
    pub fn page_size_exp(mut self, exp: u8) -> Self {
        self.bfpt[40] = (self.bfpt[40] & 0x0F) | (exp << 4);
        self
    }

    /// Add a Sector Map Table with `(size, erase type mask)` regions
    pub fn sector_map(mut self, regions: &[(u64, u8)]) -> Self {
        self.regions = regions.to_vec();
        self
    }

    /// Raw BFPT bytes
    pub fn basic_table(&self) -> &[u8] {
        &self.bfpt
    }

    /// Serialize the image
    pub fn build(&self) -> Vec<u8> {
        let has_map = !self.regions.is_empty();
        let map_len = if has_map { 4 * (self.regions.len() + 1) } else { 0 };
        let mut image = vec![0xFF; SECTOR_MAP_PTR + map_len];

        image[0..8].copy_from_slice(&[b'S', b'F', b'D', b'P', 0x06, 0x01, has_map as u8, 0xFF]);
        image[8..16].copy_from_slice(&[
            0x00,
            0x06,
            0x01,
            (BFPT_LEN / 4) as u8,
            BFPT_PTR as u8,
            0x00,
            0x00,
            0xFF,
        ]);
        if has_map {
            image[16..24].copy_from_slice(&[
                0x81,
                0x00,
                0x01,
                (map_len / 4) as u8,
                SECTOR_MAP_PTR as u8,
                0x00,
                0x00,
                0xFF,
            ]);
        }

        image[BFPT_PTR..BFPT_PTR + BFPT_LEN].copy_from_slice(&self.bfpt);

        if has_map {
            let map = &mut image[SECTOR_MAP_PTR..];
            map[0..4].copy_from_slice(&[0xFF, 0x00, (self.regions.len() - 1) as u8, 0xFF]);
            for (i, &(size, mask)) in self.regions.iter().enumerate() {
                let units = (size / 256 - 1) as u32;
                let record = (units << 8) | (mask as u32 & 0x0F);
                map[4 * (i + 1)..4 * (i + 2)].copy_from_slice(&record.to_le_bytes());
            }
        }
        image
    }
}
