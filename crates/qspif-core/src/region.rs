//! Erase-region model
//!
//! A flash device is split into up to [`MAX_REGIONS`] contiguous regions,
//! each supporting a subset of the (up to four) erase types advertised by
//! the Basic Flash Parameter Table. [`EraseMap`] answers which erase
//! granularity applies at an address and plans the erase commands that
//! cover a range.

use bitflags::bitflags;

use crate::error::{Error, ParseError, Result};

/// Maximum number of regions in a sector map
pub const MAX_REGIONS: usize = 10;

/// Number of erase type slots in the BFPT
pub const MAX_ERASE_TYPES: usize = 4;

/// Erase size used with the legacy 4K erase instruction
pub const LEGACY_ERASE_SIZE: u64 = 4096;

/// One erase instruction and the block size it clears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseType {
    /// Erase opcode
    pub instruction: u8,
    /// Block size in bytes (a power of two)
    pub size: u64,
}

bitflags! {
    /// Set of erase types, bit `n` standing for type `n + 1`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EraseTypeMask: u8 {
        /// Erase type 1
        const TYPE1 = 1 << 0;
        /// Erase type 2
        const TYPE2 = 1 << 1;
        /// Erase type 3
        const TYPE3 = 1 << 2;
        /// Erase type 4
        const TYPE4 = 1 << 3;
    }
}

impl EraseTypeMask {
    /// Mask with only the type at `index` (0-based)
    pub fn of(index: usize) -> Self {
        Self::from_bits_truncate(1u8 << (index & 0x07))
    }
}

/// The erase type slots of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EraseTypes([Option<EraseType>; MAX_ERASE_TYPES]);

impl EraseTypes {
    /// Wrap the four slots
    pub const fn new(types: [Option<EraseType>; MAX_ERASE_TYPES]) -> Self {
        Self(types)
    }

    /// Type at `index`, if that slot is in use
    pub fn get(&self, index: usize) -> Option<EraseType> {
        self.0.get(index).copied().flatten()
    }

    /// Mask of the slots in use
    pub fn supported(&self) -> EraseTypeMask {
        self.iter()
            .fold(EraseTypeMask::empty(), |mask, (i, _)| mask | EraseTypeMask::of(i))
    }

    /// Check if no slot is in use
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Iterate over `(index, type)` for slots in use
    pub fn iter(&self) -> impl Iterator<Item = (usize, EraseType)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.map(|t| (i, t)))
    }

    /// Smallest type among those in `mask`
    pub fn smallest_in(&self, mask: EraseTypeMask) -> Option<EraseType> {
        self.iter()
            .filter(|(i, _)| mask.contains(EraseTypeMask::of(*i)))
            .map(|(_, t)| t)
            .min_by_key(|t| t.size)
    }

    /// Apply `f` to every instruction (e.g. to switch to 4-byte opcodes)
    pub fn map_instructions(mut self, f: impl Fn(u8) -> u8) -> Self {
        for t in self.0.iter_mut().flatten() {
            t.instruction = f(t.instruction);
        }
        self
    }
}

/// Contiguous address range with its own erase capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Region size in bytes
    pub size: u64,
    /// Last byte address inside the region
    pub high_boundary: u64,
    /// Erase types usable in this region
    pub erase_types: EraseTypeMask,
}

/// One erase command planned by [`EraseMap::steps`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseStep {
    /// Erase opcode
    pub instruction: u8,
    /// Start address of the command
    pub address: u64,
    /// Block size cleared by the command
    pub size: u64,
}

/// Erase layout of a whole device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraseMap {
    /// Device size in bytes
    pub device_size: u64,
    /// Erase types from the BFPT
    pub erase_types: EraseTypes,
    /// Regions in address order
    pub regions: heapless::Vec<Region, MAX_REGIONS>,
    /// Smallest erase size usable in every region (0 if none)
    pub min_common_erase_size: u64,
    /// Legacy 4K erase instruction from BFPT DWORD 1
    pub legacy_erase_instruction: Option<u8>,
}

impl EraseMap {
    /// Map with one region covering the whole device
    pub fn uniform(
        device_size: u64,
        erase_types: EraseTypes,
        legacy_erase_instruction: Option<u8>,
    ) -> core::result::Result<Self, ParseError> {
        Self::with_regions(
            device_size,
            erase_types,
            legacy_erase_instruction,
            &[(device_size, erase_types.supported())],
        )
    }

    /// Map from `(size, erase type mask)` region records
    ///
    /// Region masks are limited to the erase types actually in use. The
    /// regions must add up to exactly `device_size`.
    pub fn with_regions(
        device_size: u64,
        erase_types: EraseTypes,
        legacy_erase_instruction: Option<u8>,
        records: &[(u64, EraseTypeMask)],
    ) -> core::result::Result<Self, ParseError> {
        if erase_types.is_empty() && legacy_erase_instruction.is_none() {
            return Err(ParseError::NoEraseInstruction);
        }
        if records.len() > MAX_REGIONS {
            return Err(ParseError::TooManyRegions {
                count: records.len(),
            });
        }

        let supported = erase_types.supported();
        let mut regions = heapless::Vec::new();
        let mut mapped = 0u64;
        let mut common = supported;
        for &(size, mask) in records {
            mapped += size;
            let region = Region {
                size,
                high_boundary: mapped.wrapping_sub(1),
                erase_types: mask & supported,
            };
            common &= region.erase_types;
            // Length was checked above
            let _ = regions.push(region);
        }
        if mapped != device_size {
            return Err(ParseError::RegionSizeMismatch {
                mapped,
                device: device_size,
            });
        }

        let min_common_erase_size = erase_types.smallest_in(common).map_or(0, |t| t.size);

        Ok(Self {
            device_size,
            erase_types,
            regions,
            min_common_erase_size,
            legacy_erase_instruction,
        })
    }

    /// True when erases go through the legacy 4K instruction
    pub fn is_legacy(&self) -> bool {
        self.erase_types.is_empty()
    }

    /// Region index containing `address`
    ///
    /// `None` past the end of the device or for an empty map.
    pub fn find_region(&self, address: u64) -> Option<usize> {
        if address > self.device_size || self.regions.is_empty() {
            return None;
        }
        if self.regions.len() == 1 {
            return Some(0);
        }
        for r in (0..self.regions.len() - 1).rev() {
            if address > self.regions[r].high_boundary {
                return Some(r + 1);
            }
        }
        Some(0)
    }

    /// Pick the largest erase type usable at `offset`
    ///
    /// A type qualifies when it fits in `remaining` and ends before the
    /// region's high boundary. Types failing either test are cleared from
    /// the returned mask so later calls in the same run skip them. Types
    /// whose block would not start at `offset` are skipped but kept.
    ///
    /// If nothing qualifies, the smallest examined type is returned and an
    /// error is logged; an empty mask yields index 0.
    pub fn next_largest_erase_type(
        &self,
        mask: EraseTypeMask,
        remaining: u64,
        offset: u64,
        region: usize,
    ) -> (usize, EraseTypeMask) {
        let mut mask = mask;
        let high = self.regions.get(region).map_or(0, |r| r.high_boundary);
        let mut smallest = None;

        for i in (0..MAX_ERASE_TYPES).rev() {
            let bit = EraseTypeMask::of(i);
            if !mask.contains(bit) {
                continue;
            }
            let Some(ty) = self.erase_types.get(i) else {
                mask.remove(bit);
                continue;
            };
            smallest = Some(i);

            if ty.size > remaining || high.saturating_sub(offset) <= ty.size {
                mask.remove(bit);
                continue;
            }
            // a block not starting at `offset` would take bytes before it;
            // a smaller type may line up, and a later offset may suit this one
            if offset % ty.size != 0 {
                continue;
            }
            return (i, mask);
        }

        match smallest {
            Some(i) => {
                log::error!(
                    "No erase type fits {} bytes at 0x{:X} in region {}, using type {}",
                    remaining,
                    offset,
                    region,
                    i + 1
                );
                (i, mask)
            }
            None => (0, mask),
        }
    }

    /// Erase granularity at `address`
    ///
    /// The smallest type of the containing region, 4096 in legacy mode.
    /// Falls back to the common minimum outside any region.
    pub fn erase_size_at(&self, address: u64) -> u64 {
        if self.is_legacy() {
            return LEGACY_ERASE_SIZE;
        }
        self.find_region(address)
            .and_then(|r| self.erase_types.smallest_in(self.regions[r].erase_types))
            .map_or(self.min_common_erase_size, |t| t.size)
    }

    /// Device-wide erase granularity (0 if regions share no type)
    pub fn erase_size(&self) -> u64 {
        if self.is_legacy() {
            LEGACY_ERASE_SIZE
        } else {
            self.min_common_erase_size
        }
    }

    /// Check an erase range before touching hardware
    ///
    /// The range must lie inside the device and both of its ends must sit
    /// on the granularity that applies there.
    pub fn validate_erase(&self, address: u64, size: u64) -> Result<()> {
        let end = address.checked_add(size).ok_or(Error::InvalidEraseParams)?;
        if end > self.device_size {
            log::error!("Erase exceeds flash device size");
            return Err(Error::InvalidEraseParams);
        }
        let start_unit = self.erase_size_at(address);
        if start_unit == 0 || address % start_unit != 0 {
            log::error!("Invalid erase - unaligned address 0x{:X}", address);
            return Err(Error::InvalidEraseParams);
        }
        if size == 0 {
            return Ok(());
        }
        let end_unit = self.erase_size_at(end - 1);
        if end_unit == 0 || end % end_unit != 0 {
            log::error!("Invalid erase - unaligned end 0x{:X}", end);
            return Err(Error::InvalidEraseParams);
        }
        Ok(())
    }

    /// Plan the erase commands covering `[address, address + size)`
    pub fn steps(&self, address: u64, size: u64) -> EraseSteps<'_> {
        let region = self.find_region(address);
        EraseSteps {
            map: self,
            address,
            remaining: size,
            region,
            mask: region.map_or(EraseTypeMask::empty(), |r| self.regions[r].erase_types),
        }
    }
}

/// Iterator returned by [`EraseMap::steps`]
pub struct EraseSteps<'a> {
    map: &'a EraseMap,
    address: u64,
    remaining: u64,
    region: Option<usize>,
    mask: EraseTypeMask,
}

impl EraseSteps<'_> {
    fn fail(&mut self, err: Error) -> Option<Result<EraseStep>> {
        self.remaining = 0;
        Some(Err(err))
    }
}

impl Iterator for EraseSteps<'_> {
    type Item = Result<EraseStep>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let ty = if self.map.is_legacy() {
            match self.map.legacy_erase_instruction {
                Some(instruction) => EraseType {
                    instruction,
                    size: LEGACY_ERASE_SIZE,
                },
                None => return self.fail(Error::InvalidEraseParams),
            }
        } else {
            let Some(region) = self.region else {
                return self.fail(Error::InvalidEraseParams);
            };
            let (index, mask) =
                self.map
                    .next_largest_erase_type(self.mask, self.remaining, self.address, region);
            self.mask = mask;
            match self.map.erase_types.get(index) {
                Some(ty) => ty,
                None => return self.fail(Error::InvalidEraseParams),
            }
        };

        let step = EraseStep {
            instruction: ty.instruction,
            address: self.address,
            size: ty.size,
        };
        let chunk = self.remaining.min(ty.size - self.address % ty.size);
        self.address += chunk;
        self.remaining -= chunk;

        if let Some(region) = self.region {
            if self.remaining > 0 && self.address > self.map.regions[region].high_boundary {
                let next = region + 1;
                self.region = Some(next);
                self.mask = self
                    .map
                    .regions
                    .get(next)
                    .map_or(EraseTypeMask::empty(), |r| r.erase_types);
            }
        }

        Some(Ok(step))
    }
}
