//! SFDP parsing implementation
//!
//! Every function here reads SFDP space through a caller-supplied
//! `read_fn(address, buf)`, so parsing is independent of the transport.

use crate::error::{ParseError, Result};
use crate::region::{EraseMap, EraseTypeMask, MAX_REGIONS};

use super::types::*;

/// Largest sector map read: one descriptor DWORD plus one per region
pub const SECTOR_MAP_MAX_SIZE: usize = 4 * (MAX_REGIONS + 1);

/// Adapt an in-memory SFDP image to a `read_fn`
///
/// Reads past the end of the image return 0xFF, like erased SFDP space.
pub fn slice_reader(image: &[u8]) -> impl FnMut(u32, &mut [u8]) -> Result<()> + '_ {
    move |addr, buf| {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = image.get(addr as usize + i).copied().unwrap_or(0xFF);
        }
        Ok(())
    }
}

/// Parse the SFDP header and verify signature
fn parse_header<F>(read: &mut F) -> Result<SfdpHeader>
where
    F: FnMut(u32, &mut [u8]) -> Result<()>,
{
    let mut buf = [0u8; 8];
    read(0x00, &mut buf)?;

    log::trace!("SFDP header bytes: {:02X?}", buf);

    let header = SfdpHeader::parse(&buf);

    if !header.is_valid() {
        log::error!("Verify SFDP signature failed");
        return Err(ParseError::BadSignature {
            found: header.signature,
        }
        .into());
    }

    if header.revision.major != 1 {
        log::error!("Incompatible SFDP major version {}", header.revision.major);
        return Err(ParseError::UnsupportedRevision {
            major: header.revision.major,
        }
        .into());
    }

    log::debug!(
        "SFDP revision {}, {} parameter headers",
        header.revision,
        header.num_param_headers()
    );

    Ok(header)
}

/// Parse the SFDP header and every parameter header
///
/// Records where the Basic Parameter Table and the Sector Map Table live.
/// Unknown tables are logged and otherwise ignored.
pub fn parse_headers<F>(mut read: F) -> Result<HeaderInfo>
where
    F: FnMut(u32, &mut [u8]) -> Result<()>,
{
    let header = parse_header(&mut read)?;

    let mut info = HeaderInfo {
        revision: header.revision,
        num_param_headers: header.num_param_headers(),
        ..Default::default()
    };

    for index in 0..header.num_param_headers() {
        let mut buf = [0u8; 8];
        let addr = 0x08 + (index as u32 * 8);
        read(addr, &mut buf)?;
        let ph = ParameterHeader::parse(&buf);

        if ph.revision.major != 1 {
            log::error!(
                "Parameter header {} has incompatible major version {}",
                index,
                ph.revision.major
            );
            return Err(ParseError::UnsupportedRevision {
                major: ph.revision.major,
            }
            .into());
        }

        if ph.is_basic() {
            log::debug!(
                "Basic parameter table at 0x{:06X}, {} bytes",
                ph.table_pointer,
                ph.length_bytes()
            );
            info.basic = ph.location();
        } else if ph.is_sector_map() {
            log::debug!(
                "Sector map table at 0x{:06X}, {} bytes",
                ph.table_pointer,
                ph.length_bytes()
            );
            info.sector_map = ph.location();
        } else {
            log::trace!(
                "Skipping parameter table 0x{:04X} rev {} at 0x{:06X}",
                ph.id,
                ph.revision,
                ph.table_pointer
            );
        }

        if info.headers.push(ph).is_err() {
            log::trace!("Parameter header {} not kept for diagnostics", index);
        }
    }

    Ok(info)
}

/// Read the Basic Flash Parameter Table
///
/// Reads at most [`BASIC_TABLE_MAX_SIZE`] bytes; longer tables are
/// truncated since no field beyond that is used.
pub fn parse_basic_param_table<F>(mut read: F, info: &HeaderInfo) -> Result<BasicParamTable>
where
    F: FnMut(u32, &mut [u8]) -> Result<()>,
{
    if !info.basic.is_present() {
        log::error!("No basic parameter table");
        return Err(ParseError::MissingBasicTable.into());
    }

    let len = info.basic.size.min(BASIC_TABLE_MAX_SIZE);
    let mut buf = [0u8; BASIC_TABLE_MAX_SIZE];
    read(info.basic.address, &mut buf[..len])?;

    log::trace!("Basic parameter table: {:02X?}", &buf[..len]);

    let revision = info
        .headers
        .iter()
        .find(|ph| ph.is_basic())
        .map_or(SfdpRevision::default(), |ph| ph.revision);

    Ok(BasicParamTable::from_bytes(revision, &buf[..len]))
}

/// Build the erase layout of the device
///
/// Without a Sector Map Table the whole device is one region supporting
/// every erase type. With one, only the single-descriptor encoding is
/// accepted. Each region record holds a 256-byte-multiple size in bits
/// [31:8] and an erase type mask in bits [3:0].
pub fn parse_sector_map_table<F>(
    mut read: F,
    info: &HeaderInfo,
    bfpt: &BasicParamTable,
) -> Result<EraseMap>
where
    F: FnMut(u32, &mut [u8]) -> Result<()>,
{
    let device_size = bfpt.density_bytes()?;
    let erase_types = bfpt.erase_types();
    let legacy = bfpt.legacy_erase_instruction();

    if erase_types.is_empty() {
        log::debug!("No erase types, using legacy 4K erase");
    }

    if !info.sector_map.is_present() {
        log::debug!("No sector map, one region of {} bytes", device_size);
        return Ok(EraseMap::uniform(device_size, erase_types, legacy)?);
    }

    let len = info.sector_map.size.min(SECTOR_MAP_MAX_SIZE);
    let mut buf = [0u8; SECTOR_MAP_MAX_SIZE];
    read(info.sector_map.address, &mut buf[..len])?;

    log::trace!("Sector map table: {:02X?}", &buf[..len]);

    if len < 4 {
        return Err(ParseError::TableTooShort { len }.into());
    }
    if buf[0] & 0x03 != 0x03 || buf[1] != 0x00 {
        log::error!("Sector map: only a single map descriptor is supported");
        return Err(ParseError::UnsupportedSectorMap.into());
    }

    let count = buf[2] as usize + 1;
    if count > MAX_REGIONS {
        log::error!("Sector map: {} regions, at most {} supported", count, MAX_REGIONS);
        return Err(ParseError::TooManyRegions { count }.into());
    }
    if len < 4 * (count + 1) {
        return Err(ParseError::TableTooShort { len }.into());
    }

    let mut records = [(0u64, EraseTypeMask::empty()); MAX_REGIONS];
    for (i, record) in records.iter_mut().take(count).enumerate() {
        let off = (i + 1) * 4;
        let dword = u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        let size = (((dword >> 8) & 0x00FF_FFFF) as u64 + 1) * 256;
        let mask = EraseTypeMask::from_bits_truncate((dword & 0x0F) as u8);
        log::debug!("Region {}: {} bytes, erase types {:?}", i, size, mask);
        *record = (size, mask);
    }

    let map = EraseMap::with_regions(device_size, erase_types, legacy, &records[..count])
        .inspect_err(|e| log::error!("Sector map rejected: {}", e))?;

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::spi::IoMode;

    /// MX25L6436E SFDP image (rev. 1.0, 9 DWORD basic table) - 8 MiB chip
    #[rustfmt::skip]
    const MX25L6436E_SFDP: [u8; 88] = [
        0x53, 0x46, 0x44, 0x50, // @0x00: SFDP signature "SFDP"
        0x00, 0x01, 0x01, 0xFF, // @0x04: revision 1.0, 2 headers (NPH=1)
        0x00, 0x00, 0x01, 0x09, // @0x08: JEDEC SFDP header rev. 1.0, 9 DW long
        0x1C, 0x00, 0x00, 0xFF, // @0x0C: PTP0 = 0x1C
        0xC2, 0x00, 0x01, 0x04, // @0x10: Macronix header rev. 1.0, 4 DW long
        0x48, 0x00, 0x00, 0xFF, // @0x14: PTP1 = 0x48
        0xFF, 0xFF, 0xFF, 0xFF, // @0x18: hole
        0xE5, 0x20, 0xC9, 0xFF, // @0x1C: DWORD 1
        0xFF, 0xFF, 0xFF, 0x03, // @0x20: DWORD 2 - density
        0x00, 0xFF, 0x08, 0x6B, // @0x24: DWORD 3
        0x08, 0x3B, 0x00, 0xFF, // @0x28: DWORD 4
        0xEE, 0xFF, 0xFF, 0xFF, // @0x2C: DWORD 5
        0xFF, 0xFF, 0x00, 0x00, // @0x30: DWORD 6
        0xFF, 0xFF, 0x00, 0xFF, // @0x34: DWORD 7
        0x0C, 0x20, 0x0F, 0x52, // @0x38: DWORD 8 - erase types
        0x10, 0xD8, 0x00, 0xFF, // @0x3C: DWORD 9 - erase types
        0xFF, 0xFF, 0xFF, 0xFF, // @0x40: hole
        0xFF, 0xFF, 0xFF, 0xFF, // @0x44: hole
        0x00, 0x36, 0x00, 0x27, // @0x48: Macronix parameter table start
        0xF4, 0x4F, 0xFF, 0xFF, // @0x4C
        0xD9, 0xC8, 0xFF, 0xFF, // @0x50
        0xFF, 0xFF, 0xFF, 0xFF, // @0x54: Macronix parameter table end
    ];

    /// 2 MiB part with a boot-sector map: 64K of 4K sectors, then 64K blocks
    #[rustfmt::skip]
    const BOOT_SECTOR_SFDP: [u8; 108] = [
        0x53, 0x46, 0x44, 0x50, // @0x00: SFDP signature
        0x06, 0x01, 0x01, 0xFF, // @0x04: revision 1.6, 2 headers
        0x00, 0x06, 0x01, 0x10, // @0x08: basic table rev 1.6, 16 DW
        0x20, 0x00, 0x00, 0xFF, // @0x0C: PTP = 0x20
        0x81, 0x00, 0x01, 0x03, // @0x10: sector map rev 1.0, 3 DW
        0x60, 0x00, 0x00, 0xFF, // @0x14: PTP = 0x60
        0xFF, 0xFF, 0xFF, 0xFF, // @0x18: hole
        0xFF, 0xFF, 0xFF, 0xFF, // @0x1C: hole
        0xE5, 0x20, 0xF1, 0xFF, // @0x20: DWORD 1 - 1-1-2/1-2-2/1-4-4/1-1-4
        0xFF, 0xFF, 0xFF, 0x00, // @0x24: DWORD 2 - 16 Mbit
        0x44, 0xEB, 0x08, 0x6B, // @0x28: DWORD 3
        0x08, 0x3B, 0x80, 0xBB, // @0x2C: DWORD 4
        0xEE, 0xFF, 0xFF, 0xFF, // @0x30: DWORD 5
        0xFF, 0xFF, 0x00, 0xFF, // @0x34: DWORD 6
        0xFF, 0xFF, 0x00, 0xFF, // @0x38: DWORD 7
        0x0C, 0x20, 0x0F, 0x52, // @0x3C: DWORD 8 - 4K 0x20, 32K 0x52
        0x10, 0xD8, 0x00, 0xFF, // @0x40: DWORD 9 - 64K 0xD8
        0x00, 0x00, 0x00, 0x00, // @0x44: DWORD 10
        0x80, 0x00, 0x00, 0x00, // @0x48: DWORD 11 - 256-byte pages
        0x00, 0x00, 0x00, 0x00, // @0x4C: DWORD 12
        0x00, 0x00, 0x00, 0x00, // @0x50: DWORD 13
        0x00, 0x00, 0x00, 0x00, // @0x54: DWORD 14
        0x00, 0x00, 0x10, 0x00, // @0x58: DWORD 15 - QER 1
        0x00, 0x10, 0x00, 0x00, // @0x5C: DWORD 16 - 66/99 reset
        0xFF, 0x00, 0x01, 0x00, // @0x60: map descriptor, 2 regions
        0xFF, 0xFF, 0x00, 0x00, // @0x64: region 0: 64K, all types
        0xF4, 0xFF, 0x1E, 0x00, // @0x68: region 1: 1984K, 64K only
    ];

    fn parse_all(image: &[u8]) -> Result<(HeaderInfo, BasicParamTable, EraseMap)> {
        let mut read = slice_reader(image);
        let info = parse_headers(&mut read)?;
        let bfpt = parse_basic_param_table(&mut read, &info)?;
        let map = parse_sector_map_table(&mut read, &info, &bfpt)?;
        Ok((info, bfpt, map))
    }

    #[test]
    fn test_mx25l6436e_headers() {
        let info = parse_headers(slice_reader(&MX25L6436E_SFDP)).unwrap();
        assert_eq!(info.revision, SfdpRevision::new(1, 0));
        assert_eq!(info.num_param_headers, 2);
        assert_eq!(info.basic, TableLocation { address: 0x1C, size: 36 });
        assert!(!info.sector_map.is_present());
        assert_eq!(info.headers.len(), 2);
        assert_eq!(info.headers[1].id, 0xFFC2);
    }

    #[test]
    fn test_mx25l6436e_basic_table() {
        let (_, bfpt, map) = parse_all(&MX25L6436E_SFDP).unwrap();

        assert_eq!(bfpt.len(), 36);
        assert_eq!(bfpt.density_bytes(), Ok(8 * 1024 * 1024));
        assert_eq!(bfpt.page_size(), 256);
        assert_eq!(bfpt.address_mode(), AddressMode::ThreeByteOnly);
        assert_eq!(
            bfpt.fast_read_support(),
            FastReadSupport::DUAL_OUT | FastReadSupport::QUAD_OUT
        );
        assert_eq!(bfpt.fast_read(IoMode::QuadOut), Some(FastReadParams::new(0x6B, 0, 8)));
        assert_eq!(bfpt.fast_read(IoMode::DualOut), Some(FastReadParams::new(0x3B, 0, 8)));
        assert_eq!(bfpt.fast_read(IoMode::QuadIo), None);

        let sizes: heapless::Vec<(u8, u64), 4> = map
            .erase_types
            .iter()
            .map(|(_, t)| (t.instruction, t.size))
            .collect();
        assert_eq!(sizes, [(0x20, 4096), (0x52, 32768), (0xD8, 65536)]);
        assert_eq!(map.regions.len(), 1);
        assert_eq!(map.regions[0].high_boundary, 8 * 1024 * 1024 - 1);
        assert_eq!(map.erase_size(), 4096);
    }

    #[test]
    fn test_boot_sector_map() {
        let (info, bfpt, map) = parse_all(&BOOT_SECTOR_SFDP).unwrap();

        assert_eq!(info.sector_map, TableLocation { address: 0x60, size: 12 });
        assert_eq!(bfpt.quad_enable(), QuadEnableRequirement::Sr2Bit1);
        assert_eq!(bfpt.soft_reset(), SoftResetSupport::Reset66Then99);
        assert_eq!(bfpt.fast_read(IoMode::QuadIo), Some(FastReadParams::new(0xEB, 2, 4)));
        assert_eq!(bfpt.fast_read(IoMode::DualIo), Some(FastReadParams::new(0xBB, 4, 0)));

        assert_eq!(map.device_size, 2 * 1024 * 1024);
        assert_eq!(map.regions.len(), 2);
        assert_eq!(map.regions[0].size, 64 * 1024);
        assert_eq!(map.regions[0].high_boundary, 0xFFFF);
        // Type 4 bit is masked off, it is not defined in the basic table
        assert_eq!(
            map.regions[0].erase_types,
            EraseTypeMask::TYPE1 | EraseTypeMask::TYPE2 | EraseTypeMask::TYPE3
        );
        assert_eq!(map.regions[1].high_boundary, 0x1F_FFFF);
        assert_eq!(map.regions[1].erase_types, EraseTypeMask::TYPE3);
        assert_eq!(map.min_common_erase_size, 65536);
        assert_eq!(map.erase_size_at(0x1000), 4096);
    }

    #[test]
    fn test_bad_signature() {
        let mut image = MX25L6436E_SFDP;
        image[0] = 0x00;
        let err = parse_headers(slice_reader(&image)).unwrap_err();
        assert!(matches!(
            err,
            Error::ParsingFailed(ParseError::BadSignature { .. })
        ));
    }

    #[test]
    fn test_parameter_header_major_revision() {
        let mut image = MX25L6436E_SFDP;
        image[0x12] = 0x02;
        let err = parse_headers(slice_reader(&image)).unwrap_err();
        assert_eq!(
            err,
            Error::ParsingFailed(ParseError::UnsupportedRevision { major: 2 })
        );
    }

    #[test]
    fn test_missing_basic_table() {
        let mut image = MX25L6436E_SFDP;
        // Turn the basic table header into a vendor header
        image[0x08] = 0x01;
        let mut read = slice_reader(&image);
        let info = parse_headers(&mut read).unwrap();
        assert_eq!(
            parse_basic_param_table(&mut read, &info).unwrap_err(),
            Error::ParsingFailed(ParseError::MissingBasicTable)
        );
    }

    #[test]
    fn test_multi_descriptor_map_rejected() {
        let mut image = BOOT_SECTOR_SFDP;
        // Command descriptor instead of a map descriptor
        image[0x60] = 0xFC;
        assert_eq!(
            parse_all(&image).unwrap_err(),
            Error::ParsingFailed(ParseError::UnsupportedSectorMap)
        );
    }

    #[test]
    fn test_region_sum_must_match_density() {
        let mut image = BOOT_SECTOR_SFDP;
        // Region 1 shrinks to 1M
        image[0x69] = 0xFF;
        image[0x6A] = 0x0F;
        assert!(matches!(
            parse_all(&image).unwrap_err(),
            Error::ParsingFailed(ParseError::RegionSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_too_many_regions() {
        let mut image = BOOT_SECTOR_SFDP;
        image[0x62] = 10;
        assert_eq!(
            parse_all(&image).unwrap_err(),
            Error::ParsingFailed(ParseError::TooManyRegions { count: 11 })
        );
    }
}
