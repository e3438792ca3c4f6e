//! Rand256 binary map decoding
//!
//! Little-endian block format: a file header followed by typed blocks.
//! Positions are in millimeters, the image is one byte per cell with rows
//! stored bottom-up.

use super::{
    Cell, CellRaster, DecodeError, DecodedMap, MapFormat, MapGrid, MapLine, MapPoint, MapRect,
    Pose, RoomCollector,
};
use bytes::Buf;
use std::collections::BTreeSet;
use tracing::debug;

/// Magic bytes identifying a Rand256 map
pub(super) const MAGIC: [u8; 2] = [b'r', b'r'];

/// Map format major version
const SUPPORTED_MAJOR: u16 = 1;

/// File header size in bytes
const FILE_HEADER_SIZE: usize = 20;

/// Block header size in bytes (type, header length, data length)
const BLOCK_HEADER_SIZE: usize = 8;

/// Map units (mm) per image cell
const MM_PER_CELL: f64 = 50.0;

/// Upper bound on either image dimension, in cells
const MAX_IMAGE_DIMENSION: i32 = 8192;

/// Block types
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockType {
    Charger = 1,
    Image = 2,
    Path = 3,
    CleanedZones = 6,
    GoToTarget = 7,
    RobotPosition = 8,
    ForbiddenZones = 9,
    VirtualWalls = 10,
    Digest = 1024,
}

impl TryFrom<u16> for BlockType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            1 => Ok(BlockType::Charger),
            2 => Ok(BlockType::Image),
            3 => Ok(BlockType::Path),
            6 => Ok(BlockType::CleanedZones),
            7 => Ok(BlockType::GoToTarget),
            8 => Ok(BlockType::RobotPosition),
            9 => Ok(BlockType::ForbiddenZones),
            10 => Ok(BlockType::VirtualWalls),
            1024 => Ok(BlockType::Digest),
            other => Err(other),
        }
    }
}

/// File header
#[derive(Debug, Clone)]
struct FileHeader {
    header_length: u16,
    data_length: u32,
    major: u16,
    #[allow(dead_code)]
    minor: u16,
}

impl FileHeader {
    fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        need(data, FILE_HEADER_SIZE, "file header")?;
        let mut buf = data;
        let magic = [buf.get_u8(), buf.get_u8()];
        if magic != MAGIC {
            return Err(DecodeError::UnsupportedFormat);
        }
        let header_length = buf.get_u16_le();
        let data_length = buf.get_u32_le();
        let major = buf.get_u16_le();
        let minor = buf.get_u16_le();
        // map index and sequence are not needed for rendering
        Ok(Self {
            header_length,
            data_length,
            major,
            minor,
        })
    }
}

/// Decoded image block before projection
struct ImageBlock {
    top: i32,
    left: i32,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Decode a Rand256 map
pub(super) fn decode(payload: &[u8]) -> Result<DecodedMap, DecodeError> {
    let header = FileHeader::parse(payload)?;
    if header.major != SUPPORTED_MAJOR {
        return Err(DecodeError::UnsupportedVersion(header.major as u32));
    }

    let start = header.header_length as usize;
    let end = start + header.data_length as usize;
    if start < FILE_HEADER_SIZE || end > payload.len() {
        return Err(DecodeError::Corrupt(format!(
            "declared length {} exceeds payload of {} bytes",
            end,
            payload.len()
        )));
    }

    let mut image = None;
    let mut charger = None;
    let mut robot = None;
    let mut path = Vec::new();
    let mut go_to_target = None;
    let mut active_zones = Vec::new();
    let mut no_go_zones = Vec::new();
    let mut virtual_walls = Vec::new();

    let mut offset = start;
    while offset < end {
        need(&payload[offset..end], BLOCK_HEADER_SIZE, "block header")?;
        let mut buf = &payload[offset..end];
        let block_type = buf.get_u16_le();
        let header_length = buf.get_u16_le() as usize;
        let data_length = buf.get_u32_le() as usize;
        if header_length < BLOCK_HEADER_SIZE {
            return Err(DecodeError::Corrupt(format!(
                "block {} header length {}",
                block_type, header_length
            )));
        }
        let total = header_length + data_length;
        if offset + total > end {
            return Err(DecodeError::Corrupt(format!(
                "block {} truncated at offset {}",
                block_type, offset
            )));
        }
        let block_header = &payload[offset + BLOCK_HEADER_SIZE..offset + header_length];
        let data = &payload[offset + header_length..offset + total];

        match BlockType::try_from(block_type) {
            Ok(BlockType::Charger) => charger = Some(parse_pose(data, "charger")?),
            Ok(BlockType::RobotPosition) => robot = Some(parse_pose(data, "robot")?),
            Ok(BlockType::Image) => image = Some(parse_image(block_header, data)?),
            Ok(BlockType::Path) => path = parse_path(block_header, data)?,
            Ok(BlockType::GoToTarget) => {
                need(data, 4, "go-to target")?;
                let mut buf = data;
                go_to_target = Some(MapPoint::new(buf.get_u16_le() as f64, buf.get_u16_le() as f64));
            }
            Ok(BlockType::CleanedZones) => {
                for [x1, y1, x2, y2] in parse_counted::<4>(data, "cleaned zones")? {
                    active_zones.push(MapRect::new(x1, y1, x2, y2));
                }
            }
            Ok(BlockType::ForbiddenZones) => {
                for corners in parse_counted::<8>(data, "forbidden zones")? {
                    let points: Vec<MapPoint> = corners
                        .chunks_exact(2)
                        .map(|p| MapPoint::new(p[0], p[1]))
                        .collect();
                    no_go_zones.extend(MapRect::bounding(&points));
                }
            }
            Ok(BlockType::VirtualWalls) => {
                for [x1, y1, x2, y2] in parse_counted::<4>(data, "virtual walls")? {
                    virtual_walls.push(MapLine {
                        from: MapPoint::new(x1, y1),
                        to: MapPoint::new(x2, y2),
                    });
                }
            }
            Ok(BlockType::Digest) => break,
            Err(other) => debug!("Skipping Rand256 block type {}", other),
        }

        offset += total;
    }

    let image = image.ok_or_else(|| DecodeError::Corrupt("missing image block".into()))?;
    let (grid, rooms) = build_grid(&image)?;

    let mut map = DecodedMap::empty(MapFormat::Rand256, grid);
    map.rooms = rooms;
    map.charger = charger;
    map.robot = robot;
    map.path = path;
    map.go_to_target = go_to_target;
    map.active_zones = active_zones;
    map.no_go_zones = no_go_zones;
    map.virtual_walls = virtual_walls;
    Ok(map)
}

fn need(data: &[u8], len: usize, what: &str) -> Result<(), DecodeError> {
    if data.len() < len {
        return Err(DecodeError::Corrupt(format!(
            "{} needs {} bytes, got {}",
            what,
            len,
            data.len()
        )));
    }
    Ok(())
}

fn parse_pose(data: &[u8], what: &str) -> Result<Pose, DecodeError> {
    need(data, 8, what)?;
    let mut buf = data;
    let x = buf.get_i32_le() as f64;
    let y = buf.get_i32_le() as f64;
    let angle = if buf.remaining() >= 4 {
        buf.get_i32_le() as f64
    } else {
        0.0
    };
    Ok(Pose { x, y, angle })
}

fn parse_image(block_header: &[u8], data: &[u8]) -> Result<ImageBlock, DecodeError> {
    // Newer firmware prefixes the geometry with a segment count
    let geometry = if block_header.len() >= 20 {
        &block_header[4..]
    } else {
        block_header
    };
    need(geometry, 16, "image header")?;
    let mut buf = geometry;
    let top = buf.get_i32_le();
    let left = buf.get_i32_le();
    let height = buf.get_i32_le();
    let width = buf.get_i32_le();

    if !(1..=MAX_IMAGE_DIMENSION).contains(&width) || !(1..=MAX_IMAGE_DIMENSION).contains(&height) {
        return Err(DecodeError::Corrupt(format!(
            "image dimensions {}x{} out of range",
            width, height
        )));
    }
    let expected = width as usize * height as usize;
    if data.len() != expected {
        return Err(DecodeError::CellCountMismatch {
            expected,
            actual: data.len(),
        });
    }

    Ok(ImageBlock {
        top,
        left,
        width: width as u32,
        height: height as u32,
        pixels: data.to_vec(),
    })
}

fn parse_path(block_header: &[u8], data: &[u8]) -> Result<Vec<MapPoint>, DecodeError> {
    need(block_header, 4, "path header")?;
    let mut header = block_header;
    let count = header.get_u32_le() as usize;
    need(data, count.saturating_mul(4), "path points")?;
    let mut buf = data;
    Ok((0..count)
        .map(|_| MapPoint::new(buf.get_u16_le() as f64, buf.get_u16_le() as f64))
        .collect())
}

/// Parse `u32 count` followed by `count` records of `N` u16 values
fn parse_counted<const N: usize>(data: &[u8], what: &str) -> Result<Vec<[f64; N]>, DecodeError> {
    need(data, 4, what)?;
    let mut buf = data;
    let count = buf.get_u32_le() as usize;
    need(buf, count.saturating_mul(N * 2), what)?;
    Ok((0..count)
        .map(|_| {
            let mut record = [0.0; N];
            for value in record.iter_mut() {
                *value = buf.get_u16_le() as f64;
            }
            record
        })
        .collect())
}

/// Classify image bytes into a grid; rows are flipped to top-down
fn build_grid(image: &ImageBlock) -> Result<(MapGrid, Vec<super::RoomDescriptor>), DecodeError> {
    let segment_of = |value: u8| -> Option<u8> {
        let id = value >> 3;
        (value & 0x07 == 0x07 && id > 0).then_some(id)
    };

    // Slots are handed out in ascending segment id order
    let segment_ids: BTreeSet<u8> = image.pixels.iter().filter_map(|&v| segment_of(v)).collect();
    let mut rooms = RoomCollector::new();
    for id in &segment_ids {
        rooms.slot(&id.to_string(), None);
    }

    let mut cells = vec![Cell::Unknown; image.pixels.len()];
    for (i, &value) in image.pixels.iter().enumerate() {
        let x = i as u32 % image.width;
        let y = image.height - 1 - i as u32 / image.width;
        let cell = match value & 0x07 {
            0 => Cell::Unknown,
            1 => Cell::Wall,
            _ => match segment_of(value).and_then(|id| rooms.slot(&id.to_string(), None)) {
                Some(room) => {
                    rooms.mark(room, x, y);
                    Cell::Room(room)
                }
                None => Cell::Floor,
            },
        };
        cells[(y * image.width + x) as usize] = cell;
    }

    let raster = CellRaster::from_cells(image.width, image.height, cells)?;
    let grid = MapGrid::new(
        raster,
        MM_PER_CELL,
        image.left as f64,
        image.top as f64,
        true,
    );
    Ok((grid, rooms.finish()))
}
