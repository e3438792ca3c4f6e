//! Palette resolver
//!
//! Resolves a color and an independent alpha for every paintable class:
//! the eight fixed map-entity classes, the sixteen room slots and the
//! status text. Unset slots fall back to built-in defaults so a resolved
//! [`Palette`] is always total.

use serde::{Deserialize, Serialize};

/// Number of colorable room slots
pub const ROOM_SLOTS: usize = 16;

/// Rooms per UI group (rooms 1-8 and 9-16 share a group alpha override)
pub const ROOMS_PER_GROUP: usize = 8;

/// Fixed map-entity classes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapClass {
    Charger = 0,
    Path = 1,
    Wall = 2,
    Robot = 3,
    GoTo = 4,
    NoGo = 5,
    Zone = 6,
    Background = 7,
}

impl MapClass {
    pub const ALL: [MapClass; 8] = [
        MapClass::Charger,
        MapClass::Path,
        MapClass::Wall,
        MapClass::Robot,
        MapClass::GoTo,
        MapClass::NoGo,
        MapClass::Zone,
        MapClass::Background,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// A room slot id in `0..16`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(u8);

impl RoomId {
    /// Create a room id, `None` when outside the sixteen slots
    pub fn new(id: u8) -> Option<Self> {
        ((id as usize) < ROOM_SLOTS).then_some(Self(id))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// UI group of this room (0 for rooms 1-8, 1 for rooms 9-16)
    pub fn group(self) -> usize {
        self.0 as usize / ROOMS_PER_GROUP
    }
}

/// Anything the renderer can ask a color for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paint {
    Class(MapClass),
    Room(RoomId),
    Text,
}

/// Resolved color with its own alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedColor {
    pub rgb: [u8; 3],
    pub alpha: u8,
}

impl ResolvedColor {
    pub const fn new(rgb: [u8; 3], alpha: u8) -> Self {
        Self { rgb, alpha }
    }

    /// Same color, fully opaque
    pub fn opaque(self) -> Self {
        Self { alpha: 255, ..self }
    }

    pub fn to_rgba(self) -> image::Rgba<u8> {
        image::Rgba([self.rgb[0], self.rgb[1], self.rgb[2], self.alpha])
    }
}

/// One configurable slot: color and alpha are set independently
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSetting {
    pub rgb: Option<[u8; 3]>,
    pub alpha: Option<u8>,
}

impl ColorSetting {
    pub fn new(rgb: [u8; 3], alpha: u8) -> Self {
        Self {
            rgb: Some(rgb),
            alpha: Some(alpha),
        }
    }

    fn resolve(&self, fallback: ResolvedColor) -> ResolvedColor {
        ResolvedColor {
            rgb: self.rgb.unwrap_or(fallback.rgb),
            alpha: self.alpha.unwrap_or(fallback.alpha),
        }
    }
}

/// Per-class slots of the persisted palette
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassSlots {
    pub charger: Option<ColorSetting>,
    #[serde(alias = "move")]
    pub path: Option<ColorSetting>,
    pub wall: Option<ColorSetting>,
    pub robot: Option<ColorSetting>,
    pub go_to: Option<ColorSetting>,
    pub no_go: Option<ColorSetting>,
    #[serde(alias = "zone_clean")]
    pub zone: Option<ColorSetting>,
    pub background: Option<ColorSetting>,
}

impl ClassSlots {
    fn slot(&self, class: MapClass) -> Option<&ColorSetting> {
        match class {
            MapClass::Charger => self.charger.as_ref(),
            MapClass::Path => self.path.as_ref(),
            MapClass::Wall => self.wall.as_ref(),
            MapClass::Robot => self.robot.as_ref(),
            MapClass::GoTo => self.go_to.as_ref(),
            MapClass::NoGo => self.no_go.as_ref(),
            MapClass::Zone => self.zone.as_ref(),
            MapClass::Background => self.background.as_ref(),
        }
    }
}

/// Persisted palette configuration with fixed optional slots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteConfig {
    pub classes: ClassSlots,
    pub rooms: [Option<ColorSetting>; ROOM_SLOTS],
    pub text: Option<ColorSetting>,
    /// Alpha override for the two room groups (rooms 1-8, 9-16)
    pub room_group_alpha: [Option<u8>; 2],
}

/// Built-in class colors, indexed by [`MapClass`]
const DEFAULT_CLASSES: [ResolvedColor; 8] = [
    ResolvedColor::new([255, 128, 0], 255),   // charger
    ResolvedColor::new([238, 247, 255], 255), // path
    ResolvedColor::new([255, 255, 0], 255),   // wall
    ResolvedColor::new([255, 255, 204], 255), // robot
    ResolvedColor::new([0, 255, 0], 255),     // go-to marker
    ResolvedColor::new([255, 0, 0], 125),     // no-go zone
    ResolvedColor::new([255, 255, 255], 125), // cleaning zone
    ResolvedColor::new([0, 125, 255], 255),   // background
];

const DEFAULT_ROOMS: [[u8; 3]; ROOM_SLOTS] = [
    [135, 206, 250],
    [176, 226, 255],
    [165, 105, 18],
    [164, 211, 238],
    [141, 182, 205],
    [96, 123, 139],
    [224, 255, 255],
    [209, 238, 238],
    [180, 205, 205],
    [122, 139, 139],
    [175, 238, 238],
    [84, 153, 199],
    [133, 193, 233],
    [245, 176, 65],
    [82, 190, 128],
    [72, 201, 176],
];

const DEFAULT_TEXT: ResolvedColor = ResolvedColor::new([255, 255, 255], 255);

/// Fully resolved, immutable palette
///
/// Built once per configuration change and shared read-only between renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    classes: [ResolvedColor; 8],
    rooms: [ResolvedColor; ROOM_SLOTS],
    text: ResolvedColor,
}

impl Default for Palette {
    fn default() -> Self {
        Self::from_config(&PaletteConfig::default())
    }
}

impl Palette {
    /// Resolve every slot of a configuration
    pub fn from_config(config: &PaletteConfig) -> Self {
        let mut classes = DEFAULT_CLASSES;
        for class in MapClass::ALL {
            if let Some(setting) = config.classes.slot(class) {
                classes[class.index()] = setting.resolve(DEFAULT_CLASSES[class.index()]);
            }
        }

        let mut rooms = [ResolvedColor::new([0, 0, 0], 255); ROOM_SLOTS];
        for (slot, room) in rooms.iter_mut().enumerate() {
            let group_alpha = config.room_group_alpha[slot / ROOMS_PER_GROUP];
            let fallback = ResolvedColor::new(DEFAULT_ROOMS[slot], group_alpha.unwrap_or(255));
            *room = match &config.rooms[slot] {
                Some(setting) => setting.resolve(fallback),
                None => fallback,
            };
        }

        let text = config
            .text
            .map(|setting| setting.resolve(DEFAULT_TEXT))
            .unwrap_or(DEFAULT_TEXT);

        Self {
            classes,
            rooms,
            text,
        }
    }

    /// Look up the color of a paintable
    pub fn resolve(&self, paint: Paint) -> ResolvedColor {
        match paint {
            Paint::Class(class) => self.classes[class.index()],
            Paint::Room(room) => self.rooms[room.get() as usize],
            Paint::Text => self.text,
        }
    }

    pub fn class(&self, class: MapClass) -> ResolvedColor {
        self.resolve(Paint::Class(class))
    }

    pub fn room(&self, room: RoomId) -> ResolvedColor {
        self.resolve(Paint::Room(room))
    }

    pub fn text(&self) -> ResolvedColor {
        self.text
    }
}
