//! Geometry Resolver - screen size to named click anchors
//!
//! The target app is assumed to be maximised on the primary display. All
//! regions are fractions of the screen so the same layout holds at any
//! resolution; nothing here is an absolute pixel constant except the
//! reference resolution used to derive scale factors.

use serde::{Deserialize, Serialize};

/// Resolution the fractional layout was tuned on.
pub const REFERENCE_WIDTH: u32 = 1920;
pub const REFERENCE_HEIGHT: u32 = 1080;

/// Below this the layout fractions are unlikely to match the real UI.
const MIN_CONFIDENT_WIDTH: u32 = 800;
const MIN_CONFIDENT_HEIGHT: u32 = 600;

/// Vertical step (at reference resolution) between message-input retry positions.
const RAISE_STEP_PX: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(self, pt: Point) -> bool {
        let (x, y) = (i64::from(pt.x), i64::from(pt.y));
        x >= i64::from(self.x)
            && y >= i64::from(self.y)
            && x <= i64::from(self.x) + i64::from(self.width)
            && y <= i64::from(self.y) + i64::from(self.height)
    }

    /// True if the rect lies inside `[0, width] x [0, height]`.
    pub fn within(self, width: u32, height: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }
}

/// A rectangular UI area plus the point we click to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub rect: Rect,
    pub anchor: Point,
}

/// How much the caller should trust a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Confidence {
    Nominal,
    /// Small display; fractions probably don't line up with the real layout.
    Low,
    /// Zero-sized display. Every anchor collapses onto the origin.
    Degenerate,
}

/// Named click targets used by strategies. Resolved against a profile at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    SearchBox,
    ChatArea,
    MessageInput,
    /// Message input anchor moved up by `n` steps, for layouts with a taller footer.
    MessageInputRaised(u8),
    ContactListFirst,
    SendButton,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryProfile {
    pub width: u32,
    pub height: u32,
    pub search_box: Region,
    pub chat_area: Region,
    pub message_input: Region,
    pub contact_list: Region,
    pub send_button: Region,
    /// Screen size relative to the reference resolution.
    pub scale_x: f64,
    pub scale_y: f64,
    pub confidence: Confidence,
}

/// Fractional layout of one region: rect then anchor, all in `0.0..=1.0`.
struct RegionSpec {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    anchor_x: f64,
    anchor_y: f64,
}

const SEARCH_BOX: RegionSpec = RegionSpec { x: 0.02, y: 0.085, w: 0.26, h: 0.045, anchor_x: 0.10, anchor_y: 0.107 };
const CONTACT_LIST: RegionSpec = RegionSpec { x: 0.0, y: 0.15, w: 0.30, h: 0.80, anchor_x: 0.15, anchor_y: 0.22 };
const CHAT_AREA: RegionSpec = RegionSpec { x: 0.31, y: 0.10, w: 0.68, h: 0.77, anchor_x: 0.65, anchor_y: 0.47 };
const MESSAGE_INPUT: RegionSpec = RegionSpec { x: 0.33, y: 0.905, w: 0.60, h: 0.05, anchor_x: 0.38, anchor_y: 0.93 };
const SEND_BUTTON: RegionSpec = RegionSpec { x: 0.94, y: 0.905, w: 0.05, h: 0.05, anchor_x: 0.965, anchor_y: 0.93 };

fn frac(value: f64, total: u32) -> u32 {
    ((value * f64::from(total)).floor().max(0.0) as u32).min(total)
}

fn saturate(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn build_region(spec: &RegionSpec, width: u32, height: u32) -> Region {
    let x = frac(spec.x, width);
    let y = frac(spec.y, height);
    let rect = Rect::new(
        x,
        y,
        frac(spec.w, width).min(width - x),
        frac(spec.h, height).min(height - y),
    );

    let anchor_x = frac(spec.anchor_x, width).clamp(rect.x, rect.x + rect.width);
    let anchor_y = frac(spec.anchor_y, height).clamp(rect.y, rect.y + rect.height);

    Region {
        rect,
        anchor: Point::new(saturate(anchor_x), saturate(anchor_y)),
    }
}

/// Build the best-effort profile for a display. Never fails.
pub fn resolve(width: u32, height: u32) -> GeometryProfile {
    let confidence = if width == 0 || height == 0 {
        Confidence::Degenerate
    } else if width < MIN_CONFIDENT_WIDTH || height < MIN_CONFIDENT_HEIGHT {
        Confidence::Low
    } else {
        Confidence::Nominal
    };

    GeometryProfile {
        width,
        height,
        search_box: build_region(&SEARCH_BOX, width, height),
        chat_area: build_region(&CHAT_AREA, width, height),
        message_input: build_region(&MESSAGE_INPUT, width, height),
        contact_list: build_region(&CONTACT_LIST, width, height),
        send_button: build_region(&SEND_BUTTON, width, height),
        scale_x: f64::from(width) / f64::from(REFERENCE_WIDTH),
        scale_y: f64::from(height) / f64::from(REFERENCE_HEIGHT),
        confidence,
    }
}

impl GeometryProfile {
    pub fn regions(&self) -> [(&'static str, &Region); 5] {
        [
            ("searchBox", &self.search_box),
            ("chatArea", &self.chat_area),
            ("messageInput", &self.message_input),
            ("contactList", &self.contact_list),
            ("sendButton", &self.send_button),
        ]
    }

    pub fn is_low_confidence(&self) -> bool {
        self.confidence != Confidence::Nominal
    }

    /// Screen point for an anchor.
    pub fn point(&self, anchor: Anchor) -> Point {
        match anchor {
            Anchor::SearchBox => self.search_box.anchor,
            Anchor::ChatArea => self.chat_area.anchor,
            Anchor::MessageInput => self.message_input.anchor,
            Anchor::MessageInputRaised(steps) => {
                let base = self.message_input.anchor;
                let lift = (RAISE_STEP_PX * self.scale_y * f64::from(steps)).round() as i32;
                Point::new(base.x, base.y.saturating_sub(lift).max(0))
            }
            Anchor::ContactListFirst => self.contact_list.anchor,
            Anchor::SendButton => self.send_button.anchor,
        }
    }
}
