/// An axis-aligned pixel rectangle in source-frame coordinates.
///
/// Coordinates always refer to the unmirrored source frame; any display
/// mirroring is the presenter's business and never feeds back into cropping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Grows the region by `margin` pixels on every side, then clamps each
    /// edge independently to the frame.
    ///
    /// Edges that would leave the frame are pulled back to the border
    /// (clamp-to-edge), so a box touching the top-left corner only gains the
    /// bottom/right margin. The result always lies inside
    /// `[0, frame_w) × [0, frame_h)` and may be empty when the box lies
    /// entirely outside the frame.
    pub fn expand_clamped(&self, margin: u32, frame_w: u32, frame_h: u32) -> Region {
        let m = margin as i64;
        let fw = frame_w as i64;
        let fh = frame_h as i64;

        let x1 = (self.x as i64 - m).clamp(0, fw);
        let y1 = (self.y as i64 - m).clamp(0, fh);
        let x2 = (self.x as i64 + self.width.max(0) as i64 + m).clamp(0, fw);
        let y2 = (self.y as i64 + self.height.max(0) as i64 + m).clamp(0, fh);

        Region {
            x: x1 as i32,
            y: y1 as i32,
            width: (x2 - x1).max(0) as i32,
            height: (y2 - y1).max(0) as i32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    /// True when the region lies fully inside a `frame_w × frame_h` frame.
    pub fn fits_within(&self, frame_w: u32, frame_h: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.x as i64 + self.width.max(0) as i64 <= frame_w as i64
            && self.y as i64 + self.height.max(0) as i64 <= frame_h as i64
    }
}
