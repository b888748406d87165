//! Composable masks restricting where an image may be found
//!
//! A [`Mask`] is an immutable expression tree built from image masks and
//! [`Region`]s with `+` (union), `-` (difference) and `!` (inversion, shown as
//! `~`). It is only turned into pixels when a caller asks for a coverage buffer
//! of a particular shape, and the last buffer is memoised.

mod parse;


use image::{GrayImage, RgbImage};
use std::fmt;
use std::ops::{Add, Not, Sub};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::images::{ImageLookup, MaskImage};
use crate::region::Region;

/// Dimensions of a coverage buffer: `(height, width, channels)` with
/// `channels` 1 or 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    pub height: u32,
    pub width: u32,
    pub channels: u8,
}

impl Shape {
    pub fn new(height: u32, width: u32, channels: u8) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Single-channel shape of an image.
    pub fn gray(width: u32, height: u32) -> Self {
        Self::new(height, width, 1)
    }

    fn len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }
}

/// Rasterised mask: 255 where included, 0 where excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coverage {
    shape: Shape,
    data: Vec<u8>,
}

impl Coverage {
    pub fn filled(shape: Shape, value: u8) -> Self {
        Self {
            shape,
            data: vec![value; shape.len()],
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Value of the first channel at `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> u8 {
        let idx = (y as usize * self.shape.width as usize + x as usize) * self.shape.channels as usize;
        self.data[idx]
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// First channel as a greyscale image.
    pub fn to_gray_image(&self) -> GrayImage {
        let channels = self.shape.channels as usize;
        let pixels = self.data.iter().step_by(channels).copied().collect();
        GrayImage::from_raw(self.shape.width, self.shape.height, pixels)
            .unwrap_or_else(|| GrayImage::new(self.shape.width, self.shape.height))
    }

    /// Smallest region containing every covered pixel.
    pub fn bounding_box(&self) -> Option<Region> {
        let (w, h) = (self.shape.width, self.shape.height);
        let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0u32, 0u32);
        let mut any = false;
        for y in 0..h {
            for x in 0..w {
                if self.get(x, y) != 0 {
                    any = true;
                    x0 = x0.min(x);
                    y0 = y0.min(y);
                    x1 = x1.max(x);
                    y1 = y1.max(y);
                }
            }
        }
        if !any {
            return None;
        }
        Region::from_extents(x0 as i32, y0 as i32, x1 as i32 + 1, y1 as i32 + 1)
    }

    fn zip_with(mut self, other: &Coverage, f: impl Fn(u8, u8) -> u8) -> Self {
        for (a, &b) in self.data.iter_mut().zip(other.data.iter()) {
            *a = f(*a, b);
        }
        self
    }

    fn inverted(mut self) -> Self {
        for v in self.data.iter_mut() {
            *v = !*v;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Union,
    Difference,
}

impl BinOp {
    fn symbol(self) -> char {
        match self {
            BinOp::Union => '+',
            BinOp::Difference => '-',
        }
    }
}

#[derive(Debug)]
enum MaskKind {
    Image {
        image: MaskImage,
        name: Option<String>,
    },
    Region(Option<Region>),
    BinOp {
        op: BinOp,
        left: Mask,
        right: Mask,
    },
}

#[derive(Debug)]
struct Node {
    kind: MaskKind,
    memo: Mutex<Option<(Shape, bool, Arc<Coverage>)>>,
}

/// A lazily rasterised mask.
#[derive(Debug, Clone)]
pub struct Mask {
    node: Arc<Node>,
    invert: bool,
}

impl Mask {
    fn from_kind(kind: MaskKind) -> Self {
        Self {
            node: Arc::new(Node {
                kind,
                memo: Mutex::new(None),
            }),
            invert: false,
        }
    }

    /// Everything is included.
    pub fn all() -> Self {
        Mask::from(Region::ALL)
    }

    pub fn from_image(image: MaskImage) -> Self {
        Self::from_kind(MaskKind::Image { image, name: None })
    }

    pub fn from_gray(image: GrayImage) -> Self {
        Self::from_image(MaskImage::Gray(image))
    }

    pub fn from_rgb(image: RgbImage) -> Self {
        Self::from_image(MaskImage::Rgb(image))
    }

    /// Load an image mask through the lookup collaborator.
    pub fn load(name: impl AsRef<Path>, lookup: &ImageLookup) -> Result<Self> {
        let name = name.as_ref();
        let image = lookup.load_mask_image(name)?;
        Ok(Self::from_kind(MaskKind::Image {
            image,
            name: Some(name.to_string_lossy().into_owned()),
        }))
    }

    /// Parse the textual form produced by `Display`.
    pub fn parse(expr: &str, lookup: &ImageLookup) -> Result<Self> {
        parse::parse(expr, lookup)
    }

    pub fn is_inverted(&self) -> bool {
        self.invert
    }

    fn binop(op: BinOp, left: Mask, right: Mask) -> Self {
        Self::from_kind(MaskKind::BinOp { op, left, right })
    }

    /// Rasterise to `shape`. The result is memoised per shape.
    pub fn to_coverage(&self, shape: Shape) -> Result<Arc<Coverage>> {
        {
            let memo = self.lock_memo();
            if let Some((s, inv, cov)) = memo.as_ref()
                && *s == shape
                && *inv == self.invert
            {
                return Ok(Arc::clone(cov));
            }
        }

        let mut coverage = self.rasterise(shape)?;
        if self.invert {
            coverage = coverage.inverted();
        }
        let coverage = Arc::new(coverage);
        *self.lock_memo() = Some((shape, self.invert, Arc::clone(&coverage)));
        Ok(coverage)
    }

    /// Tightest region containing everything this mask covers within a
    /// `width` x `height` frame.
    pub fn bounding_box(&self, width: u32, height: u32) -> Result<Option<Region>> {
        Ok(self.to_coverage(Shape::gray(width, height))?.bounding_box())
    }

    fn lock_memo(&self) -> std::sync::MutexGuard<'_, Option<(Shape, bool, Arc<Coverage>)>> {
        // The slot is only ever replaced whole, so a poisoned lock is still consistent.
        self.node
            .memo
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn rasterise(&self, shape: Shape) -> Result<Coverage> {
        match &self.node.kind {
            MaskKind::Image { image, .. } => image_coverage(image, shape),
            MaskKind::BinOp { op, left, right } => {
                let l = left.to_coverage(shape)?;
                let r = right.to_coverage(shape)?;
                let l = l.as_ref().clone();
                Ok(match op {
                    BinOp::Union => l.zip_with(&r, |a, b| a | b),
                    BinOp::Difference => l.zip_with(&r, |a, b| a & !b),
                })
            }
            MaskKind::Region(region) => {
                let mut coverage = Coverage::filled(shape, 0);
                let frame = Region::full_frame(shape.width, shape.height);
                if let Some(r) = Region::intersect(*region, Some(frame)) {
                    let channels = shape.channels as usize;
                    let row_len = shape.width as usize * channels;
                    for y in r.y..r.bottom() {
                        let start = y as usize * row_len + r.x as usize * channels;
                        let end = y as usize * row_len + r.right() as usize * channels;
                        coverage.data[start..end].fill(255);
                    }
                }
                Ok(coverage)
            }
        }
    }

    fn is_plain_binop(&self) -> Option<BinOp> {
        match &self.node.kind {
            MaskKind::BinOp { op, .. } if !self.invert => Some(*op),
            _ => None,
        }
    }
}

fn image_coverage(image: &MaskImage, shape: Shape) -> Result<Coverage> {
    let (w, h) = image.dimensions();
    if (w, h) != (shape.width, shape.height) {
        return Err(Error::ShapeMismatch {
            mask: (h, w),
            required: (shape.height, shape.width),
        });
    }
    let data = match (image, shape.channels) {
        (MaskImage::Gray(gray), 1) => gray.as_raw().clone(),
        (MaskImage::Gray(gray), _) => gray.as_raw().iter().flat_map(|&v| [v, v, v]).collect(),
        (MaskImage::Rgb(rgb), 1) => image::imageops::grayscale(rgb).into_raw(),
        (MaskImage::Rgb(rgb), _) => rgb.as_raw().clone(),
    };
    Ok(Coverage { shape, data })
}

impl From<Region> for Mask {
    fn from(region: Region) -> Self {
        Mask::from_kind(MaskKind::Region(Some(region)))
    }
}

/// `None` is "no region": an empty mask, and its inverse covers everything.
impl From<Option<Region>> for Mask {
    fn from(region: Option<Region>) -> Self {
        Mask::from_kind(MaskKind::Region(region))
    }
}

impl Add<Mask> for Mask {
    type Output = Mask;

    fn add(self, rhs: Mask) -> Mask {
        Mask::binop(BinOp::Union, self, rhs)
    }
}

impl Add<Region> for Mask {
    type Output = Mask;

    fn add(self, rhs: Region) -> Mask {
        Mask::binop(BinOp::Union, self, Mask::from(rhs))
    }
}

impl Sub<Mask> for Mask {
    type Output = Mask;

    fn sub(self, rhs: Mask) -> Mask {
        Mask::binop(BinOp::Difference, self, rhs)
    }
}

impl Sub<Region> for Mask {
    type Output = Mask;

    fn sub(self, rhs: Region) -> Mask {
        Mask::binop(BinOp::Difference, self, Mask::from(rhs))
    }
}

impl Not for Mask {
    type Output = Mask;

    fn not(self) -> Mask {
        Mask {
            node: self.node,
            invert: !self.invert,
        }
    }
}

impl Not for &Mask {
    type Output = Mask;

    fn not(self) -> Mask {
        !self.clone()
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.invert { "~" } else { "" };
        match &self.node.kind {
            MaskKind::Image { name: Some(name), .. } => {
                write!(f, "{prefix}Mask('{}')", name.replace('\'', "\\'"))
            }
            MaskKind::Image { name: None, .. } => write!(f, "{prefix}Mask(<Image>)"),
            MaskKind::Region(Some(region)) => write!(f, "{prefix}{region}"),
            MaskKind::Region(None) => write!(f, "{prefix}Mask(None)"),
            MaskKind::BinOp { op, left, right } => {
                // Same precedence, left-associative: only the right operand
                // can need brackets, and `a + (b + c)` is associative.
                let right_needs_parens = match (op, right.is_plain_binop()) {
                    (BinOp::Difference, Some(_)) => true,
                    (BinOp::Union, Some(BinOp::Difference)) => true,
                    _ => false,
                };
                let right = if right_needs_parens {
                    format!("({right})")
                } else {
                    right.to_string()
                };
                if self.invert {
                    write!(f, "~({left} {} {right})", op.symbol())
                } else {
                    write!(f, "{left} {} {right}", op.symbol())
                }
            }
        }
    }
}
