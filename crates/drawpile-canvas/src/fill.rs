//! Region fill
//!
//! Scanline flood fill over a frozen layer snapshot. A pixel joins the
//! region when its largest channel difference to the seed pixel is within
//! the tolerance. Because the comparison is always against the seed color,
//! refilling an already filled area with a similar color still terminates.
//!
//! The fill itself never touches shared state: it reads a [`FillSource`] and
//! returns a [`FillResult`], which [`FillResult::to_commands`] turns into
//! ordinary `PutImage` commands.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use drawpile_msg::codec::PUT_IMAGE_HEADER_LEN;
use drawpile_msg::{BlendMode, Command, LayerId, Message, MAX_PAYLOAD_LEN};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::FillError;
use crate::tree::LayerTree;

/// Row-major ARGB pixels of one layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerImage {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl LayerImage {
    /// Fully transparent image
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, 0)
    }

    /// Image of one solid color
    #[must_use]
    pub fn filled(width: u32, height: u32, argb: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![argb; width as usize * height as usize],
        }
    }

    /// Wrap existing pixels, `None` when the length does not match
    #[must_use]
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u32>) -> Option<Self> {
        (pixels.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Image width
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel at a position, transparent outside the image
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> u32 {
        if x < self.width && y < self.height {
            self.pixels[y as usize * self.width as usize + x as usize]
        } else {
            0
        }
    }

    /// Set a pixel; positions outside the image are ignored
    pub fn set(&mut self, x: u32, y: u32, argb: u32) {
        if x < self.width && y < self.height {
            self.pixels[y as usize * self.width as usize + x as usize] = argb;
        }
    }
}

/// Frozen input for a fill: a layer tree snapshot and layer pixels
#[derive(Debug, Clone)]
pub struct FillSource {
    tree: Arc<LayerTree>,
    width: u32,
    height: u32,
    images: HashMap<LayerId, LayerImage>,
}

impl FillSource {
    /// Source over a tree snapshot with no pixel data yet
    #[must_use]
    pub fn new(tree: Arc<LayerTree>, width: u32, height: u32) -> Self {
        Self {
            tree,
            width,
            height,
            images: HashMap::new(),
        }
    }

    /// Attach a layer's pixels
    #[must_use]
    pub fn with_image(mut self, id: LayerId, image: LayerImage) -> Self {
        self.images.insert(id, image);
        self
    }

    fn layer_view(&self, id: LayerId) -> Result<LayerImage, FillError> {
        let layer = self.tree.get(id).ok_or(FillError::LayerNotFound(id))?;
        if layer.group {
            return Err(FillError::IsAGroup(id));
        }
        let mut view = LayerImage::new(self.width, self.height);
        if let Some(image) = self.images.get(&id) {
            for y in 0..self.height {
                for x in 0..self.width {
                    view.set(x, y, image.get(x, y));
                }
            }
        }
        Ok(view)
    }

    /// Visible layers composited bottom to top with their opacity
    fn merged_view(&self) -> LayerImage {
        let mut view = LayerImage::new(self.width, self.height);
        for layer in self.tree.iter().filter(|l| !l.group) {
            let Some(opacity) = self.effective_opacity(layer.id) else {
                continue;
            };
            let Some(image) = self.images.get(&layer.id) else {
                continue;
            };
            for y in 0..self.height {
                for x in 0..self.width {
                    let below = view.get(x, y);
                    view.set(x, y, src_over(below, image.get(x, y), opacity));
                }
            }
        }
        view
    }

    /// Opacity including all parent groups, `None` when anything is hidden
    fn effective_opacity(&self, id: LayerId) -> Option<f32> {
        let mut opacity = 1.0;
        let mut current = self.tree.get(id);
        while let Some(layer) = current {
            if layer.hidden {
                return None;
            }
            opacity *= f32::from(layer.opacity) / 255.0;
            current = self.tree.get(layer.parent);
        }
        Some(opacity)
    }
}

fn src_over(dst: u32, src: u32, opacity: f32) -> u32 {
    let [da, dr, dg, db] = dst.to_be_bytes();
    let [sa, sr, sg, sb] = src.to_be_bytes();
    let sa = f32::from(sa) / 255.0 * opacity;
    let da = f32::from(da) / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return 0;
    }
    let channel = |s: u8, d: u8| -> u8 {
        let v = (f32::from(s) * sa + f32::from(d) * da * (1.0 - sa)) / out_a;
        v.round().clamp(0.0, 255.0) as u8
    };
    u32::from_be_bytes([
        (out_a * 255.0).round() as u8,
        channel(sr, dr),
        channel(sg, dg),
        channel(sb, db),
    ])
}

/// Which pixels the fill samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillSelector {
    /// One layer
    Layer(LayerId),
    /// All visible layers merged
    Merged,
}

/// Fill parameters
#[derive(Debug, Clone, Copy)]
pub struct FillParams {
    /// Seed x
    pub x: i64,
    /// Seed y
    pub y: i64,
    /// ARGB fill color
    pub color: u32,
    /// Color distance threshold, 0.0 to 1.0
    pub tolerance: f64,
    /// Sampled pixels
    pub selector: FillSelector,
    /// Maximum number of pixels in the grown region
    pub size_limit: usize,
    /// Grow (positive) or shrink (negative) the region by this many pixels
    pub expand: i32,
}

/// Filled pixels and their position on the canvas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillResult {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width, 0 when nothing needs filling
    pub width: u32,
    /// Height, 0 when nothing needs filling
    pub height: u32,
    /// Row-major ARGB, fill color or transparent
    pub pixels: Vec<u32>,
}

impl FillResult {
    fn empty() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            pixels: Vec::new(),
        }
    }

    /// Whether the fill changes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels that will be painted
    #[must_use]
    pub fn filled_pixels(&self) -> usize {
        self.pixels.iter().filter(|p| **p != 0).count()
    }

    /// Wrap the result in `PutImage` commands
    ///
    /// The image is split into row bands small enough for one message each.
    /// Pixel data is zlib-compressed big-endian ARGB.
    pub fn to_commands(
        &self,
        ctx: u8,
        layer: LayerId,
        mode: BlendMode,
    ) -> Result<Vec<Message>, FillError> {
        let max_image = MAX_PAYLOAD_LEN - PUT_IMAGE_HEADER_LEN;
        let mut messages = Vec::new();
        let mut row = 0;
        let mut band = self.height;

        while row < self.height {
            let rows = band.min(self.height - row);
            let image = self.compress_rows(row, rows)?;
            if image.len() > max_image {
                if rows == 1 {
                    return Err(FillError::Encoding(format!(
                        "a single row compresses to {} bytes",
                        image.len()
                    )));
                }
                band = rows / 2;
                continue;
            }
            messages.push(Message::new(
                ctx,
                Command::PutImage {
                    layer,
                    mode,
                    x: self.x,
                    y: self.y + row,
                    w: self.width,
                    h: rows,
                    image,
                },
            ));
            row += rows;
        }
        Ok(messages)
    }

    fn compress_rows(&self, start: u32, rows: u32) -> Result<Vec<u8>, FillError> {
        let width = self.width as usize;
        let begin = start as usize * width;
        let end = begin + rows as usize * width;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        for pixel in &self.pixels[begin..end] {
            encoder
                .write_all(&pixel.to_be_bytes())
                .map_err(|e| FillError::Encoding(e.to_string()))?;
        }
        encoder
            .finish()
            .map_err(|e| FillError::Encoding(e.to_string()))
    }
}

/// Flood fill from a seed pixel
pub fn flood_fill(source: &FillSource, params: &FillParams) -> Result<FillResult, FillError> {
    let (width, height) = (source.width, source.height);
    if params.x < 0 || params.y < 0 || params.x >= i64::from(width) || params.y >= i64::from(height)
    {
        return Err(FillError::OutOfBounds {
            x: params.x,
            y: params.y,
        });
    }

    let image = match params.selector {
        FillSelector::Layer(id) => source.layer_view(id)?,
        FillSelector::Merged => source.merged_view(),
    };

    let mut mask = grow_region(
        &image,
        params.x as u32,
        params.y as u32,
        tolerance_to_channel(params.tolerance),
        params.size_limit,
    )?;

    let radius = params.expand.unsigned_abs() as usize;
    if radius > 0 {
        mask = morph(&mask, width as usize, height as usize, radius, params.expand > 0);
    }

    let result = crop(&mask, &image, params.color);
    debug!(
        width = result.width,
        height = result.height,
        pixels = result.filled_pixels(),
        "flood fill finished"
    );
    Ok(result)
}

fn tolerance_to_channel(tolerance: f64) -> u8 {
    (tolerance.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn channel_distance(a: u32, b: u32) -> u8 {
    a.to_be_bytes()
        .iter()
        .zip(b.to_be_bytes().iter())
        .map(|(x, y)| x.abs_diff(*y))
        .max()
        .unwrap_or(0)
}

/// Scanline region growing; returns a row-major mask
fn grow_region(
    image: &LayerImage,
    seed_x: u32,
    seed_y: u32,
    tolerance: u8,
    size_limit: usize,
) -> Result<Vec<bool>, FillError> {
    let width = image.width as usize;
    let height = image.height as usize;
    let seed = image.get(seed_x, seed_y);
    let admit = |x: usize, y: usize| channel_distance(image.pixels[y * width + x], seed) <= tolerance;

    let mut mask = vec![false; width * height];
    let mut count = 0usize;
    let mut stack = vec![(seed_x as usize, seed_y as usize)];

    while let Some((x, y)) = stack.pop() {
        if mask[y * width + x] {
            continue;
        }
        let mut x0 = x;
        while x0 > 0 && !mask[y * width + x0 - 1] && admit(x0 - 1, y) {
            x0 -= 1;
        }
        let mut x1 = x;
        while x1 + 1 < width && !mask[y * width + x1 + 1] && admit(x1 + 1, y) {
            x1 += 1;
        }
        for cx in x0..=x1 {
            mask[y * width + cx] = true;
        }
        count += x1 - x0 + 1;
        if count > size_limit {
            return Err(FillError::TooLarge { limit: size_limit });
        }

        let neighbours = [y.checked_sub(1), (y + 1 < height).then_some(y + 1)];
        for ny in neighbours.into_iter().flatten() {
            let mut in_run = false;
            for cx in x0..=x1 {
                let open = !mask[ny * width + cx] && admit(cx, ny);
                if open && !in_run {
                    stack.push((cx, ny));
                }
                in_run = open;
            }
        }
    }
    Ok(mask)
}

/// Square-kernel dilation (`grow`) or erosion of a mask
fn morph(mask: &[bool], width: usize, height: usize, radius: usize, grow: bool) -> Vec<bool> {
    // pixels outside the canvas count as unset for dilation and set for erosion
    let pass = |src: &[bool], horizontal: bool| -> Vec<bool> {
        let mut out = vec![false; src.len()];
        for y in 0..height {
            for x in 0..width {
                let (pos, len) = if horizontal { (x, width) } else { (y, height) };
                let lo = pos.saturating_sub(radius);
                let hi = (pos + radius).min(len - 1);
                let at = |i: usize| {
                    if horizontal {
                        src[y * width + i]
                    } else {
                        src[i * width + x]
                    }
                };
                out[y * width + x] = if grow {
                    (lo..=hi).any(at)
                } else {
                    (lo..=hi).all(at)
                };
            }
        }
        out
    };
    let horizontal = pass(mask, true);
    pass(&horizontal, false)
}

fn crop(mask: &[bool], image: &LayerImage, color: u32) -> FillResult {
    let width = image.width as usize;
    let paint = |i: usize| mask[i] && image.pixels[i] != color;

    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for i in (0..mask.len()).filter(|i| paint(*i)) {
        let (x, y) = (i % width, i / width);
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    let Some((x0, y0, x1, y1)) = bounds else {
        return FillResult::empty();
    };

    let (w, h) = (x1 - x0 + 1, y1 - y0 + 1);
    let mut pixels = Vec::with_capacity(w * h);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let i = y * width + x;
            pixels.push(if paint(i) { color } else { 0 });
        }
    }
    FillResult {
        x: x0 as u32,
        y: y0 as u32,
        width: w as u32,
        height: h as u32,
        pixels,
    }
}
